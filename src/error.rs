//! Error types
//!
//! Every fallible API returns [`Error`] as a value; nothing panics on server
//! or device misbehaviour. Variants map one-to-one onto the domain error
//! kinds of the protocol: usage and parameter errors are caught before any
//! bytes are sent, server-connection errors are fatal for the mailbox, and
//! the transient receive variants may be retried.

use thiserror::Error;

/// Domain errors of the client library
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Illegal call ordering, e.g. an operation before session start
    #[error("usage: {0}")]
    Usage(String),

    /// Invalid caller-supplied parameter
    #[error("parameter: {0}")]
    Param(String),

    /// Transport failure or framing violation; the mailbox is disconnected
    #[error("server connection: {0}")]
    ServerCon(String),

    /// The server demands an unlock before serving requests
    #[error("server is locked")]
    ServerLocked,

    /// Cannot access the device (power-down, reset active, no device)
    #[error("device access: {0}")]
    DeviceAccess(String),

    /// The device requires a key
    #[error("device is locked")]
    DeviceLocked,

    /// A read transaction failed at the device
    #[error("read at addr {addr:#x}{}: {detail}", fmt_map(.addr_map))]
    RwRead {
        addr: u64,
        addr_map: u8,
        detail: String,
    },

    /// A write or fill transaction failed at the device
    #[error("write at addr {addr:#x}{}: {detail}", fmt_map(.addr_map))]
    RwWrite {
        addr: u64,
        addr_map: u8,
        detail: String,
    },

    /// Channel subscribe refused
    #[error("channel setup: {0}")]
    ChlSetup(String),

    /// Message could not be sent (e.g. buffer full); may be retried
    #[error("channel send: {0}")]
    ChlSend(String),

    /// No channel message available within the timeout; may be retried
    #[error("no channel message received")]
    ChlRcv,

    /// No trace data available within the timeout; may be retried
    #[error("no trace data received")]
    TrcRcv,

    /// Operation not supported by this implementation or setup
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Unexpected server behaviour not covered by a more specific kind
    #[error("general: {0}")]
    General(String),
}

impl Error {
    /// Transient errors (no data within the timeout) may be retried on the
    /// same client object; everything else is either a caller bug or ends
    /// the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ChlRcv | Error::TrcRcv)
    }
}

fn fmt_map(addr_map: &u8) -> String {
    if *addr_map > 0 {
        format!(" in addr_map {addr_map}")
    } else {
        String::new()
    }
}

impl From<crate::packet::Truncated> for Error {
    fn from(_: crate::packet::Truncated) -> Self {
        Error::ServerCon("protocol violation (truncated packet)".to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::ServerCon(e.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

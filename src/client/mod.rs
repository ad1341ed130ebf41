//! Client facades
//!
//! One facade per client kind: [`RwClient`](crate::RwClient) for memory
//! transactions, [`ChannelClient`](crate::ChannelClient) for framed message
//! exchange, [`TraceClient`](crate::TraceClient) for continuous trace
//! streams. Each owns one mailbox and one codec and walks the session
//! lifecycle: connect, optional unlock, target enumeration, session start,
//! device connect, operations. Dropping the facade releases the mailbox;
//! the server infers the session end from the disconnect.

pub(crate) mod chl;
pub(crate) mod rw;
pub(crate) mod server;
pub(crate) mod trc;

/// Default receive timeout: 20 s in release builds, none in debug builds so
/// stepping through a session under a debugger does not tear it down.
pub const DEFAULT_TIMEOUT_MS: u32 = if cfg!(debug_assertions) { 0 } else { 20_000 };

/// Response cap for server-connection operations (list pages included)
pub(crate) const SERVER_CON_MAX_RSP: u32 = 4096;

//! On-wire protocol constants
//!
//! All multi-byte values are little-endian. Three levels of packet wrapping:
//! PL0 memory-access micro-ops, wrapped by PL1 command frames, wrapped by
//! PL2 transport envelopes. A PL2 envelope is a 32-bit length word (counting
//! itself) followed by the PL1 payload.

/// Protocol version implemented by this crate
pub const PROTOC_VER: u8 = 1;

/// Default broker port on the local network
pub const PORT_NUM_SERVER_DEFAULT: u16 = 24817;
/// Default port of a remote test-farm proxy
pub const PORT_NUM_PROXY_DEFAULT: u16 = 24818;
/// Default port of a device server locally connected to the broker
pub const PORT_NUM_DEVICE_DEFAULT: u16 = 24823;

/// 64-byte identifier strings (targets, server name)
pub const NAME_LEN64: usize = 64;
/// 32-byte identifier strings (client names)
pub const NAME_LEN32: usize = 32;
/// 16-byte identifier strings (user names, session names, passwords)
pub const NAME_LEN16: usize = 16;
/// 8-byte identifier strings (device-id hash string)
pub const NAME_LEN8: usize = 8;

/// Maximum PL2 packet size in bytes (64 KiB payload plus framing)
pub const PL2_MAX_PKT_SIZE: u32 = 0x10008;
/// Minimum PL2 packet size an agent must support
pub const PL2_MAX_PKT_SIZE_MIN: u32 = 128;
/// Maximum payload of a single PL0 block transfer
pub const PL0_DATA_BLK_SIZE: u32 = 1024;
/// Maximum channel message length, including the optional init word
pub const CHL_MAX_MSG_SIZE: u32 = 1024;
/// Size limit of certain variable-length packet types (target/client lists)
pub const MAX_PKT_SIZE_1KB: u32 = 1024;

/// Maximum device key length in bytes
pub const UNLOCK_MAX_KEY_LEN: usize = 512;
/// Maximum unlock challenge length in bytes
pub const UNLOCK_MAX_CHALLENGE_LEN: usize = 512;

/// PL1 command identifiers
pub mod pl1cmd {
    pub const SERVER_CONNECT: u8 = 0x80;
    pub const GET_TARGETS: u8 = 0x86;
    pub const GET_CLIENTS: u8 = 0x87;
    pub const SESSION_START: u8 = 0xA1;
    pub const PING: u8 = 0xA2;
    pub const DEVICE_CONNECT: u8 = 0xA8;
    pub const DEVICE_RESET_COUNT: u8 = 0xAA;
    pub const GET_CHALLENGE: u8 = 0xAC;
    pub const SET_DEVICE_KEY: u8 = 0xAD;
    pub const PL0_START: u8 = 0xB0;
    pub const PL0_END: u8 = 0xB1;
    pub const CHL_SUBSCRIBE: u8 = 0xC0;
    pub const CHL_UNSUBSCRIBE: u8 = 0xC2;
    pub const CHL_MSG_C2D: u8 = 0xCC;
    pub const CHL_MSG_D2C: u8 = 0xCD;
    pub const TRC_SUBSCRIBE: u8 = 0xD0;
    pub const TRC_UNSUBSCRIBE: u8 = 0xD2;
    pub const TRC_DATA: u8 = 0xD4;
    pub const ERROR: u8 = 0xEE;
}

/// PL0 micro-op command identifiers
pub mod pl0cmd {
    /// No response packet. Sets the access mode for following micro-ops.
    pub const ACCESS_MODE: u8 = 0x10;
    /// No response packet. Sets the address map for following micro-ops.
    pub const ADDR_MAP: u8 = 0x11;
    /// No response packet. Sets a 32-bit base address.
    pub const BASE_ADDR32: u8 = 0x15;
    /// No response packet. Sets a 64-bit base address.
    pub const BASE_ADDR64: u8 = 0x16;
    pub const WR8: u8 = 0x20;
    pub const RD8: u8 = 0x21;
    pub const WR16: u8 = 0x22;
    pub const RD16: u8 = 0x23;
    pub const WR32: u8 = 0x24;
    pub const RD32: u8 = 0x25;
    pub const WR64: u8 = 0x26;
    pub const RD64: u8 = 0x27;
    pub const WRBLK: u8 = 0x2A;
    pub const FILL: u8 = 0x2B;
    pub const RDBLK: u8 = 0x2C;
    /// Compact encoding of a full 1024-byte block read, `wl = 0` meaning 256 words
    pub const RDBLK1KB: u8 = 0x2D;

    /// Read-family micro-op check
    pub fn is_rd(cmd: u8) -> bool {
        matches!(cmd, RD8 | RD16 | RD32 | RD64 | RDBLK | RDBLK1KB)
    }

    /// Write-family micro-op check (fill included)
    pub fn is_wr_or_fill(cmd: u8) -> bool {
        matches!(cmd, WR8 | WR16 | WR32 | WR64 | WRBLK | FILL)
    }
}

/// Single-byte packet error codes
pub mod plerr {
    /// No error (PL1)
    pub const NO_ERROR: u8 = 0x08;
    /// Wrong parameter value
    pub const PARAM: u8 = 0x10;
    /// Command or parameter not supported by this implementation or setup
    pub const NOT_SUPPORTED: u8 = 0x12;
    /// Not correctly used (e.g. wrong sequence of commands)
    pub const USAGE: u8 = 0x14;
    /// Packet layer protocol violation
    pub const PROTOCOL: u8 = 0x1E;
    /// Command requested by PL1 failed
    pub const CMD_FAILED: u8 = 0x20;
    /// Server is locked
    pub const SERVER_LOCKED: u8 = 0x32;
    /// Session name or password mismatch
    pub const SESSION: u8 = 0x38;
    /// Device reset was detected, sent to all clients as an unsolicited packet
    pub const DEV_RESET: u8 = 0x44;
    /// Device is locked, no access possible
    pub const DEV_LOCKED: u8 = 0x46;
    /// Device access failed (e.g. debug port connection)
    pub const DEV_ACCESS: u8 = 0x48;

    /// No error (PL0)
    pub const PL0_NO_ERROR: u8 = 0x80;
    /// Set acc_mode is not supported
    pub const PL0_ACC_MODE: u8 = 0x89;
    /// Set addr_map is not supported
    pub const PL0_ADDR_MAP: u8 = 0x8A;
    /// Agent protection prevents access to this address
    pub const PL0_ADDR_BLOCKED: u8 = 0x8B;
    /// RW access was not (completely) successful, e.g. device internal bus error
    pub const PL0_DATA: u8 = 0x8D;
    /// Consequential error since a previous PL0 command failed
    pub const PL0_CONSEQUENTIAL: u8 = 0x98;
    /// Delimiter for PL0 error codes
    pub const PL0_HIGHEST: u8 = 0x9F;
}

/// Default address map for device access
pub const AM0: u8 = 0;
/// Auxiliary address map for device access
pub const AM1: u8 = 1;
/// Address maps 12 and above are for special usage and exclusive per envelope
pub const AM12: u8 = 12;
/// Exclusively used by a proxy server inside the device
pub const AM14: u8 = 14;
/// Exclusively used inside the broker
pub const AM15: u8 = 15;
/// Legacy alias, rewritten to [`AM15`] during request generation
pub const AM132: u8 = 132;

/// Mask of address maps that may be mixed within one PL1 envelope
pub const AM_MASK_SHARED: u16 = 0x0FFF;
/// Mask of address maps that must appear alone within one PL1 envelope
pub const AM_MASK_EXCLUSIVE: u16 = 0xF000;

/// Number of message channels
pub const CHL_NUM_MAX: u8 = 32;
/// Channel priority with the lowest precedence, the only one that may be shared
pub const CHL_LOWEST_PRIORITY: u8 = 31;

bitflags::bitflags! {
    /// Device connection feature mask, as negotiated in [`ConInfo`](crate::ConInfo)
    /// and requested by `device_connect`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DevConFeat: u16 {
        /// Trigger a device reset
        const RESET           = 0x0001;
        /// Halt after the triggered reset
        const HALT_AFTER_RESET = 0x0002;
        /// Trigger a reset and halt
        const RESET_AND_HALT  = 0x0003;
        /// Unlock the device with a previously set key
        const UNLOCK          = 0x0010;
        /// Unlock with a challenge/response exchange
        const CHALLENGE_RESPONSE = 0x0020;
        /// Unlocking with challenge and response protocol
        const UNLOCK_CNR      = 0x0030;
        /// Connect to an unknown device, no device interaction
        const UNKNOWN         = 0x4000;
        /// Reset an unknown device
        const UNKNOWN_RESET   = 0x4001;
    }
}

impl Default for DevConFeat {
    fn default() -> Self {
        DevConFeat::empty()
    }
}

/// Physical connection classes between access hardware and device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DevConPhys {
    #[default]
    Unknown = 0,
    Jtag = 0x01,
    Dap = 0x10,
    DapDap = 0x11,
    DapSpd = 0x12,
    DapDxcpl = 0x13,
    DapDxcm = 0x14,
    Swd = 0x20,
    /// IP-addressable device with an intrinsic unique identifier
    Eth = 0x80,
}

impl DevConPhys {
    pub fn from_value(v: u8) -> Self {
        match v {
            0x01 => Self::Jtag,
            0x10 => Self::Dap,
            0x11 => Self::DapDap,
            0x12 => Self::DapSpd,
            0x13 => Self::DapDxcpl,
            0x14 => Self::DapDxcm,
            0x20 => Self::Swd,
            0x80 => Self::Eth,
            _ => Self::Unknown,
        }
    }
}

/// Client kinds as announced at session start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientType {
    Unknown = 0,
    Rw = 1,
    Chl = 2,
    Trc = 3,
}

/// Channel target announced at session start of a channel client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ChlTarget {
    #[default]
    Unknown = 0,
    /// Device memory mapped protocol
    Dmm = 1,
}

/// Channel transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Cht {
    /// Not subscribed
    #[default]
    None = 0,
    /// Messages are sent from client to device
    Send = 0x01,
    /// Messages are received by the client from the device
    Rcv = 0x02,
    /// Only use if the client always knows when to send and when to receive
    Bidi = 0x03,
}

impl Cht {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Send),
            0x02 => Some(Self::Rcv),
            0x03 => Some(Self::Bidi),
            _ => None,
        }
    }

    /// Whether this subscription receives device-to-client messages
    pub fn is_receiving(self) -> bool {
        matches!(self, Self::Rcv | Self::Bidi)
    }
}

/// Channel and trace subscribe sharing option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Chso {
    /// Open channel
    #[default]
    Default = 0,
    /// Exclusive channel
    Exclusive = 0x01,
}

impl Chso {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Default),
            1 => Some(Self::Exclusive),
            _ => None,
        }
    }
}

/// Channel message option byte
pub mod cho {
    /// No option
    pub const NONE: u8 = 0;
    /// First payload word is the channel init value
    pub const INIT: u8 = 0x01;
}

/// Trace stream content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TrcType {
    #[default]
    Unknown = 0,
    /// MTSC container stream
    Mtsc = 1,
}

impl TrcType {
    pub fn from_value(v: u8) -> Self {
        if v == 1 {
            Self::Mtsc
        } else {
            Self::Unknown
        }
    }
}

/// Trace stream state delivered with each data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TrcState {
    /// Stream continued, the ordinary case
    #[default]
    Cont = 0,
    /// Sync point for trace decoding
    Sync = 1,
    /// Stream start after trace hardware (re)configuration
    StartAfterConfig = 2,
    /// Stream start after an interruption by a reset
    StartAfterReset = 3,
    /// Stream start after a trace-system specific interruption
    StartAfterInterrupt = 4,
}

impl TrcState {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Cont),
            1 => Some(Self::Sync),
            2 => Some(Self::StartAfterConfig),
            3 => Some(Self::StartAfterReset),
            4 => Some(Self::StartAfterInterrupt),
            _ => None,
        }
    }
}

/// Options for how to obtain an unlock challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UnlockCrOption {
    /// Challenge is the unique device id, readable from the locked device
    Udid = 0x01,
    /// Unique device id can only be read after a reset
    UdidRst = 0x81,
    /// Challenge is read from the locked device
    Cr = 0x04,
    /// Challenge can only be read after a reset
    CrRst = 0x84,
    Custom0 = 0xC0,
    Custom1 = 0xC1,
    Custom2 = 0xC2,
    Custom3 = 0xC3,
}

/// Device unlocking options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UnlockOption {
    /// Unlocking is possible any time
    HotAttach = 0x01,
    /// Unlocking by firmware before application software is started
    AfterRstByFw = 0x08,
    /// Unlocking by application software in a time window after reset
    AfterRstByAppSw = 0x09,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pl0_cmd_families() {
        assert!(pl0cmd::is_rd(pl0cmd::RD8));
        assert!(pl0cmd::is_rd(pl0cmd::RDBLK1KB));
        assert!(!pl0cmd::is_rd(pl0cmd::WR8));
        assert!(pl0cmd::is_wr_or_fill(pl0cmd::FILL));
        assert!(pl0cmd::is_wr_or_fill(pl0cmd::WRBLK));
        assert!(!pl0cmd::is_wr_or_fill(pl0cmd::RDBLK));
        assert!(!pl0cmd::is_rd(pl0cmd::ACCESS_MODE));
    }

    #[test]
    fn dev_con_feat_wire_encoding() {
        assert_eq!(DevConFeat::RESET_AND_HALT.bits(), 0x0003);
        assert_eq!(DevConFeat::UNLOCK_CNR.bits(), 0x0030);
        assert_eq!(DevConFeat::UNKNOWN_RESET.bits(), 0x4001);
        assert!(DevConFeat::RESET_AND_HALT.contains(DevConFeat::RESET));
    }

    #[test]
    fn exclusive_and_shared_masks_partition_the_maps() {
        assert_eq!(AM_MASK_SHARED | AM_MASK_EXCLUSIVE, 0xFFFF);
        assert_eq!(AM_MASK_SHARED & AM_MASK_EXCLUSIVE, 0);
        assert_ne!(1u16 << AM12 & AM_MASK_EXCLUSIVE, 0);
        assert_ne!(1u16 << (AM12 - 1) & AM_MASK_SHARED, 0);
    }

    #[test]
    fn cht_parses_only_valid_directions() {
        assert_eq!(Cht::from_value(1), Some(Cht::Send));
        assert_eq!(Cht::from_value(3), Some(Cht::Bidi));
        assert_eq!(Cht::from_value(4), None);
        assert!(Cht::Bidi.is_receiving());
        assert!(!Cht::Send.is_receiving());
    }
}

//! User-level read/write transactions
//!
//! A transaction list is borrowed for the duration of one execute call.
//! Read destinations are caller-owned mutable slices that the response
//! parser fills in; write sources are copied into the request at planning
//! time.

use crate::wire::plerr;

/// Payload of one transaction
#[derive(Debug)]
pub enum TransKind<'a> {
    /// Read into the caller's buffer; its length is the transfer size
    Read(&'a mut [u8]),
    /// Write from the caller's buffer; its length is the transfer size
    Write(&'a [u8]),
    /// Fill `num_bytes` with a repeating 64-bit pattern. The address must be
    /// 8-byte aligned and `num_bytes` a non-zero multiple of 8.
    Fill { value: u64, num_bytes: u32 },
}

/// One user-level transaction against the device address space
#[derive(Debug)]
pub struct RwTrans<'a> {
    /// Target address
    pub addr: u64,
    /// Opaque access-mode selector, 0 is the device default
    pub acc_mode: u16,
    /// Address map 0..=15 (132 is accepted as an alias for 15)
    pub addr_map: u8,
    pub kind: TransKind<'a>,
}

impl<'a> RwTrans<'a> {
    pub fn read(addr: u64, dest: &'a mut [u8], addr_map: u8) -> Self {
        Self {
            addr,
            acc_mode: 0,
            addr_map,
            kind: TransKind::Read(dest),
        }
    }

    pub fn write(addr: u64, src: &'a [u8], addr_map: u8) -> Self {
        Self {
            addr,
            acc_mode: 0,
            addr_map,
            kind: TransKind::Write(src),
        }
    }

    pub fn fill(addr: u64, value: u64, num_bytes: u32, addr_map: u8) -> Self {
        Self {
            addr,
            acc_mode: 0,
            addr_map,
            kind: TransKind::Fill { value, num_bytes },
        }
    }

    /// Transfer size in bytes
    pub fn num_bytes(&self) -> u32 {
        match &self.kind {
            TransKind::Read(d) => d.len() as u32,
            TransKind::Write(s) => s.len() as u32,
            TransKind::Fill { num_bytes, .. } => *num_bytes,
        }
    }
}

/// Per-transaction result after an execute call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RwTransRsp {
    /// Bytes confirmed by the device; equals the transfer size on success
    pub num_bytes_ok: u32,
    /// PL0 error code; 0x80 is no-error, the protocol sentinel 0x1E means
    /// no response was observed for this transaction
    pub pl_err: u8,
}

impl Default for RwTransRsp {
    fn default() -> Self {
        Self {
            num_bytes_ok: 0,
            pl_err: plerr::PROTOCOL,
        }
    }
}

impl RwTransRsp {
    pub fn is_ok(&self) -> bool {
        self.pl_err == plerr::PL0_NO_ERROR
    }
}

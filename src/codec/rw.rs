//! Read/write request planner and response parser
//!
//! Translates a list of user transactions into a packed stream of PL0
//! micro-ops inside one or more PL2 envelopes, and binds the batched
//! results back to the originating transactions.
//!
//! Within one envelope the planner tracks the current access mode, address
//! map and 64 KiB-aligned base address; micro-ops only carry the low 16
//! address bits, and state-change ops are emitted solely when the state
//! differs. An envelope may mix address maps below 12; maps 12..=15 must
//! appear alone. Unaligned transfers decompose into a minimal 1/2/4-byte
//! prefix, 64-bit-aligned block ops of up to 1024 bytes, and a mirrored
//! suffix. Each envelope carries a `pl1_cnt` sequence number, echoed by the
//! server in the pl0-end response and verified oldest-first.

use crate::error::{Error, Result};
use crate::info::ConInfo;
use crate::trans::{RwTrans, RwTransRsp, TransKind};
use crate::wire::{
    pl0cmd, pl1cmd, plerr, AM12, AM132, AM15, AM_MASK_EXCLUSIVE, AM_MASK_SHARED,
    PL0_DATA_BLK_SIZE,
};
use crate::packet::PktWriter;

/// Default request/response buffer size covering one full-size PL2 packet
pub const PKT_BUF_SIZE_DEFAULT: u32 = 0x10000;
/// Default limit of RW micro-ops per PL1 envelope
pub const MAX_NUM_RW_DEFAULT: u32 = 256;
/// Slack kept between the hard buffer size and the planning limits
const BUF_ALLOWANCE: u32 = 64;

/// Initial sequence counter; biased close to the 16-bit wrap so sequence
/// wrap handling is exercised early in every session.
const PL1_CNT_INIT: u16 = 0xFFC0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Rd,
    Wr,
    Fill,
}

/// One planned micro-op, bound to the user transaction it serves.
#[derive(Debug, Clone, Copy)]
struct Pl0Trans {
    addr: u64,
    num_bytes: u32,
    dir: Dir,
    addr_map: u8,
    /// Index into the user transaction list
    trans_idx: u32,
    /// Byte offset of this op's data within the user transaction
    data_off: u32,
}

/// Planner and parser for batched RW transactions.
#[derive(Debug)]
pub struct RwPlanner {
    rq: PktWriter,
    /// Total request budget across all envelopes
    max_rq_size: u32,
    /// Total response budget across all envelopes
    max_rsp_size: u32,
    /// Negotiated per-envelope limits
    pkt_max_rq: u32,
    pkt_max_rsp: u32,
    /// Micro-op limit per envelope
    max_num_rw: u32,

    num_pl2: u32,
    pl2_hdr_off: usize,
    pl0_start_off: usize,
    pl2_num_trans: u32,
    rsp_size: u32,
    pl2_rsp_start: u32,

    acc_mode: u16,
    addr_map: u8,
    addr_map_mask: u16,
    base_addr: u64,

    max_wr_blk: u32,
    max_rd_blk: u32,

    pl0_trans: Vec<Pl0Trans>,
    pl0_rsp: Vec<RwTransRsp>,
    num_rw_trans: usize,
    rw_rsp: Vec<RwTransRsp>,

    pl1_cnt_oldest: u16,
    pl1_cnt_last: u16,

    device_reset_count: u32,
    finalized: bool,
}

impl RwPlanner {
    /// Planner bound to a negotiated connection. Buffers cover one 64 KiB
    /// request; the effective data sizes are lower since the limits include
    /// packet overhead depending on transaction sizes and alignment.
    pub fn new(con_info: &ConInfo) -> Self {
        let mut p = Self::with_limits(
            PKT_BUF_SIZE_DEFAULT,
            PKT_BUF_SIZE_DEFAULT,
            con_info.pl0_max_num_rw as u32,
        );
        p.pkt_max_rq = con_info.max_pl2rq_pkt_size.min(p.max_rq_size);
        p.pkt_max_rsp = con_info.max_pl2rsp_pkt_size.min(p.max_rsp_size);
        p.rw_start();
        p
    }

    /// Planner with explicit limits; used by tests and embedding servers.
    pub fn with_limits(max_rq_size: u32, max_rsp_size: u32, max_num_rw: u32) -> Self {
        debug_assert_eq!(max_rq_size % 4, 0);
        debug_assert_eq!(max_rsp_size % 4, 0);
        debug_assert!(max_rq_size >= 4 * BUF_ALLOWANCE);
        debug_assert!(max_rsp_size >= 4 * BUF_ALLOWANCE);

        let max_rq = max_rq_size - BUF_ALLOWANCE;
        let max_rsp = max_rsp_size - BUF_ALLOWANCE;
        let mut p = Self {
            rq: PktWriter::with_capacity(max_rq_size as usize),
            max_rq_size: max_rq,
            max_rsp_size: max_rsp,
            pkt_max_rq: max_rq,
            pkt_max_rsp: max_rsp,
            max_num_rw: max_num_rw.max(1),
            num_pl2: 0,
            pl2_hdr_off: 0,
            pl0_start_off: 0,
            pl2_num_trans: 0,
            rsp_size: 0,
            pl2_rsp_start: 0,
            acc_mode: 0,
            addr_map: 0,
            addr_map_mask: 0,
            base_addr: 0,
            max_wr_blk: 0,
            max_rd_blk: 0,
            pl0_trans: Vec::new(),
            pl0_rsp: Vec::new(),
            num_rw_trans: 0,
            rw_rsp: Vec::new(),
            pl1_cnt_oldest: 0,
            pl1_cnt_last: PL1_CNT_INIT,
            device_reset_count: 0,
            finalized: false,
        };
        p.rw_start();
        p
    }

    /// Begin a new request. Discards any packets built since the last call.
    pub fn rw_start(&mut self) {
        self.num_pl2 = 0;
        self.acc_mode = 0;
        self.addr_map = 0;
        self.addr_map_mask = 0;
        self.base_addr = 0;
        self.pl0_trans.clear();
        self.pl0_rsp.clear();
        self.num_rw_trans = 0;
        self.rw_rsp.clear();
        self.rq.clear();
        self.rsp_size = 0;
        self.pl2_pkt_init();
        self.pl2_rsp_start = 0;
        self.max_wr_blk = (self.pkt_max_rq - 24).min(PL0_DATA_BLK_SIZE);
        self.max_rd_blk = (self.pkt_max_rsp - 24).min(PL0_DATA_BLK_SIZE);
        self.pl1_cnt_oldest = self.pl1_cnt_last.wrapping_add(1);
        self.finalized = false;
    }

    /// Plan a whole transaction list. All-or-nothing: on failure no packets
    /// remain and the offending transaction index is returned as the error.
    pub fn set_trans(&mut self, trans: &[RwTrans<'_>]) -> std::result::Result<(), usize> {
        self.rw_start();
        for (i, t) in trans.iter().enumerate() {
            let ok = match &t.kind {
                TransKind::Read(d) => {
                    self.add_rd(t.addr, d.len() as u32, i as u32, t.acc_mode, t.addr_map)
                }
                TransKind::Write(s) => self.add_wr(t.addr, s, i as u32, t.acc_mode, t.addr_map),
                TransKind::Fill { value, num_bytes } => {
                    self.add_fill(t.addr, *num_bytes, *value, i as u32, t.acc_mode, t.addr_map)
                }
            };
            if !ok {
                self.rw_start();
                return Err(i);
            }
        }
        Ok(())
    }

    /// Finalize the request. Returns `(request_len, predicted_rsp_len,
    /// pl2_count)`; the bytes are available through [`rq_bytes`](Self::rq_bytes).
    pub fn finish(&mut self) -> (u32, u32, u32) {
        if !self.finalized {
            self.pkt_finalize(false);
            self.finalized = true;
        }
        (self.rq.len() as u32, self.rsp_size, self.num_pl2)
    }

    pub fn rq_bytes(&self) -> &[u8] {
        self.rq.as_bytes()
    }

    /// Predicted size of all request packets so far
    pub fn rq_size(&self) -> u32 {
        if self.finalized {
            self.rq.len() as u32
        } else {
            self.rq.len() as u32 + 4
        }
    }

    /// Predicted size of all response packets (smaller in case of errors)
    pub fn rsp_size(&self) -> u32 {
        if self.finalized {
            self.rsp_size
        } else {
            self.rsp_size + 4
        }
    }

    /// Unsolicited device resets observed while parsing responses
    pub fn device_reset_count(&self) -> u32 {
        self.device_reset_count
    }

    // ---- transaction entry points ----

    fn add_rd(
        &mut self,
        addr: u64,
        num_bytes: u32,
        trans_idx: u32,
        acc_mode: u16,
        addr_map: u8,
    ) -> bool {
        if num_bytes == 0 {
            return false;
        }
        if !self.check_limits(num_bytes, 0) {
            return false;
        }
        let am = if addr_map == AM132 { AM15 } else { addr_map };
        if am > AM15 {
            return false;
        }
        if am >= AM12 && addr >= 1 << 32 {
            return false; // exclusive maps are 32-bit only
        }

        if !self.num_trans_manageable(addr, num_bytes, Dir::Rd) {
            self.pkt_finalize(true);
        }

        let mut new_pl2 = if am >= AM12 || num_bytes <= 16 {
            // Never split small or exclusive-map reads
            !self.remaining_ok(32, 16 + num_bytes.div_ceil(4) * 4)
        } else {
            // Keep room so block reads are unlikely to split
            !self.remaining_ok(32, 64)
        };
        new_pl2 |= !self.addr_map_rules_ok(am);
        if new_pl2 {
            self.pkt_finalize(true);
        }

        let mut a = addr;
        let mut nb = num_bytes;
        let mut off = 0u32;
        if nb > 0 && a & 1 != 0 {
            self.pkt_add_rd(a, 1, trans_idx, off, acc_mode, am);
            a += 1;
            off += 1;
            nb -= 1;
        }
        if nb >= 2 && a & 2 != 0 {
            self.pkt_add_rd(a, 2, trans_idx, off, acc_mode, am);
            a += 2;
            off += 2;
            nb -= 2;
        }
        if nb >= 4 && a & 4 != 0 {
            self.pkt_add_rd(a, 4, trans_idx, off, acc_mode, am);
            a += 4;
            off += 4;
            nb -= 4;
        }
        while nb >= 8 {
            let nb_blk = self.rd_blk_size_in_pkt(nb);
            self.pkt_add_rd(a, nb_blk, trans_idx, off, acc_mode, am);
            if nb_blk < PL0_DATA_BLK_SIZE && nb_blk < (nb & !7) {
                self.pkt_finalize(true);
            }
            a += nb_blk as u64;
            off += nb_blk;
            nb -= nb_blk;
        }
        if nb >= 4 {
            self.pkt_add_rd(a, 4, trans_idx, off, acc_mode, am);
            a += 4;
            off += 4;
            nb -= 4;
        }
        if nb >= 2 {
            self.pkt_add_rd(a, 2, trans_idx, off, acc_mode, am);
            a += 2;
            off += 2;
            nb -= 2;
        }
        if nb > 0 {
            self.pkt_add_rd(a, 1, trans_idx, off, acc_mode, am);
            off += 1;
        }
        debug_assert_eq!(off, num_bytes);

        self.num_rw_trans += 1;
        true
    }

    fn add_wr(
        &mut self,
        addr: u64,
        data: &[u8],
        trans_idx: u32,
        acc_mode: u16,
        addr_map: u8,
    ) -> bool {
        let num_bytes = data.len() as u32;
        if num_bytes == 0 {
            return false;
        }
        if !self.check_limits(0, num_bytes) {
            return false;
        }
        let am = if addr_map == AM132 { AM15 } else { addr_map };
        if am > AM15 {
            return false;
        }
        if am >= AM12 && addr >= 1 << 32 {
            return false;
        }

        if !self.num_trans_manageable(addr, num_bytes, Dir::Wr) {
            self.pkt_finalize(true);
        }

        let mut new_pl2 = if am >= AM12 || num_bytes <= 16 {
            // Never split small or exclusive-map writes
            !self.remaining_ok(32 + num_bytes.div_ceil(4) * 4, 32)
        } else {
            // Keep room so block writes are unlikely to split
            !self.remaining_ok(80, 32)
        };
        new_pl2 |= !self.addr_map_rules_ok(am);
        if new_pl2 {
            self.pkt_finalize(true);
        }

        let mut a = addr;
        let mut nb = num_bytes;
        let mut off = 0u32;
        if nb > 0 && a & 1 != 0 {
            self.pkt_add_wr(a, &data[off as usize..][..1], trans_idx, off, acc_mode, am);
            a += 1;
            off += 1;
            nb -= 1;
        }
        if nb >= 2 && a & 2 != 0 {
            self.pkt_add_wr(a, &data[off as usize..][..2], trans_idx, off, acc_mode, am);
            a += 2;
            off += 2;
            nb -= 2;
        }
        if nb >= 4 && a & 4 != 0 {
            self.pkt_add_wr(a, &data[off as usize..][..4], trans_idx, off, acc_mode, am);
            a += 4;
            off += 4;
            nb -= 4;
        }
        while nb >= 8 {
            let nb_blk = self.wr_blk_size_in_pkt(nb, a);
            if nb_blk > 0 {
                self.pkt_add_wr(
                    a,
                    &data[off as usize..][..nb_blk as usize],
                    trans_idx,
                    off,
                    acc_mode,
                    am,
                );
            }
            if nb_blk < PL0_DATA_BLK_SIZE && nb_blk < (nb & !7) {
                self.pkt_finalize(true);
            }
            a += nb_blk as u64;
            off += nb_blk;
            nb -= nb_blk;
        }
        if nb >= 4 {
            self.pkt_add_wr(a, &data[off as usize..][..4], trans_idx, off, acc_mode, am);
            a += 4;
            off += 4;
            nb -= 4;
        }
        if nb >= 2 {
            self.pkt_add_wr(a, &data[off as usize..][..2], trans_idx, off, acc_mode, am);
            a += 2;
            off += 2;
            nb -= 2;
        }
        if nb > 0 {
            self.pkt_add_wr(a, &data[off as usize..][..1], trans_idx, off, acc_mode, am);
            off += 1;
        }
        debug_assert_eq!(off, num_bytes);

        self.num_rw_trans += 1;
        true
    }

    fn add_fill(
        &mut self,
        addr: u64,
        num_bytes: u32,
        value: u64,
        trans_idx: u32,
        acc_mode: u16,
        addr_map: u8,
    ) -> bool {
        if addr % 8 != 0
            || num_bytes == 0
            || num_bytes % 8 != 0
            || acc_mode != 0
            || addr_map >= AM12
        {
            return false;
        }
        if !self.check_limits(0, num_bytes) {
            return false;
        }
        if !self.num_trans_manageable(addr, 8, Dir::Wr) {
            self.pkt_finalize(true);
        }
        let new_pl2 = !self.remaining_ok(40, 32) || !self.addr_map_rules_ok(addr_map);
        if new_pl2 {
            self.pkt_finalize(true);
        }

        let mut a = addr;
        let mut nb = num_bytes;
        let mut off = 0u32;
        while nb > 0 {
            let nb_now = nb.min(PL0_DATA_BLK_SIZE);
            self.pkt_add_fill(a, nb_now, value, trans_idx, off, acc_mode, addr_map);
            a += nb_now as u64;
            off += nb_now;
            nb -= nb_now;
        }

        self.num_rw_trans += 1;
        true
    }

    // ---- micro-op emission ----

    fn pl2_pkt_init(&mut self) {
        self.pl2_num_trans = 0;
        self.pl2_hdr_off = self.rq.len();
        self.rq.push_u32(0); // PL2 length, patched at finalize
        self.pl0_start_off = self.rq.len();
        self.rq.push_u32(0); // pl0-start, patched at finalize
        self.rq.push_u32(0);
        self.pl2_rsp_start = self.rsp_size;
        self.rsp_size += 4 + 4;
        self.acc_mode = 0;
        self.addr_map = 0;
        self.addr_map_mask = 0;
        self.base_addr = 0;
    }

    fn pkt_finalize(&mut self, init_next_pl2: bool) {
        self.num_pl2 += 1;
        self.pl1_cnt_last = self.pl1_cnt_last.wrapping_add(1);

        // con_id is overwritten and used on the dispatcher layer
        let w0 = u32::from_le_bytes([1, pl1cmd::PL0_START, 0xFF, 0]);
        let w1 = (self.pl1_cnt_last as u32) | ((self.addr_map_mask as u32) << 16);
        self.rq.patch_u32(self.pl0_start_off, w0);
        self.rq.patch_u32(self.pl0_start_off + 4, w1);

        self.rq.push_u8(0); // wl
        self.rq.push_u8(pl1cmd::PL0_END);
        self.rq.push_u16(self.pl0_trans.len() as u16);

        let pl2_len = (self.rq.len() - self.pl2_hdr_off) as u32;
        self.rq.patch_u32(self.pl2_hdr_off, pl2_len);

        self.rsp_size += 4;

        if init_next_pl2 {
            self.pl2_pkt_init();
        }
    }

    /// Emit address-map, access-mode and base-address changes as needed.
    /// The address map goes first since it routes the packet in the server.
    fn emit_addr_state(&mut self, addr_map: u8, acc_mode: u16, addr: u64) {
        self.addr_map_mask |= 1 << addr_map;

        if addr_map != self.addr_map {
            self.rq.push_u8(0);
            self.rq.push_u8(pl0cmd::ADDR_MAP);
            self.rq.push_u8(addr_map);
            self.rq.push_u8(0);
            self.addr_map = addr_map;
        }
        if acc_mode != self.acc_mode {
            self.rq.push_u8(0);
            self.rq.push_u8(pl0cmd::ACCESS_MODE);
            self.rq.push_u16(acc_mode);
            self.acc_mode = acc_mode;
        }
        if addr < self.base_addr || addr > self.base_addr + 0xFFFF {
            self.base_addr = addr & !0xFFFFu64;
            if addr < 1 << 32 {
                self.rq.push_u8(0);
                self.rq.push_u8(pl0cmd::BASE_ADDR32);
                self.rq.push_u16((addr >> 16) as u16);
            } else {
                self.rq.push_u8(1);
                self.rq.push_u8(pl0cmd::BASE_ADDR64);
                self.rq.push_u16((addr >> 16) as u16);
                self.rq.push_u32((addr >> 32) as u32);
            }
        }
    }

    fn bytes_addr_state(&self, addr_map: u8, acc_mode: u16, addr: u64) -> u32 {
        let mut n = 0;
        if addr_map != self.addr_map {
            n += 4;
        }
        if acc_mode != self.acc_mode {
            n += 4;
        }
        if addr < self.base_addr || addr > self.base_addr + 0xFFFF {
            n += if addr < 1 << 32 { 4 } else { 8 };
        }
        n
    }

    fn push_pl0_trans(&mut self, pt: Pl0Trans) {
        self.pl0_trans.push(pt);
        self.pl0_rsp.push(RwTransRsp::default());
        self.pl2_num_trans += 1;
    }

    fn pkt_add_rd(
        &mut self,
        addr: u64,
        num_bytes: u32,
        trans_idx: u32,
        data_off: u32,
        acc_mode: u16,
        addr_map: u8,
    ) {
        if num_bytes == 0 {
            return;
        }
        if self.pl2_num_trans >= self.max_num_rw {
            self.pkt_finalize(true);
        }

        let state = self.bytes_addr_state(addr_map, acc_mode, addr);
        let need_rq = state + 8 + 4;
        let need_rsp = 4 + num_bytes.div_ceil(4) * 4 + 4;
        if !self.remaining_ok(need_rq, need_rsp) {
            self.pkt_finalize(true);
        }

        self.emit_addr_state(addr_map, acc_mode, addr);

        if num_bytes <= 8 {
            let cmd = match num_bytes {
                1 => pl0cmd::RD8,
                2 => pl0cmd::RD16,
                4 => pl0cmd::RD32,
                _ => pl0cmd::RD64,
            };
            debug_assert!(num_bytes.is_power_of_two() && addr % num_bytes as u64 == 0);
            self.rq.push_u8(0);
            self.rq.push_u8(cmd);
            self.rq.push_u16(addr as u16);
            self.rsp_size += 4 + if num_bytes == 8 { 8 } else { 4 };
        } else {
            debug_assert!(addr % 8 == 0 && num_bytes % 8 == 0);
            self.rq.push_u8(1);
            self.rq.push_u8(pl0cmd::RDBLK);
            self.rq.push_u16(addr as u16);
            self.rq.push_u8((num_bytes >> 2) as u8); // 0 means 256 words
            self.rq.push_bytes(&[0; 3]);
            self.rsp_size += 4 + num_bytes;
        }

        self.push_pl0_trans(Pl0Trans {
            addr,
            num_bytes,
            dir: Dir::Rd,
            addr_map: self.addr_map,
            trans_idx,
            data_off,
        });
    }

    fn pkt_add_wr(
        &mut self,
        addr: u64,
        data: &[u8],
        trans_idx: u32,
        data_off: u32,
        acc_mode: u16,
        addr_map: u8,
    ) {
        let num_bytes = data.len() as u32;
        if num_bytes == 0 {
            return;
        }
        if self.pl2_num_trans >= self.max_num_rw {
            self.pkt_finalize(true);
        }

        let state = self.bytes_addr_state(addr_map, acc_mode, addr);
        let need_rq = state + 4 + num_bytes.div_ceil(4) * 4 + 4;
        let need_rsp = 4 + 4;
        if !self.remaining_ok(need_rq, need_rsp) {
            self.pkt_finalize(true);
        }

        self.emit_addr_state(addr_map, acc_mode, addr);

        if num_bytes <= 8 {
            let (cmd, wl) = match num_bytes {
                1 => (pl0cmd::WR8, 1u8),
                2 => (pl0cmd::WR16, 1),
                4 => (pl0cmd::WR32, 1),
                _ => (pl0cmd::WR64, 2),
            };
            debug_assert!(num_bytes.is_power_of_two() && addr % num_bytes as u64 == 0);
            self.rq.push_u8(wl);
            self.rq.push_u8(cmd);
            self.rq.push_u16(addr as u16);
            self.rq.push_bytes(data);
            // Zero upper bytes of the data words for sub-word writes
            for _ in num_bytes..(wl as u32 * 4) {
                self.rq.push_u8(0);
            }
        } else {
            debug_assert!(addr % 8 == 0 && num_bytes % 8 == 0);
            self.rq.push_u8((num_bytes / 4) as u8); // 0 means 256 words
            self.rq.push_u8(pl0cmd::WRBLK);
            self.rq.push_u16(addr as u16);
            self.rq.push_bytes(data);
        }
        self.rsp_size += 4;

        self.push_pl0_trans(Pl0Trans {
            addr,
            num_bytes,
            dir: Dir::Wr,
            addr_map: self.addr_map,
            trans_idx,
            data_off,
        });
    }

    fn pkt_add_fill(
        &mut self,
        addr: u64,
        num_bytes: u32,
        value: u64,
        trans_idx: u32,
        data_off: u32,
        acc_mode: u16,
        addr_map: u8,
    ) {
        debug_assert!(num_bytes >= 8 && num_bytes <= PL0_DATA_BLK_SIZE && num_bytes % 8 == 0);
        if self.pl2_num_trans >= self.max_num_rw {
            self.pkt_finalize(true);
        }

        let state = self.bytes_addr_state(addr_map, acc_mode, addr);
        let need_rq = state + 4 + 8 + 4;
        let need_rsp = 4 + 4;
        if !self.remaining_ok(need_rq, need_rsp) {
            self.pkt_finalize(true);
        }

        self.emit_addr_state(addr_map, acc_mode, addr);

        self.rq.push_u8(3); // wl of the fill op
        self.rq.push_u8(pl0cmd::FILL);
        self.rq.push_u16(addr as u16);
        self.rq.push_u8((num_bytes / 4) as u8); // 0 means 256 words
        self.rq.push_bytes(&[0; 3]);
        self.rq.push_u64(value);
        self.rsp_size += 4;

        self.push_pl0_trans(Pl0Trans {
            addr,
            num_bytes,
            dir: Dir::Fill,
            addr_map: self.addr_map,
            trans_idx,
            data_off,
        });
    }

    // ---- budgets ----

    fn check_limits(&self, num_bytes_rd: u32, num_bytes_wr: u32) -> bool {
        if self.rq.len() as u32 + num_bytes_wr + 4 >= self.max_rq_size {
            return false;
        }
        if self.rsp_size + num_bytes_rd + 4 >= self.max_rsp_size {
            return false;
        }
        true
    }

    fn remaining_rq(&self) -> u32 {
        let used = (self.rq.len() - self.pl2_hdr_off) as u32;
        self.pkt_max_rq.min(self.max_rq_size).saturating_sub(used)
    }

    fn remaining_rsp(&self) -> u32 {
        let used = self.rsp_size - self.pl2_rsp_start;
        self.pkt_max_rsp.min(self.max_rsp_size).saturating_sub(used)
    }

    fn remaining_ok(&self, need_rq: u32, need_rsp: u32) -> bool {
        need_rq <= self.remaining_rq() && need_rsp <= self.remaining_rsp()
    }

    fn wr_blk_size_in_pkt(&self, num_bytes: u32, addr: u64) -> u32 {
        debug_assert!(num_bytes >= 8);
        let protocol = 4 + 4; // block op header and pl0-end
        let mut room = self.remaining_rq();
        if protocol >= room {
            return 0;
        }
        room -= protocol;
        if addr >= 1 << 32 {
            room = room.saturating_sub(8);
        }
        num_bytes.min(room).min(self.max_wr_blk) & !7
    }

    fn rd_blk_size_in_pkt(&self, num_bytes: u32) -> u32 {
        debug_assert!(num_bytes >= 8);
        let protocol = 4 + 4; // read rsp header and pl0-end
        let mut room = self.remaining_rsp();
        if protocol >= room {
            return 0;
        }
        room -= protocol;
        num_bytes.min(room).min(self.max_rd_blk) & !7
    }

    fn addr_map_rules_ok(&self, addr_map: u8) -> bool {
        let bit = 1u16 << addr_map;
        if self.addr_map_mask == 0 || self.addr_map_mask == bit {
            return true;
        }
        bit & AM_MASK_SHARED != 0 && self.addr_map_mask & AM_MASK_EXCLUSIVE == 0
    }

    fn num_trans_manageable(&self, addr: u64, num_bytes: u32, dir: Dir) -> bool {
        if num_bytes <= 8 {
            let natural = matches!(num_bytes, 1 | 2 | 4 | 8) && addr % num_bytes as u64 == 0;
            let n = if natural {
                1
            } else if num_bytes == 8 && addr % 8 == 4 {
                2
            } else {
                4 // worst case for unaligned access
            };
            self.pl2_num_trans + n <= self.max_num_rw
        } else {
            let adder = if num_bytes % 8 == 0 && addr % 8 == 0 {
                0
            } else {
                3 // worst case for the unaligned fringes
            };
            let n = match dir {
                Dir::Rd => {
                    let per_pkt = self.pkt_max_rsp - 16;
                    num_bytes.div_ceil(per_pkt)
                }
                Dir::Wr | Dir::Fill => {
                    let payload = num_bytes + 4 + 4 + 8;
                    let per_pkt = self.pkt_max_rq - 20;
                    payload.div_ceil(per_pkt)
                }
            };
            self.pl2_num_trans + n + adder <= self.max_num_rw
        }
    }

    // ---- response parsing ----

    /// Parse the response byte stream and write read data back into the
    /// transaction list the request was planned from. Returns the first
    /// transaction-level error, if any; framing violations are fatal
    /// server-connection errors.
    pub fn set_rsp(&mut self, rsp: &[u8], trans: &mut [RwTrans<'_>]) -> Result<()> {
        if rsp.len() < 8 || rsp.len() % 4 != 0 || rsp.len() as u32 > self.rsp_size {
            return Err(super::protocol_err());
        }

        let mut first_err: Option<Error> = None;
        let n = rsp.len();
        let mut off = 0usize;
        let mut pkt_start_next = 0usize;
        let mut i_trans = 0usize;

        while off < n {
            if off + 4 > n {
                return Err(super::protocol_err());
            }

            if off == pkt_start_next {
                let pl2_len =
                    u32::from_le_bytes([rsp[off], rsp[off + 1], rsp[off + 2], rsp[off + 3]]);
                if pl2_len % 4 != 0 || pl2_len > self.max_rsp_size || off + 8 > n {
                    return Err(super::protocol_err());
                }
                pkt_start_next += pl2_len as usize;

                let (wl, cmd, err) = (rsp[off + 4], rsp[off + 5], rsp[off + 7]);
                if wl != 0 || cmd != pl1cmd::PL0_START {
                    return Err(super::protocol_err());
                }
                match err {
                    plerr::NO_ERROR => {}
                    plerr::DEV_RESET => {
                        self.device_reset_count = self.device_reset_count.wrapping_add(1);
                        log::debug!("device reset reported in pl0-start");
                    }
                    plerr::DEV_ACCESS => {
                        return Err(Error::DeviceAccess("reported in pl0-start".into()));
                    }
                    _ => return Err(super::protocol_err()),
                }
                off += 8;
                continue;
            }

            let wl = rsp[off] as usize;
            let cmd = rsp[off + 1];

            if cmd == pl1cmd::PL0_END {
                if wl != 0 {
                    return Err(super::protocol_err());
                }
                let pl1_cnt = u16::from_le_bytes([rsp[off + 2], rsp[off + 3]]);
                if pl1_cnt != self.pl1_cnt_oldest {
                    return Err(Error::ServerCon(format!(
                        "pl1 count mismatch: got {:#06x}, expected {:#06x}",
                        pl1_cnt, self.pl1_cnt_oldest
                    )));
                }
                off += 4;
                if i_trans == self.pl0_trans.len() {
                    break;
                }
                self.pl1_cnt_oldest = self.pl1_cnt_oldest.wrapping_add(1);
                if off >= n {
                    return Err(super::protocol_err());
                }
                continue;
            }

            if i_trans >= self.pl0_trans.len() {
                return Err(super::protocol_err());
            }
            let pt = self.pl0_trans[i_trans];
            let wlrw_no_err = pt.num_bytes.div_ceil(4);
            let par = rsp[off + 2] as u32;
            let err = rsp[off + 3];

            if pl0cmd::is_wr_or_fill(cmd) {
                if wl != 0 || pt.dir == Dir::Rd {
                    return Err(super::protocol_err());
                }
                let wlwr = par;
                if err != plerr::PL0_NO_ERROR {
                    let num_ok = if cmd == pl0cmd::WRBLK {
                        if wlwr >= wlrw_no_err {
                            return Err(super::protocol_err());
                        }
                        wlwr * 4
                    } else {
                        if wlwr != 0 {
                            return Err(super::protocol_err());
                        }
                        0
                    };
                    self.pl0_rsp[i_trans] = RwTransRsp {
                        num_bytes_ok: num_ok,
                        pl_err: err,
                    };
                    capture_first(
                        &mut first_err,
                        pl0_data_error(Dir::Wr, err, pt.addr + (wlwr * 4) as u64, pt.addr_map),
                    );
                } else {
                    if wlwr != (wlrw_no_err & 0xFF) {
                        return Err(super::protocol_err());
                    }
                    self.pl0_rsp[i_trans] = RwTransRsp {
                        num_bytes_ok: pt.num_bytes,
                        pl_err: plerr::PL0_NO_ERROR,
                    };
                }
                off += 4;
                i_trans += 1;
            } else if pl0cmd::is_rd(cmd) {
                let wlrd = par;
                if wl as u32 != wlrd || pt.dir != Dir::Rd {
                    return Err(super::protocol_err());
                }
                if cmd == pl0cmd::RDBLK1KB {
                    if wlrw_no_err != 0x100 || wl != 0 || wlrd != 0 || err != plerr::PL0_NO_ERROR
                    {
                        return Err(super::protocol_err());
                    }
                    self.pl0_rsp[i_trans] = RwTransRsp {
                        num_bytes_ok: PL0_DATA_BLK_SIZE,
                        pl_err: plerr::PL0_NO_ERROR,
                    };
                    copy_read_data(rsp, off + 4, &pt, PL0_DATA_BLK_SIZE, trans)?;
                    off += 4 + PL0_DATA_BLK_SIZE as usize;
                } else {
                    let num_ok;
                    if err != plerr::PL0_NO_ERROR {
                        num_ok = if cmd == pl0cmd::RDBLK {
                            if wlrd > wlrw_no_err {
                                return Err(super::protocol_err());
                            }
                            wlrd * 4
                        } else {
                            if wlrd != 0 {
                                return Err(super::protocol_err());
                            }
                            0
                        };
                        self.pl0_rsp[i_trans] = RwTransRsp {
                            num_bytes_ok: num_ok,
                            pl_err: err,
                        };
                        capture_first(
                            &mut first_err,
                            pl0_data_error(Dir::Rd, err, pt.addr + (wlrd * 4) as u64, pt.addr_map),
                        );
                    } else {
                        if wlrd != (wlrw_no_err & 0xFF) {
                            return Err(super::protocol_err());
                        }
                        num_ok = pt.num_bytes;
                        self.pl0_rsp[i_trans] = RwTransRsp {
                            num_bytes_ok: num_ok,
                            pl_err: plerr::PL0_NO_ERROR,
                        };
                    }
                    copy_read_data(rsp, off + 4, &pt, num_ok, trans)?;
                    off += 4 + wl * 4;
                }
                i_trans += 1;
            } else {
                return Err(super::protocol_err());
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Aggregate the PL0 results back onto the user transactions. Bytes are
    /// summed until the first failing micro-op of a transaction; later
    /// micro-ops of the same transaction are consequential and do not
    /// contribute.
    pub fn trans_rsp(&mut self) -> &[RwTransRsp] {
        let n = self.num_rw_trans;
        self.rw_rsp.clear();
        self.rw_rsp.resize(
            n,
            RwTransRsp {
                num_bytes_ok: 0,
                pl_err: plerr::PL0_NO_ERROR,
            },
        );
        for (p, pt) in self.pl0_trans.iter().enumerate() {
            let r = &mut self.rw_rsp[pt.trans_idx as usize];
            if r.pl_err == plerr::PL0_NO_ERROR {
                r.pl_err = self.pl0_rsp[p].pl_err;
                r.num_bytes_ok += self.pl0_rsp[p].num_bytes_ok;
            }
        }
        &self.rw_rsp
    }
}

fn capture_first(slot: &mut Option<Error>, err: Error) {
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Map a failing PL0 code to the user-facing error with address context.
fn pl0_data_error(dir: Dir, pl_err: u8, addr: u64, addr_map: u8) -> Error {
    let detail = match pl_err {
        plerr::PL0_DATA => "failed".to_string(),
        plerr::DEV_LOCKED => return Error::DeviceLocked,
        plerr::DEV_ACCESS => return Error::DeviceAccess("device access failed".into()),
        plerr::PL0_ACC_MODE => "acc_mode not supported".to_string(),
        plerr::PL0_ADDR_MAP => format!("addr_map {addr_map} not supported"),
        plerr::PL0_ADDR_BLOCKED => "access blocked".to_string(),
        other => format!("error code {other:#04x}"),
    };
    match dir {
        Dir::Rd => Error::RwRead {
            addr,
            addr_map,
            detail,
        },
        Dir::Wr | Dir::Fill => Error::RwWrite {
            addr,
            addr_map,
            detail,
        },
    }
}

fn copy_read_data(
    rsp: &[u8],
    data_start: usize,
    pt: &Pl0Trans,
    num_bytes: u32,
    trans: &mut [RwTrans<'_>],
) -> Result<()> {
    if num_bytes == 0 {
        return Ok(());
    }
    let nb = num_bytes as usize;
    if data_start + nb > rsp.len() {
        return Err(super::protocol_err());
    }
    let dest = match trans.get_mut(pt.trans_idx as usize).map(|t| &mut t.kind) {
        Some(TransKind::Read(d)) => d,
        _ => return Err(super::protocol_err()),
    };
    let off = pt.data_off as usize;
    if off + nb > dest.len() {
        return Err(super::protocol_err());
    }
    dest[off..off + nb].copy_from_slice(&rsp[data_start..data_start + nb]);
    Ok(())
}

//! Read/write client facade

use super::server::{ServerCon, TargetClients};
use super::DEFAULT_TIMEOUT_MS;
use crate::codec::rw::{RwPlanner, PKT_BUF_SIZE_DEFAULT};
use crate::error::{Error, Result};
use crate::info::{ConInfo, ResetCount, ServerInfo, TargetInfo};
use crate::trans::{RwTrans, RwTransRsp, TransKind};
use crate::transport::{TcpTransport, Transport};
use crate::wire::{ChlTarget, ClientType, DevConFeat, UnlockCrOption, UnlockOption};

/// Client for memory read/write/fill transactions against one target.
///
/// Strictly synchronous: one outstanding request at a time. The lifecycle is
/// `connect` (or [`with_transport`](Self::with_transport) plus
/// [`server_connect`](Self::server_connect)), then [`session_start`]
/// (Self::session_start) exactly once, then [`device_connect`]
/// (Self::device_connect), then transactions.
#[derive(Debug)]
pub struct RwClient<T: Transport> {
    con: ServerCon<T>,
    planner: Option<RwPlanner>,
    con_info: ConInfo,
    rsp_buf: Vec<u8>,
    timeout_ms: u32,
    device_reset_count: u32,
}

impl RwClient<TcpTransport> {
    /// Connect to a broker over TCP and run the server-connect exchange.
    pub fn connect(client_name: &str, host: &str, port: u16) -> Result<Self> {
        let transport = TcpTransport::connect(host, port)
            .map_err(|e| Error::ServerCon(format!("server {host} port {port}: {e}")))?;
        let mut client = Self::with_transport(client_name, transport);
        client.server_connect()?;
        Ok(client)
    }
}

impl<T: Transport> RwClient<T> {
    /// Build a client over an already-open transport; the server-connect
    /// exchange is still required.
    pub fn with_transport(client_name: &str, transport: T) -> Self {
        Self {
            con: ServerCon::new(client_name, transport),
            planner: None,
            con_info: ConInfo::default(),
            rsp_buf: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            device_reset_count: u32::MAX,
        }
    }

    /// Test constructor: explicit packet limits, session pre-started.
    pub fn with_limits(
        transport: T,
        max_rq_size: u32,
        max_rsp_size: u32,
        max_num_rw: u32,
    ) -> Result<Self> {
        let mut client = Self::with_transport("TestOnly", transport);
        client.con.session_started = true;
        client.planner = Some(RwPlanner::with_limits(max_rq_size, max_rsp_size, max_num_rw));
        client.con.mailbox.config(client.timeout_ms, max_rsp_size)?;
        Ok(client)
    }

    pub fn server_connect(&mut self) -> Result<()> {
        self.con.server_connect()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.con.server_info()
    }

    pub fn server_challenge(&self) -> u64 {
        self.con.challenge()
    }

    pub fn server_locked(&self) -> bool {
        self.con.server_locked()
    }

    pub fn server_unlock(&mut self, key: &[u8]) -> Result<()> {
        self.con.server_unlock(key)
    }

    pub fn get_targets(&mut self) -> Result<Vec<TargetInfo>> {
        self.con.get_targets()
    }

    pub fn get_target_clients(&mut self, identifier: &str) -> Result<TargetClients> {
        self.con.get_target_clients(identifier)
    }

    /// Open or join the named session on a target. Only valid once per
    /// client object; binds the connection info for the session lifetime.
    pub fn session_start(
        &mut self,
        identifier: &str,
        session_name: &str,
        session_pw: &str,
    ) -> Result<&ConInfo> {
        let con_info = self.con.session_start(
            ClientType::Rw,
            identifier,
            session_name,
            session_pw,
            ChlTarget::Unknown,
            0,
        )?;
        self.planner = Some(RwPlanner::new(&con_info));
        self.con
            .mailbox
            .config(self.timeout_ms, PKT_BUF_SIZE_DEFAULT)?;
        self.device_reset_count = u32::MAX; // armed by device_connect
        self.con_info = con_info;
        Ok(&self.con_info)
    }

    /// Connection info negotiated at session start
    pub fn con_info(&self) -> &ConInfo {
        &self.con_info
    }

    /// Re-read the connection info from the broker.
    pub fn target_ping(&mut self) -> Result<ConInfo> {
        let con_info = self.con.target_ping(ClientType::Rw)?;
        self.con_info = con_info.clone();
        Ok(con_info)
    }

    /// Connect to the device, optionally with reset/reset-and-halt/unlock.
    /// Arms the device-reset tracking.
    pub fn device_connect(&mut self, feat: DevConFeat) -> Result<()> {
        self.con.device_connect(feat)?;
        if let Some(p) = &self.planner {
            self.device_reset_count = p.device_reset_count();
        }
        Ok(())
    }

    /// Whether a device reset was observed since the last call.
    pub fn device_reset_occurred(&mut self) -> bool {
        if !self.con.session_started || self.device_reset_count == u32::MAX {
            return false;
        }
        let count = match &self.planner {
            Some(p) => p.device_reset_count(),
            None => return false,
        };
        let occurred = count > self.device_reset_count;
        self.device_reset_count = count;
        occurred
    }

    pub fn device_unlock_get_challenge(&mut self, ulcro: UnlockCrOption) -> Result<Vec<u8>> {
        self.con.device_unlock_get_challenge(ulcro)
    }

    pub fn device_unlock_set_key(&mut self, ulo: UnlockOption, key: &[u8]) -> Result<()> {
        self.con.device_unlock_set_key(ulo, key)
    }

    /// Reset counters maintained by the broker for this device
    pub fn device_reset_counters(&mut self) -> Result<ResetCount> {
        self.con.device_reset_counters()
    }

    /// Execute a transaction list as one batch. When request and response
    /// fit a single envelope the batch executes atomically on the device.
    /// Read buffers are filled on return; per-transaction results are
    /// available through [`trans_rsp`](Self::trans_rsp).
    pub fn execute_trans(&mut self, trans: &mut [RwTrans<'_>]) -> Result<()> {
        if trans.is_empty() {
            return Ok(());
        }
        let planner = match self.planner.as_mut() {
            Some(p) => p,
            None => return Err(Error::Usage("session not yet started".into())),
        };

        if let Err(i) = planner.set_trans(trans) {
            let t = &trans[i];
            return Err(Error::Param(format!(
                "failed to add {} addr={:#x}, num_bytes={}, acc_mode={:#06x}, addr_map={}",
                kind_name(&t.kind),
                t.addr,
                t.num_bytes(),
                t.acc_mode,
                t.addr_map
            )));
        }

        let (_, _, num_pl2) = planner.finish();
        let n = self
            .con
            .mailbox
            .execute(planner.rq_bytes(), &mut self.rsp_buf, num_pl2)?;
        planner.set_rsp(&self.rsp_buf[..n], trans)
    }

    /// Per-transaction results of the last `execute_trans` batch
    pub fn trans_rsp(&mut self) -> &[RwTransRsp] {
        match self.planner.as_mut() {
            Some(p) => p.trans_rsp(),
            None => &[],
        }
    }

    // ---- convenience accessors ----

    pub fn read8(&mut self, addr: u64, addr_map: u8) -> Result<u8> {
        let mut v = [0u8; 1];
        self.execute_single(RwTrans::read(addr, &mut v, addr_map))?;
        Ok(v[0])
    }

    pub fn read16(&mut self, addr: u64, addr_map: u8) -> Result<u16> {
        let mut v = [0u8; 2];
        self.execute_single(RwTrans::read(addr, &mut v, addr_map))?;
        Ok(u16::from_le_bytes(v))
    }

    pub fn read32(&mut self, addr: u64, addr_map: u8) -> Result<u32> {
        let mut v = [0u8; 4];
        self.execute_single(RwTrans::read(addr, &mut v, addr_map))?;
        Ok(u32::from_le_bytes(v))
    }

    pub fn read64(&mut self, addr: u64, addr_map: u8) -> Result<u64> {
        let mut v = [0u8; 8];
        self.execute_single(RwTrans::read(addr, &mut v, addr_map))?;
        Ok(u64::from_le_bytes(v))
    }

    pub fn write8(&mut self, addr: u64, value: u8, addr_map: u8) -> Result<()> {
        self.execute_single(RwTrans::write(addr, &value.to_le_bytes(), addr_map))
            .map(|_| ())
    }

    pub fn write16(&mut self, addr: u64, value: u16, addr_map: u8) -> Result<()> {
        self.execute_single(RwTrans::write(addr, &value.to_le_bytes(), addr_map))
            .map(|_| ())
    }

    pub fn write32(&mut self, addr: u64, value: u32, addr_map: u8) -> Result<()> {
        self.execute_single(RwTrans::write(addr, &value.to_le_bytes(), addr_map))
            .map(|_| ())
    }

    pub fn write64(&mut self, addr: u64, value: u64, addr_map: u8) -> Result<()> {
        self.execute_single(RwTrans::write(addr, &value.to_le_bytes(), addr_map))
            .map(|_| ())
    }

    /// Read `data.len()` bytes; returns the number of bytes confirmed.
    pub fn read(&mut self, addr: u64, data: &mut [u8], addr_map: u8) -> Result<u32> {
        self.execute_single(RwTrans::read(addr, data, addr_map))
    }

    /// Write `data`; returns the number of bytes confirmed.
    pub fn write(&mut self, addr: u64, data: &[u8], addr_map: u8) -> Result<u32> {
        self.execute_single(RwTrans::write(addr, data, addr_map))
    }

    /// Fill with a repeating 32-bit pattern. The address must be 4-byte
    /// aligned and `num_bytes` a non-zero multiple of 4; unaligned leading
    /// and trailing words become plain word writes so the wire only carries
    /// 64-bit-aligned fills.
    pub fn fill32(&mut self, addr: u64, value: u32, num_bytes: u32, addr_map: u8) -> Result<()> {
        if addr % 4 != 0 {
            return Err(Error::Param("addr has to be 32 bit aligned for fill32".into()));
        }
        if num_bytes == 0 || num_bytes % 4 != 0 {
            return Err(Error::Param(
                "num_bytes has to be a non-zero multiple of 4 for fill32".into(),
            ));
        }

        let value_bytes = value.to_le_bytes();
        let value64 = ((value as u64) << 32) | value as u64;
        let mut trans: Vec<RwTrans<'_>> = Vec::with_capacity(3);
        let mut a = addr;
        let mut nb = num_bytes;
        if a % 8 != 0 && nb >= 4 {
            trans.push(RwTrans::write(a, &value_bytes, addr_map));
            a += 4;
            nb -= 4;
        }
        if nb >= 8 {
            let nb64 = nb & !7;
            trans.push(RwTrans::fill(a, value64, nb64, addr_map));
            a += nb64 as u64;
            nb -= nb64;
        }
        if nb > 0 {
            trans.push(RwTrans::write(a, &value_bytes, addr_map));
        }
        self.execute_trans(&mut trans)
    }

    /// Fill with a repeating 64-bit pattern. The address must be 8-byte
    /// aligned and `num_bytes` a non-zero multiple of 8.
    pub fn fill64(&mut self, addr: u64, value: u64, num_bytes: u32, addr_map: u8) -> Result<()> {
        if addr % 8 != 0 {
            return Err(Error::Param("addr has to be 64 bit aligned for fill64".into()));
        }
        if num_bytes == 0 || num_bytes % 8 != 0 {
            return Err(Error::Param(
                "num_bytes has to be a non-zero multiple of 8 for fill64".into(),
            ));
        }
        self.execute_single(RwTrans::fill(addr, value, num_bytes, addr_map))
            .map(|_| ())
    }

    /// Receive timeout for transaction execution, in milliseconds
    pub fn set_timeout(&mut self, timeout_ms: u32) -> Result<()> {
        self.timeout_ms = timeout_ms;
        self.con.mailbox.config(timeout_ms, PKT_BUF_SIZE_DEFAULT)
    }

    pub fn timeout(&self) -> u32 {
        self.timeout_ms
    }

    fn execute_single(&mut self, t: RwTrans<'_>) -> Result<u32> {
        let mut list = [t];
        self.execute_trans(&mut list)?;
        Ok(self.trans_rsp().first().map(|r| r.num_bytes_ok).unwrap_or(0))
    }
}

fn kind_name(kind: &TransKind<'_>) -> &'static str {
    match kind {
        TransKind::Read(_) => "RD",
        TransKind::Write(_) => "WR",
        TransKind::Fill { .. } => "FILL",
    }
}

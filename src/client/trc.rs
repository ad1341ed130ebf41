//! Trace client facade

use std::time::{Duration, Instant};

use super::server::{ServerCon, TargetClients};
use super::{DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP};
use crate::codec::trc::{TrcCodec, TrcData};
use crate::error::{Error, Result};
use crate::info::{ConInfo, ServerInfo, TargetInfo};
use crate::transport::{TcpTransport, Transport};
use crate::wire::{ChlTarget, Chso, ClientType, DevConFeat, TrcType, PL2_MAX_PKT_SIZE};

/// Time the unsubscribe drain waits for the confirming reply while
/// discarding in-flight trace data.
const UNSUBSCRIBE_DRAIN_TIMEOUT_MS: u64 = 20_000;

/// Client for one continuous device-to-client trace stream.
pub struct TraceClient<T: Transport> {
    con: ServerCon<T>,
    codec: TrcCodec,
    con_info: ConInfo,
    rsp_buf: Vec<u8>,
}

impl TraceClient<TcpTransport> {
    /// Connect to a broker over TCP and run the server-connect exchange.
    pub fn connect(client_name: &str, host: &str, port: u16) -> Result<Self> {
        let transport = TcpTransport::connect(host, port)
            .map_err(|e| Error::ServerCon(format!("server {host} port {port}: {e}")))?;
        let mut client = Self::with_transport(client_name, transport);
        client.con.server_connect()?;
        Ok(client)
    }
}

impl<T: Transport> TraceClient<T> {
    pub fn with_transport(client_name: &str, transport: T) -> Self {
        Self {
            con: ServerCon::new(client_name, transport),
            codec: TrcCodec::new(),
            con_info: ConInfo::default(),
            rsp_buf: Vec::new(),
        }
    }

    pub fn server_connect(&mut self) -> Result<()> {
        self.con.server_connect()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.con.server_info()
    }

    pub fn get_targets(&mut self) -> Result<Vec<TargetInfo>> {
        self.con.get_targets()
    }

    pub fn get_target_clients(&mut self, identifier: &str) -> Result<TargetClients> {
        self.con.get_target_clients(identifier)
    }

    pub fn session_start(
        &mut self,
        identifier: &str,
        session_name: &str,
        session_pw: &str,
    ) -> Result<&ConInfo> {
        let con_info = self.con.session_start(
            ClientType::Trc,
            identifier,
            session_name,
            session_pw,
            ChlTarget::Unknown,
            0,
        )?;
        self.con_info = con_info;
        Ok(&self.con_info)
    }

    pub fn con_info(&self) -> &ConInfo {
        &self.con_info
    }

    pub fn device_connect(&mut self, feat: DevConFeat) -> Result<()> {
        self.con.device_connect(feat)
    }

    /// Reset counters maintained by the broker for this device
    pub fn device_reset_counters(&mut self) -> Result<crate::info::ResetCount> {
        self.con.device_reset_counters()
    }

    /// Subscribe to trace stream `stream` (0 is the default stream).
    /// Returns the negotiated trace type and sharing option.
    pub fn subscribe(&mut self, stream: u8, chso: Chso) -> Result<(TrcType, Chso)> {
        if !self.con.session_started {
            return Err(Error::Usage("session not yet started".into()));
        }
        self.con
            .mailbox
            .config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;
        let rq = self.codec.build_subscribe(stream, chso);
        let n = self.con.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        self.codec.parse_subscribe(&self.rsp_buf[..n])
    }

    /// Unsubscribe from `stream`, draining in-flight trace data until the
    /// confirming reply arrives. Unsubscribing twice is not an error.
    pub fn unsubscribe(&mut self, stream: u8) -> Result<()> {
        let rq = self.codec.build_unsubscribe(stream).to_vec();
        self.con
            .mailbox
            .config(DEFAULT_TIMEOUT_MS, PL2_MAX_PKT_SIZE)?;
        self.con.mailbox.send(&rq, 1)?;

        let deadline = Instant::now() + Duration::from_millis(UNSUBSCRIBE_DRAIN_TIMEOUT_MS);
        loop {
            self.rsp_buf.clear();
            let n = self.con.mailbox.receive(&mut self.rsp_buf)?;
            if n == 0 {
                self.con.mailbox.disconnect();
                return Err(Error::ServerCon("no unsubscribe confirmation".into()));
            }
            if n >= 8 && self.rsp_buf[5] == crate::wire::pl1cmd::TRC_UNSUBSCRIBE {
                return self.codec.parse_unsubscribe(&self.rsp_buf[..n]);
            }
            if Instant::now() > deadline {
                self.con.mailbox.disconnect();
                return Err(Error::ServerCon("no unsubscribe confirmation".into()));
            }
            log::debug!("dropping in-flight trace data while unsubscribing");
        }
    }

    /// Receive the next chunk of the subscribed stream, waiting up to
    /// `timeout_ms`. Returns the transient [`Error::TrcRcv`] when nothing
    /// arrives in time.
    pub fn rcv_trace(&mut self, timeout_ms: u32) -> Result<TrcData> {
        self.con.mailbox.config(timeout_ms, PL2_MAX_PKT_SIZE)?;
        self.rsp_buf.clear();
        let n = self.con.mailbox.receive(&mut self.rsp_buf)?;
        if n == 0 {
            return Err(Error::TrcRcv);
        }
        self.codec.parse_trc_data(&self.rsp_buf[..n])
    }
}

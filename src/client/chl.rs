//! Channel client facade

use std::time::{Duration, Instant};

use super::server::{ServerCon, TargetClients};
use super::{DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP};
use crate::codec::chl::{ChlCodec, ChlMsg};
use crate::error::{Error, Result};
use crate::info::{ConInfo, ServerInfo, TargetInfo};
use crate::transport::{TcpTransport, Transport};
use crate::wire::{
    ChlTarget, Chso, Cht, ClientType, DevConFeat, CHL_LOWEST_PRIORITY, CHL_MAX_MSG_SIZE,
    CHL_NUM_MAX,
};

/// Response cap while a channel session is up: one maximum message plus
/// framing headroom.
const CHL_RSP_BUF_SIZE: u32 = CHL_MAX_MSG_SIZE + 64;

/// Time the unsubscribe drain waits for the confirming reply while
/// discarding in-flight device-to-client messages.
const UNSUBSCRIBE_DRAIN_TIMEOUT_MS: u64 = 20_000;

/// Client for framed message exchange with firmware over one numbered
/// channel.
///
/// Exactly one channel may be subscribed per client object. While a receive
/// channel is active, request/response operations (enumeration, ping,
/// device connect) are blocked, since any inbound packet could be a message.
pub struct ChannelClient<T: Transport> {
    con: ServerCon<T>,
    codec: ChlCodec,
    con_info: ConInfo,
    chl_num: u8,
    chl_cht: Cht,
    rsp_buf: Vec<u8>,
    device_reset_count: u32,
}

impl ChannelClient<TcpTransport> {
    /// Connect to a broker over TCP and run the server-connect exchange.
    pub fn connect(client_name: &str, host: &str, port: u16) -> Result<Self> {
        let transport = TcpTransport::connect(host, port)
            .map_err(|e| Error::ServerCon(format!("server {host} port {port}: {e}")))?;
        let mut client = Self::with_transport(client_name, transport);
        client.con.server_connect()?;
        Ok(client)
    }
}

impl<T: Transport> ChannelClient<T> {
    pub fn with_transport(client_name: &str, transport: T) -> Self {
        Self {
            con: ServerCon::new(client_name, transport),
            codec: ChlCodec::new(),
            con_info: ConInfo::default(),
            chl_num: CHL_NUM_MAX,
            chl_cht: Cht::None,
            rsp_buf: Vec::new(),
            device_reset_count: u32::MAX,
        }
    }

    pub fn server_connect(&mut self) -> Result<()> {
        self.con.server_connect()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.con.server_info()
    }

    pub fn get_targets(&mut self) -> Result<Vec<TargetInfo>> {
        self.check_not_subscribed()?;
        self.con.get_targets()
    }

    pub fn get_target_clients(&mut self, identifier: &str) -> Result<TargetClients> {
        self.check_not_subscribed()?;
        self.con.get_target_clients(identifier)
    }

    /// Open or join the named session, announcing the channel target the
    /// firmware side implements.
    pub fn session_start(
        &mut self,
        identifier: &str,
        session_name: &str,
        session_pw: &str,
        chl_target: ChlTarget,
        chl_param: u64,
    ) -> Result<&ConInfo> {
        self.check_not_subscribed()?;
        let con_info = self.con.session_start(
            ClientType::Chl,
            identifier,
            session_name,
            session_pw,
            chl_target,
            chl_param,
        )?;
        self.con
            .mailbox
            .config(DEFAULT_TIMEOUT_MS, CHL_RSP_BUF_SIZE)?;
        self.device_reset_count = u32::MAX;
        self.con_info = con_info;
        Ok(&self.con_info)
    }

    pub fn con_info(&self) -> &ConInfo {
        &self.con_info
    }

    pub fn target_ping(&mut self) -> Result<ConInfo> {
        self.check_not_subscribed()?;
        self.con.mailbox.config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;
        let con_info = self.con.target_ping(ClientType::Chl)?;
        self.con.mailbox.config(DEFAULT_TIMEOUT_MS, CHL_RSP_BUF_SIZE)?;
        self.con_info = con_info.clone();
        Ok(con_info)
    }

    pub fn device_connect(&mut self, feat: DevConFeat) -> Result<()> {
        self.check_not_subscribed()?;
        self.con.device_connect(feat)?;
        self.device_reset_count = self.codec.device_reset_count();
        Ok(())
    }

    /// Whether a device reset was observed since the last call.
    pub fn device_reset_occurred(&mut self) -> bool {
        if !self.con.session_started || self.device_reset_count == u32::MAX {
            return false;
        }
        let count = self.codec.device_reset_count();
        let occurred = count > self.device_reset_count;
        self.device_reset_count = count;
        occurred
    }

    /// Reset counters maintained by the broker for this device
    pub fn device_reset_counters(&mut self) -> Result<crate::info::ResetCount> {
        self.con.device_reset_counters()
    }

    /// Subscribe to channel `chl`. `prio` requests a scheduling priority
    /// (0 is highest; 31, the default, is the lowest and the only one that
    /// may be shared between clients); the granted priority is returned.
    pub fn subscribe(
        &mut self,
        chl: u8,
        cht: Cht,
        chso: Chso,
        prio: Option<u8>,
    ) -> Result<u8> {
        if !self.con.session_started {
            return Err(Error::Usage("session not yet started".into()));
        }
        self.check_not_subscribed()?;
        if chl >= CHL_NUM_MAX {
            return Err(Error::Param(format!(
                "channel number {chl} is too high, only 0 to {} allowed",
                CHL_NUM_MAX - 1
            )));
        }
        if cht == Cht::None {
            return Err(Error::Param("channel type is not supported".into()));
        }
        let prio_requested = prio.unwrap_or(CHL_LOWEST_PRIORITY);
        if prio_requested > CHL_LOWEST_PRIORITY {
            return Err(Error::Param(format!(
                "channel priority {prio_requested} is too high, only 0 to {CHL_LOWEST_PRIORITY} allowed"
            )));
        }

        let rq = self.codec.build_subscribe(chl, cht, chso, prio_requested);
        let n = self.con.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        let (cht_granted, _chso, prio_assigned) =
            self.codec.parse_subscribe(&self.rsp_buf[..n])?;

        self.chl_cht = cht_granted;
        self.chl_num = chl;
        self.con.rcv_chl_active = cht_granted.is_receiving();
        Ok(prio_assigned)
    }

    /// Unsubscribe from the channel. Asynchronous on the wire: in-flight
    /// device-to-client messages are drained until the confirming reply
    /// arrives or the drain timeout expires. Unsubscribing without a
    /// subscription is not an error.
    pub fn unsubscribe(&mut self) -> Result<()> {
        if self.chl_cht == Cht::None {
            return Ok(());
        }
        let chl = self.chl_num;
        self.chl_num = CHL_NUM_MAX;
        self.chl_cht = Cht::None;
        self.con.rcv_chl_active = false;

        let rq = self.codec.build_unsubscribe(chl).to_vec();
        self.con.mailbox.send(&rq, 1)?;

        let deadline = Instant::now() + Duration::from_millis(UNSUBSCRIBE_DRAIN_TIMEOUT_MS);
        loop {
            self.rsp_buf.clear();
            let n = self.con.mailbox.receive(&mut self.rsp_buf)?;
            if n == 0 {
                self.con.mailbox.disconnect();
                return Err(Error::ServerCon("no unsubscribe confirmation".into()));
            }
            if n >= 8 && self.rsp_buf[5] == crate::wire::pl1cmd::CHL_UNSUBSCRIBE {
                return self.codec.parse_unsubscribe(&self.rsp_buf[..n]);
            }
            if Instant::now() > deadline {
                self.con.mailbox.disconnect();
                return Err(Error::ServerCon("no unsubscribe confirmation".into()));
            }
            log::debug!("dropping in-flight message while unsubscribing");
        }
    }

    /// Send one message to the device. A non-zero `init` word is prepended
    /// to the payload and flagged in the frame header.
    pub fn send_msg(&mut self, msg: &[u8], init: u32) -> Result<()> {
        if !matches!(self.chl_cht, Cht::Send | Cht::Bidi) {
            return Err(Error::Usage(format!(
                "channel {} not subscribed for sending messages",
                self.chl_num
            )));
        }
        let msg_length = msg.len() + if init != 0 { 4 } else { 0 };
        if msg_length > self.con_info.msg_length_c2d as usize {
            return Err(Error::Param(format!(
                "msg_length {} higher than msg_length_c2d {}",
                msg.len(),
                self.con_info.msg_length_c2d
            )));
        }

        let rq = self.codec.build_send_msg(self.chl_num, msg, init);
        self.con.mailbox.send(rq, 1)
    }

    /// Receive one message, waiting up to `timeout_ms`. Device-reset
    /// notifications are absorbed (they bump the reset counter) and the
    /// wait continues. Returns the transient [`Error::ChlRcv`] when no
    /// message arrives in time.
    pub fn rcv_msg(&mut self, timeout_ms: u32) -> Result<ChlMsg> {
        if !matches!(self.chl_cht, Cht::Rcv | Cht::Bidi) {
            return Err(Error::Usage(format!(
                "channel {} not subscribed for receiving messages",
                self.chl_num
            )));
        }
        self.con.mailbox.config(timeout_ms, CHL_RSP_BUF_SIZE)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

        loop {
            self.rsp_buf.clear();
            let n = self.con.mailbox.receive(&mut self.rsp_buf)?;
            if n == 0 {
                return Err(Error::ChlRcv);
            }
            match self.codec.parse_rcv_msg(&self.rsp_buf[..n], self.chl_num)? {
                Some(msg) => {
                    if msg.data.len() > self.con_info.msg_length_d2c as usize {
                        return Err(Error::General(
                            "received message is longer than msg_length_d2c".into(),
                        ));
                    }
                    return Ok(msg);
                }
                None => {
                    // Reset notification absorbed; keep waiting
                    if timeout_ms != 0 && Instant::now() >= deadline {
                        return Err(Error::ChlRcv);
                    }
                }
            }
        }
    }

    fn check_not_subscribed(&self) -> Result<()> {
        if self.chl_cht != Cht::None {
            Err(Error::Usage("channel is already subscribed".into()))
        } else {
            Ok(())
        }
    }
}

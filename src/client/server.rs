//! Shared server-connection facade
//!
//! Owns the mailbox and the server-connection codec and carries the session
//! state every client kind shares: connect-once, session-start-once, and the
//! gate that blocks request/response operations while a receive channel is
//! active.

use super::{DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP};
use crate::codec;
use crate::codec::server::ServerCodec;
use crate::error::{Error, Result};
use crate::info::{ConInfo, ResetCount, ServerInfo, TargetClientInfo, TargetInfo};
use crate::mailbox::Mailbox;
use crate::packet::PktWriter;
use crate::transport::Transport;
use crate::wire::{pl1cmd, ChlTarget, ClientType, DevConFeat, UnlockCrOption, UnlockOption};

/// Client list of one target, as enumerated by the broker
#[derive(Debug, Clone)]
pub struct TargetClients {
    /// Empty if the session was started without a name
    pub session_name: String,
    /// Microseconds since the server start time
    pub session_start_time_us: u64,
    /// Sorted by connect time ascending
    pub clients: Vec<TargetClientInfo>,
}

/// Connection to the broker shared by all client facades.
#[derive(Debug)]
pub struct ServerCon<T: Transport> {
    pub(crate) mailbox: Mailbox<T>,
    codec: ServerCodec,
    client_name: String,
    user_name: String,
    client_pid: u32,
    server_info: Option<ServerInfo>,
    challenge: u64,
    server_locked: bool,
    pub(crate) session_started: bool,
    pub(crate) rcv_chl_active: bool,
    rsp_buf: Vec<u8>,
}

impl<T: Transport> ServerCon<T> {
    pub(crate) fn new(client_name: &str, transport: T) -> Self {
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        Self {
            mailbox: Mailbox::new(transport),
            codec: ServerCodec::new(),
            client_name: client_name.to_string(),
            user_name,
            client_pid: std::process::id(),
            server_info: None,
            challenge: 0,
            server_locked: false,
            session_started: false,
            rcv_chl_active: false,
            rsp_buf: Vec::new(),
        }
    }

    /// Exchange the initial connect packet. Surfaces `ServerLocked` when the
    /// server demands an unlock; the server info is cached either way.
    pub(crate) fn server_connect(&mut self) -> Result<()> {
        if self.server_info.is_some() {
            return Err(Error::Usage("already connected to server".into()));
        }
        self.mailbox.config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;
        let rq =
            self.codec
                .build_server_connect(&self.client_name, &self.user_name, self.client_pid);
        let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        let (info, challenge, locked) = self.codec.parse_server_connect(&self.rsp_buf[..n])?;
        log::info!(
            "connected to {} v{}.{}",
            info.server_name_str(),
            info.v_major,
            info.v_minor
        );
        self.server_info = Some(info);
        self.challenge = challenge;
        self.server_locked = locked;
        if locked {
            return Err(Error::ServerLocked);
        }
        Ok(())
    }

    pub(crate) fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub(crate) fn challenge(&self) -> u64 {
        self.challenge
    }

    pub(crate) fn server_locked(&self) -> bool {
        self.server_locked
    }

    /// The wire protocol of version 1 has no unlock exchange; the API exists
    /// for servers that lock, which must be unlocked out of band.
    pub(crate) fn server_unlock(&mut self, _key: &[u8]) -> Result<()> {
        Err(Error::NotSupported(
            "server unlock is not available in protocol version 1".into(),
        ))
    }

    pub(crate) fn get_targets(&mut self) -> Result<Vec<TargetInfo>> {
        self.check_no_rcv_chl()?;
        self.mailbox.config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;

        let mut start_index: u8 = 0;
        loop {
            let rq = self.codec.build_get_targets(start_index);
            let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
            let (num_target, num_now) = self.codec.parse_get_targets(&self.rsp_buf[..n])?;
            start_index = start_index.saturating_add(num_now);
            if start_index >= num_target {
                break;
            }
            if num_now == 0 {
                return Err(codec::protocol_err()); // empty page with more to come
            }
        }
        Ok(self.codec.targets().to_vec())
    }

    pub(crate) fn get_target_clients(&mut self, identifier: &str) -> Result<TargetClients> {
        self.check_no_rcv_chl()?;
        self.mailbox.config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;

        let mut start_index: u8 = 0;
        loop {
            let rq = self.codec.build_get_target_clients(identifier, start_index);
            let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
            let (num_client, num_now) = self.codec.parse_get_target_clients(&self.rsp_buf[..n])?;
            start_index = start_index.saturating_add(num_now);
            if start_index >= num_client {
                break;
            }
            if num_now == 0 {
                return Err(codec::protocol_err());
            }
        }
        let (session_name, session_start_time_us, clients) = self.codec.target_clients();
        Ok(TargetClients {
            session_name: session_name.to_string(),
            session_start_time_us,
            clients: clients.to_vec(),
        })
    }

    pub(crate) fn session_start(
        &mut self,
        client_type: ClientType,
        identifier: &str,
        session_name: &str,
        session_pw: &str,
        chl_target: ChlTarget,
        chl_param: u64,
    ) -> Result<ConInfo> {
        if self.session_started {
            return Err(Error::Usage("session was already started".into()));
        }
        self.check_no_rcv_chl()?;
        self.mailbox.config(DEFAULT_TIMEOUT_MS, SERVER_CON_MAX_RSP)?;

        let rq = self.codec.build_session_start(
            client_type,
            identifier,
            session_name,
            session_pw,
            chl_target,
            chl_param,
        );
        let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        let con_info =
            codec::decode_con_info_rsp(&self.rsp_buf[..n], pl1cmd::SESSION_START, client_type)?;
        self.session_started = true;
        Ok(con_info)
    }

    /// Re-read the connection info without touching session state.
    pub(crate) fn target_ping(&mut self, client_type: ClientType) -> Result<ConInfo> {
        if !self.session_started {
            return Err(Error::Usage("session not yet started".into()));
        }
        let mut w = PktWriter::with_capacity(8);
        codec::build_ping_rq(&mut w);
        let n = self.mailbox.execute(w.as_bytes(), &mut self.rsp_buf, 1)?;
        codec::decode_con_info_rsp(&self.rsp_buf[..n], pl1cmd::PING, client_type)
    }

    pub(crate) fn device_connect(&mut self, feat: DevConFeat) -> Result<()> {
        self.check_no_rcv_chl()?;
        if !self.session_started {
            return Err(Error::Usage("session not yet started".into()));
        }
        let rq = self.codec.build_device_connect(feat.bits());
        let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        let (feat_used, device_type) = self.codec.parse_device_connect(&self.rsp_buf[..n])?;
        log::debug!("device connect: feat_used {feat_used:#06x}, device_type {device_type:#010x}");
        Ok(())
    }

    pub(crate) fn device_unlock_get_challenge(
        &mut self,
        ulcro: UnlockCrOption,
    ) -> Result<Vec<u8>> {
        self.check_no_rcv_chl()?;
        let rq = self.codec.build_get_challenge(ulcro);
        let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        self.codec.parse_get_challenge(&self.rsp_buf[..n])
    }

    pub(crate) fn device_unlock_set_key(&mut self, ulo: UnlockOption, key: &[u8]) -> Result<()> {
        self.check_no_rcv_chl()?;
        let rq = self.codec.build_set_device_key(ulo, key)?.to_vec();
        let n = self.mailbox.execute(&rq, &mut self.rsp_buf, 1)?;
        self.codec.parse_set_device_key(&self.rsp_buf[..n])
    }

    pub(crate) fn device_reset_counters(&mut self) -> Result<ResetCount> {
        self.check_no_rcv_chl()?;
        if !self.session_started {
            return Err(Error::Usage("session not yet started".into()));
        }
        let rq = self.codec.build_device_reset_count();
        let n = self.mailbox.execute(rq, &mut self.rsp_buf, 1)?;
        self.codec.parse_device_reset_count(&self.rsp_buf[..n])
    }

    pub(crate) fn check_no_rcv_chl(&self) -> Result<()> {
        if self.rcv_chl_active {
            Err(Error::Usage("receive channel is active".into()))
        } else {
            Ok(())
        }
    }
}

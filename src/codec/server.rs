//! Server-connection packet codec
//!
//! Builds and parses the packets a client exchanges with the broker outside
//! of a RW/channel/trace data path: connect, target and client enumeration,
//! session start, device connect, unlock key/challenge, reset counters.
//! Every request fits the 1 KiB scratch buffer.

use super::{map_pl1_err, pl2_header, protocol_err};
use crate::error::{Error, Result};
use crate::info::{
    ResetCount, ServerInfo, TargetClientInfo, TargetInfo, SERVER_INFO_SIZE,
    TARGET_CLIENT_INFO_SIZE, TARGET_INFO_SIZE,
};
use crate::packet::{PktReader, PktWriter};
use crate::wire::{
    plerr, pl1cmd, ChlTarget, ClientType, UnlockCrOption, UnlockOption, NAME_LEN16, NAME_LEN32,
    NAME_LEN64, UNLOCK_MAX_CHALLENGE_LEN, UNLOCK_MAX_KEY_LEN,
};

/// Upper bound on enumerable targets per broker
pub const NUM_TARGET_MAX: usize = 64;
/// Upper bound on enumerable clients per target
pub const NUM_TARGET_CLIENT_MAX: usize = 32;

/// Stateful codec for the server-connection command set.
#[derive(Debug)]
pub(crate) struct ServerCodec {
    rq: PktWriter,
    start_index: u8,
    num_target: u8,
    targets: Vec<TargetInfo>,
    num_client: u8,
    clients: Vec<TargetClientInfo>,
    session_name: [u8; NAME_LEN16],
    session_start_time_us: u64,
    device_connect_option: u16,
}

impl ServerCodec {
    pub fn new() -> Self {
        Self {
            rq: PktWriter::with_capacity(1024),
            start_index: 0,
            num_target: 0,
            targets: Vec::new(),
            num_client: 0,
            clients: Vec::new(),
            session_name: [0; NAME_LEN16],
            session_start_time_us: 0,
            device_connect_option: 0,
        }
    }

    fn begin(&mut self, pl1_size: u32, cmd: u8, par: u8) -> &mut PktWriter {
        self.rq.clear();
        self.rq.push_u32(4 + pl1_size);
        self.rq.push_u8((pl1_size / 4 - 1) as u8);
        self.rq.push_u8(cmd);
        self.rq.push_u8(par);
        self.rq.push_u8(0);
        &mut self.rq
    }

    // ---- server connect ----

    pub fn build_server_connect(
        &mut self,
        client_name: &str,
        user_name: &str,
        client_pid: u32,
    ) -> &[u8] {
        let pl1_size = (4 + NAME_LEN32 + NAME_LEN16 + 4) as u32;
        let w = self.begin_wide(pl1_size, pl1cmd::SERVER_CONNECT);
        w.push_cstr(client_name, NAME_LEN32);
        w.push_cstr(user_name, NAME_LEN16);
        w.push_u32(client_pid);
        self.rq.as_bytes()
    }

    /// Like [`begin`](Self::begin) but for requests whose third and fourth
    /// header bytes form one reserved u16.
    fn begin_wide(&mut self, pl1_size: u32, cmd: u8) -> &mut PktWriter {
        self.rq.clear();
        self.rq.push_u32(4 + pl1_size);
        self.rq.push_u8((pl1_size / 4 - 1) as u8);
        self.rq.push_u8(cmd);
        self.rq.push_u16(0);
        &mut self.rq
    }

    /// Returns the server info, the unlock challenge and whether the server
    /// is locked.
    pub fn parse_server_connect(&mut self, rsp: &[u8]) -> Result<(ServerInfo, u64, bool)> {
        const PL1_SIZE: u32 = 8 + SERVER_INFO_SIZE as u32 + 8;

        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 4 + PL1_SIZE || (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::SERVER_CONNECT || hdr.wl != (PL1_SIZE / 4 - 1) as u8 {
            return Err(protocol_err());
        }
        if !matches!(
            hdr.err,
            plerr::NO_ERROR | plerr::CMD_FAILED | plerr::SERVER_LOCKED
        ) {
            return Err(protocol_err());
        }

        let mut r = PktReader::new(&rsp[8..]);
        r.skip(4)?; // alignment padding
        let server_info = ServerInfo::decode(&mut r)?;
        let challenge = r.take_u64()?;

        match hdr.err {
            plerr::NO_ERROR => Ok((server_info, challenge, false)),
            plerr::SERVER_LOCKED => Ok((server_info, challenge, true)),
            _ => Err(Error::ServerCon("server connection setup failed".into())),
        }
    }

    // ---- target enumeration ----

    pub fn build_get_targets(&mut self, start_index: u8) -> &[u8] {
        self.start_index = start_index;
        if start_index == 0 {
            self.num_target = 0;
            self.targets.clear();
        }
        self.begin(4, pl1cmd::GET_TARGETS, start_index);
        self.rq.as_bytes()
    }

    /// Returns `(num_target_total, num_now)` for the page just parsed.
    pub fn parse_get_targets(&mut self, rsp: &[u8]) -> Result<(u8, u8)> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if (rsp.len() as u32) < pl2_len || rsp.len() < 12 {
            return Err(protocol_err());
        }
        let mut r = PktReader::new(&rsp[8..]);
        let num_target = r.take_u8()?;
        let start_index = r.take_u8()?;
        let num_now = r.take_u8()?;
        r.skip(1)?;

        if pl2_len != 4 + 8 + num_now as u32 * TARGET_INFO_SIZE as u32 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::GET_TARGETS || hdr.wl as u32 != (pl2_len - 8) / 4 {
            return Err(protocol_err());
        }
        if !matches!(hdr.err, plerr::NO_ERROR | plerr::SERVER_LOCKED) {
            return Err(protocol_err());
        }
        if start_index != self.start_index {
            return Err(protocol_err());
        }
        if self.start_index > 0 && num_target != self.num_target {
            return Err(protocol_err());
        }
        if start_index != 0 && (start_index as u32 + num_now as u32) > self.num_target as u32 {
            return Err(protocol_err());
        }

        if hdr.err == plerr::SERVER_LOCKED {
            return Err(Error::ServerLocked);
        }

        if self.start_index == 0 {
            self.num_target = num_target.min(NUM_TARGET_MAX as u8);
        }
        if self.targets.len() + num_now as usize > NUM_TARGET_MAX {
            return Err(protocol_err());
        }
        for _ in 0..num_now {
            self.targets.push(TargetInfo::decode(&mut r)?);
        }
        Ok((self.num_target, num_now))
    }

    pub fn targets(&self) -> &[TargetInfo] {
        &self.targets
    }

    // ---- client enumeration ----

    pub fn build_get_target_clients(&mut self, identifier: &str, start_index: u8) -> &[u8] {
        self.start_index = start_index;
        if start_index == 0 {
            self.num_client = 0;
            self.clients.clear();
            self.session_name = [0; NAME_LEN16];
            self.session_start_time_us = 0;
        }
        let w = self.begin(4 + NAME_LEN64 as u32, pl1cmd::GET_CLIENTS, start_index);
        w.push_cstr(identifier, NAME_LEN64);
        self.rq.as_bytes()
    }

    pub fn parse_get_target_clients(&mut self, rsp: &[u8]) -> Result<(u8, u8)> {
        const FIXED: u32 = 8 + NAME_LEN16 as u32 + 8;

        let (pl2_len, hdr) = pl2_header(rsp)?;
        if (rsp.len() as u32) < pl2_len || rsp.len() < 12 {
            return Err(protocol_err());
        }
        let mut r = PktReader::new(&rsp[8..]);
        let num_client = r.take_u8()?;
        let start_index = r.take_u8()?;
        let num_now = r.take_u8()?;
        r.skip(1)?;
        let session_name = r.take_name::<NAME_LEN16>()?;
        let session_start_time_us = r.take_u64()?;

        if pl2_len != 4 + FIXED + num_now as u32 * TARGET_CLIENT_INFO_SIZE as u32 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::GET_CLIENTS || hdr.wl as u32 != (pl2_len - 8) / 4 {
            return Err(protocol_err());
        }
        if !matches!(
            hdr.err,
            plerr::NO_ERROR | plerr::PARAM | plerr::SERVER_LOCKED
        ) {
            return Err(protocol_err());
        }
        if start_index != self.start_index {
            return Err(protocol_err());
        }
        if self.start_index > 0 && num_client != self.num_client {
            return Err(protocol_err());
        }
        if start_index != 0 && (start_index as u32 + num_now as u32) > self.num_client as u32 {
            return Err(protocol_err());
        }

        match hdr.err {
            plerr::PARAM => return Err(Error::Param("target does not exist".into())),
            plerr::SERVER_LOCKED => return Err(Error::ServerLocked),
            _ => {}
        }

        if self.start_index == 0 {
            self.num_client = num_client.min(NUM_TARGET_CLIENT_MAX as u8);
            self.session_name = session_name;
            self.session_start_time_us = session_start_time_us;
        }
        if self.clients.len() + num_now as usize > NUM_TARGET_CLIENT_MAX {
            return Err(protocol_err());
        }
        for _ in 0..num_now {
            self.clients.push(TargetClientInfo::decode(&mut r)?);
        }
        Ok((self.num_client, num_now))
    }

    /// Client list sorted by connect time ascending, with the session name
    /// and start time reported on the first page.
    pub fn target_clients(&mut self) -> (&str, u64, &[TargetClientInfo]) {
        self.clients
            .sort_by_key(|c| c.client_connect_time);
        (
            crate::packet::name_str(&self.session_name),
            self.session_start_time_us,
            &self.clients,
        )
    }

    // ---- session ----

    #[allow(clippy::too_many_arguments)]
    pub fn build_session_start(
        &mut self,
        client_type: ClientType,
        identifier: &str,
        session_name: &str,
        session_pw: &str,
        chl_target: ChlTarget,
        chl_param: u64,
    ) -> &[u8] {
        let pl1_size = (4 + 4 + 8 + NAME_LEN64 + NAME_LEN16 + NAME_LEN16) as u32;
        self.rq.clear();
        self.rq.push_u32(4 + pl1_size);
        self.rq.push_u8((pl1_size / 4 - 1) as u8);
        self.rq.push_u8(pl1cmd::SESSION_START);
        self.rq.push_u8(0); // con_id
        self.rq.push_u8(client_type as u8);
        self.rq.push_u8(chl_target as u8);
        self.rq.push_bytes(&[0; 3]);
        self.rq.push_u64(chl_param);
        self.rq.push_cstr(identifier, NAME_LEN64);
        self.rq.push_cstr(session_name, NAME_LEN16);
        self.rq.push_cstr(session_pw, NAME_LEN16);
        self.rq.as_bytes()
    }

    // ---- device connect ----

    pub fn build_device_connect(&mut self, option: u16) -> &[u8] {
        self.device_connect_option = option;
        let w = self.begin(8, pl1cmd::DEVICE_CONNECT, 0);
        w.push_u16(option);
        w.push_u16(0);
        self.rq.as_bytes()
    }

    /// Returns `(feat_used, device_type)`.
    pub fn parse_device_connect(&mut self, rsp: &[u8]) -> Result<(u16, u32)> {
        const PL1_SIZE: u32 = 12;

        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 4 + PL1_SIZE || (rsp.len() as u32) < pl2_len {
            return Err(map_pl1_err(rsp, pl1cmd::DEVICE_CONNECT));
        }
        if hdr.cmd != pl1cmd::DEVICE_CONNECT || hdr.wl != (PL1_SIZE / 4 - 1) as u8 {
            return Err(protocol_err());
        }

        let mut r = PktReader::new(&rsp[8..]);
        let feat_used = r.take_u16()?;
        r.skip(2)?;
        let device_type = r.take_u32()?;

        match hdr.err {
            plerr::NO_ERROR => Ok((feat_used, device_type)),
            plerr::DEV_ACCESS => Err(Error::DeviceAccess(
                "power-down, reset active or no device".into(),
            )),
            plerr::DEV_LOCKED => Err(Error::DeviceLocked),
            plerr::CMD_FAILED => {
                if device_type != 0 {
                    let requested = self.device_connect_option;
                    let msg = if requested & 0x0001 != 0 && feat_used & 0x0001 == 0 {
                        "reset not supported for this device connection"
                    } else if requested & 0x0003 == 0x0003 && feat_used & 0x0003 != 0x0003 {
                        "halt after reset not supported for this device connection"
                    } else {
                        "requested connection feature refused"
                    };
                    Err(Error::Param(msg.into()))
                } else {
                    Err(Error::DeviceAccess("no device connected".into()))
                }
            }
            _ => Err(protocol_err()),
        }
    }

    // ---- unlock ----

    pub fn build_get_challenge(&mut self, ulcro: UnlockCrOption) -> &[u8] {
        let w = self.begin(8, pl1cmd::GET_CHALLENGE, 0);
        w.push_u16(ulcro as u16);
        w.push_u16(0);
        self.rq.as_bytes()
    }

    pub fn parse_get_challenge(&mut self, rsp: &[u8]) -> Result<Vec<u8>> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if (rsp.len() as u32) < pl2_len || rsp.len() < 12 {
            return Err(protocol_err());
        }
        let mut r = PktReader::new(&rsp[8..]);
        let challenge_length = r.take_u16()? as u32;
        r.skip(2)?;

        if challenge_length as usize > UNLOCK_MAX_CHALLENGE_LEN {
            return Err(protocol_err());
        }
        if pl2_len != 4 + 8 + challenge_length.div_ceil(4) * 4 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::GET_CHALLENGE || hdr.wl as u32 != (pl2_len - 8) / 4 {
            return Err(protocol_err());
        }
        match hdr.err {
            plerr::NO_ERROR => Ok(r.take_bytes(challenge_length as usize)?.to_vec()),
            plerr::CMD_FAILED => Err(Error::General("could not read unlock challenge".into())),
            plerr::DEV_ACCESS => Err(Error::DeviceAccess(
                "power-down, reset active or no device".into(),
            )),
            _ => Err(protocol_err()),
        }
    }

    pub fn build_set_device_key(&mut self, ulo: UnlockOption, key: &[u8]) -> Result<&[u8]> {
        if key.len() > UNLOCK_MAX_KEY_LEN || key.len() % 4 != 0 {
            return Err(Error::Param(format!(
                "device key length {} not a multiple of 4 or above {}",
                key.len(),
                UNLOCK_MAX_KEY_LEN
            )));
        }
        let pl1_size = 8 + key.len() as u32;
        let w = self.begin(pl1_size, pl1cmd::SET_DEVICE_KEY, 0);
        w.push_u16(ulo as u16);
        w.push_u16(key.len() as u16);
        w.push_bytes(key);
        Ok(self.rq.as_bytes())
    }

    pub fn parse_set_device_key(&mut self, rsp: &[u8]) -> Result<()> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 8 || hdr.cmd != pl1cmd::SET_DEVICE_KEY || hdr.wl != 0 {
            return Err(protocol_err());
        }
        if hdr.err != plerr::NO_ERROR {
            return Err(protocol_err());
        }
        Ok(())
    }

    // ---- reset counters ----

    pub fn build_device_reset_count(&mut self) -> &[u8] {
        self.begin(4, pl1cmd::DEVICE_RESET_COUNT, 0);
        self.rq.as_bytes()
    }

    pub fn parse_device_reset_count(&mut self, rsp: &[u8]) -> Result<ResetCount> {
        const PL1_SIZE: u32 = 12;
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 4 + PL1_SIZE || (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::DEVICE_RESET_COUNT || hdr.wl != (PL1_SIZE / 4 - 1) as u8 {
            return Err(protocol_err());
        }
        if hdr.err != plerr::NO_ERROR {
            return Err(protocol_err());
        }
        let mut r = PktReader::new(&rsp[8..]);
        Ok(ResetCount {
            porst: r.take_u32()?,
            reset: r.take_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ServerInfo;

    #[test]
    fn server_connect_rq_layout() {
        let mut c = ServerCodec::new();
        let rq = c.build_server_connect("debugger", "user", 4242);
        assert_eq!(rq.len(), 60);
        assert_eq!(&rq[..4], &60u32.to_le_bytes());
        assert_eq!(rq[4], 13); // wl
        assert_eq!(rq[5], pl1cmd::SERVER_CONNECT);
        assert_eq!(&rq[8..16], b"debugger");
        assert_eq!(&rq[40..44], b"user");
        assert_eq!(&rq[56..60], &4242u32.to_le_bytes());
    }

    fn encode_server_connect_rsp(err: u8, si: &ServerInfo, challenge: u64) -> Vec<u8> {
        let mut w = PktWriter::new();
        let pl1_size = 8 + SERVER_INFO_SIZE as u32 + 8;
        w.push_u32(4 + pl1_size);
        w.push_u8((pl1_size / 4 - 1) as u8);
        w.push_u8(pl1cmd::SERVER_CONNECT);
        w.push_u8(0);
        w.push_u8(err);
        w.push_u32(0); // alignment padding
        si.encode(&mut w);
        w.push_u64(challenge);
        w.into_bytes()
    }

    #[test]
    fn server_connect_rsp_round_trip() {
        let mut si = ServerInfo::default();
        si.server_name[..6].copy_from_slice(b"broker");
        si.supp_protoc_ver = 0x2;

        let mut c = ServerCodec::new();
        let rsp = encode_server_connect_rsp(plerr::NO_ERROR, &si, 0xDEAD_BEEF);
        let (info, challenge, locked) = c.parse_server_connect(&rsp).unwrap();
        assert_eq!(info, si);
        assert_eq!(challenge, 0xDEAD_BEEF);
        assert!(!locked);

        let rsp = encode_server_connect_rsp(plerr::SERVER_LOCKED, &si, 1);
        let (_, _, locked) = c.parse_server_connect(&rsp).unwrap();
        assert!(locked);

        let rsp = encode_server_connect_rsp(plerr::DEV_ACCESS, &si, 0);
        assert!(c.parse_server_connect(&rsp).is_err());
    }

    fn encode_targets_page(
        err: u8,
        num_target: u8,
        start_index: u8,
        targets: &[TargetInfo],
    ) -> Vec<u8> {
        let mut w = PktWriter::new();
        let pl1_size = 8 + targets.len() as u32 * TARGET_INFO_SIZE as u32;
        w.push_u32(4 + pl1_size);
        w.push_u8(((pl1_size - 4) / 4) as u8); // (pl2_len - 8) / 4
        w.push_u8(pl1cmd::GET_TARGETS);
        w.push_u8(0);
        w.push_u8(err);
        w.push_u8(num_target);
        w.push_u8(start_index);
        w.push_u8(targets.len() as u8);
        w.push_u8(0);
        for t in targets {
            t.encode(&mut w);
        }
        w.into_bytes()
    }

    fn target(name: &str) -> TargetInfo {
        let mut t = TargetInfo {
            identifier: [0; NAME_LEN64],
            device_type: 0x1234,
            device_id: [9, 9, 9, 9],
            dev_con_phys: crate::wire::DevConPhys::Dap,
            num_client: 0,
        };
        t.identifier[..name.len()].copy_from_slice(name.as_bytes());
        t
    }

    #[test]
    fn target_list_stitches_pages() {
        let mut c = ServerCodec::new();
        c.build_get_targets(0);
        let page0 = encode_targets_page(plerr::NO_ERROR, 3, 0, &[target("a"), target("b")]);
        assert_eq!(c.parse_get_targets(&page0).unwrap(), (3, 2));

        c.build_get_targets(2);
        let page1 = encode_targets_page(plerr::NO_ERROR, 3, 2, &[target("c")]);
        assert_eq!(c.parse_get_targets(&page1).unwrap(), (3, 1));

        let names: Vec<&str> = c.targets().iter().map(|t| t.identifier_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn target_list_rejects_cursor_mismatch() {
        let mut c = ServerCodec::new();
        c.build_get_targets(0);
        let page = encode_targets_page(plerr::NO_ERROR, 2, 1, &[target("a")]);
        assert!(c.parse_get_targets(&page).is_err());
    }

    #[test]
    fn locked_server_surfaces_on_target_list() {
        let mut c = ServerCodec::new();
        c.build_get_targets(0);
        let page = encode_targets_page(plerr::SERVER_LOCKED, 0, 0, &[]);
        assert!(matches!(
            c.parse_get_targets(&page),
            Err(Error::ServerLocked)
        ));
    }

    #[test]
    fn session_start_rq_layout() {
        let mut c = ServerCodec::new();
        let rq = c.build_session_start(
            ClientType::Rw,
            "tap0",
            "sess",
            "",
            ChlTarget::Unknown,
            0,
        );
        assert_eq!(rq.len(), 116);
        assert_eq!(rq[4], 27); // wl
        assert_eq!(rq[5], pl1cmd::SESSION_START);
        assert_eq!(rq[7], ClientType::Rw as u8);
        assert_eq!(&rq[20..24], b"tap0");
        assert_eq!(&rq[84..88], b"sess");
    }

    fn encode_device_connect_rsp(err: u8, feat_used: u16, device_type: u32) -> Vec<u8> {
        let mut w = PktWriter::new();
        w.push_u32(16);
        w.push_u8(2);
        w.push_u8(pl1cmd::DEVICE_CONNECT);
        w.push_u8(0);
        w.push_u8(err);
        w.push_u16(feat_used);
        w.push_u16(0);
        w.push_u32(device_type);
        w.into_bytes()
    }

    #[test]
    fn device_connect_partial_application_names_the_refused_feature() {
        let mut c = ServerCodec::new();
        c.build_device_connect(0x0001); // reset requested
        let rsp = encode_device_connect_rsp(plerr::CMD_FAILED, 0, 0xABCD);
        match c.parse_device_connect(&rsp) {
            Err(Error::Param(msg)) => assert!(msg.contains("reset"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }

        c.build_device_connect(0x0001);
        let rsp = encode_device_connect_rsp(plerr::NO_ERROR, 0x0001, 0xABCD);
        assert_eq!(c.parse_device_connect(&rsp).unwrap(), (0x0001, 0xABCD));

        c.build_device_connect(0);
        let rsp = encode_device_connect_rsp(plerr::DEV_LOCKED, 0, 0xABCD);
        assert!(matches!(
            c.parse_device_connect(&rsp),
            Err(Error::DeviceLocked)
        ));
    }

    #[test]
    fn challenge_round_trip() {
        let mut c = ServerCodec::new();
        let rq = c.build_get_challenge(UnlockCrOption::Udid);
        assert_eq!(rq.len(), 12);
        assert_eq!(rq[5], pl1cmd::GET_CHALLENGE);

        let mut w = PktWriter::new();
        w.push_u32(4 + 8 + 8);
        w.push_u8(3);
        w.push_u8(pl1cmd::GET_CHALLENGE);
        w.push_u8(0);
        w.push_u8(plerr::NO_ERROR);
        w.push_u16(6); // challenge length, padded to 8 on the wire
        w.push_u16(0);
        w.push_bytes(&[1, 2, 3, 4, 5, 6, 0, 0]);
        let challenge = c.parse_get_challenge(w.as_bytes()).unwrap();
        assert_eq!(challenge, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn device_key_must_be_word_sized() {
        let mut c = ServerCodec::new();
        assert!(c
            .build_set_device_key(UnlockOption::HotAttach, &[1, 2, 3])
            .is_err());
        let rq = c
            .build_set_device_key(UnlockOption::HotAttach, &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(rq.len(), 4 + 8 + 4);
    }

    #[test]
    fn reset_count_round_trip() {
        let mut c = ServerCodec::new();
        c.build_device_reset_count();

        let mut w = PktWriter::new();
        w.push_u32(16);
        w.push_u8(2);
        w.push_u8(pl1cmd::DEVICE_RESET_COUNT);
        w.push_u8(0);
        w.push_u8(plerr::NO_ERROR);
        w.push_u32(3);
        w.push_u32(17);
        let rc = c.parse_device_reset_count(w.as_bytes()).unwrap();
        assert_eq!(rc, ResetCount { porst: 3, reset: 17 });
    }
}

//! PL1 packet codecs
//!
//! One codec per client concern: server connection, read/write batches,
//! channel messages, trace streams. The codecs share a handful of framing
//! helpers; beyond those, each is an independent value owned by its client
//! facade.

pub(crate) mod chl;
pub(crate) mod rw;
pub(crate) mod server;
pub(crate) mod trc;

use crate::error::{Error, Result};
use crate::info::{ConInfo, CON_INFO_SIZE};
use crate::packet::{PktReader, PktWriter};
use crate::wire::{plerr, pl1cmd, ClientType, CHL_MAX_MSG_SIZE, PL2_MAX_PKT_SIZE,
    PL2_MAX_PKT_SIZE_MIN, PROTOC_VER};

/// Decoded PL1 response header (the first word after the PL2 length)
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pl1RspHeader {
    pub wl: u8,
    pub cmd: u8,
    /// Third header byte; command specific (con_id, channel, stream, ...)
    pub par: u8,
    pub err: u8,
}

/// Read the PL2 length word and the PL1 response header of a packet.
pub(crate) fn pl2_header(rsp: &[u8]) -> Result<(u32, Pl1RspHeader)> {
    let mut r = PktReader::new(rsp);
    let pl2_len = r.take_u32()?;
    let wl = r.take_u8()?;
    let cmd = r.take_u8()?;
    let par = r.take_u8()?;
    let err = r.take_u8()?;
    Ok((pl2_len, Pl1RspHeader { wl, cmd, par, err }))
}

/// Fatal framing violation on the server connection.
pub(crate) fn protocol_err() -> Error {
    Error::ServerCon("protocol violation".to_string())
}

/// Append a ping request packet.
pub(crate) fn build_ping_rq(w: &mut PktWriter) {
    w.push_u32(4 + 4);
    w.push_u8(0); // wl
    w.push_u8(pl1cmd::PING);
    w.push_u8(0); // con_id
    w.push_u8(0);
}

/// Map an unexpected-size response that still carries a plain PL1 error
/// header for the expected command. Anything else is a framing violation.
pub(crate) fn map_pl1_err(rsp: &[u8], cmd: u8) -> Error {
    let Ok((pl2_len, hdr)) = pl2_header(rsp) else {
        return protocol_err();
    };
    if pl2_len != 8 || rsp.len() < 8 || hdr.cmd != cmd {
        return protocol_err();
    }
    match hdr.err {
        plerr::USAGE => Error::Usage("rejected by server (wrong call ordering)".into()),
        plerr::NOT_SUPPORTED => Error::NotSupported("function not supported by server".into()),
        plerr::CMD_FAILED => Error::General("function failed at server".into()),
        _ => Error::General(format!("unexpected server error code {:#04x}", hdr.err)),
    }
}

/// Shared decoder for session-start and ping responses.
///
/// Both commands answer with the same layout: a PL1 header, the protocol
/// version range, and a full [`ConInfo`] block. Validation order matters:
/// outer size, then command echo and word length, then the version range,
/// then the error whitelist, then the negotiated values themselves.
pub(crate) fn decode_con_info_rsp(rsp: &[u8], cmd: u8, client_type: ClientType) -> Result<ConInfo> {
    const PL1_SIZE: u32 = 8 + CON_INFO_SIZE as u32;

    let (pl2_len, hdr) = pl2_header(rsp)?;
    if pl2_len != 4 + PL1_SIZE || (rsp.len() as u32) < pl2_len {
        return Err(map_pl1_err(rsp, cmd));
    }
    if hdr.cmd != cmd || hdr.wl != (PL1_SIZE / 4 - 1) as u8 {
        return Err(protocol_err());
    }

    let mut r = PktReader::new(&rsp[8..]);
    let ver_min = r.take_u8()?;
    let ver_max = r.take_u8()?;
    let _num_instances = r.take_u8()?;
    r.skip(1)?;
    if PROTOC_VER < ver_min || PROTOC_VER > ver_max {
        return Err(protocol_err());
    }

    match hdr.err {
        plerr::NO_ERROR => {}
        plerr::SESSION => {
            return Err(Error::Param("session name or password mismatch".into()));
        }
        plerr::NOT_SUPPORTED => {
            return Err(Error::Param("parameter refused by server".into()));
        }
        plerr::CMD_FAILED => {
            return Err(if client_type == ClientType::Chl {
                Error::ChlSetup("could not read channel description from device".into())
            } else {
                Error::DeviceAccess("target not connected".into())
            });
        }
        _ => return Err(protocol_err()),
    }

    let con_info = ConInfo::decode(&mut r)?;
    for size in [con_info.max_pl2rq_pkt_size, con_info.max_pl2rsp_pkt_size] {
        if size % 4 != 0 || size < PL2_MAX_PKT_SIZE_MIN || size > PL2_MAX_PKT_SIZE {
            return Err(protocol_err());
        }
    }
    for msg_len in [con_info.msg_length_c2d, con_info.msg_length_d2c] {
        if msg_len % 4 != 0 || msg_len as u32 > CHL_MAX_MSG_SIZE {
            return Err(protocol_err());
        }
    }

    log::debug!(
        "negotiated con_info: rq/rsp {}/{} bytes, {} rw ops per envelope, device {} ({:#010x})",
        con_info.max_pl2rq_pkt_size,
        con_info.max_pl2rsp_pkt_size,
        con_info.pl0_max_num_rw,
        con_info.device_id_hash_str(),
        con_info.device_type,
    );
    Ok(con_info)
}

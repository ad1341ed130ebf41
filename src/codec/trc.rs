//! Trace packet codec
//!
//! Subscribe/unsubscribe for a numbered continuous trace stream and the
//! parsing of unsolicited trace data packets.

use super::{pl2_header, protocol_err};
use crate::error::{Error, Result};
use crate::packet::PktWriter;
use crate::wire::{plerr, pl1cmd, Chso, TrcState, TrcType, PL2_MAX_PKT_SIZE};

/// One received chunk of a trace stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrcData {
    pub data: Vec<u8>,
    /// Stream continuation state; `Sync` marks a decoder anchor
    pub state: TrcState,
    pub stream: u8,
}

pub(crate) struct TrcCodec {
    rq: PktWriter,
    stream: u8,
    chso: Chso,
}

impl TrcCodec {
    pub fn new() -> Self {
        Self {
            rq: PktWriter::with_capacity(16),
            stream: 0,
            chso: Chso::Default,
        }
    }

    pub fn build_subscribe(&mut self, stream: u8, chso: Chso) -> &[u8] {
        self.stream = stream;
        self.chso = chso;
        self.rq.clear();
        self.rq.push_u32(4 + 8);
        self.rq.push_u8(1); // wl
        self.rq.push_u8(pl1cmd::TRC_SUBSCRIBE);
        self.rq.push_u16(0);
        self.rq.push_u8(chso as u8);
        self.rq.push_u8(stream);
        self.rq.push_u16(0);
        self.rq.as_bytes()
    }

    /// Returns the negotiated `(trace_type, chso)`.
    pub fn parse_subscribe(&mut self, rsp: &[u8]) -> Result<(TrcType, Chso)> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 12 || (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::TRC_SUBSCRIBE || hdr.wl != 1 {
            return Err(protocol_err());
        }
        let chso_raw = rsp[8];
        let stream = rsp[9];
        let trct = rsp[10];
        if stream != self.stream {
            return Err(protocol_err());
        }
        let chso = Chso::from_value(chso_raw).ok_or_else(protocol_err)?;

        match hdr.err {
            plerr::NO_ERROR => {
                if chso != self.chso {
                    return Err(protocol_err());
                }
                log::debug!("subscribed trace stream {stream} ({chso:?})");
                Ok((TrcType::from_value(trct), chso))
            }
            plerr::CMD_FAILED => Err(Error::Usage(if self.stream == 0 {
                "continuous trace exclusively claimed by another client".into()
            } else {
                format!(
                    "continuous trace for stream {} exclusively claimed by another client",
                    self.stream
                )
            })),
            plerr::NOT_SUPPORTED => Err(Error::NotSupported(
                "continuous trace not supported by this device, access hardware or server".into(),
            )),
            _ => Err(protocol_err()),
        }
    }

    pub fn build_unsubscribe(&mut self, stream: u8) -> &[u8] {
        self.stream = stream;
        self.rq.clear();
        self.rq.push_u32(4 + 4);
        self.rq.push_u8(0); // wl
        self.rq.push_u8(pl1cmd::TRC_UNSUBSCRIBE);
        self.rq.push_u8(stream);
        self.rq.push_u8(0);
        self.rq.as_bytes()
    }

    pub fn parse_unsubscribe(&mut self, rsp: &[u8]) -> Result<()> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 8 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::TRC_UNSUBSCRIBE || hdr.wl != 0 || hdr.err != plerr::NO_ERROR {
            return Err(protocol_err());
        }
        if hdr.par != self.stream {
            return Err(protocol_err());
        }
        Ok(())
    }

    /// Parse one unsolicited trace data packet. The header is `{wl, cmd,
    /// stream, state}` followed directly by the payload.
    pub fn parse_trc_data(&mut self, rsp: &[u8]) -> Result<TrcData> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len < 4 + 4 + 32 || pl2_len % 4 != 0 || pl2_len > PL2_MAX_PKT_SIZE {
            return Err(protocol_err());
        }
        if (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::TRC_DATA || hdr.wl != 0 {
            return Err(protocol_err());
        }
        let state = TrcState::from_value(hdr.err).ok_or_else(protocol_err)?;
        Ok(TrcData {
            data: rsp[8..pl2_len as usize].to_vec(),
            state,
            stream: hdr.par,
        })
    }
}

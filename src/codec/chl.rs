//! Channel packet codec
//!
//! Subscribe/unsubscribe handshakes and the framed message exchange with
//! firmware. Unsolicited device-reset indications arrive as pseudo
//! message-receive frames and are absorbed into the reset counter.

use super::{pl2_header, protocol_err};
use crate::error::{Error, Result};
use crate::packet::{PktReader, PktWriter};
use crate::wire::{cho, plerr, pl1cmd, Chso, Cht, CHL_LOWEST_PRIORITY, CHL_NUM_MAX};

/// One received device-to-client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChlMsg {
    pub data: Vec<u8>,
    /// Channel init value, 0 when the message carried none
    pub init: u32,
}

pub(crate) struct ChlCodec {
    rq: PktWriter,
    chl: u8,
    cht: Cht,
    chso: Chso,
    device_reset_count: u32,
}

impl ChlCodec {
    pub fn new() -> Self {
        Self {
            rq: PktWriter::with_capacity(crate::wire::CHL_MAX_MSG_SIZE as usize + 64),
            chl: CHL_NUM_MAX,
            cht: Cht::None,
            chso: Chso::Default,
            device_reset_count: 0,
        }
    }

    pub fn device_reset_count(&self) -> u32 {
        self.device_reset_count
    }

    pub fn build_subscribe(&mut self, chl: u8, cht: Cht, chso: Chso, prio: u8) -> &[u8] {
        debug_assert!(chl < CHL_NUM_MAX);
        debug_assert!(prio <= CHL_LOWEST_PRIORITY);
        self.chl = chl;
        self.cht = cht;
        self.chso = chso;

        self.rq.clear();
        self.rq.push_u32(4 + 8);
        self.rq.push_u8(1); // wl
        self.rq.push_u8(pl1cmd::CHL_SUBSCRIBE);
        self.rq.push_u16(0);
        self.rq.push_u8(chl);
        self.rq.push_u8(cht as u8);
        self.rq.push_u8(chso as u8);
        self.rq.push_u8(prio);
        self.rq.as_bytes()
    }

    /// Returns the granted `(cht, chso, prio)`.
    pub fn parse_subscribe(&mut self, rsp: &[u8]) -> Result<(Cht, Chso, u8)> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 12 || (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::CHL_SUBSCRIBE || hdr.wl != 1 {
            return Err(protocol_err());
        }
        let mut r = PktReader::new(&rsp[8..]);
        let chl = r.take_u8()?;
        let cht_raw = r.take_u8()?;
        let chso_raw = r.take_u8()?;
        let prio = r.take_u8()?;

        if chl != self.chl {
            return Err(protocol_err());
        }
        let chso = Chso::from_value(chso_raw).ok_or_else(protocol_err)?;
        if prio > CHL_LOWEST_PRIORITY {
            return Err(protocol_err());
        }

        match hdr.err {
            plerr::NO_ERROR => {
                let cht = Cht::from_value(cht_raw).ok_or_else(protocol_err)?;
                log::debug!("subscribed channel {chl} ({cht:?}, {chso:?}, prio {prio})");
                Ok((cht, chso, prio))
            }
            plerr::CMD_FAILED if cht_raw != self.cht as u8 => {
                Err(Error::ChlSetup(if self.chso == Chso::Exclusive {
                    format!(
                        "could not exclusively subscribe to channel {} since already used by another client",
                        self.chl
                    )
                } else {
                    format!(
                        "could not subscribe to channel {} since exclusively used by another client",
                        self.chl
                    )
                }))
            }
            _ => Err(protocol_err()),
        }
    }

    pub fn build_unsubscribe(&mut self, chl: u8) -> &[u8] {
        debug_assert!(chl < CHL_NUM_MAX);
        self.chl = chl;
        self.rq.clear();
        self.rq.push_u32(4 + 4);
        self.rq.push_u8(0); // wl
        self.rq.push_u8(pl1cmd::CHL_UNSUBSCRIBE);
        self.rq.push_u8(chl);
        self.rq.push_u8(0);
        self.rq.as_bytes()
    }

    pub fn parse_unsubscribe(&mut self, rsp: &[u8]) -> Result<()> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if pl2_len != 8 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::CHL_UNSUBSCRIBE || hdr.wl != 0 || hdr.err != plerr::NO_ERROR {
            return Err(protocol_err());
        }
        if hdr.par != self.chl {
            return Err(protocol_err());
        }
        Ok(())
    }

    /// Build a client-to-device message. A non-zero `init` is carried as the
    /// first payload word.
    pub fn build_send_msg(&mut self, chl: u8, msg: &[u8], init: u32) -> &[u8] {
        debug_assert!(chl < CHL_NUM_MAX);
        // After sending, the next receive may come from any subscribed channel
        self.chl = 0xFF;

        let msg_length = if init == 0 {
            msg.len() as u16
        } else {
            msg.len() as u16 + 4
        };
        let msg_words = msg_length.div_ceil(4) as u32;

        self.rq.clear();
        self.rq.push_u32(4 + 8 + msg_words * 4);
        self.rq.push_u8(1); // wl of the message header
        self.rq.push_u8(pl1cmd::CHL_MSG_C2D);
        self.rq.push_u16(0);
        self.rq.push_u8(chl);
        self.rq
            .push_u8(if init == 0 { cho::NONE } else { cho::INIT });
        self.rq.push_u16(msg_length);
        if init != 0 {
            self.rq.push_u32(init);
        }
        self.rq.push_bytes(msg);
        self.rq.pad_to_word();
        self.rq.as_bytes()
    }

    /// Parse one device-to-client frame for channel `chl`. `Ok(None)` means
    /// a device-reset notification was absorbed and no message is available.
    pub fn parse_rcv_msg(&mut self, rsp: &[u8], chl: u8) -> Result<Option<ChlMsg>> {
        let (pl2_len, hdr) = pl2_header(rsp)?;
        if (rsp.len() as u32) < pl2_len {
            return Err(protocol_err());
        }

        // Reset notification: a pseudo message frame without payload
        if pl2_len == 12 && hdr.cmd == pl1cmd::CHL_MSG_D2C && hdr.err == plerr::DEV_RESET {
            let mut r = PktReader::new(&rsp[8..]);
            let (rchl, rcho) = (r.take_u8()?, r.take_u8()?);
            let msg_length = r.take_u16()?;
            if hdr.wl != 1 || rchl != 0 || rcho != 0 || msg_length != 0 {
                return Err(protocol_err());
            }
            self.device_reset_count = self.device_reset_count.wrapping_add(1);
            log::debug!("device reset notification on channel path");
            return Ok(None);
        }

        if pl2_len < 4 + 8 + 4 {
            return Err(protocol_err());
        }
        if hdr.cmd != pl1cmd::CHL_MSG_D2C || hdr.wl != 1 {
            return Err(protocol_err());
        }
        match hdr.err {
            plerr::NO_ERROR => {}
            plerr::DEV_RESET => {
                self.device_reset_count = self.device_reset_count.wrapping_add(1);
            }
            _ => return Err(protocol_err()),
        }

        let mut r = PktReader::new(&rsp[8..]);
        let rchl = r.take_u8()?;
        let rcho = r.take_u8()?;
        let msg_length = r.take_u16()?;
        if rchl >= CHL_NUM_MAX || rcho > cho::INIT {
            return Err(protocol_err());
        }
        if pl2_len != 4 + 8 + msg_length.div_ceil(4) as u32 * 4 {
            return Err(protocol_err());
        }
        if rchl != chl {
            return Err(protocol_err());
        }

        if rcho == cho::INIT {
            let init = r.take_u32()?;
            let data = r.take_bytes(msg_length as usize - 4)?.to_vec();
            Ok(Some(ChlMsg { data, init }))
        } else {
            let data = r.take_bytes(msg_length as usize)?.to_vec();
            Ok(Some(ChlMsg { data, init: 0 }))
        }
    }
}

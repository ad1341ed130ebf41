//! PL2 packet mailbox
//!
//! Delivers whole PL2 packets over a [`Transport`]. Every packet starts with
//! a 32-bit little-endian length word counting itself; the receive loop
//! validates `length % 4 == 0 && length >= 8` and the configured response
//! maximum before reading the body. Any size violation or short read mid
//! packet disconnects the mailbox for good; a clean timeout before the first
//! byte of a packet is reported as "no data" and leaves the connection up so
//! channel and trace receives can be retried.

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Request/response mailbox carrying length-prefixed PL2 packets.
#[derive(Debug)]
pub struct Mailbox<T: Transport> {
    transport: Option<T>,
    timeout_ms: u32,
    max_rsp_bytes: u32,
}

impl<T: Transport> Mailbox<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            timeout_ms: 0,
            max_rsp_bytes: crate::wire::PL2_MAX_PKT_SIZE,
        }
    }

    /// Configure the receive timeout (0 = infinite) and the maximum number
    /// of response bytes accepted per receive call. `max_rsp_bytes` must be
    /// a multiple of 4.
    pub fn config(&mut self, timeout_ms: u32, max_rsp_bytes: u32) -> Result<()> {
        debug_assert_eq!(max_rsp_bytes % 4, 0);
        self.timeout_ms = timeout_ms;
        self.max_rsp_bytes = max_rsp_bytes;
        if let Some(t) = self.transport.as_mut() {
            t.set_receive_timeout(timeout_ms)?;
        }
        Ok(())
    }

    pub fn connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Drop the transport; all further calls fail with a connection error.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            log::warn!("mailbox disconnected");
        }
    }

    /// Send `num_pl2` packets from `rq`. Each packet is written atomically.
    pub fn send(&mut self, rq: &[u8], num_pl2: u32) -> Result<()> {
        let mut off = 0usize;
        for _ in 0..num_pl2 {
            if off + 4 > rq.len() {
                return Err(Error::ServerCon("request shorter than packet count".into()));
            }
            let pkt_size =
                u32::from_le_bytes([rq[off], rq[off + 1], rq[off + 2], rq[off + 3]]) as usize;
            if pkt_size % 4 != 0
                || pkt_size < 8
                || pkt_size > crate::wire::PL2_MAX_PKT_SIZE as usize
                || off + pkt_size > rq.len()
            {
                return Err(Error::ServerCon(format!(
                    "invalid request packet size {pkt_size}"
                )));
            }
            let transport = match self.transport.as_mut() {
                Some(t) => t,
                None => return Err(Error::ServerCon("not connected".into())),
            };
            if let Err(e) = transport.write_all(&rq[off..off + pkt_size]) {
                self.disconnect();
                return Err(Error::ServerCon(format!("send failed: {e}")));
            }
            off += pkt_size;
        }
        Ok(())
    }

    /// Receive one PL2 packet, appending it to `rsp`. Returns the packet
    /// size, or 0 on a clean timeout with no data (connection stays up).
    pub fn receive(&mut self, rsp: &mut Vec<u8>) -> Result<usize> {
        match self.receive_pl2(rsp)? {
            Some(n) => Ok(n),
            None => Ok(0),
        }
    }

    /// Send `num_pl2` request packets and receive exactly one response packet
    /// per request packet into `rsp` (cleared first). Returns the total
    /// response size. A timeout mid-exchange is terminal.
    pub fn execute(&mut self, rq: &[u8], rsp: &mut Vec<u8>, num_pl2: u32) -> Result<usize> {
        rsp.clear();
        self.send(rq, num_pl2)?;
        for _ in 0..num_pl2 {
            match self.receive_pl2(rsp)? {
                Some(_) => {}
                None => {
                    self.disconnect();
                    return Err(Error::ServerCon("response timeout".into()));
                }
            }
        }
        Ok(rsp.len())
    }

    /// Read one length-prefixed packet. `Ok(None)` is a clean timeout on the
    /// length word; every other failure disconnects.
    fn receive_pl2(&mut self, rsp: &mut Vec<u8>) -> Result<Option<usize>> {
        let mut word = [0u8; 4];
        match self.transport.as_mut() {
            None => return Err(Error::ServerCon("not connected".into())),
            Some(t) => {
                if let Err(e) = t.read_exact(&mut word) {
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) {
                        return Ok(None);
                    }
                    self.disconnect();
                    return Err(Error::ServerCon(format!("receive failed: {e}")));
                }
            }
        }

        let pkt_size = u32::from_le_bytes(word) as usize;
        if pkt_size % 4 != 0 || pkt_size < 8 || rsp.len() + pkt_size > self.max_rsp_bytes as usize {
            self.disconnect();
            return Err(Error::ServerCon(format!(
                "invalid response packet size {pkt_size}"
            )));
        }

        let start = rsp.len();
        rsp.extend_from_slice(&word);
        rsp.resize(start + pkt_size, 0);
        if let Some(t) = self.transport.as_mut() {
            if let Err(e) = t.read_exact(&mut rsp[start + 4..]) {
                // A timeout inside a packet means the stream is torn
                self.disconnect();
                return Err(Error::ServerCon(format!("receive failed: {e}")));
            }
        }
        Ok(Some(pkt_size))
    }
}

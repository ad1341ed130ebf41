//! Stream transport abstraction
//!
//! The mailbox only needs a blocking byte stream with exact reads and a
//! configurable receive timeout. TCP is the one production transport; tests
//! substitute in-memory implementations.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Blocking byte-stream transport
pub trait Transport {
    /// Write all bytes or fail.
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Read exactly `buf.len()` bytes, honouring the configured receive
    /// timeout. A timeout surfaces as `TimedOut` or `WouldBlock`.
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()>;

    /// Set the receive timeout in milliseconds; 0 means block forever.
    fn set_receive_timeout(&mut self, timeout_ms: u32) -> std::io::Result<()>;
}

/// TCP transport to the broker
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `host:port`. Disables Nagle's algorithm; the protocol is
    /// strictly request/response and latency-bound.
    pub fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, Duration::from_secs(5)) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    log::info!("connected to broker at {host}:{port}");
                    return Ok(Self { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {host}:{port}"),
            )
        }))
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.stream.read_exact(buf)
    }

    fn set_receive_timeout(&mut self, timeout_ms: u32) -> std::io::Result<()> {
        let timeout = if timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };
        self.stream.set_read_timeout(timeout)
    }
}

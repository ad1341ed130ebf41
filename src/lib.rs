//! probelink - broker-based access to embedded targets
//!
//! Client library for host tools (debuggers, flash programmers,
//! instrumentation) that reach an embedded microcontroller through a
//! separately running broker process over TCP. A client enumerates the
//! targets the broker offers, joins or opens a named session on one of
//! them, and then either issues memory read/write/fill transactions,
//! exchanges framed messages with firmware over a numbered channel, or
//! subscribes to a continuous trace stream.
//!
//! # Protocol Overview
//!
//! Three framing layers, all little-endian:
//!
//! - **PL2** transport envelopes: a 32-bit length word followed by the
//!   payload; the atomicity boundary for batched memory access.
//! - **PL1** command frames: session management, channel and trace
//!   commands, and the pl0-start/pl0-end pair bracketing memory batches.
//! - **PL0** micro-ops: 8/16/32/64-bit and block reads and writes against
//!   a 16-bit offset under a shared base address, plus address-map,
//!   access-mode and base-address state changes.
//!
//! The request planner packs user transactions into as few envelopes as
//! the negotiated limits allow; the response parser binds the batched
//! results back to the originating transactions.
//!
//! # Example
//!
//! ```no_run
//! use probelink::{DevConFeat, RwClient, PORT_NUM_SERVER_DEFAULT};
//!
//! let mut client = RwClient::connect("my-tool", "localhost", PORT_NUM_SERVER_DEFAULT)?;
//! let targets = client.get_targets()?;
//! client.session_start(targets[0].identifier_str(), "", "")?;
//! client.device_connect(DevConFeat::empty())?;
//!
//! client.write32(0x7000_0000, 0xABCD_EF09, 0)?;
//! let value = client.read32(0x7000_0000, 0)?;
//! println!("read back {value:#010x}");
//! # Ok::<(), probelink::Error>(())
//! ```

pub mod error;
pub mod info;
pub mod mailbox;
pub mod packet;
pub mod trans;
pub mod transport;
pub mod utils;
pub mod wire;

mod client;
mod codec;

// Re-exports
pub use client::server::TargetClients;
pub use client::{chl::ChannelClient, rw::RwClient, trc::TraceClient, DEFAULT_TIMEOUT_MS};
pub use codec::chl::ChlMsg;
pub use codec::rw::RwPlanner;
pub use codec::trc::TrcData;
pub use error::{Error, Result};
pub use info::{ConInfo, ResetCount, ServerInfo, TargetClientInfo, TargetInfo};
pub use mailbox::Mailbox;
pub use trans::{RwTrans, RwTransRsp, TransKind};
pub use transport::{TcpTransport, Transport};
pub use wire::{
    ChlTarget, Chso, Cht, ClientType, DevConFeat, DevConPhys, TrcState, TrcType, UnlockCrOption,
    UnlockOption, PORT_NUM_DEVICE_DEFAULT, PORT_NUM_PROXY_DEFAULT, PORT_NUM_SERVER_DEFAULT,
};

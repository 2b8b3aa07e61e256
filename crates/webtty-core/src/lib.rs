//! webtty-core: the protocol engine that bridges a terminal process to a
//! remote client.
//!
//! The engine never touches a socket or a pty directly. It talks to the
//! network side through [`Master`] and to the process side through [`Slave`],
//! so either end can be swapped for a different transport, backend or a test
//! double.
//!
//! # Architecture
//!
//! - [`protocol`]: Frame tags plus encode/decode of the wire format.
//! - [`Master`] / [`Slave`]: Capability traits for the two endpoints.
//! - [`Factory`]: Builds a `Slave` from per-connection parameters.
//! - [`WebTty`]: Runs the two pumps for one connection.

pub mod factory;
pub mod master;
pub mod protocol;
pub mod slave;
pub mod webtty;

pub use factory::{Factory, Params};
pub use master::{Master, MasterError, TransportMessage};
pub use protocol::{InboundFrame, OutboundFrame, ProtocolError, ResizeRequest};
pub use slave::{Slave, SlaveError};
pub use webtty::{WebTty, WebTtyConfig, WebTtyError, DEFAULT_BUFFER_SIZE};

/// Websocket subprotocol negotiated by terminal-bridge clients.
pub const SUBPROTOCOL: &str = "gotty";

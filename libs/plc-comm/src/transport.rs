//! Transport layer
//!
//! - `net_support`: chunked, stall-timed read/write primitives over any async stream
//! - `message`: framing descriptors that tell a pipe when a response is complete
//! - `pipe`: the [`CommunicationPipe`] trait every medium implements
//! - `socket` / `serial` / `tls`: the three media

pub mod message;
pub mod net_support;
pub mod pipe;
pub mod serial;
pub mod socket;
pub mod tls;

pub use message::{ModbusTcpMessage, NetMessage, TerminatorMessage};
pub use net_support::ReadStatus;
pub use pipe::{CommunicationPipe, ErrorCounter, PipeSettings, ReceiveLength};
pub use serial::{SerialIo, SerialParity, SerialPipe, SerialSettings};
pub use socket::SocketPipe;
pub use tls::{TlsPipe, TlsSettings};

//! PLC Communication Library
//!
//! Typed data exchange with PLC-class devices over TCP, serial and TLS media.
//!
//! # Architecture
//!
//! - **Bytes**: `ByteTransform` maps values onto vendor byte and word order
//! - **Transport**: `CommunicationPipe` (socket, serial, TLS) with exact-length,
//!   stall-bounded reads and `NetMessage` response framing
//! - **Device**: `ReadWriteNet` derives every typed read/write from a vendor's
//!   raw `read`/`write` and its word length
//! - **Protocols**: Omron HostLink C-Mode, Modbus-TCP and Delta series dispatch
//! - **Config**: figment-loaded device descriptions
//!
//! ```no_run
//! use plc_comm::{OmronHostLinkCMode, PipeSettings, ReadWriteNet};
//!
//! # async fn run() -> plc_comm::Result<()> {
//! let mut plc = OmronHostLinkCMode::tcp("192.168.0.10:9600", PipeSettings::default(), 0);
//! plc.write_i16("D100", 254).await?;
//! assert_eq!(plc.read_i16("D100").await?, 254);
//! plc.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bytes;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod protocols;
pub mod transport;

pub use bytes::{ByteTransform, DataFormat, StringEncoding, TransformKind};
pub use config::{connect_device, load_device_config, load_device_configs, DeviceConfig};
pub use device::{get_word_length, DataTransfer, DeviceCommunication, ReadWriteNet};
pub use error::{CommError, Result};
pub use logging::FrameLogger;
pub use protocols::{DeltaSeries, DeltaTcpNet, ModbusTcpNet, OmronHostLinkCMode, PlcMode};
pub use transport::{
    CommunicationPipe, ErrorCounter, NetMessage, PipeSettings, ReadStatus, ReceiveLength,
    SerialPipe, SerialSettings, SocketPipe, TlsPipe, TlsSettings,
};

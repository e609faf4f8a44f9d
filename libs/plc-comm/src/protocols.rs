//! Vendor protocol adapters
//!
//! - `omron_hostlink`: Omron HostLink C-Mode (ASCII, serial or serial-over-TCP)
//! - `modbus_tcp`: Modbus-TCP primitive used by the Delta adapter
//! - `delta`: Delta series dispatch (DVP address translation, AS pass-through)

pub mod delta;
pub mod modbus_tcp;
pub mod omron_hostlink;

pub use delta::{DeltaSeries, DeltaTcpNet};
pub use modbus_tcp::ModbusTcpNet;
pub use omron_hostlink::{OmronHostLinkCMode, PlcMode};

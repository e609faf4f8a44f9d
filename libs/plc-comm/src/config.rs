//! Device configuration
//!
//! A device is described by its transport, its protocol and optional timeout
//! and byte-order overrides:
//!
//! ```toml
//! name = "press-1"
//!
//! [transport]
//! type = "serial"
//! port_name = "COM3-9600-7-E-2"
//!
//! [protocol]
//! kind = "omron_hostlink"
//! unit_number = 0
//!
//! [timeouts]
//! receive_timeout_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bytes::DataFormat;
use crate::device::ReadWriteNet;
use crate::error::{CommError, Result};
use crate::protocols::{DeltaSeries, DeltaTcpNet, ModbusTcpNet, OmronHostLinkCMode};
use crate::transport::{
    CommunicationPipe, PipeSettings, SerialPipe, SerialSettings, SocketPipe, TlsPipe, TlsSettings,
};

/// Prefix of environment overrides for a single device file
pub const ENV_PREFIX: &str = "PLC_COMM_";

/// One device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Overrides the protocol's default 32/64-bit word order
    #[serde(default)]
    pub data_format: Option<DataFormat>,
}

/// Communication medium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp {
        /// `host:port`
        endpoint: String,
    },
    Tls {
        endpoint: String,
        tls: TlsSettings,
    },
    /// `port_name` may use the compact `COM3-9600-8-N-1` form
    Serial(SerialSettings),
}

/// Vendor protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProtocolConfig {
    #[serde(rename = "omron_hostlink")]
    OmronHostLinkCMode {
        #[serde(default)]
        unit_number: u8,
    },
    #[serde(rename = "modbus_tcp")]
    ModbusTcp {
        #[serde(default = "default_station")]
        station: u8,
    },
    #[serde(rename = "delta")]
    Delta {
        series: DeltaSeries,
        #[serde(default = "default_station")]
        station: u8,
    },
}

fn default_station() -> u8 {
    1
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// Serial poll interval
    pub sleep_time_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            receive_timeout_ms: 5_000,
            sleep_time_ms: 20,
        }
    }
}

impl From<TimeoutConfig> for PipeSettings {
    fn from(timeouts: TimeoutConfig) -> Self {
        PipeSettings {
            connect_timeout: Duration::from_millis(timeouts.connect_timeout_ms),
            receive_timeout: Duration::from_millis(timeouts.receive_timeout_ms),
            sleep_time: Duration::from_millis(timeouts.sleep_time_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

fn file_figment(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CommError::config("Config file must have an extension"))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(CommError::config(format!(
            "Unsupported config file format: {extension}"
        ))),
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CommError::config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

/// Load one device; `PLC_COMM_*` variables override file values
/// (`PLC_COMM_TIMEOUTS__RECEIVE_TIMEOUT_MS=1000`)
pub fn load_device_config(path: impl AsRef<Path>) -> Result<DeviceConfig> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let mut config: DeviceConfig = file_figment(path)?
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| CommError::config(format!("Failed to load device config: {e}")))?;
    config.resolve_paths(path);
    Ok(config)
}

/// Load the `devices` list of a file
pub fn load_device_configs(path: impl AsRef<Path>) -> Result<Vec<DeviceConfig>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let list: DeviceList = file_figment(path)?
        .extract()
        .map_err(|e| CommError::config(format!("Failed to load device list: {e}")))?;
    let mut devices = list.devices;
    for device in &mut devices {
        device.resolve_paths(path);
    }
    Ok(devices)
}

/// Apply the compact `port-baud-data-parity-stop` form of `port_name`
fn resolve_serial(settings: &SerialSettings) -> Result<SerialSettings> {
    let parsed: SerialSettings = settings.port_name.parse()?;
    if parsed.port_name == settings.port_name {
        return Ok(settings.clone());
    }
    Ok(SerialSettings {
        port_name: parsed.port_name,
        baud_rate: parsed.baud_rate,
        data_bits: parsed.data_bits,
        parity: parsed.parity,
        stop_bits: parsed.stop_bits,
        ..settings.clone()
    })
}

impl TransportConfig {
    /// Unopened pipe for this medium
    pub fn build_pipe(&self, settings: PipeSettings) -> Result<Box<dyn CommunicationPipe>> {
        let pipe: Box<dyn CommunicationPipe> = match self {
            TransportConfig::Tcp { endpoint } => Box::new(SocketPipe::new(endpoint.clone(), settings)),
            TransportConfig::Tls { endpoint, tls } => {
                Box::new(TlsPipe::new(endpoint.clone(), tls.clone(), settings))
            },
            TransportConfig::Serial(serial) => {
                Box::new(SerialPipe::port(resolve_serial(serial)?, settings))
            },
        };
        Ok(pipe)
    }
}

impl DeviceConfig {
    /// Make a relative TLS CA file relative to the config file at `base`
    fn resolve_paths(&mut self, base: &Path) {
        if let TransportConfig::Tls { tls, .. } = &mut self.transport {
            if let Some(ca_file) = &tls.ca_file {
                tls.ca_file = Some(resolve_relative(base, ca_file));
            }
        }
    }

    pub fn pipe_settings(&self) -> PipeSettings {
        self.timeouts.into()
    }

    /// Protocol object over an unopened pipe; the pipe opens on first use
    pub fn build(&self) -> Result<Box<dyn ReadWriteNet>> {
        let pipe = self.transport.build_pipe(self.pipe_settings())?;
        Ok(self.wrap(pipe))
    }

    fn wrap(&self, pipe: Box<dyn CommunicationPipe>) -> Box<dyn ReadWriteNet> {
        match &self.protocol {
            ProtocolConfig::OmronHostLinkCMode { unit_number } => {
                let mut plc = OmronHostLinkCMode::new(pipe, *unit_number);
                if let Some(format) = self.data_format {
                    plc.device_mut().byte_transform_mut().set_data_format(format);
                }
                Box::new(plc)
            },
            ProtocolConfig::ModbusTcp { station } => {
                let mut plc = ModbusTcpNet::new(pipe, *station);
                if let Some(format) = self.data_format {
                    plc.device_mut().byte_transform_mut().set_data_format(format);
                }
                Box::new(plc)
            },
            ProtocolConfig::Delta { series, station } => {
                let mut modbus = ModbusTcpNet::new(pipe, *station);
                if let Some(format) = self.data_format {
                    modbus.device_mut().byte_transform_mut().set_data_format(format);
                }
                Box::new(DeltaTcpNet::new(modbus, series.clone()))
            },
        }
    }
}

/// Build the device and open its pipe
pub async fn connect_device(config: &DeviceConfig) -> Result<Box<dyn ReadWriteNet>> {
    let mut pipe = config.transport.build_pipe(config.pipe_settings())?;
    pipe.open_communication().await?;
    info!("Device connected: {} ({})", config.name, pipe.name());
    Ok(config.wrap(pipe))
}

/// `path` relative to the directory of the config file `base`
pub fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.parent().unwrap_or(Path::new(".")).join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SerialParity;
    use tempfile::TempDir;

    const HOSTLINK_TOML: &str = r#"
name = "press-1"
data_format = "ABCD"

[transport]
type = "serial"
port_name = "COM3-9600-7-E-2"
clear_cache_before_read = true

[protocol]
kind = "omron_hostlink"
unit_number = 3

[timeouts]
receive_timeout_ms = 2000
"#;

    #[test]
    fn test_load_toml_device() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("press.toml");
        std::fs::write(&path, HOSTLINK_TOML).unwrap();

        let config = load_device_config(&path).unwrap();
        assert_eq!(config.name, "press-1");
        assert_eq!(config.data_format, Some(DataFormat::BigEndian));
        assert_eq!(
            config.protocol,
            ProtocolConfig::OmronHostLinkCMode { unit_number: 3 }
        );
        assert_eq!(config.timeouts.receive_timeout_ms, 2000);
        assert_eq!(config.timeouts.connect_timeout_ms, 10_000);

        let TransportConfig::Serial(serial) = &config.transport else {
            panic!("expected serial transport");
        };
        let resolved = resolve_serial(serial).unwrap();
        assert_eq!(resolved.port_name, "COM3");
        assert_eq!(resolved.data_bits, 7);
        assert_eq!(resolved.parity, SerialParity::Even);
        assert_eq!(resolved.stop_bits, 2);
        assert!(resolved.clear_cache_before_read);
    }

    #[test]
    fn test_load_yaml_device_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.yaml");
        std::fs::write(
            &path,
            r#"
devices:
  - name: line-a
    transport:
      type: tcp
      endpoint: 192.168.1.10:502
    protocol:
      kind: delta
      series: Dvp
  - name: line-b
    transport:
      type: tls
      endpoint: plc.local:802
      tls:
        server_name: plc.local
        ca_file: certs/ca.pem
    protocol:
      kind: modbus_tcp
      station: 4
"#,
        )
        .unwrap();

        let devices = load_device_configs(&path).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices[0].protocol,
            ProtocolConfig::Delta {
                series: DeltaSeries::Dvp,
                station: 1
            }
        );
        let TransportConfig::Tls { tls, .. } = &devices[1].transport else {
            panic!("expected tls transport");
        };
        assert_eq!(tls.ca_file, Some(dir.path().join("certs/ca.pem")));
        assert_eq!(devices[1].protocol, ProtocolConfig::ModbusTcp { station: 4 });
    }

    #[test]
    fn test_unknown_delta_series_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"name":"x","transport":{"type":"tcp","endpoint":"127.0.0.1:502"},
                "protocol":{"kind":"delta","series":"AH"}}"#,
        )
        .unwrap();

        assert!(matches!(load_device_config(&path), Err(CommError::Config(_))));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(matches!(
            load_device_config("/nonexistent/device.toml"),
            Err(CommError::Config(_))
        ));
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device.ini");
        std::fs::write(&path, "name=x").unwrap();
        assert!(matches!(load_device_config(&path), Err(CommError::Config(_))));
    }

    #[test]
    fn test_timeouts_into_pipe_settings() {
        let settings: PipeSettings = TimeoutConfig::default().into();
        assert_eq!(settings, PipeSettings::default());
    }

    #[test]
    fn test_build_without_opening() {
        let config = DeviceConfig {
            name: "local".to_string(),
            transport: TransportConfig::Tcp {
                endpoint: "127.0.0.1:1".to_string(),
            },
            protocol: ProtocolConfig::ModbusTcp { station: 1 },
            timeouts: TimeoutConfig::default(),
            data_format: Some(DataFormat::LittleEndian),
        };
        let device = config.build().unwrap();
        assert_eq!(device.word_length(), 1);
        assert_eq!(device.byte_transform().data_format(), DataFormat::LittleEndian);
    }

    #[test]
    fn test_serial_transport_builds_unopened_pipe() {
        let transport = TransportConfig::Serial("COM7-19200-8-E-1".parse().unwrap());
        let pipe = transport.build_pipe(PipeSettings::default()).unwrap();
        assert_eq!(pipe.name(), "COM7");
        assert!(!pipe.is_open());
        assert_eq!(pipe.error_count(), 0);
    }

    #[tokio::test]
    async fn test_built_device_disposes_once() {
        let config = DeviceConfig {
            name: "press".to_string(),
            transport: TransportConfig::Serial(SerialSettings::default()),
            protocol: ProtocolConfig::OmronHostLinkCMode { unit_number: 0 },
            timeouts: TimeoutConfig::default(),
            data_format: None,
        };
        let mut device = config.build().unwrap();
        device.dispose().await.unwrap();
        device.dispose().await.unwrap();
        // a disposed device never reopens its pipe
        assert!(matches!(
            device.read_i16("D0").await,
            Err(CommError::Transport { .. })
        ));
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/etc/plc/devices.toml");
        assert_eq!(
            resolve_relative(base, Path::new("ca.pem")),
            PathBuf::from("/etc/plc/ca.pem")
        );
        assert_eq!(
            resolve_relative(base, Path::new("/abs/ca.pem")),
            PathBuf::from("/abs/ca.pem")
        );
    }
}

//! Delta PLC series dispatch
//!
//! Delta controllers speak Modbus. AS-series addresses are Modbus addresses
//! already and pass straight through. DVP-series addresses use the PLC's own
//! area names (`D100`, `M10`, `X17`, ...) and are rewritten onto the DVP
//! Modbus map first. Any other series is rejected before touching the device.
//!
//! The DVP map is discontinuous at `D4096` and `M1536`, so accesses crossing
//! those boundaries are issued as two primitive calls.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::extract_parameter;
use crate::bytes::ByteTransform;
use crate::device::ReadWriteNet;
use crate::error::{CommError, Result};
use crate::protocols::modbus_tcp::{
    ModbusTcpNet, FC_READ_COILS, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS,
};
use crate::transport::PipeSettings;

const D_BOUNDARY: u32 = 4096;
const M_BOUNDARY: u32 = 1536;

/// Delta product family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeltaSeries {
    Dvp,
    As,
    /// Any other series name; every operation fails with `Unsupported`
    Unrecognized(String),
}

impl DeltaSeries {
    /// Strict match on the series name, case-insensitive
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "DVP" => DeltaSeries::Dvp,
            "AS" => DeltaSeries::As,
            _ => DeltaSeries::Unrecognized(name.to_string()),
        }
    }

    fn unsupported(&self) -> CommError {
        CommError::unsupported(format!("Delta series not supported: {self}"))
    }
}

impl FromStr for DeltaSeries {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self> {
        match DeltaSeries::parse(s) {
            DeltaSeries::Unrecognized(name) => {
                Err(CommError::config(format!("Unknown Delta series: {name}")))
            },
            series => Ok(series),
        }
    }
}

impl TryFrom<String> for DeltaSeries {
    type Error = CommError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeltaSeries> for String {
    fn from(series: DeltaSeries) -> Self {
        series.to_string()
    }
}

impl fmt::Display for DeltaSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaSeries::Dvp => write!(f, "Dvp"),
            DeltaSeries::As => write!(f, "AS"),
            DeltaSeries::Unrecognized(name) => write!(f, "{name}"),
        }
    }
}

fn parse_number(text: &str, radix: u32, address: &str) -> Result<u32> {
    u32::from_str_radix(text, radix)
        .map_err(|_| CommError::format(format!("Invalid Delta address: {address}")))
}

/// Map a DVP area address onto the DVP Modbus map
///
/// Bit function codes (1, 5, 15) select the coil map, anything else the
/// register map. The `s=` station prefix is kept; the result is decimal.
pub fn translate_dvp_address(address: &str, modbus_code: u8) -> Result<String> {
    let (station, body) = extract_parameter(address, "s");
    let prefix = station.map(|s| format!("s={s};")).unwrap_or_default();
    let upper = body.trim().to_ascii_uppercase();
    let not_supported = || CommError::unsupported(format!("Delta DVP address not supported: {address}"));

    let mut chars = upper.chars();
    let area = chars.next().ok_or_else(not_supported)?;
    let number = chars.as_str();
    let is_bit = matches!(modbus_code, 1 | 5 | 15);

    let translated = match (area, is_bit) {
        ('S', true) => parse_number(number, 10, address)?.to_string(),
        ('X', true) => format!("x=2;{}", parse_number(number, 8, address)? + 0x0400),
        ('X', false) => format!("x=4;{}", parse_number(number, 8, address)? + 0x0400),
        ('Y', _) => (parse_number(number, 8, address)? + 0x0500).to_string(),
        ('T', _) => (parse_number(number, 10, address)? + 0x0600).to_string(),
        ('C', true) => (parse_number(number, 10, address)? + 0x0E00).to_string(),
        ('C', false) => {
            let offset = parse_number(number, 10, address)?;
            if offset >= 200 {
                (offset - 200 + 0x0EC8).to_string()
            } else {
                (offset + 0x0E00).to_string()
            }
        },
        ('M', true) => {
            let offset = parse_number(number, 10, address)?;
            if offset >= M_BOUNDARY {
                (offset - M_BOUNDARY + 0xB000).to_string()
            } else {
                (offset + 0x0800).to_string()
            }
        },
        ('D', false) => {
            let offset = parse_number(number, 10, address)?;
            if offset >= D_BOUNDARY {
                (offset - D_BOUNDARY + 0x9000).to_string()
            } else {
                (offset + 0x1000).to_string()
            }
        },
        _ => return Err(not_supported()),
    };

    Ok(format!("{prefix}{translated}"))
}

/// Address handed to the Modbus primitive for `series`
pub fn translate_to_modbus_address(series: &DeltaSeries, address: &str, modbus_code: u8) -> Result<String> {
    match series {
        DeltaSeries::Dvp => translate_dvp_address(address, modbus_code),
        DeltaSeries::As => Ok(address.to_string()),
        DeltaSeries::Unrecognized(_) => Err(series.unsupported()),
    }
}

/// Station prefix and offset of `address` if it lies in `area` below `boundary`
fn below_boundary(address: &str, area: char, boundary: u32) -> Option<(String, u32)> {
    let (station, body) = extract_parameter(address, "s");
    let body = body.trim();
    let mut chars = body.chars();
    if !chars.next()?.eq_ignore_ascii_case(&area) {
        return None;
    }
    let offset: u32 = chars.as_str().parse().ok()?;
    if offset >= boundary {
        return None;
    }
    let prefix = station.map(|s| format!("s={s};")).unwrap_or_default();
    Some((prefix, offset))
}

/// Read `length` registers
pub async fn read(
    series: &DeltaSeries,
    modbus: &mut dyn ReadWriteNet,
    address: &str,
    length: u16,
) -> Result<Vec<u8>> {
    match series {
        DeltaSeries::As => modbus.read(address, length).await,
        DeltaSeries::Dvp => {
            if let Some((prefix, offset)) = below_boundary(address, 'D', D_BOUNDARY) {
                if offset + u32::from(length) > D_BOUNDARY {
                    let first = (D_BOUNDARY - offset) as u16;
                    debug!("Splitting DVP read at D{}: {}", D_BOUNDARY, address);
                    let low = translate_dvp_address(address, FC_READ_HOLDING_REGISTERS)?;
                    let high = translate_dvp_address(
                        &format!("{prefix}D{D_BOUNDARY}"),
                        FC_READ_HOLDING_REGISTERS,
                    )?;
                    let mut data = modbus.read(&low, first).await?;
                    data.extend(modbus.read(&high, length - first).await?);
                    return Ok(data);
                }
            }
            let translated = translate_dvp_address(address, FC_READ_HOLDING_REGISTERS)?;
            modbus.read(&translated, length).await
        },
        DeltaSeries::Unrecognized(_) => Err(series.unsupported()),
    }
}

/// Write register bytes
pub async fn write(
    series: &DeltaSeries,
    modbus: &mut dyn ReadWriteNet,
    address: &str,
    data: &[u8],
) -> Result<()> {
    match series {
        DeltaSeries::As => modbus.write(address, data).await,
        DeltaSeries::Dvp => {
            if let Some((prefix, offset)) = below_boundary(address, 'D', D_BOUNDARY) {
                let first_bytes = ((D_BOUNDARY - offset) * 2) as usize;
                if data.len() > first_bytes {
                    debug!("Splitting DVP write at D{}: {}", D_BOUNDARY, address);
                    let low = translate_dvp_address(address, FC_WRITE_MULTIPLE_REGISTERS)?;
                    let high = translate_dvp_address(
                        &format!("{prefix}D{D_BOUNDARY}"),
                        FC_WRITE_MULTIPLE_REGISTERS,
                    )?;
                    modbus.write(&low, &data[..first_bytes]).await?;
                    return modbus.write(&high, &data[first_bytes..]).await;
                }
            }
            let translated = translate_dvp_address(address, FC_WRITE_MULTIPLE_REGISTERS)?;
            modbus.write(&translated, data).await
        },
        DeltaSeries::Unrecognized(_) => Err(series.unsupported()),
    }
}

/// Read `length` bits
pub async fn read_bool(
    series: &DeltaSeries,
    modbus: &mut dyn ReadWriteNet,
    address: &str,
    length: u16,
) -> Result<Vec<bool>> {
    match series {
        DeltaSeries::As => modbus.read_bool_array(address, length).await,
        DeltaSeries::Dvp => {
            if let Some((prefix, offset)) = below_boundary(address, 'M', M_BOUNDARY) {
                if offset + u32::from(length) > M_BOUNDARY {
                    let first = (M_BOUNDARY - offset) as u16;
                    debug!("Splitting DVP bit read at M{}: {}", M_BOUNDARY, address);
                    let low = translate_dvp_address(address, FC_READ_COILS)?;
                    let high = translate_dvp_address(&format!("{prefix}M{M_BOUNDARY}"), FC_READ_COILS)?;
                    let mut values = modbus.read_bool_array(&low, first).await?;
                    values.extend(modbus.read_bool_array(&high, length - first).await?);
                    return Ok(values);
                }
            }
            let translated = translate_dvp_address(address, FC_READ_COILS)?;
            modbus.read_bool_array(&translated, length).await
        },
        DeltaSeries::Unrecognized(_) => Err(series.unsupported()),
    }
}

/// Write bits
pub async fn write_bool(
    series: &DeltaSeries,
    modbus: &mut dyn ReadWriteNet,
    address: &str,
    values: &[bool],
) -> Result<()> {
    match series {
        DeltaSeries::As => modbus.write_bool_array(address, values).await,
        DeltaSeries::Dvp => {
            if let Some((prefix, offset)) = below_boundary(address, 'M', M_BOUNDARY) {
                let first = (M_BOUNDARY - offset) as usize;
                if values.len() > first {
                    debug!("Splitting DVP bit write at M{}: {}", M_BOUNDARY, address);
                    let low = translate_dvp_address(address, FC_WRITE_MULTIPLE_COILS)?;
                    let high =
                        translate_dvp_address(&format!("{prefix}M{M_BOUNDARY}"), FC_WRITE_MULTIPLE_COILS)?;
                    modbus.write_bool_array(&low, &values[..first]).await?;
                    return modbus.write_bool_array(&high, &values[first..]).await;
                }
            }
            let translated = translate_dvp_address(address, FC_WRITE_MULTIPLE_COILS)?;
            modbus.write_bool_array(&translated, values).await
        },
        DeltaSeries::Unrecognized(_) => Err(series.unsupported()),
    }
}

/// Delta PLC over Modbus-TCP
#[derive(Debug)]
pub struct DeltaTcpNet {
    modbus: ModbusTcpNet,
    series: DeltaSeries,
}

impl DeltaTcpNet {
    pub fn new(modbus: ModbusTcpNet, series: DeltaSeries) -> Self {
        Self { modbus, series }
    }

    pub fn tcp(endpoint: impl Into<String>, settings: PipeSettings, station: u8, series: DeltaSeries) -> Self {
        Self::new(ModbusTcpNet::tcp(endpoint, settings, station), series)
    }

    pub fn series(&self) -> &DeltaSeries {
        &self.series
    }

    pub fn set_series(&mut self, series: DeltaSeries) {
        self.series = series;
    }

    pub fn modbus(&self) -> &ModbusTcpNet {
        &self.modbus
    }

    pub fn modbus_mut(&mut self) -> &mut ModbusTcpNet {
        &mut self.modbus
    }

    pub fn translate_to_modbus_address(&self, address: &str, modbus_code: u8) -> Result<String> {
        translate_to_modbus_address(&self.series, address, modbus_code)
    }
}

#[async_trait]
impl ReadWriteNet for DeltaTcpNet {
    fn byte_transform(&self) -> &ByteTransform {
        self.modbus.byte_transform()
    }

    fn word_length(&self) -> u16 {
        self.modbus.word_length()
    }

    async fn dispose(&mut self) -> Result<()> {
        self.modbus.dispose().await
    }

    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>> {
        read(&self.series, &mut self.modbus, address, length).await
    }

    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()> {
        write(&self.series, &mut self.modbus, address, data).await
    }

    async fn read_bool_array(&mut self, address: &str, length: u16) -> Result<Vec<bool>> {
        read_bool(&self.series, &mut self.modbus, address, length).await
    }

    async fn write_bool_array(&mut self, address: &str, values: &[bool]) -> Result<()> {
        write_bool(&self.series, &mut self.modbus, address, values).await
    }
}

//! Modbus-TCP client primitive
//!
//! Address syntax: `[s=<station>;][x=<function>;]<register>`. The register is
//! decimal. `x=` selects the read function (3 holding / 4 input registers for
//! word reads, 1 coils / 2 discrete inputs for bit reads) or `x=6` for a
//! single-register write.

use async_trait::async_trait;
use tracing::debug;

use crate::address::extract_parameter_or;
use crate::bytes::bit_ops::bytes_to_bools;
use crate::bytes::{ByteTransform, TransformKind};
use crate::device::{DeviceCommunication, ReadWriteNet};
use crate::error::{CommError, Result};
use crate::transport::{CommunicationPipe, ModbusTcpMessage, PipeSettings, SocketPipe};

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Registers per read/write request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 120;
/// Coils per read/write request
pub const MAX_COILS_PER_REQUEST: u16 = 1968;

/// Text of a Modbus exception code
pub fn exception_text(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Slave device failure",
        0x05 => "Acknowledge",
        0x06 => "Slave device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}

/// Parsed Modbus address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusAddress {
    pub station: u8,
    /// Function code from `x=`, if given
    pub function: Option<u8>,
    pub register: u16,
}

/// Parse `[s=..;][x=..;]register` with `default_station`
pub fn parse_address(address: &str, default_station: u8) -> Result<ModbusAddress> {
    let (station, rest) = extract_parameter_or(address, "s", default_station)?;
    let (function, rest) = extract_parameter_or::<i32>(&rest, "x", -1)?;
    let register = rest
        .trim()
        .parse::<u16>()
        .map_err(|_| CommError::format(format!("Invalid Modbus address: {address}")))?;
    let function = match function {
        -1 => None,
        f => Some(u8::try_from(f).map_err(|_| {
            CommError::format(format!("Invalid function code in {address}"))
        })?),
    };
    Ok(ModbusAddress {
        station,
        function,
        register,
    })
}

/// Frame a PDU with an MBAP header
pub fn build_frame(transaction_id: u16, station: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(station);
    frame.extend_from_slice(pdu);
    frame
}

/// Read request PDU
pub fn build_read_pdu(function: u8, start: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = vec![function];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// FC05 request; ON is 0xFF00
pub fn build_write_single_coil_pdu(address: u16, value: bool) -> Vec<u8> {
    let mut pdu = vec![FC_WRITE_SINGLE_COIL];
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(if value { &[0xFF, 0x00] } else { &[0x00, 0x00] });
    pdu
}

/// FC06 request from two data bytes in wire order
pub fn build_write_single_register_pdu(address: u16, value: [u8; 2]) -> Vec<u8> {
    let mut pdu = vec![FC_WRITE_SINGLE_REGISTER];
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value);
    pdu
}

/// FC15 request
pub fn build_write_coils_pdu(start: u16, values: &[bool]) -> Result<Vec<u8>> {
    if values.is_empty() || values.len() > usize::from(MAX_COILS_PER_REQUEST) {
        return Err(CommError::out_of_range(format!(
            "Invalid coil count for FC15: {}",
            values.len()
        )));
    }
    let packed = crate::bytes::bit_ops::bools_to_bytes(values);
    let mut pdu = vec![FC_WRITE_MULTIPLE_COILS];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push(packed.len() as u8);
    pdu.extend_from_slice(&packed);
    Ok(pdu)
}

/// FC16 request from register bytes in wire order
pub fn build_write_registers_pdu(start: u16, data: &[u8]) -> Result<Vec<u8>> {
    let registers = data.len() / 2;
    if data.is_empty() || data.len() % 2 != 0 || registers > usize::from(MAX_REGISTERS_PER_REQUEST)
    {
        return Err(CommError::out_of_range(format!(
            "Invalid register payload for FC16: {} bytes",
            data.len()
        )));
    }
    let mut pdu = vec![FC_WRITE_MULTIPLE_REGISTERS];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&(registers as u16).to_be_bytes());
    pdu.push(data.len() as u8);
    pdu.extend_from_slice(data);
    Ok(pdu)
}

/// Validate a response frame and return its PDU after the function code
pub fn check_response(response: &[u8], function: u8) -> Result<&[u8]> {
    if response.len() < 8 {
        return Err(CommError::invalid_response(format!(
            "Modbus response too short: {} bytes",
            response.len()
        )));
    }
    let fc = response[7];
    if fc & 0x80 != 0 {
        return match response.get(8).copied() {
            Some(code) if code != 0 => Err(CommError::protocol(i32::from(code), exception_text(code))),
            _ => Err(CommError::invalid_response(format!(
                "Exception response FC{fc:02X} without exception code"
            ))),
        };
    }
    if fc != function {
        return Err(CommError::invalid_response(format!(
            "Function code mismatch: expected {function:02X}, got {fc:02X}"
        )));
    }
    Ok(&response[8..])
}

/// Payload of a read response (after the byte count)
fn read_payload(pdu: &[u8]) -> Result<&[u8]> {
    let count = *pdu
        .first()
        .ok_or_else(|| CommError::invalid_response("Missing byte count"))? as usize;
    pdu.get(1..1 + count)
        .ok_or_else(|| CommError::invalid_response("Truncated read response"))
}

/// Modbus-TCP client
#[derive(Debug)]
pub struct ModbusTcpNet {
    device: DeviceCommunication,
    station: u8,
    transaction_id: u16,
}

impl ModbusTcpNet {
    /// Register data is big-endian per word; 32-bit values default to CDAB
    pub fn new(pipe: Box<dyn CommunicationPipe>, station: u8) -> Self {
        Self {
            device: DeviceCommunication::new(pipe, ByteTransform::new(TransformKind::ReverseWord), 1),
            station,
            transaction_id: 0,
        }
    }

    pub fn tcp(endpoint: impl Into<String>, settings: PipeSettings, station: u8) -> Self {
        Self::new(Box::new(SocketPipe::new(endpoint, settings)), station)
    }

    pub fn station(&self) -> u8 {
        self.station
    }

    pub fn device(&self) -> &DeviceCommunication {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceCommunication {
        &mut self.device
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Send one PDU and return the validated response PDU (after the function code)
    pub async fn execute(&mut self, station: u8, pdu: &[u8]) -> Result<Vec<u8>> {
        let function = pdu
            .first()
            .copied()
            .ok_or_else(|| CommError::invalid_response("Empty PDU"))?;
        let frame = build_frame(self.next_transaction_id(), station, pdu);
        debug!("Modbus FC{:02X} station {} ({}B PDU)", function, station, pdu.len());
        let response = self
            .device
            .read_from_core_server(Some(&ModbusTcpMessage), &frame)
            .await?;
        check_response(&response, function).map(<[u8]>::to_vec)
    }
}

#[async_trait]
impl ReadWriteNet for ModbusTcpNet {
    fn byte_transform(&self) -> &ByteTransform {
        self.device.byte_transform()
    }

    fn word_length(&self) -> u16 {
        self.device.word_length()
    }

    async fn dispose(&mut self) -> Result<()> {
        self.device.dispose().await
    }

    /// Read `length` registers
    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>> {
        let parsed = parse_address(address, self.station)?;
        let function = parsed.function.unwrap_or(FC_READ_HOLDING_REGISTERS);
        if function != FC_READ_HOLDING_REGISTERS && function != FC_READ_INPUT_REGISTERS {
            return Err(CommError::unsupported(format!(
                "Register read with function {function:02X}"
            )));
        }

        let mut data = Vec::with_capacity(usize::from(length) * 2);
        let mut start = parsed.register;
        let mut remaining = length;
        while remaining > 0 {
            let count = remaining.min(MAX_REGISTERS_PER_REQUEST);
            let pdu = build_read_pdu(function, start, count);
            let response = self.execute(parsed.station, &pdu).await?;
            data.extend_from_slice(read_payload(&response)?);
            start = start.wrapping_add(count);
            remaining -= count;
        }
        Ok(data)
    }

    /// Write register bytes (FC16, or FC06 with `x=6`)
    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()> {
        let parsed = parse_address(address, self.station)?;
        if parsed.function == Some(FC_WRITE_SINGLE_REGISTER) {
            let value: [u8; 2] = data.try_into().map_err(|_| {
                CommError::out_of_range("FC06 writes exactly one register")
            })?;
            let pdu = build_write_single_register_pdu(parsed.register, value);
            self.execute(parsed.station, &pdu).await?;
            return Ok(());
        }

        let chunk_bytes = usize::from(MAX_REGISTERS_PER_REQUEST) * 2;
        let mut start = parsed.register;
        for chunk in data.chunks(chunk_bytes) {
            let pdu = build_write_registers_pdu(start, chunk)?;
            self.execute(parsed.station, &pdu).await?;
            start = start.wrapping_add((chunk.len() / 2) as u16);
        }
        Ok(())
    }

    async fn read_bool_array(&mut self, address: &str, length: u16) -> Result<Vec<bool>> {
        let parsed = parse_address(address, self.station)?;
        let function = parsed.function.unwrap_or(FC_READ_COILS);
        if function != FC_READ_COILS && function != FC_READ_DISCRETE_INPUTS {
            return Err(CommError::unsupported(format!(
                "Bit read with function {function:02X}"
            )));
        }

        let mut values = Vec::with_capacity(usize::from(length));
        let mut start = parsed.register;
        let mut remaining = length;
        while remaining > 0 {
            let count = remaining.min(MAX_COILS_PER_REQUEST);
            let pdu = build_read_pdu(function, start, count);
            let response = self.execute(parsed.station, &pdu).await?;
            values.extend(bytes_to_bools(read_payload(&response)?, usize::from(count)));
            start = start.wrapping_add(count);
            remaining -= count;
        }
        Ok(values)
    }

    /// FC05 for a single coil, FC15 otherwise
    async fn write_bool_array(&mut self, address: &str, values: &[bool]) -> Result<()> {
        let parsed = parse_address(address, self.station)?;
        if let [value] = values {
            let pdu = build_write_single_coil_pdu(parsed.register, *value);
            self.execute(parsed.station, &pdu).await?;
            return Ok(());
        }

        let mut start = parsed.register;
        for chunk in values.chunks(usize::from(MAX_COILS_PER_REQUEST)) {
            let pdu = build_write_coils_pdu(start, chunk)?;
            self.execute(parsed.station, &pdu).await?;
            start = start.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }
}

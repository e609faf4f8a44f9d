//! Omron HostLink C-Mode
//!
//! ASCII protocol: every frame is `@` + unit number (2 hex digits) + command
//! text + FCS (2 hex digits, XOR of all preceding bytes) + `*` + CR.
//! Responses echo the header, carry a 2-digit hex end code at offset 5 and
//! the payload as hex text from offset 7 up to the FCS.
//!
//! Address forms: `DM100`/`D100`, `LR10`, `HR10`/`H10`, `AR10`/`A10`,
//! `CIO100`/`C100`, `TIM5`, `CNT5`, `EM<bank>.<offset>`/`E<bank>.<offset>`
//! (bank in hex). A `s=<unit>;` prefix overrides the unit number.

use async_trait::async_trait;
use tracing::debug;

use crate::address::extract_parameter_or;
use crate::bytes::bit_ops::extract_bit_u16;
use crate::bytes::hex::{ascii_hex_byte, decode, encode_ascii, parse_hex_u8};
use crate::bytes::{ByteTransform, TransformKind};
use crate::device::{DeviceCommunication, ReadWriteNet};
use crate::error::{CommError, Result};
use crate::transport::{
    CommunicationPipe, PipeSettings, SerialPipe, SerialSettings, SocketPipe, TerminatorMessage,
};

/// Words per read command
pub const READ_SPLIT_WORDS: u16 = 30;
/// Data bytes per write command
pub const WRITE_SPLIT_BYTES: usize = 60;
/// Offset of counter words inside the TIM/CNT area
const COUNTER_OFFSET: u32 = 2048;
/// End code reported for a response whose FCS does not match
pub const FCS_ERROR_CODE: i32 = 19;
/// Shortest valid response: `@` unit(2) command(2) end code(2) FCS(2) `*` CR
const MIN_RESPONSE_LEN: usize = 11;

/// Area command and start word of a parsed address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLinkArea {
    /// Two-letter command, `RE`/`WE` followed by the bank digits for EM
    pub command: String,
    pub offset: u32,
}

fn parse_offset(digits: &str, address: &str) -> Result<u32> {
    digits
        .trim()
        .parse::<u16>()
        .map(u32::from)
        .map_err(|_| CommError::format(format!("Invalid HostLink address: {address}")))
}

fn em_area(address: &str, prefix_len: usize, is_read: bool) -> Result<HostLinkArea> {
    let (bank, offset) = address[prefix_len..]
        .split_once('.')
        .ok_or_else(|| CommError::format(format!("EM address needs bank.offset: {address}")))?;
    let bank = u8::from_str_radix(bank, 16)
        .map_err(|_| CommError::format(format!("Invalid EM bank in {address}")))?;
    let digits = ascii_hex_byte(bank);
    Ok(HostLinkArea {
        command: format!(
            "{}{}{}",
            if is_read { "RE" } else { "WE" },
            digits[0] as char,
            digits[1] as char
        ),
        offset: parse_offset(offset, address)?,
    })
}

/// Parse an area address into command code and start word
pub fn parse_address(address: &str, is_read: bool) -> Result<HostLinkArea> {
    let upper = address.to_ascii_uppercase();
    let area = |read: &str, write: &str, prefix_len: usize| -> Result<HostLinkArea> {
        Ok(HostLinkArea {
            command: (if is_read { read } else { write }).to_string(),
            offset: parse_offset(&address[prefix_len..], address)?,
        })
    };

    if upper.starts_with("DM") {
        area("RD", "WD", 2)
    } else if upper.starts_with("LR") {
        area("RL", "WL", 2)
    } else if upper.starts_with("HR") {
        area("RH", "WH", 2)
    } else if upper.starts_with("AR") {
        area("RJ", "WJ", 2)
    } else if upper.starts_with("CIO") {
        area("RR", "WR", 3)
    } else if upper.starts_with("TIM") {
        area("RC", "WC", 3)
    } else if upper.starts_with("CNT") {
        let mut parsed = area("RC", "WC", 3)?;
        parsed.offset += COUNTER_OFFSET;
        Ok(parsed)
    } else if upper.starts_with("EM") {
        em_area(address, 2, is_read)
    } else {
        match upper.chars().next() {
            Some('D') => area("RD", "WD", 1),
            Some('C') => area("RR", "WR", 1),
            Some('H') => area("RH", "WH", 1),
            Some('A') => area("RJ", "WJ", 1),
            Some('E') => em_area(address, 1, is_read),
            _ => Err(CommError::unsupported(format!(
                "HostLink address type: {address}"
            ))),
        }
    }
}

/// Read command bodies, one per 30-word block
pub fn build_read_commands(address: &str, length: u16) -> Result<Vec<Vec<u8>>> {
    let area = parse_address(address, true)?;
    let mut commands = Vec::new();
    let mut offset = area.offset;
    let mut remaining = length;
    while remaining > 0 {
        let count = remaining.min(READ_SPLIT_WORDS);
        commands.push(format!("{}{:04}{:04}", area.command, offset, count).into_bytes());
        offset += u32::from(count);
        remaining -= count;
    }
    Ok(commands)
}

/// Write command bodies, one per 60-byte block
pub fn build_write_commands(address: &str, data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let area = parse_address(address, false)?;
    let mut commands = Vec::new();
    let mut offset = area.offset;
    for chunk in data.chunks(WRITE_SPLIT_BYTES) {
        let mut command = format!("{}{:04}", area.command, offset).into_bytes();
        command.extend_from_slice(&encode_ascii(chunk));
        commands.push(command);
        offset += (chunk.len() / 2) as u32;
    }
    Ok(commands)
}

/// XOR of all bytes
pub fn fcs(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Frame a command body for `unit_number`
pub fn pack_command(command: &[u8], unit_number: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.len() + 7);
    frame.push(b'@');
    frame.extend_from_slice(&ascii_hex_byte(unit_number));
    frame.extend_from_slice(command);
    let check = fcs(&frame);
    frame.extend_from_slice(&ascii_hex_byte(check));
    frame.extend_from_slice(b"*\r");
    frame
}

/// Validate a response frame and return its decoded payload
pub fn check_response(response: &[u8]) -> Result<Vec<u8>> {
    decode(check_frame(response)?)
}

/// Verify FCS and end code; return the ASCII text between end code and FCS
pub fn check_frame(response: &[u8]) -> Result<&[u8]> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(CommError::invalid_response(format!(
            "HostLink response too short: {:?}",
            String::from_utf8_lossy(response)
        )));
    }

    let fcs_at = response.len() - 4;
    let expected = fcs(&response[..fcs_at]);
    let received = parse_hex_u8(&response[fcs_at..fcs_at + 2])?;
    if expected != received {
        return Err(CommError::protocol(FCS_ERROR_CODE, error_text(FCS_ERROR_CODE)));
    }

    let end_code = i32::from(parse_hex_u8(&response[5..7])?);
    if end_code > 0 {
        return Err(CommError::protocol(end_code, error_text(end_code)));
    }
    Ok(&response[7..fcs_at])
}

/// Leading `digits` hex characters of a status payload; trailing text is ignored
fn status_field(text: &[u8], digits: usize) -> Result<Vec<u8>> {
    let field = text.get(..digits).ok_or_else(|| {
        CommError::invalid_response(format!(
            "Status field needs {digits} characters: {:?}",
            String::from_utf8_lossy(text)
        ))
    })?;
    decode(field)
}

/// Text of a HostLink end code
pub fn error_text(code: i32) -> &'static str {
    match code {
        1 => "Not executable in RUN mode",
        2 => "Not executable in MONITOR mode",
        3 => "UM write-protected",
        4 => "Address over: The program address setting in an read or write command is above the highest program address.",
        11 => "Not executable in PROGRAM mode",
        19 => "The FCS is wrong.",
        20 => "The command format is wrong, or a command that cannot be divided has been divided, or the frame length is smaller than the minimum length for the applicable command.",
        21 => "1. The data is outside of the specified range or too long. 2.Hexadecimal data has not been specified.",
        22 => "Command not supported: The operand specified in an SV Read or SV Change command does not exist in the program.",
        24 => "Frame length error: The maximum frame length of 131 bytes was exceeded.",
        25 => "Not executable: The read SV exceeded 9,999, or an I/O memory batch read was executed when items to read were not registered for composite command, or access right was not obtained.",
        32 => "Could not create I/O table",
        33 => "Not executable due to CPU Unit CPU error( See note.)",
        35 => "User memory protected, The UM is read-protected or writeprotected.",
        163 => "Aborted due to FCS error in transmission data",
        164 => "Aborted due to format error in transmission data",
        165 => "Aborted due to entry number data error in transmission data",
        168 => "Aborted due to frame length error in transmission data",
        _ => "Unknown error",
    }
}

/// CPU model of a model code
pub fn model_text(code: u8) -> Option<&'static str> {
    Some(match code {
        0x30 => "CS/CJ",
        0x01 => "C250",
        0x02 => "C500",
        0x03 => "C120/C50",
        0x09 => "C250F",
        0x0A => "C500F",
        0x0B => "C120F",
        0x0E => "C2000",
        0x10 => "C1000H",
        0x11 => "C2000H/CQM1/CPM1",
        0x12 => "C20H/C28H/C40H, C200H, C200HS, C200HX/HG/HE (-ZE)",
        0x20 => "CV500",
        0x21 => "CV1000",
        0x22 => "CV2000",
        0x40 => "CVM1-CPU01-E",
        0x41 => "CVM1-CPU11-E",
        0x42 => "CVM1-CPU21-E",
        _ => return None,
    })
}

/// CPU operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlcMode {
    Program = 0,
    Run = 1,
    Monitor = 2,
}

impl TryFrom<u8> for PlcMode {
    type Error = CommError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PlcMode::Program),
            1 => Ok(PlcMode::Run),
            2 => Ok(PlcMode::Monitor),
            other => Err(CommError::invalid_response(format!("Unknown PLC mode {other}"))),
        }
    }
}

/// Split `word.bit` into the word address and bit index
///
/// EM addresses already use a dot between bank and offset, so their bit
/// index is the part after the second dot. A missing bit index means bit 0.
pub fn split_bit_address(address: &str) -> Result<(&str, u8)> {
    let upper = address.to_ascii_uppercase();
    let dots_in_word = usize::from(upper.starts_with('E'));
    if address.matches('.').count() <= dots_in_word {
        return Ok((address, 0));
    }
    let (word, bit) = address
        .rsplit_once('.')
        .ok_or_else(|| CommError::format(format!("Invalid bit address: {address}")))?;
    let bit: u8 = bit
        .parse()
        .ok()
        .filter(|b| *b < 16)
        .ok_or_else(|| CommError::format(format!("Invalid bit index in {address}")))?;
    Ok((word, bit))
}

/// Omron PLC over HostLink C-Mode
#[derive(Debug)]
pub struct OmronHostLinkCMode {
    device: DeviceCommunication,
    unit_number: u8,
    message: TerminatorMessage,
}

impl OmronHostLinkCMode {
    pub fn new(pipe: Box<dyn CommunicationPipe>, unit_number: u8) -> Self {
        Self {
            device: DeviceCommunication::new(pipe, ByteTransform::new(TransformKind::ReverseWord), 1),
            unit_number,
            message: TerminatorMessage::hostlink(),
        }
    }

    /// HostLink over a serial line
    pub fn serial(serial: SerialSettings, settings: PipeSettings, unit_number: u8) -> Self {
        Self::new(Box::new(SerialPipe::port(serial, settings)), unit_number)
    }

    /// HostLink through a serial-to-Ethernet gateway
    pub fn tcp(endpoint: impl Into<String>, settings: PipeSettings, unit_number: u8) -> Self {
        Self::new(Box::new(SocketPipe::new(endpoint, settings)), unit_number)
    }

    pub fn unit_number(&self) -> u8 {
        self.unit_number
    }

    pub fn set_unit_number(&mut self, unit_number: u8) {
        self.unit_number = unit_number;
    }

    pub fn device(&self) -> &DeviceCommunication {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceCommunication {
        &mut self.device
    }

    async fn transact(&mut self, command: &[u8], unit_number: u8) -> Result<Vec<u8>> {
        let frame = pack_command(command, unit_number);
        self.device
            .read_from_core_server(Some(&self.message), &frame)
            .await
    }

    async fn exchange(&mut self, command: &[u8], unit_number: u8) -> Result<Vec<u8>> {
        let response = self.transact(command, unit_number).await?;
        check_response(&response)
    }

    /// CPU model description (`MM`)
    pub async fn read_plc_type(&mut self) -> Result<String> {
        let response = self.transact(b"MM", self.unit_number).await?;
        let code = status_field(check_frame(&response)?, 2)?[0];
        model_text(code)
            .map(str::to_string)
            .ok_or_else(|| CommError::invalid_response(format!("Unknown model, model code:{code:02X}")))
    }

    /// Current operating mode (`MS`)
    pub async fn read_plc_mode(&mut self) -> Result<PlcMode> {
        // two status bytes, optionally followed by FAL/FALS message text
        let response = self.transact(b"MS", self.unit_number).await?;
        let status = status_field(check_frame(&response)?, 4)?[0];
        PlcMode::try_from(status & 0x03)
    }

    /// Switch operating mode (`SC`)
    pub async fn change_plc_mode(&mut self, mode: PlcMode) -> Result<()> {
        let digits = ascii_hex_byte(mode as u8);
        let command = [b'S', b'C', digits[0], digits[1]];
        self.exchange(&command, self.unit_number).await?;
        Ok(())
    }
}

#[async_trait]
impl ReadWriteNet for OmronHostLinkCMode {
    fn byte_transform(&self) -> &ByteTransform {
        self.device.byte_transform()
    }

    fn word_length(&self) -> u16 {
        self.device.word_length()
    }

    /// Release the pipe
    async fn dispose(&mut self) -> Result<()> {
        self.device.dispose().await
    }

    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>> {
        let (unit, address) = extract_parameter_or(address, "s", self.unit_number)?;
        let commands = build_read_commands(&address, length)?;
        let mut data = Vec::with_capacity(length as usize * 2);
        for command in &commands {
            data.extend(self.exchange(command, unit).await?);
        }
        Ok(data)
    }

    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()> {
        let (unit, address) = extract_parameter_or(address, "s", self.unit_number)?;
        let commands = build_write_commands(&address, data)?;
        debug!("HostLink write {}: {} command(s)", address, commands.len());
        for command in &commands {
            self.exchange(command, unit).await?;
        }
        Ok(())
    }

    /// Bits of `word.bit` addresses, e.g. `CIO100.05`
    async fn read_bool_array(&mut self, address: &str, length: u16) -> Result<Vec<bool>> {
        let (unit, address) = extract_parameter_or(address, "s", self.unit_number)?;
        let (word_address, bit) = split_bit_address(&address)?;
        let total_bits = usize::from(bit) + usize::from(length);
        let words = u16::try_from(total_bits.div_ceil(16))
            .map_err(|_| CommError::out_of_range(format!("Too many bits: {length}")))?;

        let mut data = Vec::with_capacity(usize::from(words) * 2);
        for command in &build_read_commands(word_address, words)? {
            data.extend(self.exchange(command, unit).await?);
        }
        (usize::from(bit)..total_bits)
            .map(|index| {
                let at = (index / 16) * 2;
                let word = data
                    .get(at..at + 2)
                    .map(|w| u16::from_be_bytes([w[0], w[1]]))
                    .ok_or_else(|| CommError::invalid_response("Short HostLink bit response"))?;
                Ok(extract_bit_u16(word, (index % 16) as u8))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> Vec<u8> {
        pack_command(body.as_bytes(), 0)
    }

    #[test]
    fn test_parse_address_table() {
        let cases = [
            ("DM100", "RD", 100),
            ("D100", "RD", 100),
            ("LR10", "RL", 10),
            ("HR5", "RH", 5),
            ("h5", "RH", 5),
            ("AR7", "RJ", 7),
            ("A7", "RJ", 7),
            ("CIO20", "RR", 20),
            ("C20", "RR", 20),
            ("TIM3", "RC", 3),
            ("CNT3", "RC", 2051),
            ("EM10.100", "RE10", 100),
            ("E1.100", "RE01", 100),
            ("eA.5", "RE0A", 5),
        ];
        for (address, command, offset) in cases {
            let area = parse_address(address, true).unwrap();
            assert_eq!(area.command, command, "{address}");
            assert_eq!(area.offset, offset, "{address}");
        }
        assert_eq!(parse_address("DM100", false).unwrap().command, "WD");
        assert_eq!(parse_address("E2.0", false).unwrap().command, "WE02");
    }

    #[test]
    fn test_parse_address_errors() {
        assert!(matches!(parse_address("X100", true), Err(CommError::Unsupported(_))));
        assert!(matches!(parse_address("Dabc", true), Err(CommError::Format(_))));
        assert!(matches!(parse_address("EM100", true), Err(CommError::Format(_))));
        assert!(parse_address("D70000", true).is_err());
    }

    #[test]
    fn test_read_split_every_30_words() {
        let commands = build_read_commands("D100", 65).unwrap();
        assert_eq!(
            commands,
            vec![
                b"RD01000030".to_vec(),
                b"RD01300030".to_vec(),
                b"RD01600005".to_vec()
            ]
        );
        assert!(build_read_commands("D100", 0).unwrap().is_empty());
    }

    #[test]
    fn test_write_split_70_bytes() {
        let data: Vec<u8> = (0u8..70).collect();
        let commands = build_write_commands("D100", &data).unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with(b"WD0100"));
        assert_eq!(commands[0].len(), 6 + 120);
        assert!(commands[1].starts_with(b"WD0130"));
        assert_eq!(commands[1].len(), 6 + 20);
        assert_eq!(&commands[1][6..10], b"3C3D");
    }

    #[test]
    fn test_pack_command_fcs() {
        // '@' ^ '0' ^ '0' ^ 'R' ^ 'D' ^ '0' ^ '0' ^ '0' ^ '0' ^ '0' ^ '0' ^ '0' ^ '1'
        let frame = pack_command(b"RD00000001", 0);
        assert_eq!(frame, b"@00RD0000000157*\r".to_vec());
        assert_eq!(fcs(&frame[..frame.len() - 4]), 0x57);
    }

    #[test]
    fn test_check_response_ok() {
        let payload = check_response(&response("RD00ABCD1234")).unwrap();
        assert_eq!(payload, vec![0xAB, 0xCD, 0x12, 0x34]);
        assert!(check_response(&response("WD00")).unwrap().is_empty());
    }

    #[test]
    fn test_check_response_end_code() {
        let err = check_response(&response("RD15")).unwrap_err();
        assert_eq!(err.error_code(), 21);
        assert!(err.to_string().contains("outside of the specified range"));

        let unknown = check_response(&response("RD05")).unwrap_err();
        assert_eq!(unknown.error_code(), 5);
        assert!(unknown.to_string().contains("Unknown error"));
    }

    #[test]
    fn test_check_response_corrupted_byte() {
        let mut frame = response("RD000001");
        frame[8] = b'9';
        let err = check_response(&frame).unwrap_err();
        assert_eq!(err.error_code(), FCS_ERROR_CODE);
        assert_ne!(err.error_code(), 0);
    }

    #[test]
    fn test_check_response_too_short() {
        assert!(matches!(check_response(b"@00RD*\r"), Err(CommError::InvalidResponse(_))));
    }

    #[test]
    fn test_status_field_ignores_message_text() {
        let frame = response("MS000100ALARM ON LINE 3 ");
        let text = check_frame(&frame).unwrap();
        assert_eq!(status_field(text, 4).unwrap(), vec![0x01, 0x00]);
        assert!(check_response(&frame).is_err());
        assert!(status_field(b"01", 4).is_err());
    }

    #[test]
    fn test_split_bit_address() {
        assert_eq!(split_bit_address("CIO100.05").unwrap(), ("CIO100", 5));
        assert_eq!(split_bit_address("D10").unwrap(), ("D10", 0));
        assert_eq!(split_bit_address("EM1.100").unwrap(), ("EM1.100", 0));
        assert_eq!(split_bit_address("EM1.100.15").unwrap(), ("EM1.100", 15));
        assert!(split_bit_address("D10.16").is_err());
    }

    #[test]
    fn test_model_and_mode_tables() {
        assert_eq!(model_text(0x30), Some("CS/CJ"));
        assert_eq!(model_text(0x0A), Some("C500F"));
        assert_eq!(model_text(0x99), None);
        assert_eq!(PlcMode::try_from(2).unwrap(), PlcMode::Monitor);
        assert!(PlcMode::try_from(3).is_err());
    }
}

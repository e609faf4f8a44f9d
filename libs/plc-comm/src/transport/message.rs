//! Response framing descriptors
//!
//! A [`NetMessage`] tells a pipe how to cut one response out of the byte
//! stream. Header-framed protocols report a fixed header length and derive the
//! remaining length from it; header-less protocols (terminator-delimited ASCII)
//! report a header length of 0 and answer `is_complete` instead.

use crate::error::{CommError, Result};

/// Frame descriptor of one protocol
pub trait NetMessage: Send + Sync {
    /// Fixed header length, 0 for header-less framing
    fn header_length(&self) -> usize;

    /// Bytes that follow the header
    fn content_length(&self, header: &[u8]) -> Result<usize>;

    /// Check that a received header answers `request`
    fn check_header(&self, _header: &[u8], _request: &[u8]) -> bool {
        true
    }

    /// Check whether `received` holds a complete response
    fn is_complete(&self, received: &[u8], _request: &[u8]) -> bool {
        let header_length = self.header_length();
        if header_length == 0 || received.len() < header_length {
            return false;
        }
        match self.content_length(&received[..header_length]) {
            Ok(content) => received.len() >= header_length + content,
            Err(_) => false,
        }
    }
}

/// MBAP framing: transaction id, protocol id, then a length that covers unit id and PDU
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusTcpMessage;

/// MBAP bytes before the unit id
pub const MBAP_PREFIX_LEN: usize = 6;
/// Largest legal MBAP length field (unit id + 253 byte PDU)
pub const MAX_MBAP_LENGTH: usize = 254;

impl NetMessage for ModbusTcpMessage {
    fn header_length(&self) -> usize {
        MBAP_PREFIX_LEN
    }

    fn content_length(&self, header: &[u8]) -> Result<usize> {
        if header.len() < MBAP_PREFIX_LEN {
            return Err(CommError::invalid_response("MBAP header too short"));
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || length > MAX_MBAP_LENGTH {
            return Err(CommError::invalid_response(format!(
                "Invalid MBAP length: {length}"
            )));
        }
        Ok(length)
    }

    fn check_header(&self, header: &[u8], request: &[u8]) -> bool {
        header.len() >= 4 && request.len() >= 4 && header[..4] == request[..4]
    }
}

/// Header-less framing that ends with a fixed terminator
#[derive(Debug, Clone)]
pub struct TerminatorMessage {
    terminator: Vec<u8>,
}

impl TerminatorMessage {
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        Self {
            terminator: terminator.into(),
        }
    }

    /// HostLink frames end with `*` CR
    pub fn hostlink() -> Self {
        Self::new(b"*\r".to_vec())
    }
}

impl NetMessage for TerminatorMessage {
    fn header_length(&self) -> usize {
        0
    }

    fn content_length(&self, _header: &[u8]) -> Result<usize> {
        Ok(0)
    }

    fn is_complete(&self, received: &[u8], _request: &[u8]) -> bool {
        !self.terminator.is_empty() && received.ends_with(&self.terminator)
    }
}

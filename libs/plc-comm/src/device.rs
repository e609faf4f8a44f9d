//! Generic typed read/write over a device
//!
//! A vendor adapter implements the raw primitives of [`ReadWriteNet`]
//! (`read`/`write` of device units, optionally bit access); every typed
//! operation is derived from those primitives plus the adapter's
//! [`ByteTransform`] and word length.
//!
//! Composite values (a recipe block, a status struct) implement
//! [`DataTransfer`] and move through [`ReadWriteNet::read_custom`] and
//! [`ReadWriteNet::write_custom`] as one contiguous block.
//!
//! [`DeviceCommunication`] is the state every adapter embeds: the pipe, the
//! byte transform and the word length. It opens the pipe on demand and closes
//! it exactly once on [`DeviceCommunication::dispose`].

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bytes::{ByteTransform, StringEncoding};
use crate::error::{CommError, Result, SOCKET_ERROR_CODE};
use crate::transport::{CommunicationPipe, NetMessage};

/// Device units needed for `length` elements of `data_type_length` 16-bit words each
///
/// `word_length` is the number of device units per 16-bit word. A
/// `word_length` of 0 marks devices addressed in 32-bit units: the word count
/// is halved and never drops below 1, so even a zero-element request reads
/// one unit. Results saturate at `u16::MAX`.
pub fn get_word_length(word_length: u16, length: usize, data_type_length: usize) -> u16 {
    let units = if word_length == 0 {
        (length.saturating_mul(data_type_length).saturating_mul(2) / 4).max(1)
    } else {
        (word_length as usize)
            .saturating_mul(length)
            .saturating_mul(data_type_length)
    };
    units.min(u16::MAX as usize) as u16
}

fn first<T>(values: Vec<T>) -> Result<T> {
    values
        .into_iter()
        .next()
        .ok_or_else(|| CommError::invalid_response("Device returned no value"))
}

fn element_count(count: u16) -> usize {
    count as usize
}

/// A composite value stored as one contiguous block of device units
pub trait DataTransfer: Send + Sync {
    /// Device units the block occupies
    fn read_count(&self) -> u16;

    /// Fill `self` from the raw block
    fn parse_source(&mut self, source: &[u8], transform: &ByteTransform) -> Result<()>;

    /// Raw block to write
    fn to_bytes(&self, transform: &ByteTransform) -> Vec<u8>;
}

/// Typed read/write capability of a device
///
/// Lengths of typed array reads count elements; lengths of [`ReadWriteNet::read`]
/// count device units.
#[async_trait]
pub trait ReadWriteNet: Send {
    fn byte_transform(&self) -> &ByteTransform;

    /// Device units per 16-bit word (0 = 32-bit addressing)
    fn word_length(&self) -> u16;

    /// Units to request for `length` elements at `address`
    fn word_length_for(&self, _address: &str, length: usize, data_type_length: usize) -> u16 {
        get_word_length(self.word_length(), length, data_type_length)
    }

    /// Release the device's pipe. Devices without one have nothing to do.
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read `length` device units
    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>>;

    /// Write raw bytes
    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()>;

    async fn read_bool_array(&mut self, address: &str, _length: u16) -> Result<Vec<bool>> {
        Err(CommError::unsupported(format!("Bit read at {address}")))
    }

    async fn write_bool_array(&mut self, address: &str, _values: &[bool]) -> Result<()> {
        Err(CommError::unsupported(format!("Bit write at {address}")))
    }

    async fn read_bool(&mut self, address: &str) -> Result<bool> {
        first(self.read_bool_array(address, 1).await?)
    }

    async fn write_bool(&mut self, address: &str, value: bool) -> Result<()> {
        self.write_bool_array(address, &[value]).await
    }

    // ------------------------------------------------------------------
    // 16-bit

    async fn read_i16_array(&mut self, address: &str, length: u16) -> Result<Vec<i16>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 1);
        let data = self.read(address, units).await?;
        self.byte_transform().to_i16_array(&data, 0, n)
    }

    async fn read_i16(&mut self, address: &str) -> Result<i16> {
        first(self.read_i16_array(address, 1).await?)
    }

    async fn read_u16_array(&mut self, address: &str, length: u16) -> Result<Vec<u16>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 1);
        let data = self.read(address, units).await?;
        self.byte_transform().to_u16_array(&data, 0, n)
    }

    async fn read_u16(&mut self, address: &str) -> Result<u16> {
        first(self.read_u16_array(address, 1).await?)
    }

    async fn write_i16_array(&mut self, address: &str, values: &[i16]) -> Result<()> {
        let data = self.byte_transform().from_i16(values);
        self.write(address, &data).await
    }

    async fn write_i16(&mut self, address: &str, value: i16) -> Result<()> {
        self.write_i16_array(address, &[value]).await
    }

    async fn write_u16_array(&mut self, address: &str, values: &[u16]) -> Result<()> {
        let data = self.byte_transform().from_u16(values);
        self.write(address, &data).await
    }

    async fn write_u16(&mut self, address: &str, value: u16) -> Result<()> {
        self.write_u16_array(address, &[value]).await
    }

    // ------------------------------------------------------------------
    // 32-bit

    async fn read_i32_array(&mut self, address: &str, length: u16) -> Result<Vec<i32>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 2);
        let data = self.read(address, units).await?;
        self.byte_transform().to_i32_array(&data, 0, n)
    }

    async fn read_i32(&mut self, address: &str) -> Result<i32> {
        first(self.read_i32_array(address, 1).await?)
    }

    async fn read_u32_array(&mut self, address: &str, length: u16) -> Result<Vec<u32>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 2);
        let data = self.read(address, units).await?;
        self.byte_transform().to_u32_array(&data, 0, n)
    }

    async fn read_u32(&mut self, address: &str) -> Result<u32> {
        first(self.read_u32_array(address, 1).await?)
    }

    async fn read_f32_array(&mut self, address: &str, length: u16) -> Result<Vec<f32>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 2);
        let data = self.read(address, units).await?;
        self.byte_transform().to_f32_array(&data, 0, n)
    }

    async fn read_f32(&mut self, address: &str) -> Result<f32> {
        first(self.read_f32_array(address, 1).await?)
    }

    async fn write_i32_array(&mut self, address: &str, values: &[i32]) -> Result<()> {
        let data = self.byte_transform().from_i32(values);
        self.write(address, &data).await
    }

    async fn write_i32(&mut self, address: &str, value: i32) -> Result<()> {
        self.write_i32_array(address, &[value]).await
    }

    async fn write_u32_array(&mut self, address: &str, values: &[u32]) -> Result<()> {
        let data = self.byte_transform().from_u32(values);
        self.write(address, &data).await
    }

    async fn write_u32(&mut self, address: &str, value: u32) -> Result<()> {
        self.write_u32_array(address, &[value]).await
    }

    async fn write_f32_array(&mut self, address: &str, values: &[f32]) -> Result<()> {
        let data = self.byte_transform().from_f32(values);
        self.write(address, &data).await
    }

    async fn write_f32(&mut self, address: &str, value: f32) -> Result<()> {
        self.write_f32_array(address, &[value]).await
    }

    // ------------------------------------------------------------------
    // 64-bit

    async fn read_i64_array(&mut self, address: &str, length: u16) -> Result<Vec<i64>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 4);
        let data = self.read(address, units).await?;
        self.byte_transform().to_i64_array(&data, 0, n)
    }

    async fn read_i64(&mut self, address: &str) -> Result<i64> {
        first(self.read_i64_array(address, 1).await?)
    }

    async fn read_u64_array(&mut self, address: &str, length: u16) -> Result<Vec<u64>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 4);
        let data = self.read(address, units).await?;
        self.byte_transform().to_u64_array(&data, 0, n)
    }

    async fn read_u64(&mut self, address: &str) -> Result<u64> {
        first(self.read_u64_array(address, 1).await?)
    }

    async fn read_f64_array(&mut self, address: &str, length: u16) -> Result<Vec<f64>> {
        let n = element_count(length);
        let units = self.word_length_for(address, n, 4);
        let data = self.read(address, units).await?;
        self.byte_transform().to_f64_array(&data, 0, n)
    }

    async fn read_f64(&mut self, address: &str) -> Result<f64> {
        first(self.read_f64_array(address, 1).await?)
    }

    async fn write_i64_array(&mut self, address: &str, values: &[i64]) -> Result<()> {
        let data = self.byte_transform().from_i64(values);
        self.write(address, &data).await
    }

    async fn write_i64(&mut self, address: &str, value: i64) -> Result<()> {
        self.write_i64_array(address, &[value]).await
    }

    async fn write_u64_array(&mut self, address: &str, values: &[u64]) -> Result<()> {
        let data = self.byte_transform().from_u64(values);
        self.write(address, &data).await
    }

    async fn write_u64(&mut self, address: &str, value: u64) -> Result<()> {
        self.write_u64_array(address, &[value]).await
    }

    async fn write_f64_array(&mut self, address: &str, values: &[f64]) -> Result<()> {
        let data = self.byte_transform().from_f64(values);
        self.write(address, &data).await
    }

    async fn write_f64(&mut self, address: &str, value: f64) -> Result<()> {
        self.write_f64_array(address, &[value]).await
    }

    // ------------------------------------------------------------------
    // composite values

    /// Read `value.read_count()` units at `address` and parse them into `value`
    async fn read_custom(&mut self, address: &str, value: &mut dyn DataTransfer) -> Result<()> {
        let data = self.read(address, value.read_count()).await?;
        value.parse_source(&data, self.byte_transform())
    }

    async fn write_custom(&mut self, address: &str, value: &dyn DataTransfer) -> Result<()> {
        let data = value.to_bytes(self.byte_transform());
        self.write(address, &data).await
    }

    // ------------------------------------------------------------------
    // strings

    /// Read `length` device units as ASCII
    async fn read_string(&mut self, address: &str, length: u16) -> Result<String> {
        self.read_string_with(address, length, StringEncoding::Ascii).await
    }

    async fn read_string_with(
        &mut self,
        address: &str,
        length: u16,
        encoding: StringEncoding,
    ) -> Result<String> {
        let data = self.read(address, length).await?;
        self.byte_transform().to_string(&data, 0, data.len(), encoding)
    }

    async fn write_string(&mut self, address: &str, value: &str) -> Result<()> {
        self.write_string_with(address, value, StringEncoding::Ascii).await
    }

    /// Word-addressed devices get the text padded to an even byte count
    async fn write_string_with(
        &mut self,
        address: &str,
        value: &str,
        encoding: StringEncoding,
    ) -> Result<()> {
        let mut data = self.byte_transform().from_string(value, encoding);
        if self.word_length() == 1 && data.len() % 2 == 1 {
            data.push(0);
        }
        self.write(address, &data).await
    }

    /// Write text truncated or zero-padded to exactly `length` bytes
    async fn write_string_fixed(
        &mut self,
        address: &str,
        value: &str,
        length: usize,
        encoding: StringEncoding,
    ) -> Result<()> {
        let mut data = self.byte_transform().from_string(value, encoding);
        if self.word_length() == 1 && data.len() % 2 == 1 {
            data.push(0);
        }
        data.resize(length, 0);
        self.write(address, &data).await
    }
}

/// Pipe, byte transform and word length of one device object
pub struct DeviceCommunication {
    pipe: Box<dyn CommunicationPipe>,
    byte_transform: ByteTransform,
    word_length: u16,
    disposed: bool,
}

impl std::fmt::Debug for DeviceCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCommunication")
            .field("pipe", &self.pipe.name())
            .field("byte_transform", &self.byte_transform)
            .field("word_length", &self.word_length)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl DeviceCommunication {
    pub fn new(
        pipe: Box<dyn CommunicationPipe>,
        byte_transform: ByteTransform,
        word_length: u16,
    ) -> Self {
        Self {
            pipe,
            byte_transform,
            word_length,
            disposed: false,
        }
    }

    pub fn pipe(&self) -> &dyn CommunicationPipe {
        self.pipe.as_ref()
    }

    pub fn pipe_mut(&mut self) -> &mut dyn CommunicationPipe {
        self.pipe.as_mut()
    }

    pub fn byte_transform(&self) -> &ByteTransform {
        &self.byte_transform
    }

    /// Changing the transform affects subsequent conversions only
    pub fn set_byte_transform(&mut self, byte_transform: ByteTransform) {
        self.byte_transform = byte_transform;
    }

    pub fn byte_transform_mut(&mut self) -> &mut ByteTransform {
        &mut self.byte_transform
    }

    pub fn word_length(&self) -> u16 {
        self.word_length
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Open the pipe if needed, send `request` and return the framed response
    pub async fn read_from_core_server(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        if self.disposed {
            return Err(CommError::transport(
                SOCKET_ERROR_CODE,
                format!("Device on {} is disposed", self.pipe.name()),
            ));
        }
        if !self.pipe.is_open() {
            debug!("Opening pipe on demand: {}", self.pipe.name());
            self.pipe.open_communication().await?;
        }
        self.pipe.receive_message(message, request).await
    }

    /// Close the pipe. Only the first call has an effect.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        info!("Disposing device on {}", self.pipe.name());
        self.pipe.close_communication().await
    }
}

//! Serial port pipe
//!
//! Serial links have no connection state and no framing of their own, so a
//! response is complete when the line goes idle: after at least
//! `at_least_receive_length` bytes arrived, `receive_empty_data_count`
//! consecutive polls (every `sleep_time`) find no pending input. With a
//! [`NetMessage`] the idle rule is off: the receive ends when the completion
//! check passes, or fails on the stall timeout.

use std::io;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, Instant};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use super::message::NetMessage;
use super::net_support::{StreamSupport, MAX_FRAME_LENGTH};
use super::pipe::{CommunicationPipe, ErrorCounter, PipeSettings, ReceiveLength};
use crate::error::{CommError, Result, SOCKET_ERROR_CODE};

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial line and idle-detection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    /// 1 or 2
    pub stop_bits: u8,
    pub parity: SerialParity,
    pub rts_enable: bool,
    pub dtr_enable: bool,
    /// Bytes required before idle can end a receive
    pub at_least_receive_length: usize,
    /// Consecutive empty polls that end a receive
    pub receive_empty_data_count: u32,
    /// Drain stale input before each request
    pub clear_cache_before_read: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: "COM1".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            rts_enable: false,
            dtr_enable: false,
            at_least_receive_length: 1,
            receive_empty_data_count: 1,
            clear_cache_before_read: false,
        }
    }
}

impl FromStr for SerialSettings {
    type Err = CommError;

    /// Parse `port[-baud[-databits[-parity[-stopbits]]]]`, e.g. `COM3-9600-8-N-1`
    ///
    /// Port names may contain `-`; the line parameters are taken from the right.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CommError::format("Empty serial port description"));
        }

        let mut settings = SerialSettings::default();
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 5 {
            settings.port_name = s.to_string();
            return Ok(settings);
        }

        let tail = &parts[parts.len() - 4..];
        settings.port_name = parts[..parts.len() - 4].join("-");
        settings.baud_rate = tail[0]
            .parse()
            .map_err(|_| CommError::format(format!("Invalid baud rate: {}", tail[0])))?;
        settings.data_bits = match tail[1] {
            "5" => 5,
            "6" => 6,
            "7" => 7,
            "8" => 8,
            other => return Err(CommError::format(format!("Invalid data bits: {other}"))),
        };
        settings.parity = match tail[2].to_ascii_uppercase().as_str() {
            "N" => SerialParity::None,
            "O" => SerialParity::Odd,
            "E" => SerialParity::Even,
            other => return Err(CommError::format(format!("Unsupported parity: {other}"))),
        };
        settings.stop_bits = match tail[3] {
            "0" | "1" => 1,
            "1.5" | "2" => 2,
            other => return Err(CommError::format(format!("Invalid stop bits: {other}"))),
        };
        Ok(settings)
    }
}

/// Serial device operations beyond plain byte I/O
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {
    /// Open the port described by `settings`
    fn open(settings: &SerialSettings) -> io::Result<Self>
    where
        Self: Sized;

    /// Bytes waiting in the input buffer
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Discard the input buffer
    fn clear_input(&self) -> io::Result<()>;
}

impl SerialIo for SerialStream {
    fn open(settings: &SerialSettings) -> io::Result<Self> {
        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match settings.parity {
            SerialParity::Odd => tokio_serial::Parity::Odd,
            SerialParity::Even => tokio_serial::Parity::Even,
            SerialParity::None => tokio_serial::Parity::None,
        };
        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let mut port = tokio_serial::new(&settings.port_name, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()?;
        port.write_request_to_send(settings.rts_enable)?;
        port.write_data_terminal_ready(settings.dtr_enable)?;
        Ok(port)
    }

    fn bytes_to_read(&self) -> io::Result<u32> {
        Ok(SerialPort::bytes_to_read(self)?)
    }

    fn clear_input(&self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }
}

/// Serial pipe
#[derive(Debug)]
pub struct SerialPipe<S: SerialIo = SerialStream> {
    serial: SerialSettings,
    support: StreamSupport<S>,
}

impl<S: SerialIo> SerialPipe<S> {
    pub fn new(serial: SerialSettings, settings: PipeSettings) -> Self {
        Self {
            support: StreamSupport::new(serial.port_name.clone(), settings),
            serial,
        }
    }

    /// Wrap an already opened port
    pub fn from_port(port: S, serial: SerialSettings, settings: PipeSettings) -> Self {
        let mut pipe = Self::new(serial, settings);
        pipe.support.attach(port);
        pipe
    }

    pub fn serial_settings(&self) -> &SerialSettings {
        &self.serial
    }

    pub fn serial_settings_mut(&mut self) -> &mut SerialSettings {
        &mut self.serial
    }

    fn pending(&mut self) -> Result<usize> {
        let polled = self.support.stream_mut()?.bytes_to_read();
        match polled {
            Ok(n) => Ok(n as usize),
            Err(e) => Err(self
                .support
                .fault(|code| CommError::transport(code, format!("Serial poll failed: {e}")))),
        }
    }

    /// Read whatever is waiting in the input buffer and return it
    pub async fn clear_serial_cache(&mut self) -> Result<Vec<u8>> {
        let pending = self.pending()?;
        let mut drained = vec![0u8; pending];
        let stall = self.support.settings().receive_timeout;
        let n = self
            .support
            .receive(&mut drained, ReceiveLength::Exact(pending), stall)
            .await?;
        drained.truncate(n);
        if !drained.is_empty() {
            debug!(pipe = %self.support.name(), "Cleared {}B of stale input", drained.len());
        }
        Ok(drained)
    }

    async fn idle_receive(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let sleep_time = self.support.settings().sleep_time;
        let stall = self.support.settings().receive_timeout;
        let at_least = self.serial.at_least_receive_length;
        let empty_limit = self.serial.receive_empty_data_count.max(1);

        let mut received = Vec::new();
        let mut empty_polls = 0u32;
        let mut last_progress = Instant::now();
        loop {
            sleep(sleep_time).await;

            let pending = self.pending()?;
            if pending == 0 {
                empty_polls += 1;
                // framed responses end on their completion check only
                if message.is_none() && received.len() >= at_least && empty_polls >= empty_limit {
                    break;
                }
                if last_progress.elapsed() > stall {
                    return Err(self.support.timeout_fault(received.len(), stall));
                }
                continue;
            }

            empty_polls = 0;
            let mut chunk = vec![0u8; pending];
            let n = self
                .support
                .receive(&mut chunk, ReceiveLength::Exact(pending), stall)
                .await?;
            received.extend_from_slice(&chunk[..n]);
            last_progress = Instant::now();
            if received.len() > MAX_FRAME_LENGTH {
                return Err(self.support.desync(CommError::invalid_response(format!(
                    "Response exceeds {MAX_FRAME_LENGTH} bytes without completing"
                ))));
            }

            if message.is_some_and(|m| m.is_complete(&received, request)) {
                break;
            }
        }
        Ok(received)
    }
}

impl SerialPipe<SerialStream> {
    /// Unopened pipe over a system serial port
    pub fn port(serial: SerialSettings, settings: PipeSettings) -> Self {
        Self::new(serial, settings)
    }
}

#[async_trait]
impl<S: SerialIo> CommunicationPipe for SerialPipe<S> {
    fn name(&self) -> &str {
        self.support.name()
    }

    fn is_open(&self) -> bool {
        self.support.is_open()
    }

    fn settings(&self) -> &PipeSettings {
        self.support.settings()
    }

    fn error_counter(&self) -> &ErrorCounter {
        self.support.counter()
    }

    async fn open_communication(&mut self) -> Result<bool> {
        if self.support.is_open() {
            return Ok(false);
        }

        self.support.logger().log_connect(
            "Serial",
            &format!(
                "{}baud {}-{:?}-{}",
                self.serial.baud_rate, self.serial.data_bits, self.serial.parity, self.serial.stop_bits
            ),
        );
        match S::open(&self.serial) {
            Ok(port) => {
                info!("Serial opened: {}", self.serial.port_name);
                self.support.attach(port);
                Ok(true)
            },
            Err(e) => {
                let err = CommError::transport(
                    SOCKET_ERROR_CODE,
                    format!("Failed to open serial port {}: {e}", self.serial.port_name),
                );
                self.support.record_open_failure(&err);
                Err(err)
            },
        }
    }

    async fn close_communication(&mut self) -> Result<()> {
        self.support.close().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.support.send(data).await
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        length: ReceiveLength,
        timeout: Duration,
    ) -> Result<usize> {
        self.support.receive(buffer, length, timeout).await
    }

    async fn receive_message(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        if self.serial.clear_cache_before_read {
            let cleared = self.support.stream_mut()?.clear_input();
            if let Err(e) = cleared {
                return Err(self
                    .support
                    .fault(|code| CommError::transport(code, format!("Serial clear failed: {e}"))));
            }
        }
        self.support.send(request).await?;
        let response = self.idle_receive(message, request).await?;
        self.support.counter().reset();
        Ok(response)
    }
}

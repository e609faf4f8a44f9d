//! Communication pipe abstraction
//!
//! A pipe is one bidirectional byte channel to one device. It is opened on
//! demand, reused across requests and closed on the first I/O fault. Every
//! method takes `&mut self`, so a pipe never carries two requests at once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::message::NetMessage;
use crate::error::Result;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default stall timeout while receiving
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default poll interval of idle-completion receives
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_millis(20);

/// Timing parameters shared by all pipe kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeSettings {
    pub connect_timeout: Duration,
    /// Maximum time without receive progress
    pub receive_timeout: Duration,
    /// Poll interval for serial idle detection
    pub sleep_time: Duration,
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            sleep_time: DEFAULT_SLEEP_TIME,
        }
    }
}

/// How many bytes a receive call waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveLength {
    /// Exactly `n` bytes, or a failure
    Exact(usize),
    /// Whatever one read delivers (at least one byte)
    Available,
}

/// Consecutive transport error count of a pipe
///
/// Cloning yields a handle to the same counter. The owning pipe is the only
/// writer; handles are for observation.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter(Arc<AtomicU32>);

impl ErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Increment and return the new count
    pub fn increment(&self) -> u32 {
        self.0
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Error code for the current failure: the negated count
    pub fn as_error_code(count: u32) -> i32 {
        -(count.min(i32::MAX as u32) as i32)
    }
}

/// One communication medium
#[async_trait]
pub trait CommunicationPipe: Send {
    /// Name used in logs (`host:port`, port name)
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn settings(&self) -> &PipeSettings;

    fn error_counter(&self) -> &ErrorCounter;

    /// Number of consecutive transport failures
    fn error_count(&self) -> u32 {
        self.error_counter().get()
    }

    /// Open the medium. `Ok(false)` means it was already open.
    async fn open_communication(&mut self) -> Result<bool>;

    /// Close the medium. Closing a closed pipe is a no-op.
    async fn close_communication(&mut self) -> Result<()>;

    /// Write all of `data`
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive into `buffer` with a stall timeout
    async fn receive(
        &mut self,
        buffer: &mut [u8],
        length: ReceiveLength,
        timeout: Duration,
    ) -> Result<usize>;

    /// Send `request` and receive one complete response framed by `message`
    ///
    /// With no message, stream pipes return a single read and serial pipes
    /// wait for the line to go idle.
    async fn receive_message(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>>;
}

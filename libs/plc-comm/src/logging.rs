//! Per-pipe frame logging
//!
//! Every pipe carries a [`FrameLogger`] so traces can be filtered by the pipe
//! name (`host:port`, `COM3`, ...). Frames are logged at DEBUG as uppercase hex.

use tracing::Level;

use crate::bytes::hex::encode_upper;

/// Logger bound to one pipe
#[derive(Debug, Clone)]
pub struct FrameLogger {
    pub pipe_name: String,
}

macro_rules! log_at {
    ($level:expr, $pipe:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!(pipe = %$pipe, $($arg)+),
            Level::WARN => tracing::warn!(pipe = %$pipe, $($arg)+),
            Level::INFO => tracing::info!(pipe = %$pipe, $($arg)+),
            Level::DEBUG => tracing::debug!(pipe = %$pipe, $($arg)+),
            _ => tracing::trace!(pipe = %$pipe, $($arg)+),
        }
    };
}

impl FrameLogger {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
        }
    }

    /// Log connection attempt
    pub fn log_connect(&self, kind: &str, details: &str) {
        log_at!(Level::INFO, self.pipe_name, "[CONNECT] {} {} - {}", kind, self.pipe_name, details);
    }

    /// Log pipe open/close transitions
    pub fn log_status(&self, opened: bool, reason: &str) {
        let state = if opened { "OPEN" } else { "CLOSED" };
        log_at!(Level::INFO, self.pipe_name, "[STATUS] {} - {}", state, reason);
    }

    /// Log a transport fault
    pub fn log_fault(&self, error_count: u32, message: &str) {
        log_at!(Level::ERROR, self.pipe_name, "[FAULT] #{} - {}", error_count, message);
    }

    /// Log a stall timeout
    pub fn log_timeout(&self, timeout_ms: u64, received: usize) {
        log_at!(
            Level::WARN,
            self.pipe_name,
            "[TIMEOUT] {}ms, {} bytes received",
            timeout_ms,
            received
        );
    }

    /// Log an outgoing frame
    pub fn log_tx(&self, data: &[u8]) {
        self.log_frame("TX", data);
    }

    /// Log an incoming frame
    pub fn log_rx(&self, data: &[u8]) {
        self.log_frame("RX", data);
    }

    fn log_frame(&self, direction: &str, data: &[u8]) {
        if tracing::enabled!(Level::DEBUG) {
            log_at!(
                Level::DEBUG,
                self.pipe_name,
                "[{}] {}B {}",
                direction,
                data.len(),
                encode_upper(data)
            );
        }
    }
}

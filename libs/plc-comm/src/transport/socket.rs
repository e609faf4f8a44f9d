//! TCP socket pipe

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::info;

use super::message::NetMessage;
use super::net_support::{connect_tcp, StreamSupport};
use super::pipe::{CommunicationPipe, ErrorCounter, PipeSettings, ReceiveLength};
use crate::error::Result;

/// TCP client pipe to `host:port`
#[derive(Debug)]
pub struct SocketPipe {
    endpoint: String,
    support: StreamSupport<TcpStream>,
}

impl SocketPipe {
    pub fn new(endpoint: impl Into<String>, settings: PipeSettings) -> Self {
        let endpoint = endpoint.into();
        Self {
            support: StreamSupport::new(endpoint.clone(), settings),
            endpoint,
        }
    }

    /// Convenience constructor from host and port
    pub fn with_host(host: &str, port: u16, settings: PipeSettings) -> Self {
        Self::new(format!("{host}:{port}"), settings)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommunicationPipe for SocketPipe {
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

        let timeout = self.support.settings().connect_timeout;
        self.support
            .logger()
            .log_connect("TCP", &format!("timeout {}ms", timeout.as_millis()));
        match connect_tcp(&self.endpoint, timeout).await {
            Ok(stream) => {
                info!("TCP connected: {}", self.endpoint);
                self.support.attach(stream);
                Ok(true)
            },
            Err(e) => {
                self.support.record_open_failure(&e);
                Err(e)
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
        self.support.receive_message(message, request).await
    }
}

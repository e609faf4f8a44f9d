//! TLS over TCP pipe
//!
//! Trust anchors are the Mozilla roots bundled by `webpki-roots`, optionally
//! extended with the certificates of a PEM file (private PLC gateways usually
//! present a self-issued CA).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::info;

use super::message::NetMessage;
use super::net_support::{connect_tcp, StreamSupport};
use super::pipe::{CommunicationPipe, ErrorCounter, PipeSettings, ReceiveLength};
use crate::error::{CommError, Result, SOCKET_ERROR_CODE};

/// TLS parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Name checked against the server certificate
    pub server_name: String,
    /// Extra trust anchors (PEM)
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

/// Build a client config from bundled roots and an optional PEM file
pub fn client_config(ca_file: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
    };

    if let Some(path) = ca_file {
        let pem = std::fs::read(path).map_err(|e| {
            CommError::config(format!("Cannot read CA file {}: {e}", path.display()))
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                CommError::config(format!("Invalid PEM in {}: {e}", path.display()))
            })?;
            roots
                .add(cert)
                .map_err(|e| CommError::config(format!("Rejected CA certificate: {e}")))?;
        }
    }

    Ok(Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

/// TLS client pipe
pub struct TlsPipe {
    endpoint: String,
    tls: TlsSettings,
    support: StreamSupport<TlsStream<TcpStream>>,
}

impl std::fmt::Debug for TlsPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPipe")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .field("open", &self.support.is_open())
            .finish()
    }
}

impl TlsPipe {
    pub fn new(endpoint: impl Into<String>, tls: TlsSettings, settings: PipeSettings) -> Self {
        let endpoint = endpoint.into();
        Self {
            support: StreamSupport::new(endpoint.clone(), settings),
            endpoint,
            tls,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<TlsStream<TcpStream>> {
        let config = client_config(self.tls.ca_file.as_deref())?;
        let server_name = ServerName::try_from(self.tls.server_name.clone()).map_err(|e| {
            CommError::config(format!("Invalid server name {}: {e}", self.tls.server_name))
        })?;

        let tcp = connect_tcp(&self.endpoint, self.support.settings().connect_timeout).await?;
        let handshake = TlsConnector::from(config).connect(server_name, tcp);
        match tokio::time::timeout(self.support.settings().connect_timeout, handshake).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(CommError::transport(
                SOCKET_ERROR_CODE,
                format!("TLS handshake with {} failed: {e}", self.endpoint),
            )),
            Err(_) => Err(CommError::ConnectTimeout {
                endpoint: self.endpoint.clone(),
                timeout_ms: self.support.settings().connect_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl CommunicationPipe for TlsPipe {
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

        self.support
            .logger()
            .log_connect("TLS", &format!("server name {}", self.tls.server_name));
        match self.connect().await {
            Ok(stream) => {
                info!("TLS connected: {}", self.endpoint);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bundled_roots_config() {
        assert!(client_config(None).is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let err = client_config(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(matches!(err, CommError::Config(_)));
    }

    #[test]
    fn test_ca_file_without_certs_keeps_bundled_roots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# no certificates here").unwrap();
        assert!(client_config(Some(file.path())).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let mut pipe = TlsPipe::new(
            "127.0.0.1:1",
            TlsSettings {
                server_name: "not a hostname!".into(),
                ca_file: None,
            },
            PipeSettings::default(),
        );
        let err = pipe.open_communication().await.unwrap_err();
        assert!(matches!(err, CommError::Config(_)));
        assert_eq!(pipe.error_count(), 1);
        assert!(!pipe.is_open());
    }
}

//! Stream I/O primitives
//!
//! Reads happen in chunks of at most [`CHUNK_SIZE`] bytes and every chunk gets
//! a fresh timeout, so the receive timeout measures stall time rather than
//! total transfer time. Read outcomes are reported as an explicit
//! [`ReadStatus`]; [`StreamSupport`] turns them into pipe state changes.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::message::NetMessage;
use super::pipe::{ErrorCounter, PipeSettings, ReceiveLength};
use crate::bytes::hex::encode_upper;
use crate::error::{CommError, Result, SOCKET_ERROR_CODE};
use crate::logging::FrameLogger;

/// Largest single read
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Longest response accepted before a completion check passes
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Outcome of a low-level read
#[derive(Debug)]
pub enum ReadStatus {
    /// Bytes delivered
    Data(usize),
    /// No progress within the stall timeout
    Timeout { received: usize },
    /// Peer closed the stream
    RemoteClosed,
    /// OS level failure
    Failed(io::Error),
}

/// One read with a stall timeout
pub async fn read_chunk<S>(stream: &mut S, buffer: &mut [u8], stall: Duration) -> ReadStatus
where
    S: AsyncRead + Unpin,
{
    match timeout(stall, stream.read(buffer)).await {
        Ok(Ok(0)) if !buffer.is_empty() => ReadStatus::RemoteClosed,
        Ok(Ok(n)) => ReadStatus::Data(n),
        Ok(Err(e)) => ReadStatus::Failed(e),
        Err(_) => ReadStatus::Timeout { received: 0 },
    }
}

/// Fill `buffer` completely, chunk by chunk
pub async fn read_exact_chunked<S>(stream: &mut S, buffer: &mut [u8], stall: Duration) -> ReadStatus
where
    S: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buffer.len() {
        let end = (received + CHUNK_SIZE).min(buffer.len());
        match read_chunk(stream, &mut buffer[received..end], stall).await {
            ReadStatus::Data(n) => received += n,
            ReadStatus::Timeout { .. } => return ReadStatus::Timeout { received },
            other => return other,
        }
    }
    ReadStatus::Data(received)
}

/// Write all of `data`, looping over partial writes
pub async fn send_all<S>(stream: &mut S, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < data.len() {
        let n = stream.write(&data[written..]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "peer accepted no bytes",
            ));
        }
        written += n;
    }
    stream.flush().await
}

async fn connect_any(endpoint: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host(endpoint).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address resolved for {endpoint}"),
        )
    }))
}

/// Connect a TCP socket within `connect_timeout`
pub async fn connect_tcp(endpoint: &str, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("TCP connecting: {}", endpoint);

    match timeout(connect_timeout, connect_any(endpoint)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("TCP_NODELAY: {}", e);
            }
            Ok(stream)
        },
        Ok(Err(e)) => Err(CommError::transport(
            SOCKET_ERROR_CODE,
            format!("Failed to connect to {endpoint}: {e}"),
        )),
        Err(_) => {
            warn!("TCP timeout: {}", endpoint);
            Err(CommError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms: connect_timeout.as_millis() as u64,
            })
        },
    }
}

/// Stream state shared by the socket, TLS and serial pipes
///
/// Owns the optional stream, the error counter and the frame logger. Any
/// send/receive fault increments the counter, drops the stream and yields an
/// error whose code is the negated count.
#[derive(Debug)]
pub struct StreamSupport<S> {
    stream: Option<S>,
    counter: ErrorCounter,
    logger: FrameLogger,
    settings: PipeSettings,
}

impl<S> StreamSupport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, settings: PipeSettings) -> Self {
        Self {
            stream: None,
            counter: ErrorCounter::new(),
            logger: FrameLogger::new(name),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.logger.pipe_name
    }

    pub fn logger(&self) -> &FrameLogger {
        &self.logger
    }

    pub fn settings(&self) -> &PipeSettings {
        &self.settings
    }

    pub fn counter(&self) -> &ErrorCounter {
        &self.counter
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Install a freshly opened stream
    pub fn attach(&mut self, stream: S) {
        self.stream = Some(stream);
        self.counter.reset();
        self.logger.log_status(true, "opened");
    }

    /// Count a failed open without touching the stream slot
    pub fn record_open_failure(&self, err: &CommError) {
        let count = self.counter.increment();
        self.logger.log_fault(count, &err.to_string());
    }

    pub fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream
            .as_mut()
            .ok_or_else(|| CommError::transport(SOCKET_ERROR_CODE, "Pipe is not open"))
    }

    /// Record a fault: bump the counter, drop the stream, build the error
    pub fn fault(&mut self, make: impl FnOnce(i32) -> CommError) -> CommError {
        let count = self.counter.increment();
        self.stream = None;
        let err = make(ErrorCounter::as_error_code(count));
        self.logger.log_fault(count, &err.to_string());
        err
    }

    /// Convert a read status into a byte count or a fault
    pub fn settle(&mut self, status: ReadStatus, stall: Duration) -> Result<usize> {
        match status {
            ReadStatus::Data(n) => Ok(n),
            ReadStatus::Timeout { received } => Err(self.timeout_fault(received, stall)),
            ReadStatus::RemoteClosed => Err(self.fault(|code| CommError::RemoteClosed { code })),
            ReadStatus::Failed(e) => {
                Err(self.fault(|code| CommError::transport(code, format!("Receive failed: {e}"))))
            },
        }
    }

    /// Drop a stream whose read position is no longer known
    ///
    /// The counter is untouched: the transport itself did not fail.
    pub fn desync(&mut self, err: CommError) -> CommError {
        self.stream = None;
        self.logger.log_status(false, &err.to_string());
        err
    }

    pub fn timeout_fault(&mut self, received: usize, stall: Duration) -> CommError {
        let timeout_ms = stall.as_millis() as u64;
        self.logger.log_timeout(timeout_ms, received);
        self.fault(|code| CommError::ReceiveTimeout {
            code,
            timeout_ms,
            received,
        })
    }

    pub async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let outcome = stream.shutdown().await;
        self.logger.log_status(false, "closed");
        outcome.map_err(|e| {
            warn!(pipe = %self.logger.pipe_name, "Close failed: {}", e);
            CommError::transport(SOCKET_ERROR_CODE, format!("Close failed: {e}"))
        })
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        match send_all(stream, data).await {
            Ok(()) => {
                self.logger.log_tx(data);
                Ok(())
            },
            Err(e) => Err(self.fault(|code| CommError::transport(code, format!("Send failed: {e}")))),
        }
    }

    pub async fn receive(
        &mut self,
        buffer: &mut [u8],
        length: ReceiveLength,
        stall: Duration,
    ) -> Result<usize> {
        let status = match length {
            ReceiveLength::Exact(0) => return Ok(0),
            ReceiveLength::Exact(n) => {
                if n > buffer.len() {
                    return Err(CommError::out_of_range(format!(
                        "Receive length {} exceeds buffer of {} bytes",
                        n,
                        buffer.len()
                    )));
                }
                read_exact_chunked(self.stream_mut()?, &mut buffer[..n], stall).await
            },
            ReceiveLength::Available => read_chunk(self.stream_mut()?, buffer, stall).await,
        };
        let n = self.settle(status, stall)?;
        self.logger.log_rx(&buffer[..n]);
        Ok(n)
    }

    /// Send a request and read one framed response
    ///
    /// A complete exchange resets the consecutive-error counter.
    pub async fn receive_message(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let response = self.exchange(message, request).await?;
        self.counter.reset();
        Ok(response)
    }

    async fn exchange(
        &mut self,
        message: Option<&dyn NetMessage>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        self.send(request).await?;
        let stall = self.settings.receive_timeout;

        let Some(message) = message else {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            let n = self.receive(&mut buffer, ReceiveLength::Available, stall).await?;
            buffer.truncate(n);
            return Ok(buffer);
        };

        let header_length = message.header_length();
        if header_length == 0 {
            let mut received = Vec::new();
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let n = self.receive(&mut chunk, ReceiveLength::Available, stall).await?;
                received.extend_from_slice(&chunk[..n]);
                if message.is_complete(&received, request) {
                    return Ok(received);
                }
                if received.len() > MAX_FRAME_LENGTH {
                    return Err(self.desync(CommError::invalid_response(format!(
                        "Response exceeds {MAX_FRAME_LENGTH} bytes without completing"
                    ))));
                }
            }
        }

        let mut frame = vec![0u8; header_length];
        self.receive(&mut frame, ReceiveLength::Exact(header_length), stall)
            .await?;
        if !message.check_header(&frame, request) {
            return Err(self.desync(CommError::invalid_response(format!(
                "Header check failed: {}",
                encode_upper(&frame)
            ))));
        }

        let content = match message.content_length(&frame) {
            Ok(content) => content,
            Err(e) => return Err(self.desync(e)),
        };
        if content > 0 {
            frame.resize(header_length + content, 0);
            self.receive(&mut frame[header_length..], ReceiveLength::Exact(content), stall)
                .await?;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::message::{ModbusTcpMessage, TerminatorMessage};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_exact_over_small_writes() {
        let (mut client, mut server) = duplex(4);
        tokio::spawn(async move {
            for b in 0u8..10 {
                let _ = server.write_all(&[b]).await;
            }
            // keep the stream open until the reader is done
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut buffer = [0u8; 10];
        let status = read_exact_chunked(&mut client, &mut buffer, Duration::from_secs(1)).await;
        assert!(matches!(status, ReadStatus::Data(10)));
        assert_eq!(buffer, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_read_chunk_remote_closed() {
        let (mut client, server) = duplex(16);
        drop(server);
        let mut buffer = [0u8; 4];
        let status = read_chunk(&mut client, &mut buffer, Duration::from_secs(1)).await;
        assert!(matches!(status, ReadStatus::RemoteClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_reports_partial_count() {
        let (mut client, mut server) = duplex(16);
        server.write_all(&[1, 2, 3]).await.unwrap();

        let mut buffer = [0u8; 8];
        let status = read_exact_chunked(&mut client, &mut buffer, Duration::from_millis(100)).await;
        assert!(matches!(status, ReadStatus::Timeout { received: 3 }));
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_support_fault_closes_and_counts() {
        let (client, server) = duplex(16);
        let mut support = StreamSupport::new("duplex", PipeSettings::default());
        support.attach(client);

        let mut buffer = [0u8; 4];
        let err = support
            .receive(&mut buffer, ReceiveLength::Exact(4), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CommError::ReceiveTimeout { code: -1, .. }));
        assert!(!support.is_open());
        assert_eq!(support.counter().get(), 1);
        drop(server);
    }

    #[tokio::test]
    async fn test_completed_exchange_resets_counter() {
        let (client, mut server) = duplex(64);
        let mut support = StreamSupport::new("duplex", PipeSettings::default());
        support.attach(client);
        support.counter().increment();
        support.counter().increment();

        tokio::spawn(async move {
            let mut request = [0u8; 1];
            server.read_exact(&mut request).await.unwrap();
            server.write_all(b"OK").await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        let response = support.receive_message(None, b"Q").await.unwrap();
        assert_eq!(response, b"OK");
        assert_eq!(support.counter().get(), 0);
    }

    #[tokio::test]
    async fn test_bad_content_length_drops_stream() {
        let (client, mut server) = duplex(64);
        let mut support = StreamSupport::new("duplex", PipeSettings::default());
        support.attach(client);

        tokio::spawn(async move {
            let mut request = [0u8; 12];
            server.read_exact(&mut request).await.unwrap();
            // matching transaction id, zero MBAP length, trailing garbage
            server.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xEE]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let err = support
            .receive_message(Some(&ModbusTcpMessage), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, CommError::InvalidResponse(_)));
        assert!(!support.is_open());
        assert_eq!(support.counter().get(), 0);
    }

    #[tokio::test]
    async fn test_unterminated_response_is_capped() {
        let (client, mut server) = duplex(4096);
        let mut support = StreamSupport::new("duplex", PipeSettings::default());
        support.attach(client);

        tokio::spawn(async move {
            let mut request = [0u8; 5];
            server.read_exact(&mut request).await.unwrap();
            let flood = vec![b'A'; MAX_FRAME_LENGTH + CHUNK_SIZE];
            let _ = server.write_all(&flood).await;
        });
        let msg = TerminatorMessage::hostlink();
        let err = support.receive_message(Some(&msg), b"@00RD").await.unwrap_err();
        assert!(matches!(err, CommError::InvalidResponse(_)));
        assert!(!support.is_open());
    }

    #[tokio::test]
    async fn test_exact_zero_is_noop() {
        let mut support: StreamSupport<tokio::io::DuplexStream> =
            StreamSupport::new("idle", PipeSettings::default());
        let mut buffer = [0u8; 0];
        let n = support
            .receive(&mut buffer, ReceiveLength::Exact(0), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}

//! Typed read/write through DeviceCommunication over a real socket
//!
//! The mock device speaks a minimal byte-addressed protocol:
//! request  = op (b'R' / b'W'), address length, address, u16 length, [data]
//! response = u32 content length, content

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plc_comm::{
    ByteTransform, CommError, DeviceCommunication, NetMessage, PipeSettings, ReadWriteNet, Result,
    SocketPipe, StringEncoding, TransformKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Byte store keyed by address
type Memory = Arc<Mutex<HashMap<String, Vec<u8>>>>;

struct LengthPrefixed;

impl NetMessage for LengthPrefixed {
    fn header_length(&self) -> usize {
        4
    }

    fn content_length(&self, header: &[u8]) -> Result<usize> {
        let bytes: [u8; 4] = header
            .try_into()
            .map_err(|_| CommError::invalid_response("bad header"))?;
        Ok(u32::from_be_bytes(bytes) as usize)
    }
}

#[derive(Debug)]
struct ByteDevice {
    device: DeviceCommunication,
}

impl ByteDevice {
    /// Byte-addressed, big-endian: two units per 16-bit word
    fn new(endpoint: String) -> Self {
        let pipe = SocketPipe::new(
            endpoint,
            PipeSettings {
                receive_timeout: Duration::from_secs(2),
                ..PipeSettings::default()
            },
        );
        Self {
            device: DeviceCommunication::new(
                Box::new(pipe),
                ByteTransform::new(TransformKind::ReverseBytes),
                2,
            ),
        }
    }

    fn request(op: u8, address: &str, length: u16, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![op, address.len() as u8];
        frame.extend_from_slice(address.as_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(data);
        frame
    }
}

#[async_trait]
impl ReadWriteNet for ByteDevice {
    fn byte_transform(&self) -> &ByteTransform {
        self.device.byte_transform()
    }

    fn word_length(&self) -> u16 {
        self.device.word_length()
    }

    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>> {
        let request = Self::request(b'R', address, length, &[]);
        let response = self
            .device
            .read_from_core_server(Some(&LengthPrefixed), &request)
            .await?;
        Ok(response[4..].to_vec())
    }

    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()> {
        let request = Self::request(b'W', address, data.len() as u16, data);
        self.device
            .read_from_core_server(Some(&LengthPrefixed), &request)
            .await?;
        Ok(())
    }
}

async fn serve(mut stream: TcpStream, memory: Memory) -> std::io::Result<()> {
    loop {
        let op = match stream.read_u8().await {
            Ok(op) => op,
            Err(_) => return Ok(()),
        };
        let address_len = stream.read_u8().await? as usize;
        let mut address = vec![0u8; address_len];
        stream.read_exact(&mut address).await?;
        let address = String::from_utf8_lossy(&address).to_string();
        let length = stream.read_u16().await? as usize;

        let content = if op == b'W' {
            let mut data = vec![0u8; length];
            stream.read_exact(&mut data).await?;
            memory.lock().unwrap().insert(address, data);
            Vec::new()
        } else {
            let mut data = memory.lock().unwrap().get(&address).cloned().unwrap_or_default();
            data.resize(length, 0);
            data
        };
        stream.write_u32(content.len() as u32).await?;
        stream.write_all(&content).await?;
    }
}

async fn start_mock() -> (String, Memory) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let memory: Memory = Arc::default();
    let shared = memory.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, shared.clone()));
        }
    });
    (endpoint, memory)
}

#[tokio::test]
async fn test_int16_round_trip_with_word_length_two() {
    let (endpoint, memory) = start_mock().await;
    let mut device = ByteDevice::new(endpoint);

    device.write_i16("DB100.12", 254).await.unwrap();
    assert_eq!(memory.lock().unwrap()["DB100.12"], vec![0x00, 0xFE]);
    assert_eq!(device.read_i16("DB100.12").await.unwrap(), 254);
}

#[tokio::test]
async fn test_typed_values_round_trip() {
    let (endpoint, _memory) = start_mock().await;
    let mut device = ByteDevice::new(endpoint);

    device.write_i32_array("DB1.0", &[-1, i32::MAX, 0]).await.unwrap();
    assert_eq!(device.read_i32_array("DB1.0", 3).await.unwrap(), vec![-1, i32::MAX, 0]);

    device.write_f64("DB1.20", -2.5).await.unwrap();
    assert_eq!(device.read_f64("DB1.20").await.unwrap(), -2.5);

    device.write_u16_array("DB1.40", &[1, 2, u16::MAX]).await.unwrap();
    assert_eq!(device.read_u16_array("DB1.40", 3).await.unwrap(), vec![1, 2, u16::MAX]);

    device
        .write_string_fixed("DB1.60", "PRESS", 8, StringEncoding::Ascii)
        .await
        .unwrap();
    assert_eq!(device.read_string("DB1.60", 8).await.unwrap(), "PRESS");
}

#[tokio::test]
async fn test_bits_unsupported_by_default() {
    let (endpoint, _memory) = start_mock().await;
    let mut device = ByteDevice::new(endpoint);
    assert!(matches!(
        device.read_bool("DB1.0.0").await,
        Err(CommError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_disposed_device_refuses_io() {
    let (endpoint, _memory) = start_mock().await;
    let mut device = ByteDevice::new(endpoint);
    device.write_i16("DB2.0", 7).await.unwrap();
    assert!(device.device.pipe().is_open());

    device.device.dispose().await.unwrap();
    device.device.dispose().await.unwrap();
    assert!(device.device.is_disposed());
    assert!(!device.device.pipe().is_open());
    assert!(device.read_i16("DB2.0").await.is_err());
}

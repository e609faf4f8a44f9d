//! Delta series dispatch onto a recording Modbus capability

use async_trait::async_trait;
use plc_comm::protocols::delta::{self, translate_to_modbus_address};
use plc_comm::{ByteTransform, CommError, DeltaSeries, ReadWriteNet, Result, TransformKind};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Read(String, u16),
    Write(String, Vec<u8>),
    ReadBits(String, u16),
    WriteBits(String, Vec<bool>),
}

struct RecordingModbus {
    transform: ByteTransform,
    calls: Vec<Call>,
}

impl RecordingModbus {
    fn new() -> Self {
        Self {
            transform: ByteTransform::new(TransformKind::ReverseWord),
            calls: Vec::new(),
        }
    }
}

#[async_trait]
impl ReadWriteNet for RecordingModbus {
    fn byte_transform(&self) -> &ByteTransform {
        &self.transform
    }

    fn word_length(&self) -> u16 {
        1
    }

    async fn read(&mut self, address: &str, length: u16) -> Result<Vec<u8>> {
        self.calls.push(Call::Read(address.to_string(), length));
        Ok(vec![0; usize::from(length) * 2])
    }

    async fn write(&mut self, address: &str, data: &[u8]) -> Result<()> {
        self.calls.push(Call::Write(address.to_string(), data.to_vec()));
        Ok(())
    }

    async fn read_bool_array(&mut self, address: &str, length: u16) -> Result<Vec<bool>> {
        self.calls.push(Call::ReadBits(address.to_string(), length));
        Ok(vec![false; usize::from(length)])
    }

    async fn write_bool_array(&mut self, address: &str, values: &[bool]) -> Result<()> {
        self.calls.push(Call::WriteBits(address.to_string(), values.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn test_as_series_passes_address_through() {
    let mut modbus = RecordingModbus::new();
    let series = DeltaSeries::As;

    delta::read(&series, &mut modbus, "s=2;100", 4).await.unwrap();
    delta::write(&series, &mut modbus, "100", &[0, 1]).await.unwrap();
    delta::read_bool(&series, &mut modbus, "x=2;5", 2).await.unwrap();
    delta::write_bool(&series, &mut modbus, "5", &[true]).await.unwrap();

    assert_eq!(
        modbus.calls,
        vec![
            Call::Read("s=2;100".into(), 4),
            Call::Write("100".into(), vec![0, 1]),
            Call::ReadBits("x=2;5".into(), 2),
            Call::WriteBits("5".into(), vec![true]),
        ]
    );
}

#[tokio::test]
async fn test_dvp_series_translates_address() {
    let mut modbus = RecordingModbus::new();
    let series = DeltaSeries::Dvp;

    delta::read(&series, &mut modbus, "D100", 2).await.unwrap();
    delta::write_bool(&series, &mut modbus, "s=3;M10", &[true, false]).await.unwrap();
    delta::read_bool(&series, &mut modbus, "X7", 1).await.unwrap();

    assert_eq!(
        modbus.calls,
        vec![
            Call::Read("4196".into(), 2),
            Call::WriteBits("s=3;2058".into(), vec![true, false]),
            Call::ReadBits("x=2;1031".into(), 1),
        ]
    );
    assert_ne!(
        translate_to_modbus_address(&series, "D100", 3).unwrap(),
        translate_to_modbus_address(&DeltaSeries::As, "D100", 3).unwrap()
    );
}

#[tokio::test]
async fn test_dvp_splits_across_map_boundaries() {
    let mut modbus = RecordingModbus::new();
    let series = DeltaSeries::Dvp;

    let data = delta::read(&series, &mut modbus, "D4090", 10).await.unwrap();
    assert_eq!(data.len(), 20);
    delta::write(&series, &mut modbus, "D4095", &[1, 2, 3, 4]).await.unwrap();
    let bits = delta::read_bool(&series, &mut modbus, "M1530", 8).await.unwrap();
    assert_eq!(bits.len(), 8);

    assert_eq!(
        modbus.calls,
        vec![
            Call::Read("8186".into(), 6),
            Call::Read("36864".into(), 4),
            Call::Write("8191".into(), vec![1, 2]),
            Call::Write("36864".into(), vec![3, 4]),
            Call::ReadBits("3578".into(), 6),
            Call::ReadBits("45056".into(), 2),
        ]
    );
}

#[tokio::test]
async fn test_unrecognized_series_performs_no_io() {
    let mut modbus = RecordingModbus::new();
    let series = DeltaSeries::parse("AH500");

    assert!(matches!(
        delta::read(&series, &mut modbus, "D100", 1).await,
        Err(CommError::Unsupported(_))
    ));
    assert!(matches!(
        delta::write(&series, &mut modbus, "D100", &[0, 1]).await,
        Err(CommError::Unsupported(_))
    ));
    assert!(matches!(
        delta::read_bool(&series, &mut modbus, "M0", 1).await,
        Err(CommError::Unsupported(_))
    ));
    assert!(matches!(
        delta::write_bool(&series, &mut modbus, "M0", &[true]).await,
        Err(CommError::Unsupported(_))
    ));
    assert!(matches!(
        translate_to_modbus_address(&series, "D100", 3),
        Err(CommError::Unsupported(_))
    ));
    assert!(modbus.calls.is_empty());
}

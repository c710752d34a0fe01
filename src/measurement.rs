//! Heart Rate Measurement characteristic (0x2A37) decoding.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MeasurementFlags: u8 {
        const VALUE_U16 = 1 << 0;
        const SENSOR_CONTACT_DETECTED = 1 << 1;
        const SENSOR_CONTACT_SUPPORTED = 1 << 2;
        const ENERGY_EXPENDED = 1 << 3;
        const RR_INTERVAL = 1 << 4;
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("measurement too short: got {len} bytes, need at least {required}")]
    TooShort { len: usize, required: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorContact {
    NotSupported,
    NotDetected,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateReading {
    pub bpm: u16,
    pub sensor_contact: SensorContact,
    /// Kilojoules since the sensor's last reset.
    pub energy_expended: Option<u16>,
    /// Raw RR intervals in 1/1024 second units, oldest first.
    pub rr_intervals: Vec<u16>,
}

impl HeartRateReading {
    pub fn rr_interval_durations(&self) -> impl Iterator<Item = Duration> + '_ {
        self.rr_intervals
            .iter()
            .map(|&rr| Duration::from_micros(u64::from(rr) * 1_000_000 / 1024))
    }
}

impl std::fmt::Display for HeartRateReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bpm", self.bpm)
    }
}

/// Decodes one notification payload.
///
/// Only the flags byte and the heart rate value are required. Trailing
/// fields announced by the flags are picked up when present and silently
/// skipped when the sensor truncated them.
pub fn decode(payload: &[u8]) -> Result<HeartRateReading, DecodeError> {
    let Some((&flags, body)) = payload.split_first() else {
        return Err(DecodeError::TooShort { len: 0, required: 2 });
    };
    let flags = MeasurementFlags::from_bits_retain(flags);

    let (bpm, mut rest) = if flags.contains(MeasurementFlags::VALUE_U16) {
        let [lo, hi, rest @ ..] = body else {
            return Err(DecodeError::TooShort { len: payload.len(), required: 3 });
        };
        (u16::from_le_bytes([*lo, *hi]), rest)
    } else {
        let [value, rest @ ..] = body else {
            return Err(DecodeError::TooShort { len: payload.len(), required: 2 });
        };
        (u16::from(*value), rest)
    };

    let sensor_contact = if !flags.contains(MeasurementFlags::SENSOR_CONTACT_SUPPORTED) {
        SensorContact::NotSupported
    } else if flags.contains(MeasurementFlags::SENSOR_CONTACT_DETECTED) {
        SensorContact::Detected
    } else {
        SensorContact::NotDetected
    };

    let energy_expended = if flags.contains(MeasurementFlags::ENERGY_EXPENDED) {
        take_u16(&mut rest)
    } else {
        None
    };

    let rr_intervals = if flags.contains(MeasurementFlags::RR_INTERVAL) {
        rest.chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    } else {
        Vec::new()
    };

    Ok(HeartRateReading {
        bpm,
        sensor_contact,
        energy_expended,
        rr_intervals,
    })
}

fn take_u16(bytes: &mut &[u8]) -> Option<u16> {
    let current = *bytes;
    let [lo, hi, rest @ ..] = current else {
        *bytes = &[];
        return None;
    };
    *bytes = rest;
    Some(u16::from_le_bytes([*lo, *hi]))
}

/// Encodes a plain 8-bit measurement, as most chest straps send it.
pub fn encode_u8(bpm: u8) -> Vec<u8> {
    vec![0x00, bpm]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_decode_u8_value() {
        let reading = decode(&[0x00, 0x4B]).unwrap();
        assert_eq!(reading.bpm, 75);
        assert_eq!(reading.sensor_contact, SensorContact::NotSupported);
        assert_eq!(reading.energy_expended, None);
        assert!(reading.rr_intervals.is_empty());
    }

    #[test]
    fn test_decode_u16_value() {
        assert_eq!(decode(&[0x01, 0x4B, 0x00]).unwrap().bpm, 75);
        assert_eq!(decode(&[0x01, 0x34, 0x12]).unwrap().bpm, 0x1234);
        assert_eq!(decode(&[0x01, 0xFF, 0xFF]).unwrap().bpm, u16::MAX);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decode(&[]), Err(DecodeError::TooShort { len: 0, required: 2 }));
        assert_eq!(decode(&[0x00]), Err(DecodeError::TooShort { len: 1, required: 2 }));
        assert_eq!(decode(&[0x01]), Err(DecodeError::TooShort { len: 1, required: 3 }));
        assert_eq!(decode(&[0x01, 0xFF]), Err(DecodeError::TooShort { len: 2, required: 3 }));
    }

    #[test]
    fn test_unknown_flag_bits_are_ignored() {
        // Reserved bits 5-7 set, 8-bit value.
        assert_eq!(decode(&[0xE0, 0x3C]).unwrap().bpm, 60);
        // Every optional field announced, none present.
        let reading = decode(&[0x1E, 0x50]).unwrap();
        assert_eq!(reading.bpm, 80);
        assert_eq!(reading.sensor_contact, SensorContact::Detected);
        assert_eq!(reading.energy_expended, None);
        assert!(reading.rr_intervals.is_empty());
    }

    #[test]
    fn test_decode_full_measurement() {
        // u16 value, contact supported but lost, energy 0x0102, two RR intervals.
        let payload = [0x1D, 0x48, 0x00, 0x02, 0x01, 0x00, 0x04, 0x00, 0x02];
        let reading = decode(&payload).unwrap();
        assert_eq!(reading.bpm, 72);
        assert_eq!(reading.sensor_contact, SensorContact::NotDetected);
        assert_eq!(reading.energy_expended, Some(0x0102));
        assert_eq!(reading.rr_intervals, vec![1024, 512]);

        let durations: Vec<_> = reading.rr_interval_durations().collect();
        assert_eq!(durations, vec![Duration::from_secs(1), Duration::from_millis(500)]);
    }

    #[test]
    fn test_truncated_rr_interval_is_dropped() {
        let reading = decode(&[0x10, 0x40, 0x00, 0x04, 0x07]).unwrap();
        assert_eq!(reading.bpm, 64);
        assert_eq!(reading.rr_intervals, vec![1024]);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let payload = [0x01, 0x4B, 0x00];
        assert_eq!(decode(&payload), decode(&payload));
        assert_eq!(payload, [0x01, 0x4B, 0x00]);
    }
}

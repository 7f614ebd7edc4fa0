//! Telemetry Codec
//!
//! The sensor notifies a single IEEE-754 single-precision float,
//! little-endian, 4 bytes per notification.

use thiserror::Error;
use uuid::Uuid;

/// Sensor BLE Service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_1234567890ab);

/// Telemetry Characteristic UUID - notifications carry the sensor value
pub const TELEMETRY_CHAR_UUID: Uuid = Uuid::from_u128(0x87654321_4321_4321_4321_ba0987654321);

/// Payload length of one telemetry notification
pub const PAYLOAD_LEN: usize = 4;

/// Decimal digits kept after rounding
pub const DECIMAL_PLACES: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected telemetry payload length {len} (expected 4): {hex}")]
    InvalidLength { len: usize, hex: String },
}

/// Decode a notification payload into a reading rounded to five decimals.
pub fn decode(payload: &[u8]) -> Result<f64, DecodeError> {
    let bytes: [u8; PAYLOAD_LEN] = payload.try_into().map_err(|_| DecodeError::InvalidLength {
        len: payload.len(),
        hex: to_hex(payload),
    })?;

    let raw = f32::from_le_bytes(bytes) as f64;
    Ok(round_to(raw, DECIMAL_PLACES))
}

fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian_float() {
        assert_eq!(decode(&1.5f32.to_le_bytes()), Ok(1.5));
        assert_eq!(decode(&[0x00, 0x00, 0x80, 0x3f]), Ok(1.0));
        assert_eq!(decode(&(-42.25f32).to_le_bytes()), Ok(-42.25));
        assert_eq!(decode(&0.0f32.to_le_bytes()), Ok(0.0));
    }

    #[test]
    fn test_decode_rounds_to_five_places() {
        // 0.1f32 widens to 0.100000001490116...
        assert_eq!(decode(&0.1f32.to_le_bytes()), Ok(0.1));
        assert_eq!(decode(&1.234_567_9f32.to_le_bytes()), Ok(1.23457));
        // rounds rather than truncates
        assert_eq!(decode(&7.123_456_7f32.to_le_bytes()), Ok(7.12346));
    }

    #[test]
    fn test_decode_rejects_other_lengths() {
        let payloads: [&[u8]; 4] = [&[], &[0x01], &[0, 0, 0x80], &[0, 0, 0x80, 0x3f, 0]];
        for payload in payloads {
            let err = decode(payload).unwrap_err();
            assert!(matches!(err, DecodeError::InvalidLength { len, .. } if len == payload.len()));
        }
    }

    #[test]
    fn test_decode_error_carries_hex_dump() {
        let err = decode(&[0xde, 0xad]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLength {
                len: 2,
                hex: "dead".to_string()
            }
        );
    }
}

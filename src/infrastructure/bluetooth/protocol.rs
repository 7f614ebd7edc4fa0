//! Sensor Protocol
//!
//! The sensor exposes one GATT service carrying one notify-only
//! characteristic. Each notification is a 4-byte little-endian f32
//! (see [`crate::domain::telemetry`]). There is no write path.

pub use crate::domain::telemetry::{SERVICE_UUID, TELEMETRY_CHAR_UUID};
#[cfg(windows)]
use uuid::Uuid;

/// Render a 48-bit Bluetooth address as a peripheral id
pub fn address_to_id(address: u64) -> String {
    format!("{:012X}", address & 0xFFFF_FFFF_FFFF)
}

/// Parse a peripheral id back into a Bluetooth address.
/// Accepts `AABBCCDDEEFF` and `AA:BB:CC:DD:EE:FF`.
pub fn id_to_address(id: &str) -> Option<u64> {
    let hex: String = id.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.is_empty() || hex.len() > 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()
}

#[cfg(windows)]
pub fn to_guid(uuid: Uuid) -> windows::core::GUID {
    windows::core::GUID::from_u128(uuid.as_u128())
}

//! Bluetooth Module
//!
//! Discovers the sensor, holds the single link, and turns its
//! notifications into telemetry readings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   BleSessionManager                      │
//! │  (connection state machine - public API for callers)     │
//! └──────────┬──────────────────┬──────────────────┬────────┘
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//!     ┌────────────┐     ┌────────────┐     ┌────────────┐
//!     │  Scanner   │     │ BleAdapter │     │  Protocol  │
//!     │ - dedup    │     │ - WinRT    │     │ - UUIDs    │
//!     │ - names    │     │ - scripted │     │ - ids      │
//!     └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] - Radio seam implemented per platform
//! - [`protocol`] - Service/characteristic identifiers
//! - [`scanner`] - Discovery list
//! - [`session`] - Session manager
//! - `winrt` - Windows backend (Windows only)

pub mod adapter;
pub mod protocol;
pub mod scanner;
pub mod session;
#[cfg(windows)]
pub mod winrt;

pub use adapter::{Advertisement, BleAdapter, BleError, LinkEvent};
pub use session::{BleSessionManager, SessionConfig};

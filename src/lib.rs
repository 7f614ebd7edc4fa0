//! Sensor telemetry over BLE alongside a rate-limited chat client.
//!
//! The two subsystems are independent:
//!
//! - [`infrastructure::bluetooth`] discovers and connects to the sensor and
//!   keeps the latest decoded reading
//! - [`infrastructure::inference`] relays chat turns to a remote
//!   chat-completions endpoint under a throttle and a 429 back-off policy

pub mod domain;
pub mod infrastructure;

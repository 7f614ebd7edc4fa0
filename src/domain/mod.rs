//! Domain types shared by the radio and inference subsystems.

pub mod models;
pub mod settings;
pub mod telemetry;

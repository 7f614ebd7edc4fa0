//! Inference Module
//!
//! Rate-limited client for a remote chat-completions endpoint.
//!
//! - [`throttle`] - Minimum-gap gate and 429 back-off loop
//! - [`client`] - Request building and response handling
//! - [`types`] - Wire format

pub mod client;
pub mod throttle;
pub mod types;

pub use client::{ChatReply, InferenceClient, InferenceConfig, InferenceError};
pub use throttle::{ThrottleConfig, ThrottlePolicy, ThrottleState};

//! Radio adapter seam
//!
//! The session manager drives the radio through [`BleAdapter`]. Platform
//! backends implement it; tests script it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("peripheral {0} not found")]
    PeripheralNotFound(String),
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("no peripheral connected")]
    NotConnected,
    #[error("GATT operation failed: {0}")]
    Gatt(String),
    #[error("bluetooth platform error: {0}")]
    Platform(String),
}

/// One advertisement seen during a scan. Duplicates are expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub signal_strength: Option<i16>,
}

/// Events on an active characteristic subscription, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Notification(Result<Vec<u8>, BleError>),
    /// The link dropped; no further events follow.
    LinkLost,
}

#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Start an unfiltered scan. Advertisements arrive until `stop_scan`.
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, BleError>;

    async fn stop_scan(&self) -> Result<(), BleError>;

    async fn connect(&self, peripheral_id: &str) -> Result<(), BleError>;

    /// Full service and characteristic discovery on a connected peripheral.
    async fn discover_services(&self, peripheral_id: &str) -> Result<(), BleError>;

    /// Enable notifications on `characteristic` of `service`.
    async fn subscribe(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, BleError>;

    async fn disconnect(&self, peripheral_id: &str) -> Result<(), BleError>;
}

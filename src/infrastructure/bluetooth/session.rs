//! BLE Session Manager
//!
//! Owns discovery, the single connection slot, the telemetry subscription
//! and the latest decoded reading. Link failures, permission denials and
//! malformed notifications are logged and absorbed here; callers only ever
//! observe state changes.

use crate::domain::models::{
    AppEvent, ConnectionState, MessageSeverity, PeripheralDescriptor, StatusMessage,
    TelemetryReading,
};
use crate::domain::settings::BleSettings;
use crate::domain::telemetry as codec;
use crate::infrastructure::bluetooth::adapter::{BleAdapter, BleError, LinkEvent};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::permissions::PermissionGate;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The service/characteristic pair the session subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub service_uuid: Uuid,
    pub telemetry_char_uuid: Uuid,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            telemetry_char_uuid: protocol::TELEMETRY_CHAR_UUID,
        }
    }
}

impl From<&BleSettings> for SessionConfig {
    fn from(settings: &BleSettings) -> Self {
        Self {
            service_uuid: settings.service_uuid,
            telemetry_char_uuid: settings.telemetry_char_uuid,
        }
    }
}

pub struct BleSessionManager<A: BleAdapter> {
    adapter: Arc<A>,
    permissions: Arc<dyn PermissionGate>,
    config: SessionConfig,
    scanner: BleScanner,
    state: Arc<watch::Sender<ConnectionState>>,
    telemetry: Arc<watch::Sender<TelemetryReading>>,
    stream_task: Option<JoinHandle<()>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<A: BleAdapter> BleSessionManager<A> {
    pub fn new(
        adapter: Arc<A>,
        permissions: Arc<dyn PermissionGate>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (telemetry, _) = watch::channel(TelemetryReading::NoValue);
        Self {
            adapter,
            permissions,
            config,
            scanner: BleScanner::new(event_sender.clone()),
            state: Arc::new(state),
            telemetry: Arc::new(telemetry),
            stream_task: None,
            event_sender,
        }
    }

    pub async fn request_permissions(&self) -> bool {
        self.permissions.request_permissions().await
    }

    /// Start an unfiltered discovery scan. Returns whether scanning started.
    pub async fn scan_for_peripherals(&mut self) -> bool {
        if !self.request_permissions().await {
            warn!("Scan aborted: radio permissions not granted");
            self.send_log("Bluetooth permissions denied", MessageSeverity::Warning);
            return false;
        }

        if self.scanner.is_scanning() {
            self.stop_scan().await;
        }

        match self.adapter.start_scan().await {
            Ok(advertisements) => {
                info!("Starting BLE scan (no service filter)");
                self.send_log("Scanning for sensors...", MessageSeverity::Info);
                self.scanner.start(advertisements);
                true
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.send_log(format!("Failed to start scan: {}", e), MessageSeverity::Error);
                false
            }
        }
    }

    pub async fn stop_scan(&mut self) {
        if self.scanner.stop() {
            if let Err(e) = self.adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
            self.send_log("Scan stopped.", MessageSeverity::Info);
        }
    }

    /// Connect, discover, and subscribe to telemetry. Failures leave the
    /// session `Disconnected`; the caller may simply retry.
    pub async fn connect_to_device(&mut self, device: PeripheralDescriptor) -> bool {
        if *self.state.borrow() != ConnectionState::Disconnected {
            warn!(
                "Ignoring connect to {}: a session is already active",
                device.id
            );
            self.send_log(
                "Disconnect the current sensor first",
                MessageSeverity::Warning,
            );
            return false;
        }

        info!("Connecting to {} ({})", device.name, device.id);
        self.set_state(ConnectionState::Connecting);
        self.send_log(format!("Connecting to {}...", device.name), MessageSeverity::Info);

        match self.establish(&device).await {
            Ok(events) => {
                self.stop_scan().await;
                self.set_state(ConnectionState::Connected(device.clone()));
                self.spawn_stream(device, events);
                self.send_log("Connection established!", MessageSeverity::Success);
                true
            }
            Err(e) => {
                error!("Connection to {} failed: {}", device.id, e);
                if let Err(e) = self.adapter.disconnect(&device.id).await {
                    debug!("Cleanup after failed connect: {}", e);
                }
                self.set_state(ConnectionState::Disconnected);
                self.send_log(format!("Connection failed: {}", e), MessageSeverity::Error);
                false
            }
        }
    }

    /// Connect to a device from the discovered list by id.
    pub async fn connect_to_device_id(&mut self, id: &str) -> bool {
        let device = self.scanner.devices().into_iter().find(|d| d.id == id);
        match device {
            Some(device) => self.connect_to_device(device).await,
            None => {
                warn!("Unknown peripheral id: {}", id);
                self.send_log(format!("Unknown device: {}", id), MessageSeverity::Warning);
                false
            }
        }
    }

    async fn establish(
        &self,
        device: &PeripheralDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, BleError> {
        self.adapter.connect(&device.id).await?;
        debug!("Link established, discovering services");
        self.adapter.discover_services(&device.id).await?;
        self.adapter
            .subscribe(
                &device.id,
                self.config.service_uuid,
                self.config.telemetry_char_uuid,
            )
            .await
    }

    fn spawn_stream(
        &mut self,
        device: PeripheralDescriptor,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.stream_task = Some(tokio::spawn(run_subscription(
            self.adapter.clone(),
            device,
            events,
            self.state.clone(),
            self.telemetry.clone(),
            self.event_sender.clone(),
        )));
    }

    /// Tear down the link. No-op when nothing is connected.
    pub async fn disconnect_from_device(&mut self) {
        let device = match self.state.borrow().peripheral() {
            Some(device) => device.clone(),
            None => {
                debug!("Disconnect requested with no active session");
                return;
            }
        };

        self.set_state(ConnectionState::Disconnecting);
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        if let Err(e) = self.adapter.disconnect(&device.id).await {
            warn!("Error while disconnecting {}: {}", device.id, e);
        }

        clear_reading(&self.telemetry, &self.event_sender);
        self.set_state(ConnectionState::Disconnected);

        info!("Disconnected from device");
        self.send_log("Disconnected from device", MessageSeverity::Info);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn connected_device(&self) -> Option<PeripheralDescriptor> {
        self.state.borrow().peripheral().cloned()
    }

    pub fn telemetry(&self) -> TelemetryReading {
        *self.telemetry.borrow()
    }

    pub fn discovered_devices(&self) -> Vec<PeripheralDescriptor> {
        self.scanner.devices()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn watch_telemetry(&self) -> watch::Receiver<TelemetryReading> {
        self.telemetry.subscribe()
    }

    pub fn watch_devices(&self) -> watch::Receiver<Vec<PeripheralDescriptor>> {
        self.scanner.watch_devices()
    }

    fn set_state(&self, state: ConnectionState) {
        set_state(&self.state, &self.event_sender, state);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        send_log(&self.event_sender, message, severity);
    }
}

impl<A: BleAdapter> Drop for BleSessionManager<A> {
    fn drop(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }
}

/// Apply notifications in arrival order until the link drops.
async fn run_subscription<A: BleAdapter>(
    adapter: Arc<A>,
    device: PeripheralDescriptor,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    telemetry: Arc<watch::Sender<TelemetryReading>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
) {
    let is_current = |state: &ConnectionState| {
        state.peripheral().map(|d| d.id == device.id).unwrap_or(false)
    };

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Notification(Err(e)) => {
                warn!("Telemetry notification error: {}", e);
            }
            LinkEvent::Notification(Ok(payload)) => {
                let value = match codec::decode(&payload) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Dropping notification: {}", e);
                        continue;
                    }
                };
                if !is_current(&state.borrow()) {
                    continue;
                }
                let reading = TelemetryReading::Value(value);
                telemetry.send_replace(reading);
                let _ = event_sender.send(AppEvent::Telemetry(reading));
            }
            LinkEvent::LinkLost => break,
        }
    }

    // The link ended on its own; a requested disconnect aborts this task first.
    let still_connected = is_current(&state.borrow());
    if still_connected {
        warn!("Link to {} lost", device.id);
        // Release the adapter's link so the platform stops holding it open
        if let Err(e) = adapter.disconnect(&device.id).await {
            debug!("Releasing lost link to {}: {}", device.id, e);
        }
        clear_reading(&telemetry, &event_sender);
        set_state(&state, &event_sender, ConnectionState::Disconnected);
        send_log(
            &event_sender,
            format!("Connection to {} lost", device.name),
            MessageSeverity::Warning,
        );
    }
}

fn set_state(
    state: &watch::Sender<ConnectionState>,
    event_sender: &mpsc::UnboundedSender<AppEvent>,
    new_state: ConnectionState,
) {
    state.send_replace(new_state.clone());
    let _ = event_sender.send(AppEvent::ConnectionState(new_state));
}

fn clear_reading(
    telemetry: &watch::Sender<TelemetryReading>,
    event_sender: &mpsc::UnboundedSender<AppEvent>,
) {
    telemetry.send_replace(TelemetryReading::NoValue);
    let _ = event_sender.send(AppEvent::Telemetry(TelemetryReading::NoValue));
}

fn send_log(
    event_sender: &mpsc::UnboundedSender<AppEvent>,
    message: impl Into<String>,
    severity: MessageSeverity,
) {
    let _ = event_sender.send(AppEvent::LogMessage(StatusMessage {
        message: message.into(),
        severity,
    }));
}

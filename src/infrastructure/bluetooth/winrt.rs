//! WinRT Bluetooth backend
//!
//! Implements [`BleAdapter`] on top of `Windows.Devices.Bluetooth`.
//! Peripheral ids are 48-bit addresses rendered by
//! [`protocol::address_to_id`].

use crate::infrastructure::bluetooth::adapter::{Advertisement, BleAdapter, BleError, LinkEvent};
use crate::infrastructure::bluetooth::protocol;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_RETRY_DELAY_MS: u64 = 500;

impl From<windows::core::Error> for BleError {
    fn from(e: windows::core::Error) -> Self {
        BleError::Platform(e.to_string())
    }
}

/// Everything held open for the connected peripheral
struct Link {
    id: String,
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    services: Vec<GattDeviceService>,
    characteristic: Option<GattCharacteristic>,
    value_token: Option<i64>,
    status_token: Option<i64>,
}

impl Link {
    fn close(self) {
        if let Some(characteristic) = &self.characteristic {
            if let Some(token) = self.value_token {
                let _ = characteristic.RemoveValueChanged(token);
            }
        }
        if let Some(token) = self.status_token {
            let _ = self.device.RemoveConnectionStatusChanged(token);
        }
        for service in &self.services {
            let _ = service.Close();
        }
        if let Some(session) = &self.session {
            let _ = session.Close();
        }
        let _ = self.device.Close();
    }
}

#[derive(Default)]
pub struct WinRtAdapter {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    link: Mutex<Option<Link>>,
}

impl WinRtAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_link<T>(
        &self,
        peripheral_id: &str,
        f: impl FnOnce(&mut Link) -> Result<T, BleError>,
    ) -> Result<T, BleError> {
        let mut guard = self
            .link
            .lock()
            .map_err(|_| BleError::Platform("link lock poisoned".into()))?;
        match guard.as_mut() {
            Some(link) if link.id == peripheral_id => f(link),
            _ => Err(BleError::NotConnected),
        }
    }

    async fn enable_notifications(characteristic: &GattCharacteristic) -> Result<(), BleError> {
        for attempt in 1..=NOTIFY_ATTEMPTS {
            let result = characteristic
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::Notify,
                )?
                .await;

            match result {
                Ok(GattCommunicationStatus::Success) => {
                    info!("Notifications enabled");
                    return Ok(());
                }
                Ok(status) => {
                    warn!("Notification subscription returned status: {:?}", status);
                }
                Err(e) => {
                    warn!("Notification subscription attempt {} failed: {}", attempt, e);
                }
            }

            if attempt < NOTIFY_ATTEMPTS {
                tokio::time::sleep(tokio::time::Duration::from_millis(NOTIFY_RETRY_DELAY_MS))
                    .await;
            }
        }

        error!("Failed to enable notifications after {} attempts", NOTIFY_ATTEMPTS);
        Err(BleError::Gatt("failed to enable notifications".into()))
    }
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

#[async_trait]
impl BleAdapter for WinRtAdapter {
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, BleError> {
        self.stop_scan().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let advertisement = Advertisement {
                        id: protocol::address_to_id(args.BluetoothAddress()?),
                        name: (!name.is_empty()).then_some(name),
                        signal_strength: args.RawSignalStrengthInDBm().ok(),
                    };
                    let _ = tx.send(advertisement);
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;

        if let Ok(mut guard) = self.watcher.lock() {
            *guard = Some(watcher);
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        let watcher = self.watcher.lock().ok().and_then(|mut guard| guard.take());
        if let Some(watcher) = watcher {
            info!("Stopping advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<(), BleError> {
        let address = protocol::id_to_address(peripheral_id)
            .ok_or_else(|| BleError::PeripheralNotFound(peripheral_id.to_string()))?;

        info!("Connecting to Bluetooth device: {:#X}", address);
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?
            .await
            .map_err(|_| BleError::PeripheralNotFound(peripheral_id.to_string()))?;

        // A GattSession with MaintainConnection keeps Windows from dropping the link
        let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
            Ok(session) => {
                session.SetMaintainConnection(true)?;
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        let previous = self
            .link
            .lock()
            .map_err(|_| BleError::Platform("link lock poisoned".into()))?
            .replace(Link {
                id: peripheral_id.to_string(),
                device,
                session,
                services: Vec::new(),
                characteristic: None,
                value_token: None,
                status_token: None,
            });
        if let Some(previous) = previous {
            previous.close();
        }
        Ok(())
    }

    async fn discover_services(&self, peripheral_id: &str) -> Result<(), BleError> {
        let device = self.with_link(peripheral_id, |link| Ok(link.device.clone()))?;

        let result = device.GetGattServicesAsync()?.await?;
        if result.Status()? != GattCommunicationStatus::Success {
            error!("Failed to get GATT services: {:?}", result.Status()?);
            return Err(BleError::Gatt("service discovery failed".into()));
        }

        let services = result.Services()?;
        let mut discovered = Vec::new();
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            debug!("Found service {:?}", service.Uuid()?);
            discovered.push(service);
        }
        info!("Discovered {} services", discovered.len());

        self.with_link(peripheral_id, |link| {
            link.services = discovered;
            Ok(())
        })
    }

    async fn subscribe(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, BleError> {
        let service_guid = protocol::to_guid(service);
        let char_guid = protocol::to_guid(characteristic);

        let (device, gatt_service) = self.with_link(peripheral_id, |link| {
            let found = link
                .services
                .iter()
                .find(|s| s.Uuid().map(|u| u == service_guid).unwrap_or(false))
                .cloned()
                .ok_or(BleError::ServiceNotFound(service))?;
            Ok((link.device.clone(), found))
        })?;

        let access_status = gatt_service.RequestAccessAsync()?.await?;
        debug!("Service access status: {:?}", access_status);

        let chars_result = gatt_service.GetCharacteristicsAsync()?.await?;
        if chars_result.Status()? != GattCommunicationStatus::Success {
            return Err(BleError::Gatt("characteristic discovery failed".into()));
        }

        let characteristics = chars_result.Characteristics()?;
        let mut telemetry_char = None;
        for i in 0..characteristics.Size()? {
            let c = characteristics.GetAt(i)?;
            if c.Uuid()? == char_guid {
                telemetry_char = Some(c);
                break;
            }
        }
        let telemetry_char = telemetry_char.ok_or(BleError::CharacteristicNotFound(characteristic))?;

        Self::enable_notifications(&telemetry_char).await?;

        let (tx, rx) = mpsc::unbounded_channel();

        let sender = tx.clone();
        let value_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let payload = args
                        .CharacteristicValue()
                        .and_then(|value| read_buffer(&value))
                        .map_err(BleError::from);
                    let _ = sender.send(LinkEvent::Notification(payload));
                }
                Ok(())
            },
        );
        let value_token = telemetry_char.ValueChanged(&value_handler)?;

        let sender = tx;
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sender.send(LinkEvent::LinkLost);
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        self.with_link(peripheral_id, |link| {
            link.characteristic = Some(telemetry_char);
            link.value_token = Some(value_token);
            link.status_token = Some(status_token);
            Ok(())
        })?;

        Ok(rx)
    }

    async fn disconnect(&self, peripheral_id: &str) -> Result<(), BleError> {
        let link = {
            let mut guard = self
                .link
                .lock()
                .map_err(|_| BleError::Platform("link lock poisoned".into()))?;
            match guard.as_ref() {
                Some(link) if link.id == peripheral_id => guard.take(),
                _ => None,
            }
        };

        match link {
            Some(link) => {
                link.close();
                info!("Closed link to {}", peripheral_id);
                Ok(())
            }
            None => Err(BleError::NotConnected),
        }
    }
}

impl Drop for WinRtAdapter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.watcher.lock() {
            if let Some(watcher) = guard.take() {
                let _ = watcher.Stop();
            }
        }
        if let Ok(mut guard) = self.link.lock() {
            if let Some(link) = guard.take() {
                link.close();
            }
        }
    }
}

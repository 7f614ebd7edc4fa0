//! BLE Scanner Module
//!
//! Accumulates discovered peripherals while a scan is active.

use crate::domain::models::{AppEvent, PeripheralDescriptor};
use crate::infrastructure::bluetooth::adapter::Advertisement;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Turn an advertisement into a selectable descriptor, unless it is nameless
/// or its id is already listed.
pub fn admit_advertisement(
    known: &[PeripheralDescriptor],
    advertisement: Advertisement,
) -> Option<PeripheralDescriptor> {
    let name = advertisement.name.map(|n| n.trim().to_string())?;
    if name.is_empty() {
        return None;
    }
    if known.iter().any(|d| d.id == advertisement.id) {
        return None;
    }
    Some(PeripheralDescriptor {
        id: advertisement.id,
        name,
        signal_strength: advertisement.signal_strength,
    })
}

pub struct BleScanner {
    task: Option<JoinHandle<()>>,
    devices: Arc<watch::Sender<Vec<PeripheralDescriptor>>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BleScanner {
    pub fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        let (devices, _) = watch::channel(Vec::new());
        Self {
            task: None,
            devices: Arc::new(devices),
            event_sender,
        }
    }

    /// Consume advertisements until stopped. Starts a fresh scan session:
    /// the previous device list is cleared.
    pub fn start(&mut self, mut advertisements: mpsc::UnboundedReceiver<Advertisement>) {
        self.stop();
        self.devices.send_replace(Vec::new());

        let devices = self.devices.clone();
        let sender = self.event_sender.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(advertisement) = advertisements.recv().await {
                let mut found = None;
                devices.send_if_modified(|list| {
                    match admit_advertisement(list, advertisement) {
                        Some(device) => {
                            list.push(device.clone());
                            found = Some(device);
                            true
                        }
                        None => false,
                    }
                });

                if let Some(device) = found {
                    debug!("Discovered {} ({})", device.name, device.id);
                    let _ = sender.send(AppEvent::DeviceFound(device));
                }
            }
            debug!("Advertisement stream closed");
        }));
    }

    /// Stop accumulating. Returns whether a scan was active.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                info!("Stopping BLE scan...");
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn devices(&self) -> Vec<PeripheralDescriptor> {
        self.devices.borrow().clone()
    }

    pub fn watch_devices(&self) -> watch::Receiver<Vec<PeripheralDescriptor>> {
        self.devices.subscribe()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(id: &str, name: Option<&str>) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: name.map(str::to_string),
            signal_strength: Some(-60),
        }
    }

    #[test]
    fn test_admit_requires_name() {
        assert!(admit_advertisement(&[], adv("A", None)).is_none());
        assert!(admit_advertisement(&[], adv("A", Some(""))).is_none());
        assert!(admit_advertisement(&[], adv("A", Some("   "))).is_none());
        assert_eq!(
            admit_advertisement(&[], adv("A", Some("Sensor"))).map(|d| d.name),
            Some("Sensor".to_string())
        );
    }

    #[test]
    fn test_admit_dedups_by_id() {
        let known = vec![admit_advertisement(&[], adv("A", Some("Sensor"))).unwrap()];
        assert!(admit_advertisement(&known, adv("A", Some("Renamed"))).is_none());
        assert!(admit_advertisement(&known, adv("B", Some("Sensor"))).is_some());
    }

    #[tokio::test]
    async fn test_scanner_accumulates_unique_named_devices() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut scanner = BleScanner::new(event_tx);
        let (adv_tx, adv_rx) = mpsc::unbounded_channel();
        let mut watch = scanner.watch_devices();

        scanner.start(adv_rx);
        assert!(scanner.is_scanning());

        adv_tx.send(adv("A", Some("Sensor A"))).unwrap();
        adv_tx.send(adv("A", Some("Sensor A"))).unwrap();
        adv_tx.send(adv("B", None)).unwrap();
        adv_tx.send(adv("C", Some("Sensor C"))).unwrap();
        drop(adv_tx);

        while watch.borrow_and_update().len() < 2 {
            watch.changed().await.unwrap();
        }

        let ids: Vec<_> = scanner.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["A", "C"]);

        let mut found = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let AppEvent::DeviceFound(d) = event {
                found.push(d.id);
            }
        }
        assert_eq!(found, vec!["A", "C"]);

        assert!(scanner.stop());
        assert!(!scanner.stop());
    }
}

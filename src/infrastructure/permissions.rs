//! Permission Gate
//!
//! Radio and location permissions the host must grant before scanning.
//! Desktop hosts have no runtime prompts; Android hosts do, and the set
//! requested depends on the platform API level.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, warn};

/// API level at which the split scan/connect permissions were introduced
pub const SPLIT_PERMISSIONS_API_LEVEL: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    FineLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    NeverAskAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// No runtime permission prompts
    Desktop,
    Android { api_level: u32 },
}

impl HostPlatform {
    /// Permissions that must all be granted on this platform.
    pub fn required_permissions(&self) -> &'static [Permission] {
        match self {
            Self::Desktop => &[],
            Self::Android { api_level } if *api_level < SPLIT_PERMISSIONS_API_LEVEL => {
                &[Permission::FineLocation]
            }
            Self::Android { .. } => &[
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::FineLocation,
            ],
        }
    }
}

/// Performs the actual host prompt.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, PermissionStatus>;
}

/// Gate consulted by the session manager before every scan.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_permissions(&self) -> bool;
}

pub struct HostPermissionGate<P> {
    platform: HostPlatform,
    prompter: P,
}

impl<P: PermissionPrompter> HostPermissionGate<P> {
    pub fn new(platform: HostPlatform, prompter: P) -> Self {
        Self { platform, prompter }
    }
}

#[async_trait]
impl<P: PermissionPrompter> PermissionGate for HostPermissionGate<P> {
    async fn request_permissions(&self) -> bool {
        let required = self.platform.required_permissions();
        if required.is_empty() {
            return true;
        }

        let results = self.prompter.request(required).await;

        // Partial grants are a denial
        let denied: Vec<_> = required
            .iter()
            .filter(|p| results.get(*p) != Some(&PermissionStatus::Granted))
            .collect();

        if denied.is_empty() {
            info!("Radio permissions granted");
            true
        } else {
            warn!("Radio permissions denied: {:?}", denied);
            false
        }
    }
}

/// Gate for hosts without runtime permission prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopPermissionGate;

#[async_trait]
impl PermissionGate for DesktopPermissionGate {
    async fn request_permissions(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct ScriptedPrompter {
        answers: HashMap<Permission, PermissionStatus>,
        asked: Arc<Mutex<Vec<Vec<Permission>>>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[(Permission, PermissionStatus)]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                asked: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PermissionPrompter for ScriptedPrompter {
        async fn request(
            &self,
            permissions: &[Permission],
        ) -> HashMap<Permission, PermissionStatus> {
            self.asked.lock().unwrap().push(permissions.to_vec());
            permissions
                .iter()
                .filter_map(|p| self.answers.get(p).map(|s| (*p, *s)))
                .collect()
        }
    }

    use Permission::*;
    use PermissionStatus::*;

    #[tokio::test]
    async fn test_desktop_always_granted_without_prompt() {
        let prompter = ScriptedPrompter::new(&[]);
        let asked = prompter.asked.clone();
        let gate = HostPermissionGate::new(HostPlatform::Desktop, prompter);

        assert!(gate.request_permissions().await);
        assert!(asked.lock().unwrap().is_empty());
        assert!(DesktopPermissionGate.request_permissions().await);
    }

    #[tokio::test]
    async fn test_legacy_android_asks_for_location_only() {
        let prompter = ScriptedPrompter::new(&[(FineLocation, Granted)]);
        let asked = prompter.asked.clone();
        let gate = HostPermissionGate::new(HostPlatform::Android { api_level: 30 }, prompter);

        assert!(gate.request_permissions().await);
        assert_eq!(*asked.lock().unwrap(), vec![vec![FineLocation]]);
    }

    #[tokio::test]
    async fn test_modern_android_requires_all_three() {
        let prompter = ScriptedPrompter::new(&[
            (BluetoothScan, Granted),
            (BluetoothConnect, Granted),
            (FineLocation, Granted),
        ]);
        let asked = prompter.asked.clone();
        let gate = HostPermissionGate::new(HostPlatform::Android { api_level: 31 }, prompter);

        assert!(gate.request_permissions().await);
        assert_eq!(asked.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_partial_grant_is_denial() {
        let gate = HostPermissionGate::new(
            HostPlatform::Android { api_level: 33 },
            ScriptedPrompter::new(&[
                (BluetoothScan, Granted),
                (BluetoothConnect, NeverAskAgain),
                (FineLocation, Granted),
            ]),
        );
        assert!(!gate.request_permissions().await);

        // Missing answers count as denial too
        let gate = HostPermissionGate::new(
            HostPlatform::Android { api_level: 33 },
            ScriptedPrompter::new(&[(BluetoothScan, Granted)]),
        );
        assert!(!gate.request_permissions().await);
    }

    #[tokio::test]
    async fn test_legacy_denial() {
        let gate = HostPermissionGate::new(
            HostPlatform::Android { api_level: 29 },
            ScriptedPrompter::new(&[(FineLocation, Denied)]),
        );
        assert!(!gate.request_permissions().await);
    }
}

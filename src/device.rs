//! Device posture probing (spec.md §4.3 device conditions, §6.1 MDM token).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Snapshot of a caller device's compliance posture, as reported by the MDM
/// provider. `None` fields in a policy's `device` clause are not checked;
/// this struct itself always carries concrete booleans once a probe
/// succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePosture {
    pub mdm_enrolled: bool,
    pub disk_encrypted: bool,
    pub mdm_compliant: bool,
}

/// Narrow capability for retrieving the posture of the device a request is
/// originating from. Implementations talk to the MDM provider's API using
/// the secret-store-cached token (spec.md §6.1); this repository only
/// defines the boundary.
#[async_trait]
pub trait DevicePostureProvider: Send + Sync {
    async fn probe(&self, device_id: &str) -> anyhow::Result<Option<DevicePosture>>;
}

/// A posture provider that always reports "no signal", used when a
/// deployment has no MDM integration configured. Any policy rule with a
/// `device` clause will then deliberately fail to match (spec.md §4.3).
#[derive(Debug, Default)]
pub struct NoDeviceSignal;

#[async_trait]
impl DevicePostureProvider for NoDeviceSignal {
    async fn probe(&self, _device_id: &str) -> anyhow::Result<Option<DevicePosture>> {
        Ok(None)
    }
}

/// A fixed-response provider for tests.
#[derive(Debug, Clone)]
pub struct StaticDeviceSignal(pub Option<DevicePosture>);

#[async_trait]
impl DevicePostureProvider for StaticDeviceSignal {
    async fn probe(&self, _device_id: &str) -> anyhow::Result<Option<DevicePosture>> {
        Ok(self.0)
    }
}

//! Sync context - explicit identity for one engine instance
//!
//! Passed into the orchestrator instead of living in ambient globals, so a
//! test can run several simulated devices side by side in one process.

use crate::models::{Device, DeviceId};

/// Identity of the syncing installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    /// This installation's device id
    pub device_id: DeviceId,
    /// The signed-in user
    pub user_id: String,
}

impl SyncContext {
    /// Create a context from explicit identifiers
    #[must_use]
    pub fn new(device_id: DeviceId, user_id: impl Into<String>) -> Self {
        Self {
            device_id,
            user_id: user_id.into(),
        }
    }
}

impl From<&Device> for SyncContext {
    fn from(device: &Device) -> Self {
        Self::new(device.id.clone(), device.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_device() {
        let device = Device::new_local("user-1", None);
        let context = SyncContext::from(&device);
        assert_eq!(context.device_id, device.id);
        assert_eq!(context.user_id, "user-1");
    }
}

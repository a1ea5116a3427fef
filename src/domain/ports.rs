//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use crate::topology::StorageSize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Device Capacity Record
// =============================================================================

/// Capacity of a freshly provisioned device, as reported by the volume group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapacity {
    /// Free space in KiB
    pub size: u64,
    /// Physical extent size in KiB
    pub extent_size: u64,
}

impl DeviceCapacity {
    /// Storage accounting for a group nothing has been carved from yet
    pub fn storage(&self) -> StorageSize {
        StorageSize::new(self.size)
    }
}

// =============================================================================
// Remote Command Runner Port
// =============================================================================

/// Port for executing shell commands on a remote host
#[async_trait]
pub trait RemoteCommandRunner: Send + Sync {
    /// Run `commands` in order on `host`.
    ///
    /// Returns one output entry per command that produced output, in command
    /// order. The first failing command fails the whole batch, and so does
    /// exceeding `timeout`.
    async fn run(&self, host: &str, commands: &[String], timeout: Duration) -> Result<Vec<String>>;
}

// =============================================================================
// Device Executor Port
// =============================================================================

/// Port for the device lifecycle on a storage node
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Turn a raw block device into a volume group named after `group_id`
    async fn device_setup(&self, host: &str, device: &str, group_id: &str) -> Result<DeviceCapacity>;

    /// Remove the volume group and the physical volume label
    async fn device_teardown(&self, host: &str, device: &str, group_id: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RemoteCommandRunnerRef = Arc<dyn RemoteCommandRunner>;
pub type DeviceExecutorRef = Arc<dyn DeviceExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_device_storage() {
        let capacity = DeviceCapacity {
            size: 2_097_135_616,
            extent_size: 4096,
        };
        let storage = capacity.storage();
        assert_eq!(storage.total, 2_097_135_616);
        assert_eq!(storage.free, 2_097_135_616);
        assert_eq!(storage.used, 0);
    }
}

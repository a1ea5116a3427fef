//! Device Provisioner
//!
//! Runs the LVM side of the device lifecycle on a storage node:
//!
//! - Setup: `pvcreate` then `vgcreate`, then read the group's capacity back
//!   with `vgdisplay -c`. If the capacity query fails the new group is torn
//!   down before the error is returned, so a failed Setup leaves nothing
//!   behind.
//! - Teardown: `vgremove` then `pvremove`. Failures are logged and swallowed
//!   under [`TeardownPolicy::BestEffort`], returned under
//!   [`TeardownPolicy::Strict`].
//!
//! Read:
//! https://access.redhat.com/documentation/en-US/Red_Hat_Storage/3.1/html/Administration_Guide/Brick_Configuration.html

use super::report::VgCapacity;
use crate::config::{ProvisionerConfig, TeardownPolicy};
use crate::domain::ports::{DeviceCapacity, DeviceExecutor, RemoteCommandRunnerRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

// =============================================================================
// Device Provisioner
// =============================================================================

/// Provisions and tears down volume groups on remote storage nodes
pub struct DeviceProvisioner {
    runner: RemoteCommandRunnerRef,
    config: ProvisionerConfig,
}

impl DeviceProvisioner {
    /// Create a provisioner issuing commands through `runner`
    pub fn new(runner: RemoteCommandRunnerRef, config: ProvisionerConfig) -> Self {
        Self { runner, config }
    }

    /// Name of the volume group backing `group_id`
    pub fn vg_name(&self, group_id: &str) -> String {
        format!("{}{}", self.config.vg_prefix, group_id)
    }

    /// Initialize `device` and create its volume group, returning its capacity
    pub async fn setup(&self, host: &str, device: &str, group_id: &str) -> Result<DeviceCapacity> {
        let vg = self.vg_name(group_id);
        info!(host, device, vg = %vg, "Setting up device");

        let commands = vec![
            self.command(&format!(
                "pvcreate --dataalignment {} {}",
                self.config.data_alignment, device
            )),
            self.command(&format!("vgcreate {} {}", vg, device)),
        ];

        // Nothing group-level exists yet if this fails
        self.runner
            .run(host, &commands, self.config.command_timeout())
            .await?;

        match self.query_capacity(host, &vg).await {
            Ok(capacity) => {
                debug!(host, device, vg = %vg, size_kb = capacity.size, "Volume group capacity");
                Ok(capacity)
            }
            Err(err) => {
                warn!(host, device, vg = %vg, error = %err, "Capacity query failed, removing volume group");
                if let Err(cleanup) = self.remove(host, device, &vg).await {
                    error!(
                        host,
                        device,
                        vg = %vg,
                        error = %cleanup,
                        original = %err,
                        "Compensating teardown failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Remove the volume group and the physical volume label from `device`
    pub async fn teardown(&self, host: &str, device: &str, group_id: &str) -> Result<()> {
        let vg = self.vg_name(group_id);
        info!(host, device, vg = %vg, "Tearing down device");

        match self.remove(host, device, &vg).await {
            Ok(()) => Ok(()),
            Err(err) => match self.config.teardown_policy {
                TeardownPolicy::BestEffort => {
                    warn!(
                        host,
                        device,
                        group_id,
                        error = %err,
                        "Error while deleting device, continuing"
                    );
                    Ok(())
                }
                TeardownPolicy::Strict => Err(Error::Teardown {
                    host: host.to_string(),
                    device: device.to_string(),
                    reason: err.to_string(),
                }),
            },
        }
    }

    async fn remove(&self, host: &str, device: &str, vg: &str) -> Result<()> {
        let commands = vec![
            self.command(&format!("vgremove {}", vg)),
            self.command(&format!("pvremove {}", device)),
        ];
        self.runner
            .run(host, &commands, self.config.command_timeout())
            .await
            .map(|_| ())
    }

    async fn query_capacity(&self, host: &str, vg: &str) -> Result<DeviceCapacity> {
        let commands = vec![self.command(&format!("vgdisplay -c {}", vg))];
        let output = self
            .runner
            .run(host, &commands, self.config.command_timeout())
            .await?;

        let line = output.first().ok_or(Error::MalformedReport {
            fields: 0,
            expected: super::report::VGDISPLAY_MIN_FIELDS,
        })?;

        let report = VgCapacity::parse(line)?;
        Ok(DeviceCapacity {
            size: report.free_kb()?,
            extent_size: report.extent_size,
        })
    }

    fn command(&self, cmd: &str) -> String {
        if self.config.use_sudo {
            format!("sudo {}", cmd)
        } else {
            cmd.to_string()
        }
    }
}

#[async_trait]
impl DeviceExecutor for DeviceProvisioner {
    async fn device_setup(&self, host: &str, device: &str, group_id: &str) -> Result<DeviceCapacity> {
        self.setup(host, device, group_id).await
    }

    async fn device_teardown(&self, host: &str, device: &str, group_id: &str) -> Result<()> {
        self.teardown(host, device, group_id).await
    }
}

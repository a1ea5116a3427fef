//! Human-readable volume summary

use super::durability::Durability;
use super::types::{VolumeInfoResponse, KB_PER_GB};
use std::fmt;

impl fmt::Display for VolumeInfoResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.info;
        let mount = &info.mount.glusterfs;

        writeln!(f, "Name: {}", info.request.name)?;
        writeln!(f, "Size: {}", info.request.size)?;
        writeln!(f, "Id: {}", info.id)?;
        writeln!(f, "Cluster Id: {}", info.cluster)?;
        writeln!(f, "Mount: {}", mount.mount_point)?;
        writeln!(
            f,
            "Mount Options: backupvolfile-servers={}",
            mount
                .options
                .get("backupvolfile-servers")
                .map(String::as_str)
                .unwrap_or("")
        )?;
        writeln!(f, "Durability Type: {}", info.request.durability.label())?;

        match &info.request.durability {
            Durability::Disperse { disperse } => {
                writeln!(f, "Disperse Data: {}", disperse.data)?;
                writeln!(f, "Disperse Redundancy: {}", disperse.redundancy)?;
            }
            Durability::Replicate { replicate } => {
                writeln!(f, "Replica: {}", replicate.replica)?;
            }
        }

        if info.request.snapshot.enable {
            writeln!(f, "Snapshot: Enabled")?;
            writeln!(f, "Snapshot Factor: {:.2}", info.request.snapshot.factor)?;
        } else {
            writeln!(f, "Snapshot: Disabled")?;
        }

        write!(f, "\nBricks:\n")?;
        for brick in &self.bricks {
            writeln!(f, "Id: {}", brick.id)?;
            writeln!(f, "Path: {}", brick.path)?;
            writeln!(f, "Size (GiB): {}", brick.size / KB_PER_GB)?;
            writeln!(f, "Node: {}", brick.node_id)?;
            write!(f, "Device: {}\n\n", brick.device_id)?;
        }

        Ok(())
    }
}

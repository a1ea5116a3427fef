//! Topology Events
//!
//! Events emitted by the topology model for external consumers to react to
//! entity lifecycle and capacity changes.

use serde::{Deserialize, Serialize};

/// Events emitted by the topology model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyEvent {
    ClusterCreated { cluster_id: String },

    ClusterDeleted { cluster_id: String },

    NodeAdded {
        cluster_id: String,
        node_id: String,
        hostname: String,
    },

    NodeRemoved { cluster_id: String, node_id: String },

    /// A provisioned device was registered under a node
    DeviceAttached {
        node_id: String,
        device_id: String,
        size_kb: u64,
    },

    DeviceDetached { node_id: String, device_id: String },

    VolumeCreated {
        cluster_id: String,
        volume_id: String,
        size_gb: u64,
    },

    VolumeExpanded { volume_id: String, size_gb: u64 },

    VolumeDeleted { cluster_id: String, volume_id: String },

    /// Capacity moved from free to used on a device
    BrickPlaced {
        volume_id: String,
        device_id: String,
        brick_id: String,
        size_kb: u64,
    },

    /// Capacity moved from used back to free on a device
    BrickReleased {
        volume_id: String,
        device_id: String,
        brick_id: String,
        size_kb: u64,
    },
}

impl TopologyEvent {
    /// Get the device ID if this event changed device capacity
    pub fn device_id(&self) -> Option<&str> {
        match self {
            TopologyEvent::DeviceAttached { device_id, .. }
            | TopologyEvent::DeviceDetached { device_id, .. }
            | TopologyEvent::BrickPlaced { device_id, .. }
            | TopologyEvent::BrickReleased { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// Get the volume ID if this is a volume or brick event
    pub fn volume_id(&self) -> Option<&str> {
        match self {
            TopologyEvent::VolumeCreated { volume_id, .. }
            | TopologyEvent::VolumeExpanded { volume_id, .. }
            | TopologyEvent::VolumeDeleted { volume_id, .. }
            | TopologyEvent::BrickPlaced { volume_id, .. }
            | TopologyEvent::BrickReleased { volume_id, .. } => Some(volume_id),
            _ => None,
        }
    }

    /// Check if this event changed capacity bookkeeping
    pub fn is_capacity_event(&self) -> bool {
        matches!(
            self,
            TopologyEvent::DeviceAttached { .. }
                | TopologyEvent::DeviceDetached { .. }
                | TopologyEvent::BrickPlaced { .. }
                | TopologyEvent::BrickReleased { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brick_event_ids() {
        let event = TopologyEvent::BrickPlaced {
            volume_id: "v1".to_string(),
            device_id: "d1".to_string(),
            brick_id: "b1".to_string(),
            size_kb: 1024,
        };
        assert_eq!(event.device_id(), Some("d1"));
        assert_eq!(event.volume_id(), Some("v1"));
        assert!(event.is_capacity_event());
    }

    #[test]
    fn test_cluster_event_has_no_device() {
        let event = TopologyEvent::ClusterCreated {
            cluster_id: "c1".to_string(),
        };
        assert_eq!(event.device_id(), None);
        assert_eq!(event.volume_id(), None);
        assert!(!event.is_capacity_event());
    }
}

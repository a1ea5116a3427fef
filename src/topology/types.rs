//! Topology Records
//!
//! Request and response shapes for clusters, nodes, devices, bricks and
//! volumes. Responses wrap the matching request (or the smaller record) as a
//! flattened field, so the JSON stays flat.
//!
//! Units: every [`StorageSize`] field and [`BrickInfo::size`] is in KiB,
//! volume sizes in create and expand requests are in GB.

use super::durability::Durability;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// KiB per GiB, used when rendering brick sizes
pub const KB_PER_GB: u64 = 1024 * 1024;

// =============================================================================
// Storage Size
// =============================================================================

/// Storage accounting in KiB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSize {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl StorageSize {
    /// All of `total` free
    pub fn new(total: u64) -> Self {
        Self {
            total,
            free: total,
            used: 0,
        }
    }

    /// Check `total == free + used`
    pub fn validate(&self, entity: &str) -> Result<()> {
        if self.free.checked_add(self.used) != Some(self.total) {
            return Err(Error::CapacityInvariant {
                entity: entity.to_string(),
                total: self.total,
                free: self.free,
                used: self.used,
            });
        }
        Ok(())
    }

    /// Move `kb` from free to used. Returns false and changes nothing when
    /// there is not enough free space.
    pub fn allocate(&mut self, kb: u64) -> bool {
        if kb > self.free {
            return false;
        }
        self.free -= kb;
        self.used += kb;
        true
    }

    /// Move `kb` from used back to free. Returns false and changes nothing
    /// when less than `kb` is in use.
    pub fn release(&mut self, kb: u64) -> bool {
        if kb > self.used {
            return false;
        }
        self.used -= kb;
        self.free += kb;
        true
    }

    /// Add another entity's figures to this aggregate
    pub fn accumulate(&mut self, other: &StorageSize) {
        self.total = self.total.saturating_add(other.total);
        self.free = self.free.saturating_add(other.free);
        self.used = self.used.saturating_add(other.used);
    }
}

// =============================================================================
// Bricks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickInfo {
    pub id: String,
    pub path: String,
    #[serde(rename = "device")]
    pub device_id: String,
    #[serde(rename = "node")]
    pub node_id: String,
    /// Size in KiB
    pub size: u64,
}

// =============================================================================
// Devices
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddRequest {
    #[serde(flatten)]
    pub device: Device,
    #[serde(rename = "node")]
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(flatten)]
    pub device: Device,
    pub storage: StorageSize,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfoResponse {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub bricks: Vec<BrickInfo>,
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddresses {
    pub manage: Vec<String>,
    pub storage: Vec<String>,
}

impl HostAddresses {
    /// Sort and de-duplicate both address lists
    pub fn normalize(&mut self) {
        self.manage.sort();
        self.manage.dedup();
        self.storage.sort();
        self.storage.dedup();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddRequest {
    pub zone: u32,
    pub hostnames: HostAddresses,
    #[serde(rename = "cluster")]
    pub cluster_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(flatten)]
    pub request: NodeAddRequest,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoResponse {
    #[serde(flatten)]
    pub info: NodeInfo,
    pub devices: Vec<DeviceInfoResponse>,
}

// =============================================================================
// Clusters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfoResponse {
    pub id: String,
    pub nodes: Vec<String>,
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterListResponse {
    pub clusters: Vec<String>,
}

// =============================================================================
// Volumes
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    pub enable: bool,
    pub factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    /// Size in GB
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub durability: Durability,
    #[serde(default)]
    pub snapshot: SnapshotPolicy,
}

impl VolumeCreateRequest {
    pub fn new(size: u64, durability: Durability) -> Self {
        Self {
            size,
            clusters: Vec::new(),
            name: String::new(),
            durability,
            snapshot: SnapshotPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidRequest("volume size must be greater than zero".into()));
        }
        if self.snapshot.enable && !(1.0..=100.0).contains(&self.snapshot.factor) {
            return Err(Error::InvalidRequest(format!(
                "snapshot factor must be between 1 and 100, got {}",
                self.snapshot.factor
            )));
        }
        self.durability.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlusterFsMount {
    #[serde(rename = "device")]
    pub mount_point: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub glusterfs: GlusterFsMount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(flatten)]
    pub request: VolumeCreateRequest,
    pub id: String,
    pub cluster: String,
    pub mount: VolumeMount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfoResponse {
    #[serde(flatten)]
    pub info: VolumeInfo,
    pub bricks: Vec<BrickInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeListResponse {
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeExpandRequest {
    /// Additional size in GB
    #[serde(rename = "expand_size")]
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_storage_size_round_trip() {
        let mut s = StorageSize::new(1000);
        assert!(s.allocate(400));
        assert_eq!(s, StorageSize { total: 1000, free: 600, used: 400 });
        assert!(s.validate("dev").is_ok());

        assert!(!s.allocate(601));
        assert_eq!(s.free, 600);

        assert!(s.release(400));
        assert_eq!(s, StorageSize::new(1000));
        assert!(!s.release(1));
    }

    #[test]
    fn test_storage_size_invariant() {
        let s = StorageSize { total: 10, free: 5, used: 4 };
        assert_matches!(
            s.validate("device abc"),
            Err(Error::CapacityInvariant { ref entity, total: 10, free: 5, used: 4 }) if entity == "device abc"
        );

        let overflow = StorageSize { total: 0, free: u64::MAX, used: 1 };
        assert!(overflow.validate("x").is_err());
    }

    #[test]
    fn test_device_response_is_flat() {
        let resp = DeviceInfoResponse {
            info: DeviceInfo {
                device: Device { name: "/dev/sdb".into(), weight: 100 },
                storage: StorageSize::new(2048),
                id: "d1".into(),
            },
            bricks: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "name": "/dev/sdb",
                "weight": 100,
                "storage": {"total": 2048, "free": 2048, "used": 0},
                "id": "d1",
                "bricks": []
            })
        );
    }

    #[test]
    fn test_volume_create_request_defaults() {
        let req: VolumeCreateRequest = serde_json::from_value(json!({"size": 100})).unwrap();
        assert_eq!(req.size, 100);
        assert!(req.clusters.is_empty());
        assert_eq!(req.durability, Durability::replicate(3));
        assert!(!req.snapshot.enable);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_volume_info_wire_shape() {
        let mut options = BTreeMap::new();
        options.insert("backupvolfile-servers".to_string(), "10.0.0.2".to_string());

        let info = VolumeInfo {
            request: VolumeCreateRequest {
                name: "vol_1".into(),
                ..VolumeCreateRequest::new(10, Durability::replicate(2))
            },
            id: "v1".into(),
            cluster: "c1".into(),
            mount: VolumeMount {
                glusterfs: GlusterFsMount {
                    mount_point: "10.0.0.1:vol_1".into(),
                    options,
                },
            },
        };

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["size"], 10);
        assert_eq!(value["id"], "v1");
        assert_eq!(value["cluster"], "c1");
        assert_eq!(value["durability"]["type"], "replicate");
        assert_eq!(value["mount"]["glusterfs"]["device"], "10.0.0.1:vol_1");
        assert!(value.get("clusters").is_none());

        let back: VolumeInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_volume_request_validation() {
        let req = VolumeCreateRequest::new(0, Durability::default());
        assert_matches!(req.validate(), Err(Error::InvalidRequest(_)));

        let mut req = VolumeCreateRequest::new(5, Durability::default());
        req.snapshot = SnapshotPolicy { enable: true, factor: 0.5 };
        assert_matches!(req.validate(), Err(Error::InvalidRequest(_)));

        req.snapshot.factor = 1.5;
        assert!(req.validate().is_ok());

        let req = VolumeCreateRequest::new(5, Durability::disperse(2, 2));
        assert_matches!(req.validate(), Err(Error::InvalidDurability(_)));
    }

    #[test]
    fn test_expand_request_tag() {
        let req: VolumeExpandRequest = serde_json::from_value(json!({"expand_size": 20})).unwrap();
        assert_eq!(req.size, 20);
    }

    #[test]
    fn test_node_request_tags() {
        let mut req: NodeAddRequest = serde_json::from_value(json!({
            "zone": 1,
            "hostnames": {"manage": ["b", "a", "a"], "storage": ["10.0.0.1"]},
            "cluster": "c1"
        }))
        .unwrap();
        req.hostnames.normalize();
        assert_eq!(req.hostnames.manage, vec!["a", "b"]);
        assert_eq!(req.cluster_id, "c1");
    }
}

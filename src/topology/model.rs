//! Storage Topology Model
//!
//! In-memory entity graph: clusters own nodes and volumes, nodes own
//! devices, devices own bricks, and volumes reference the same bricks.
//!
//! Each cluster's state sits behind its own lock, so every mutation of a
//! device's capacity or a volume's brick list is serialized per cluster.
//! A concurrent locator maps every node, device, volume and brick id to the
//! cluster holding it.

use super::events::TopologyEvent;
use super::types::{
    BrickInfo, ClusterInfoResponse, ClusterListResponse, DeviceAddRequest, DeviceInfo,
    DeviceInfoResponse, NodeAddRequest, NodeInfo, NodeInfoResponse, StorageSize,
    VolumeCreateRequest, VolumeExpandRequest, VolumeInfo, VolumeInfoResponse, VolumeListResponse,
    VolumeMount,
};
use crate::config::TopologyConfig;
use crate::domain::ports::DeviceCapacity;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Generate a new entity id (32 hex digits)
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn not_found(kind: &'static str, id: &str) -> Error {
    Error::NotFound {
        kind,
        id: id.to_string(),
    }
}

// =============================================================================
// Entity Location
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Node,
    Device,
    Volume,
    Brick,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Device => "device",
            EntityKind::Volume => "volume",
            EntityKind::Brick => "brick",
        }
    }
}

#[derive(Debug, Clone)]
struct Location {
    kind: EntityKind,
    cluster_id: String,
}

// =============================================================================
// Cluster State
// =============================================================================

#[derive(Debug)]
struct NodeEntry {
    info: NodeInfo,
    devices: BTreeSet<String>,
}

#[derive(Debug)]
struct DeviceEntry {
    info: DeviceInfo,
    node_id: String,
    extent_size: u64,
    bricks: BTreeSet<String>,
    /// Being torn down; no new bricks may land here
    draining: bool,
}

#[derive(Debug)]
struct VolumeEntry {
    info: VolumeInfo,
    bricks: Vec<String>,
}

#[derive(Debug)]
struct BrickEntry {
    info: BrickInfo,
    volume_id: String,
}

#[derive(Debug)]
struct ClusterState {
    id: String,
    /// Set once the cluster has been removed from the topology
    deleted: bool,
    nodes: BTreeMap<String, NodeEntry>,
    devices: BTreeMap<String, DeviceEntry>,
    volumes: BTreeMap<String, VolumeEntry>,
    bricks: BTreeMap<String, BrickEntry>,
}

impl ClusterState {
    fn new(id: String) -> Self {
        Self {
            id,
            deleted: false,
            nodes: BTreeMap::new(),
            devices: BTreeMap::new(),
            volumes: BTreeMap::new(),
            bricks: BTreeMap::new(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted {
            return Err(not_found("cluster", &self.id));
        }
        Ok(())
    }

    fn device_response(&self, device: &DeviceEntry) -> DeviceInfoResponse {
        DeviceInfoResponse {
            info: device.info.clone(),
            bricks: device
                .bricks
                .iter()
                .filter_map(|id| self.bricks.get(id))
                .map(|b| b.info.clone())
                .collect(),
        }
    }

    fn check_device_name(&self, node_id: &str, name: &str) -> Result<()> {
        let node = self.nodes.get(node_id).ok_or_else(|| not_found("node", node_id))?;
        let taken = node
            .devices
            .iter()
            .filter_map(|id| self.devices.get(id))
            .any(|d| d.info.device.name == name);
        if taken {
            return Err(Error::DuplicateName {
                kind: "device",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Carve a brick out of a device for a volume
    fn allocate_brick(
        &mut self,
        config: &TopologyConfig,
        volume_id: &str,
        device_id: &str,
        size_kb: u64,
    ) -> Result<BrickInfo> {
        if !self.volumes.contains_key(volume_id) {
            return Err(not_found("volume", volume_id));
        }
        let device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| not_found("device", device_id))?;

        if device.draining {
            return Err(Error::DeviceDraining {
                device_id: device_id.to_string(),
            });
        }
        device.info.storage.validate(&format!("device {}", device_id))?;
        if !device.info.storage.allocate(size_kb) {
            return Err(Error::InsufficientCapacity {
                device_id: device_id.to_string(),
                requested: size_kb,
                available: device.info.storage.free,
            });
        }

        let brick_id = generate_id();
        let path = config
            .brick_root
            .join(format!("vg_{}", device_id))
            .join(format!("brick_{}", brick_id))
            .join("brick");
        let info = BrickInfo {
            id: brick_id.clone(),
            path: path.display().to_string(),
            device_id: device_id.to_string(),
            node_id: device.node_id.clone(),
            size: size_kb,
        };
        device.bricks.insert(brick_id.clone());

        if let Some(volume) = self.volumes.get_mut(volume_id) {
            volume.bricks.push(brick_id.clone());
        }
        self.bricks.insert(
            brick_id,
            BrickEntry {
                info: info.clone(),
                volume_id: volume_id.to_string(),
            },
        );

        Ok(info)
    }

    /// Return a brick's space to its device and unlink it from both parents.
    /// On error nothing is changed.
    fn free_brick(&mut self, brick_id: &str) -> Result<BrickEntry> {
        let brick = self
            .bricks
            .remove(brick_id)
            .ok_or_else(|| not_found("brick", brick_id))?;

        let released = match self.devices.get_mut(&brick.info.device_id) {
            None => Err(Error::Internal(format!(
                "brick {} references missing device {}",
                brick_id, brick.info.device_id
            ))),
            Some(device) => {
                if device.info.storage.release(brick.info.size) {
                    device.bricks.remove(brick_id);
                    Ok(())
                } else {
                    Err(Error::Internal(format!(
                        "device {} has {} KiB used, cannot release brick {} of {} KiB",
                        device.info.id, device.info.storage.used, brick_id, brick.info.size
                    )))
                }
            }
        };

        if let Err(err) = released {
            self.bricks.insert(brick_id.to_string(), brick);
            return Err(err);
        }

        if let Some(volume) = self.volumes.get_mut(&brick.volume_id) {
            volume.bricks.retain(|b| b != brick_id);
        }
        Ok(brick)
    }

    fn verify(&self) -> Result<()> {
        for (node_id, node) in &self.nodes {
            for device_id in &node.devices {
                match self.devices.get(device_id) {
                    Some(device) if &device.node_id == node_id => {}
                    _ => {
                        return Err(Error::Internal(format!(
                            "node {} lists device {} it does not own",
                            node_id, device_id
                        )))
                    }
                }
            }
        }

        for (device_id, device) in &self.devices {
            let storage = &device.info.storage;
            storage.validate(&format!("device {}", device_id))?;

            let mut brick_total = 0u64;
            for brick_id in &device.bricks {
                let brick = self.bricks.get(brick_id).ok_or_else(|| {
                    Error::Internal(format!("device {} lists missing brick {}", device_id, brick_id))
                })?;
                if &brick.info.device_id != device_id {
                    return Err(Error::Internal(format!(
                        "brick {} listed on device {} but owned by {}",
                        brick_id, device_id, brick.info.device_id
                    )));
                }
                brick_total = brick_total.saturating_add(brick.info.size);
            }
            if brick_total > storage.used {
                return Err(Error::Internal(format!(
                    "device {} bricks total {} KiB but only {} KiB is used",
                    device_id, brick_total, storage.used
                )));
            }
        }

        for (volume_id, volume) in &self.volumes {
            for brick_id in &volume.bricks {
                match self.bricks.get(brick_id) {
                    Some(brick) if &brick.volume_id == volume_id => {}
                    _ => {
                        return Err(Error::Internal(format!(
                            "volume {} references brick {} it does not hold",
                            volume_id, brick_id
                        )))
                    }
                }
            }
        }

        for (brick_id, brick) in &self.bricks {
            let on_device = self
                .devices
                .get(&brick.info.device_id)
                .map_or(false, |d| d.bricks.contains(brick_id));
            let on_volume = self
                .volumes
                .get(&brick.volume_id)
                .map_or(false, |v| v.bricks.contains(brick_id));
            if !on_device || !on_volume {
                return Err(Error::Internal(format!(
                    "brick {} is not linked from both its device and its volume",
                    brick_id
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time counts and aggregate capacity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyStats {
    pub clusters: usize,
    pub nodes: usize,
    pub devices: usize,
    pub volumes: usize,
    pub bricks: usize,
    pub storage: StorageSize,
}

// =============================================================================
// Topology
// =============================================================================

/// Cluster → node → device → brick graph plus volumes
pub struct Topology {
    config: TopologyConfig,
    clusters: RwLock<HashMap<String, Arc<RwLock<ClusterState>>>>,
    /// Entity id → owning cluster
    locator: DashMap<String, Location>,
    /// Management hostname → node id
    hostnames: DashMap<String, String>,
    events: broadcast::Sender<TopologyEvent>,
}

impl Topology {
    /// Create an empty topology
    pub fn new(config: TopologyConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            config,
            clusters: RwLock::new(HashMap::new()),
            locator: DashMap::new(),
            hostnames: DashMap::new(),
            events,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TopologyEvent) {
        let _ = self.events.send(event);
    }

    fn cluster(&self, cluster_id: &str) -> Result<Arc<RwLock<ClusterState>>> {
        self.clusters
            .read()
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| not_found("cluster", cluster_id))
    }

    fn cluster_id_of(&self, kind: EntityKind, id: &str) -> Result<String> {
        match self.locator.get(id) {
            Some(loc) if loc.kind == kind => Ok(loc.cluster_id.clone()),
            _ => Err(not_found(kind.as_str(), id)),
        }
    }

    fn locate(&self, kind: EntityKind, id: &str) -> Result<Arc<RwLock<ClusterState>>> {
        let cluster_id = self.cluster_id_of(kind, id)?;
        self.cluster(&cluster_id)
    }

    fn claim_id(&self, kind: EntityKind, id: &str, cluster_id: &str) -> Result<()> {
        match self.locator.entry(id.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateId {
                kind: kind.as_str(),
                id: id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Location {
                    kind,
                    cluster_id: cluster_id.to_string(),
                });
                Ok(())
            }
        }
    }

    // =========================================================================
    // Clusters
    // =========================================================================

    pub fn create_cluster(&self) -> ClusterInfoResponse {
        let id = generate_id();
        self.clusters
            .write()
            .insert(id.clone(), Arc::new(RwLock::new(ClusterState::new(id.clone()))));

        info!(cluster_id = %id, "Created cluster");
        self.emit(TopologyEvent::ClusterCreated {
            cluster_id: id.clone(),
        });

        ClusterInfoResponse {
            id,
            nodes: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Delete an empty cluster. Nodes and volumes must be removed first.
    pub fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        let mut clusters = self.clusters.write();
        let cluster = clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| not_found("cluster", cluster_id))?;

        let mut state = cluster.write();
        if !state.nodes.is_empty() || !state.volumes.is_empty() {
            return Err(Error::ClusterNotEmpty {
                cluster_id: cluster_id.to_string(),
                nodes: state.nodes.len(),
                volumes: state.volumes.len(),
            });
        }
        state.deleted = true;
        clusters.remove(cluster_id);

        info!(cluster_id, "Deleted cluster");
        self.emit(TopologyEvent::ClusterDeleted {
            cluster_id: cluster_id.to_string(),
        });
        Ok(())
    }

    pub fn cluster_info(&self, cluster_id: &str) -> Result<ClusterInfoResponse> {
        let cluster = self.cluster(cluster_id)?;
        let state = cluster.read();
        Ok(ClusterInfoResponse {
            id: state.id.clone(),
            nodes: state.nodes.keys().cloned().collect(),
            volumes: state.volumes.keys().cloned().collect(),
        })
    }

    pub fn cluster_list(&self) -> ClusterListResponse {
        let mut clusters: Vec<String> = self.clusters.read().keys().cloned().collect();
        clusters.sort();
        ClusterListResponse { clusters }
    }

    /// Aggregate capacity of every device in a cluster
    pub fn cluster_storage(&self, cluster_id: &str) -> Result<StorageSize> {
        let cluster = self.cluster(cluster_id)?;
        let state = cluster.read();
        let mut total = StorageSize::default();
        for device in state.devices.values() {
            total.accumulate(&device.info.storage);
        }
        Ok(total)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn add_node(&self, mut request: NodeAddRequest) -> Result<NodeInfo> {
        request.hostnames.normalize();
        if request.hostnames.manage.is_empty() || request.hostnames.storage.is_empty() {
            return Err(Error::InvalidRequest(
                "node needs at least one manage and one storage hostname".into(),
            ));
        }

        let cluster = self.cluster(&request.cluster_id)?;
        let mut state = cluster.write();
        state.ensure_live()?;

        let id = generate_id();
        let mut claimed = Vec::new();
        let mut duplicate = None;
        for hostname in &request.hostnames.manage {
            // The entry guard holds its shard locked until the match ends
            let taken = match self.hostnames.entry(hostname.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                    false
                }
            };
            if taken {
                duplicate = Some(hostname.clone());
                break;
            }
            claimed.push(hostname.clone());
        }
        if let Some(name) = duplicate {
            for hostname in &claimed {
                self.hostnames.remove(hostname);
            }
            return Err(Error::DuplicateName {
                kind: "node hostname",
                name,
            });
        }
        if let Err(err) = self.claim_id(EntityKind::Node, &id, &state.id) {
            for hostname in &claimed {
                self.hostnames.remove(hostname);
            }
            return Err(err);
        }

        let info = NodeInfo { request, id };
        state.nodes.insert(
            info.id.clone(),
            NodeEntry {
                info: info.clone(),
                devices: BTreeSet::new(),
            },
        );

        info!(
            cluster_id = %state.id,
            node_id = %info.id,
            hostname = %info.request.hostnames.manage[0],
            "Added node"
        );
        self.emit(TopologyEvent::NodeAdded {
            cluster_id: state.id.clone(),
            node_id: info.id.clone(),
            hostname: info.request.hostnames.manage[0].clone(),
        });
        Ok(info)
    }

    /// Remove a node that owns no devices
    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Node, node_id)?;
        let mut state = cluster.write();

        let node = state.nodes.get(node_id).ok_or_else(|| not_found("node", node_id))?;
        if !node.devices.is_empty() {
            return Err(Error::NodeNotEmpty {
                node_id: node_id.to_string(),
                devices: node.devices.len(),
            });
        }

        if let Some(node) = state.nodes.remove(node_id) {
            for hostname in &node.info.request.hostnames.manage {
                self.hostnames.remove(hostname);
            }
        }
        self.locator.remove(node_id);

        info!(cluster_id = %state.id, node_id, "Removed node");
        self.emit(TopologyEvent::NodeRemoved {
            cluster_id: state.id.clone(),
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    pub fn node_info(&self, node_id: &str) -> Result<NodeInfoResponse> {
        let cluster = self.locate(EntityKind::Node, node_id)?;
        let state = cluster.read();
        let node = state.nodes.get(node_id).ok_or_else(|| not_found("node", node_id))?;

        Ok(NodeInfoResponse {
            info: node.info.clone(),
            devices: node
                .devices
                .iter()
                .filter_map(|id| state.devices.get(id))
                .map(|d| state.device_response(d))
                .collect(),
        })
    }

    /// Aggregate capacity of a node's devices
    pub fn node_storage(&self, node_id: &str) -> Result<StorageSize> {
        let cluster = self.locate(EntityKind::Node, node_id)?;
        let state = cluster.read();
        let node = state.nodes.get(node_id).ok_or_else(|| not_found("node", node_id))?;

        let mut total = StorageSize::default();
        for device in node.devices.iter().filter_map(|id| state.devices.get(id)) {
            total.accumulate(&device.info.storage);
        }
        Ok(total)
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Register a provisioned device under its node
    pub fn attach_device(
        &self,
        request: &DeviceAddRequest,
        device_id: &str,
        capacity: DeviceCapacity,
    ) -> Result<DeviceInfo> {
        if request.device.name.is_empty() {
            return Err(Error::InvalidRequest("device name must not be empty".into()));
        }

        let node_id = &request.node_id;
        let cluster = self.locate(EntityKind::Node, node_id)?;
        let mut state = cluster.write();

        state.check_device_name(node_id, &request.device.name)?;

        let storage = capacity.storage();
        storage.validate(&format!("device {}", device_id))?;
        self.claim_id(EntityKind::Device, device_id, &state.id)?;

        let info = DeviceInfo {
            device: request.device.clone(),
            storage,
            id: device_id.to_string(),
        };
        state.devices.insert(
            device_id.to_string(),
            DeviceEntry {
                info: info.clone(),
                node_id: node_id.clone(),
                extent_size: capacity.extent_size,
                bricks: BTreeSet::new(),
                draining: false,
            },
        );
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.devices.insert(device_id.to_string());
        }

        info!(
            node_id = %node_id,
            device_id,
            device = %info.device.name,
            size_kb = storage.total,
            "Attached device"
        );
        self.emit(TopologyEvent::DeviceAttached {
            node_id: node_id.clone(),
            device_id: device_id.to_string(),
            size_kb: storage.total,
        });
        Ok(info)
    }

    /// Fail if `node_id` is unknown or already has a device called `name`.
    /// Read-only; `attach_device` repeats the check under the write lock.
    pub fn check_device_name(&self, node_id: &str, name: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Node, node_id)?;
        let state = cluster.read();
        state.check_device_name(node_id, name)
    }

    /// Stop new bricks landing on an empty device ahead of its teardown
    pub fn begin_drain(&self, device_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let mut state = cluster.write();
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| not_found("device", device_id))?;

        if !device.bricks.is_empty() {
            return Err(Error::DeviceNotEmpty {
                device_id: device_id.to_string(),
                bricks: device.bricks.len(),
            });
        }
        if device.draining {
            return Err(Error::DeviceDraining {
                device_id: device_id.to_string(),
            });
        }
        device.draining = true;

        debug!(device_id, "Device draining");
        Ok(())
    }

    /// Accept bricks on a draining device again
    pub fn end_drain(&self, device_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let mut state = cluster.write();
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| not_found("device", device_id))?;
        device.draining = false;

        debug!(device_id, "Device accepting bricks again");
        Ok(())
    }

    /// Check whether a device refuses new bricks
    pub fn is_draining(&self, device_id: &str) -> Result<bool> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let state = cluster.read();
        state
            .devices
            .get(device_id)
            .map(|d| d.draining)
            .ok_or_else(|| not_found("device", device_id))
    }

    /// Unregister a device that holds no bricks
    pub fn detach_device(&self, device_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let mut state = cluster.write();

        let device = state
            .devices
            .get(device_id)
            .ok_or_else(|| not_found("device", device_id))?;
        if !device.bricks.is_empty() {
            return Err(Error::DeviceNotEmpty {
                device_id: device_id.to_string(),
                bricks: device.bricks.len(),
            });
        }

        let node_id = device.node_id.clone();
        state.devices.remove(device_id);
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.devices.remove(device_id);
        }
        self.locator.remove(device_id);

        info!(node_id = %node_id, device_id, "Detached device");
        self.emit(TopologyEvent::DeviceDetached {
            node_id,
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    pub fn device_info(&self, device_id: &str) -> Result<DeviceInfoResponse> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let state = cluster.read();
        let device = state
            .devices
            .get(device_id)
            .ok_or_else(|| not_found("device", device_id))?;
        Ok(state.device_response(device))
    }

    /// Node owning a device
    pub fn device_node(&self, device_id: &str) -> Result<String> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let state = cluster.read();
        state
            .devices
            .get(device_id)
            .map(|d| d.node_id.clone())
            .ok_or_else(|| not_found("device", device_id))
    }

    /// Extent size the volume group reported when the device was provisioned
    pub fn device_extent_size(&self, device_id: &str) -> Result<u64> {
        let cluster = self.locate(EntityKind::Device, device_id)?;
        let state = cluster.read();
        state
            .devices
            .get(device_id)
            .map(|d| d.extent_size)
            .ok_or_else(|| not_found("device", device_id))
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Clusters a volume may land in. Requested clusters must exist; with no
    /// request every cluster present right now is a candidate, in id order.
    fn candidate_clusters(&self, requested: &[String]) -> Result<Vec<Arc<RwLock<ClusterState>>>> {
        if !requested.is_empty() {
            return requested.iter().map(|id| self.cluster(id)).collect();
        }
        let clusters = self.clusters.read();
        let mut ids: Vec<&String> = clusters.keys().collect();
        ids.sort();
        Ok(ids.into_iter().filter_map(|id| clusters.get(id).cloned()).collect())
    }

    /// Record a new volume in the first eligible cluster
    pub fn create_volume(&self, request: VolumeCreateRequest) -> Result<VolumeInfo> {
        request.validate()?;
        let candidates = self.candidate_clusters(&request.clusters)?;
        self.create_volume_in(&candidates, request)
    }

    /// Clusters deleted since the candidates were picked are skipped
    fn create_volume_in(
        &self,
        candidates: &[Arc<RwLock<ClusterState>>],
        mut request: VolumeCreateRequest,
    ) -> Result<VolumeInfo> {
        let required = request.durability.min_nodes();

        let mut most_nodes = 0;
        for cluster in candidates {
            let mut state = cluster.write();
            if state.deleted {
                continue;
            }
            if state.nodes.len() < required {
                most_nodes = most_nodes.max(state.nodes.len());
                continue;
            }

            let id = generate_id();
            if request.name.is_empty() {
                request.name = format!("vol_{}", id);
            }
            if state.volumes.values().any(|v| v.info.request.name == request.name) {
                return Err(Error::DuplicateName {
                    kind: "volume",
                    name: request.name,
                });
            }

            let mount = volume_mount(&state, &request.name);
            self.claim_id(EntityKind::Volume, &id, &state.id)?;

            let info = VolumeInfo {
                request,
                id: id.clone(),
                cluster: state.id.clone(),
                mount,
            };
            state.volumes.insert(
                id.clone(),
                VolumeEntry {
                    info: info.clone(),
                    bricks: Vec::new(),
                },
            );

            info!(
                cluster_id = %state.id,
                volume_id = %id,
                name = %info.request.name,
                size_gb = info.request.size,
                durability = info.request.durability.label(),
                "Created volume"
            );
            self.emit(TopologyEvent::VolumeCreated {
                cluster_id: state.id.clone(),
                volume_id: id,
                size_gb: info.request.size,
            });
            return Ok(info);
        }

        Err(Error::InsufficientNodes {
            required,
            available: most_nodes,
        })
    }

    /// Grow a volume's requested size; bricks for the delta are placed separately
    pub fn expand_volume(&self, volume_id: &str, request: VolumeExpandRequest) -> Result<VolumeInfo> {
        if request.size == 0 {
            return Err(Error::InvalidRequest("expand size must be greater than zero".into()));
        }

        let cluster = self.locate(EntityKind::Volume, volume_id)?;
        let mut state = cluster.write();
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;

        volume.info.request.size = volume
            .info
            .request
            .size
            .checked_add(request.size)
            .ok_or_else(|| Error::InvalidRequest("expanded volume size overflows".into()))?;
        let info = volume.info.clone();

        info!(volume_id, expand_gb = request.size, size_gb = info.request.size, "Expanded volume");
        self.emit(TopologyEvent::VolumeExpanded {
            volume_id: volume_id.to_string(),
            size_gb: info.request.size,
        });
        Ok(info)
    }

    /// Release every brick of a volume and remove it
    pub fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Volume, volume_id)?;
        let mut state = cluster.write();

        let bricks = state
            .volumes
            .get(volume_id)
            .map(|v| v.bricks.clone())
            .ok_or_else(|| not_found("volume", volume_id))?;

        for brick_id in &bricks {
            let brick = state.free_brick(brick_id)?;
            self.locator.remove(brick_id);
            self.emit(TopologyEvent::BrickReleased {
                volume_id: volume_id.to_string(),
                device_id: brick.info.device_id,
                brick_id: brick_id.clone(),
                size_kb: brick.info.size,
            });
        }

        state.volumes.remove(volume_id);
        self.locator.remove(volume_id);

        info!(volume_id, bricks = bricks.len(), "Deleted volume");
        self.emit(TopologyEvent::VolumeDeleted {
            cluster_id: state.id.clone(),
            volume_id: volume_id.to_string(),
        });
        Ok(())
    }

    pub fn volume_info(&self, volume_id: &str) -> Result<VolumeInfoResponse> {
        let cluster = self.locate(EntityKind::Volume, volume_id)?;
        let state = cluster.read();
        let volume = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;

        Ok(VolumeInfoResponse {
            info: volume.info.clone(),
            bricks: volume
                .bricks
                .iter()
                .filter_map(|id| state.bricks.get(id))
                .map(|b| b.info.clone())
                .collect(),
        })
    }

    pub fn volume_list(&self) -> VolumeListResponse {
        let clusters: Vec<_> = self.clusters.read().values().cloned().collect();
        let mut volumes: Vec<String> = clusters
            .iter()
            .flat_map(|c| c.read().volumes.keys().cloned().collect::<Vec<_>>())
            .collect();
        volumes.sort();
        VolumeListResponse { volumes }
    }

    // =========================================================================
    // Bricks
    // =========================================================================

    fn same_cluster(&self, volume_id: &str, device_id: &str) -> Result<Arc<RwLock<ClusterState>>> {
        let volume_cluster = self.cluster_id_of(EntityKind::Volume, volume_id)?;
        let device_cluster = self.cluster_id_of(EntityKind::Device, device_id)?;
        if volume_cluster != device_cluster {
            return Err(Error::CrossClusterPlacement {
                volume_id: volume_id.to_string(),
                device_id: device_id.to_string(),
            });
        }
        self.cluster(&volume_cluster)
    }

    fn brick_placed(&self, volume_id: &str, brick: &BrickInfo, cluster_id: &str) {
        self.locator.insert(
            brick.id.clone(),
            Location {
                kind: EntityKind::Brick,
                cluster_id: cluster_id.to_string(),
            },
        );
        debug!(
            volume_id,
            device_id = %brick.device_id,
            brick_id = %brick.id,
            size_kb = brick.size,
            "Placed brick"
        );
        self.emit(TopologyEvent::BrickPlaced {
            volume_id: volume_id.to_string(),
            device_id: brick.device_id.clone(),
            brick_id: brick.id.clone(),
            size_kb: brick.size,
        });
    }

    /// Move `size_kb` from free to used on a device and record the brick on
    /// both the device and the volume
    pub fn place_brick(&self, volume_id: &str, device_id: &str, size_kb: u64) -> Result<BrickInfo> {
        if size_kb == 0 {
            return Err(Error::InvalidRequest("brick size must be greater than zero".into()));
        }

        let cluster = self.same_cluster(volume_id, device_id)?;
        let mut state = cluster.write();
        state.ensure_live()?;

        let brick = state.allocate_brick(&self.config, volume_id, device_id, size_kb)?;
        self.brick_placed(volume_id, &brick, &state.id);
        Ok(brick)
    }

    /// Place whole brick sets for a volume, all or nothing.
    ///
    /// `device_ids` is split into sets of the volume's brick set size and
    /// every brick in a set must land on a different node.
    pub fn place_brick_set(
        &self,
        volume_id: &str,
        device_ids: &[String],
        size_kb: u64,
    ) -> Result<Vec<BrickInfo>> {
        if size_kb == 0 {
            return Err(Error::InvalidRequest("brick size must be greater than zero".into()));
        }
        let first = device_ids
            .first()
            .ok_or_else(|| Error::InvalidRequest("no devices given for brick set".into()))?;
        let cluster = self.same_cluster(volume_id, first)?;
        for device_id in &device_ids[1..] {
            self.same_cluster(volume_id, device_id)?;
        }

        let mut state = cluster.write();
        state.ensure_live()?;

        let set_size = state
            .volumes
            .get(volume_id)
            .map(|v| v.info.request.durability.brick_set_size())
            .ok_or_else(|| not_found("volume", volume_id))?;
        if set_size == 0 || device_ids.len() % set_size != 0 {
            return Err(Error::InvalidRequest(format!(
                "{} devices do not form whole sets of {}",
                device_ids.len(),
                set_size
            )));
        }

        for set in device_ids.chunks(set_size) {
            let mut nodes = HashSet::new();
            for device_id in set {
                let device = state
                    .devices
                    .get(device_id)
                    .ok_or_else(|| not_found("device", device_id))?;
                if !nodes.insert(device.node_id.as_str()) {
                    return Err(Error::InvalidRequest(format!(
                        "brick set places two bricks on node {}",
                        device.node_id
                    )));
                }
            }
        }

        let mut placed: Vec<BrickInfo> = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            match state.allocate_brick(&self.config, volume_id, device_id, size_kb) {
                Ok(brick) => placed.push(brick),
                Err(err) => {
                    for brick in placed.iter().rev() {
                        state.free_brick(&brick.id)?;
                    }
                    return Err(err);
                }
            }
        }

        for brick in &placed {
            self.brick_placed(volume_id, brick, &state.id);
        }
        Ok(placed)
    }

    /// Remove a brick from its device and volume, returning its space to free
    pub fn release_brick(&self, brick_id: &str) -> Result<()> {
        let cluster = self.locate(EntityKind::Brick, brick_id)?;
        let mut state = cluster.write();

        let brick = state.free_brick(brick_id)?;
        self.locator.remove(brick_id);

        debug!(
            device_id = %brick.info.device_id,
            brick_id,
            size_kb = brick.info.size,
            "Released brick"
        );
        self.emit(TopologyEvent::BrickReleased {
            volume_id: brick.volume_id,
            device_id: brick.info.device_id,
            brick_id: brick_id.to_string(),
            size_kb: brick.info.size,
        });
        Ok(())
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    /// Check capacity bookkeeping and device/volume agreement on every brick
    pub fn verify(&self) -> Result<()> {
        let clusters: Vec<_> = self.clusters.read().values().cloned().collect();
        for cluster in clusters {
            cluster.read().verify()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> TopologyStats {
        let clusters: Vec<_> = self.clusters.read().values().cloned().collect();
        let mut stats = TopologyStats {
            clusters: clusters.len(),
            ..Default::default()
        };
        for cluster in clusters {
            let state = cluster.read();
            stats.nodes += state.nodes.len();
            stats.devices += state.devices.len();
            stats.volumes += state.volumes.len();
            stats.bricks += state.bricks.len();
            for device in state.devices.values() {
                stats.storage.accumulate(&device.info.storage);
            }
        }
        stats
    }
}

/// Mount descriptor: first storage host serves the volume, the rest are
/// volfile backups
fn volume_mount(state: &ClusterState, name: &str) -> VolumeMount {
    let hosts: Vec<&str> = state
        .nodes
        .values()
        .filter_map(|n| n.info.request.hostnames.storage.first())
        .map(String::as_str)
        .collect();

    let mut mount = VolumeMount::default();
    if let Some((primary, backups)) = hosts.split_first() {
        mount.glusterfs.mount_point = format!("{}:{}", primary, name);
        mount
            .glusterfs
            .options
            .insert("backupvolfile-servers".to_string(), backups.join(","));
    }
    mount
}

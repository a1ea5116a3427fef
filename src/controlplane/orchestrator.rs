//! Device Orchestrator
//!
//! Connects the device lifecycle on storage nodes with the topology model:
//! - Add: provision the volume group, then register the device. A device
//!   the topology refuses is torn down again.
//! - Add: a device path already registered on the node is refused before
//!   any command reaches the host.
//! - Remove: refuse devices that still hold bricks, stop new bricks landing,
//!   tear the group down, then unregister the device.
//!
//! At most one operation runs per (node, device path) at a time.

use crate::domain::ports::DeviceExecutorRef;
use crate::error::{Error, Result};
use crate::topology::{generate_id, DeviceAddRequest, DeviceInfo, Topology};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// In-Flight Operations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Setup,
    Teardown,
}

/// A device operation currently running on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightOperation {
    pub node_id: String,
    pub device: String,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
}

type OperationKey = (String, String);

/// Clears the in-flight slot when the operation ends, however it ends
struct InFlightGuard<'a> {
    operations: &'a DashMap<OperationKey, InFlightOperation>,
    key: OperationKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.operations.remove(&self.key);
    }
}

// =============================================================================
// Device Orchestrator
// =============================================================================

pub struct DeviceOrchestrator {
    topology: Arc<Topology>,
    executor: DeviceExecutorRef,
    in_flight: DashMap<OperationKey, InFlightOperation>,
}

impl DeviceOrchestrator {
    pub fn new(topology: Arc<Topology>, executor: DeviceExecutorRef) -> Arc<Self> {
        Arc::new(Self {
            topology,
            executor,
            in_flight: DashMap::new(),
        })
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Operations currently running, oldest first
    pub fn in_flight(&self) -> Vec<InFlightOperation> {
        let mut ops: Vec<_> = self.in_flight.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|op| op.started_at);
        ops
    }

    fn begin(&self, node_id: &str, device: &str, kind: OperationKind) -> Result<InFlightGuard<'_>> {
        let key = (node_id.to_string(), device.to_string());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::OperationInProgress {
                node_id: node_id.to_string(),
                device: device.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(InFlightOperation {
                    node_id: node_id.to_string(),
                    device: device.to_string(),
                    kind,
                    started_at: Utc::now(),
                });
                Ok(InFlightGuard {
                    operations: &self.in_flight,
                    key,
                })
            }
        }
    }

    fn manage_host(&self, node_id: &str) -> Result<String> {
        let node = self.topology.node_info(node_id)?;
        node.info
            .request
            .hostnames
            .manage
            .first()
            .cloned()
            .ok_or_else(|| Error::Internal(format!("node {} has no manage hostname", node_id)))
    }

    /// Provision a raw device on its node and register it in the topology
    pub async fn add_device(&self, request: DeviceAddRequest) -> Result<DeviceInfo> {
        let host = self.manage_host(&request.node_id)?;
        let _guard = self.begin(&request.node_id, &request.device.name, OperationKind::Setup)?;

        // A registered device path is live; never send it pvcreate
        self.topology
            .check_device_name(&request.node_id, &request.device.name)?;

        let device_id = generate_id();
        let capacity = self
            .executor
            .device_setup(&host, &request.device.name, &device_id)
            .await?;

        match self.topology.attach_device(&request, &device_id, capacity) {
            Ok(info) => {
                info!(
                    node_id = %request.node_id,
                    device_id = %device_id,
                    device = %request.device.name,
                    size_kb = capacity.size,
                    "Device added"
                );
                Ok(info)
            }
            Err(err) => {
                warn!(
                    host = %host,
                    device_id = %device_id,
                    device = %request.device.name,
                    error = %err,
                    "Topology rejected device, tearing it down"
                );
                if let Err(cleanup) = self
                    .executor
                    .device_teardown(&host, &request.device.name, &device_id)
                    .await
                {
                    error!(
                        host = %host,
                        device_id = %device_id,
                        device = %request.device.name,
                        error = %cleanup,
                        "Failed to tear down rejected device"
                    );
                }
                Err(err)
            }
        }
    }

    /// Tear down an empty device and remove it from the topology.
    ///
    /// The device refuses new bricks from the moment teardown starts. If
    /// teardown fails it accepts bricks again.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let device = self.topology.device_info(device_id)?;
        if !device.bricks.is_empty() {
            return Err(Error::DeviceNotEmpty {
                device_id: device_id.to_string(),
                bricks: device.bricks.len(),
            });
        }

        let node_id = self.topology.device_node(device_id)?;
        let host = self.manage_host(&node_id)?;
        let name = device.info.device.name;
        let _guard = self.begin(&node_id, &name, OperationKind::Teardown)?;

        self.topology.begin_drain(device_id)?;

        if let Err(err) = self.executor.device_teardown(&host, &name, device_id).await {
            warn!(
                host = %host,
                device_id,
                device = %name,
                error = %err,
                "Teardown failed, device accepts bricks again"
            );
            if let Err(reopen) = self.topology.end_drain(device_id) {
                error!(device_id, error = %reopen, "Failed to reopen device");
            }
            return Err(err);
        }
        self.topology.detach_device(device_id)?;

        info!(node_id = %node_id, device_id, device = %name, "Device removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopologyConfig;
    use crate::domain::ports::{DeviceCapacity, DeviceExecutor};
    use crate::topology::{Device, Durability, HostAddresses, NodeAddRequest, VolumeCreateRequest};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    type Call = (String, String, String);

    /// Pair of notifiers: the executor signals the first when it is entered
    /// and waits on the second
    type Hold = (Arc<Notify>, Arc<Notify>);

    #[derive(Default)]
    struct FakeExecutor {
        fail_setup: bool,
        fail_teardown: bool,
        setups: Mutex<Vec<Call>>,
        teardowns: Mutex<Vec<Call>>,
        hold_setup: Option<Hold>,
        hold_teardown: Option<Hold>,
    }

    async fn wait(hold: &Option<Hold>) {
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
    }

    fn call(host: &str, device: &str, group_id: &str) -> Call {
        (host.to_string(), device.to_string(), group_id.to_string())
    }

    #[async_trait]
    impl DeviceExecutor for FakeExecutor {
        async fn device_setup(&self, host: &str, device: &str, group_id: &str) -> Result<DeviceCapacity> {
            self.setups.lock().push(call(host, device, group_id));
            wait(&self.hold_setup).await;
            if self.fail_setup {
                return Err(Error::RemoteExecution {
                    host: host.to_string(),
                    reason: "pvcreate failed".into(),
                });
            }
            Ok(DeviceCapacity {
                size: 1024 * 1024,
                extent_size: 4096,
            })
        }

        async fn device_teardown(&self, host: &str, device: &str, group_id: &str) -> Result<()> {
            self.teardowns.lock().push(call(host, device, group_id));
            wait(&self.hold_teardown).await;
            if self.fail_teardown {
                return Err(Error::Teardown {
                    host: host.to_string(),
                    device: device.to_string(),
                    reason: "vgremove failed".into(),
                });
            }
            Ok(())
        }
    }

    fn hold() -> Hold {
        (Arc::new(Notify::new()), Arc::new(Notify::new()))
    }

    fn fixture(executor: Arc<FakeExecutor>) -> (Arc<DeviceOrchestrator>, String) {
        let topology = Topology::new(TopologyConfig::default());
        let cluster = topology.create_cluster().id;
        let node = topology
            .add_node(NodeAddRequest {
                zone: 1,
                hostnames: HostAddresses {
                    manage: vec!["node1.example.com".into()],
                    storage: vec!["10.0.0.1".into()],
                },
                cluster_id: cluster,
            })
            .unwrap();
        (DeviceOrchestrator::new(topology, executor), node.id)
    }

    fn request(node_id: &str, name: &str) -> DeviceAddRequest {
        DeviceAddRequest {
            device: Device {
                name: name.into(),
                weight: 0,
            },
            node_id: node_id.into(),
        }
    }

    #[tokio::test]
    async fn test_add_device() {
        let executor = Arc::new(FakeExecutor::default());
        let (orch, node_id) = fixture(executor.clone());

        let info = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();
        assert_eq!(info.storage.total, 1024 * 1024);
        assert_eq!(
            executor.setups.lock().as_slice(),
            &[call("node1.example.com", "/dev/sdb", &info.id)]
        );
        assert_eq!(orch.topology().device_extent_size(&info.id).unwrap(), 4096);
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_failed_setup_registers_nothing() {
        let executor = Arc::new(FakeExecutor {
            fail_setup: true,
            ..Default::default()
        });
        let (orch, node_id) = fixture(executor.clone());

        let err = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap_err();
        assert_matches!(err, Error::RemoteExecution { .. });
        assert!(orch.topology().node_info(&node_id).unwrap().devices.is_empty());
        assert!(executor.teardowns.lock().is_empty());
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_registered_device_is_never_reprovisioned() {
        let executor = Arc::new(FakeExecutor::default());
        let (orch, node_id) = fixture(executor.clone());
        orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();

        let err = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap_err();
        assert_matches!(err, Error::DuplicateName { kind: "device", .. });

        assert_eq!(executor.setups.lock().len(), 1);
        assert!(executor.teardowns.lock().is_empty());
        assert_eq!(orch.topology().node_info(&node_id).unwrap().devices.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_device_is_torn_down() {
        let (entered, release) = hold();
        let executor = Arc::new(FakeExecutor {
            hold_setup: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let (orch, node_id) = fixture(executor.clone());

        let add = {
            let orch = orch.clone();
            let req = request(&node_id, "/dev/sdb");
            tokio::spawn(async move { orch.add_device(req).await })
        };
        entered.notified().await;

        // The node disappears while its device is being provisioned
        orch.topology().remove_node(&node_id).unwrap();
        release.notify_one();

        assert_matches!(
            add.await.unwrap(),
            Err(Error::NotFound { kind: "node", .. })
        );
        let setups = executor.setups.lock();
        let teardowns = executor.teardowns.lock();
        assert_eq!(teardowns.as_slice(), setups.as_slice());
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let executor = Arc::new(FakeExecutor::default());
        let (orch, _) = fixture(executor.clone());
        assert_matches!(
            orch.add_device(request("missing", "/dev/sdb")).await,
            Err(Error::NotFound { kind: "node", .. })
        );
        assert!(executor.setups.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remove_device() {
        let executor = Arc::new(FakeExecutor::default());
        let (orch, node_id) = fixture(executor.clone());
        let info = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();

        orch.remove_device(&info.id).await.unwrap();
        assert_eq!(
            executor.teardowns.lock().as_slice(),
            &[call("node1.example.com", "/dev/sdb", &info.id)]
        );
        assert_matches!(
            orch.topology().device_info(&info.id),
            Err(Error::NotFound { kind: "device", .. })
        );
    }

    #[tokio::test]
    async fn test_remove_device_with_bricks() {
        let executor = Arc::new(FakeExecutor::default());
        let (orch, node_id) = fixture(executor.clone());
        let info = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();

        let topology = orch.topology();
        let volume = topology
            .create_volume(VolumeCreateRequest::new(1, Durability::replicate(1)))
            .unwrap();
        topology.place_brick(&volume.id, &info.id, 1024).unwrap();

        assert_matches!(
            orch.remove_device(&info.id).await,
            Err(Error::DeviceNotEmpty { bricks: 1, .. })
        );
        assert!(executor.teardowns.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_brick_lands_during_teardown() {
        let (entered, release) = hold();
        let executor = Arc::new(FakeExecutor {
            hold_teardown: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let (orch, node_id) = fixture(executor);
        let info = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();
        let volume = orch
            .topology()
            .create_volume(VolumeCreateRequest::new(1, Durability::replicate(1)))
            .unwrap();

        let remove = {
            let orch = orch.clone();
            let device_id = info.id.clone();
            tokio::spawn(async move { orch.remove_device(&device_id).await })
        };
        entered.notified().await;

        assert_matches!(
            orch.topology().place_brick(&volume.id, &info.id, 1024),
            Err(Error::DeviceDraining { .. })
        );

        release.notify_one();
        remove.await.unwrap().unwrap();
        assert!(orch.topology().volume_info(&volume.id).unwrap().bricks.is_empty());
        orch.topology().verify().unwrap();
    }

    #[tokio::test]
    async fn test_failed_teardown_reopens_device() {
        let executor = Arc::new(FakeExecutor {
            fail_teardown: true,
            ..Default::default()
        });
        let (orch, node_id) = fixture(executor);
        let info = orch.add_device(request(&node_id, "/dev/sdb")).await.unwrap();

        assert_matches!(
            orch.remove_device(&info.id).await,
            Err(Error::Teardown { .. })
        );

        let topology = orch.topology();
        assert!(!topology.is_draining(&info.id).unwrap());
        let volume = topology
            .create_volume(VolumeCreateRequest::new(1, Durability::replicate(1)))
            .unwrap();
        topology.place_brick(&volume.id, &info.id, 1024).unwrap();
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_setup_on_same_device() {
        let (entered, release) = hold();
        let executor = Arc::new(FakeExecutor {
            hold_setup: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let (orch, node_id) = fixture(executor);

        let first = {
            let orch = orch.clone();
            let req = request(&node_id, "/dev/sdb");
            tokio::spawn(async move { orch.add_device(req).await })
        };
        entered.notified().await;

        let in_flight = orch.in_flight();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].kind, OperationKind::Setup);

        assert_matches!(
            orch.add_device(request(&node_id, "/dev/sdb")).await,
            Err(Error::OperationInProgress { .. })
        );

        release.notify_one();
        first.await.unwrap().unwrap();
        assert!(orch.in_flight().is_empty());
    }
}

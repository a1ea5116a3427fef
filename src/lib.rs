//! Gluster Provisioner
//!
//! Device lifecycle and topology bookkeeping for a GlusterFS storage cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Device Orchestrator                           │
//! │        (add / remove device, one operation per node device)          │
//! ├───────────────────────────────────┬──────────────────────────────────┤
//! │          Device Executor          │         Topology Model           │
//! │  pvcreate / vgcreate / vgdisplay  │  cluster → node → device → brick │
//! │  vgremove / pvremove, rollback    │  volumes, durability, capacity   │
//! ├───────────────────────────────────┤  (per-cluster single writer)     │
//! │      Remote Command Runner        │                                  │
//! │        (ssh, batch timeout)       │                                  │
//! └───────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Device orchestrator
//! - [`executor`]: LVM provisioning protocol, capacity report parser, ssh runner
//! - [`topology`]: Storage topology model and records
//! - [`domain`]: Port traits between provisioning logic and remote hosts
//! - [`config`]: YAML configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod executor;
pub mod topology;

// Re-export commonly used types
pub use config::{Config, LoggingConfig, ProvisionerConfig, SshConfig, TeardownPolicy, TopologyConfig};

pub use controlplane::{DeviceOrchestrator, InFlightOperation, OperationKind};

pub use domain::ports::{
    DeviceCapacity, DeviceExecutor, DeviceExecutorRef, RemoteCommandRunner, RemoteCommandRunnerRef,
};

pub use error::{Error, Result};

pub use executor::{DeviceProvisioner, SshCommandRunner, VgCapacity};

pub use topology::{
    BrickInfo, Durability, StorageSize, Topology, TopologyEvent, TopologyStats, VolumeCreateRequest,
    VolumeInfo, VolumeInfoResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Error types for the GlusterFS provisioner
//!
//! Provides structured error types for remote device provisioning, capacity
//! report parsing, and storage topology bookkeeping.

use std::num::ParseIntError;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Remote Execution Errors
    // =========================================================================
    #[error("Remote command failed on {host}: {reason}")]
    RemoteExecution { host: String, reason: String },

    #[error("Remote commands on {host} timed out after {timeout_secs}s")]
    RemoteTimeout { host: String, timeout_secs: u64 },

    #[error("Teardown of {device} on {host} failed: {reason}")]
    Teardown {
        host: String,
        device: String,
        reason: String,
    },

    #[error("Provisioning already in progress for {device} on node {node_id}")]
    OperationInProgress { node_id: String, device: String },

    // =========================================================================
    // Capacity Report Errors
    // =========================================================================
    #[error("Malformed capacity report: {fields} fields, expected at least {expected}")]
    MalformedReport { fields: usize, expected: usize },

    #[error("Capacity report field {field} is not an unsigned integer: {value:?}")]
    NumericParse {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("{kind} already exists: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("{kind} name already in use: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Device {device_id} still holds {bricks} brick(s)")]
    DeviceNotEmpty { device_id: String, bricks: usize },

    #[error("Device {device_id} is being torn down")]
    DeviceDraining { device_id: String },

    #[error("Node {node_id} still owns {devices} device(s)")]
    NodeNotEmpty { node_id: String, devices: usize },

    #[error("Cluster {cluster_id} still owns {nodes} node(s) and {volumes} volume(s)")]
    ClusterNotEmpty {
        cluster_id: String,
        nodes: usize,
        volumes: usize,
    },

    #[error("Insufficient capacity on device {device_id}: requested {requested} KiB, available {available} KiB")]
    InsufficientCapacity {
        device_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Device {device_id} is not in the cluster of volume {volume_id}")]
    CrossClusterPlacement { volume_id: String, device_id: String },

    #[error("Invalid durability: {0}")]
    InvalidDurability(String),

    #[error("Insufficient nodes: durability requires {required}, cluster has {available}")]
    InsufficientNodes { required: usize, available: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Capacity bookkeeping violated on {entity}: total {total} != free {free} + used {used}")]
    CapacityInvariant {
        entity: String,
        total: u64,
        free: u64,
        used: u64,
    },

    // =========================================================================
    // Serialization / IO Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error came from the remote side and may clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RemoteExecution { .. }
                | Error::RemoteTimeout { .. }
                | Error::OperationInProgress { .. }
        )
    }

    /// Check if this error is a topology precondition failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::DuplicateId { .. }
                | Error::DuplicateName { .. }
                | Error::NotFound { .. }
                | Error::DeviceNotEmpty { .. }
                | Error::DeviceDraining { .. }
                | Error::NodeNotEmpty { .. }
                | Error::ClusterNotEmpty { .. }
                | Error::InsufficientCapacity { .. }
                | Error::CrossClusterPlacement { .. }
                | Error::InsufficientNodes { .. }
        )
    }

    /// Check if an orchestrator could sensibly retry the same request later.
    /// Precondition failures are not retryable.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

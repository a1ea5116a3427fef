//! Storage Topology
//!
//! Clusters, nodes, devices, bricks and volumes, with capacity accounting
//! that is serialized per cluster.

pub mod durability;
pub mod events;
pub mod model;
mod render;
pub mod types;

pub use durability::*;
pub use events::*;
pub use model::*;
pub use types::*;

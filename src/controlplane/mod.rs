//! Control Plane Module
//!
//! Coordinates device provisioning on storage nodes with the topology model.

pub mod orchestrator;

pub use orchestrator::*;

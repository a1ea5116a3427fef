//! Executor Module
//!
//! Remote side of the device lifecycle: the LVM provisioning protocol, the
//! `vgdisplay` capacity parser, and the SSH transport that carries both.

pub mod device;
pub mod report;
pub mod ssh;

#[cfg(test)]
pub(crate) mod mock;

pub use device::*;
pub use report::*;
pub use ssh::*;

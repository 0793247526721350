//! # fencer-isolator
//!
//! Per-container resource isolators driven by an external containerizer.
//!
//! Each isolator is a single-writer actor: a cloneable handle sends
//! commands over a channel to a task that exclusively owns the
//! per-container tables, and the same task runs the isolator's periodic
//! reconciliation. Two isolators are provided:
//!
//! - [`DiskIsolator`]: assigns XFS project IDs to sandboxes and persistent
//!   volumes, applies the configured quota policy, and reclaims IDs once
//!   their directories are gone.
//! - [`NetworkPortsIsolator`]: attributes listening sockets to containers
//!   through cgroup membership and raises a limitation for ports outside
//!   the container's grant.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod disk;
pub mod isolator;
pub mod metrics;
pub mod ports;
pub mod signal;

pub use disk::DiskIsolator;
pub use isolator::Isolator;
pub use ports::NetworkPortsIsolator;
pub use signal::{LimitationSignal, LimitationWatch};

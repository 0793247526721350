//! # fencer-core
//!
//! Low-level Linux probes and quota primitives for the fencer isolators.
//!
//! This crate provides narrow, stateless wrappers over:
//! - **Cgroups**: enumerating the processes of a container's cgroup.
//! - **Sockets**: the kernel's listening-socket table and per-process
//!   socket descriptors.
//! - **Quotas**: XFS project IDs, project quota records, and the
//!   filesystem/device lookups they depend on.
//! - **Capabilities**: the privilege probe required for quota management.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod net;
pub mod process;
pub mod quota;

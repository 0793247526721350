//! # fencer-common
//!
//! Shared types, resource model, interval sets, configuration, and error
//! definitions used across the fencer workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod interval;
pub mod range;
pub mod resources;
pub mod types;

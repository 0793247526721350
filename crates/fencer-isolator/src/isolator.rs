//! The lifecycle contract shared by all isolators.

use std::collections::HashSet;
use std::future::Future;

use fencer_common::error::Result;
use fencer_common::resources::Resources;
use fencer_common::types::{
    ContainerConfig, ContainerId, ContainerLaunchInfo, ContainerState, ResourceStatistics,
};

use crate::signal::LimitationWatch;

/// One dimension of per-container resource control.
///
/// The containerizer drives each container through
/// `prepare` → `update`* → `watch` → `cleanup`, and calls `recover` once
/// after a restart. Calls for one container arrive in the order they are
/// issued.
pub trait Isolator: Send + Sync {
    /// Returns whether nested containers are supported.
    fn supports_nesting(&self) -> bool {
        true
    }

    /// Rebuilds in-memory state from the host after a restart.
    ///
    /// `states` lists the containers the containerizer still manages;
    /// `orphans` lists containers it knows about and will clean up itself.
    ///
    /// # Errors
    ///
    /// Returns an error if host state cannot be read reliably or two
    /// recovered records share a container ID.
    fn recover(
        &self,
        states: Vec<ContainerState>,
        orphans: HashSet<ContainerId>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Prepares a container before its process starts.
    ///
    /// # Errors
    ///
    /// Returns [`FencerError::AlreadyPrepared`] if the container is known,
    /// or the failure that prevented isolation from being set up.
    ///
    /// [`FencerError::AlreadyPrepared`]: fencer_common::error::FencerError::AlreadyPrepared
    fn prepare(
        &self,
        container_id: &ContainerId,
        config: ContainerConfig,
    ) -> impl Future<Output = Result<Option<ContainerLaunchInfo>>> + Send;

    /// Applies a changed resource grant. Unknown containers are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the new grant could not be applied.
    fn update(
        &self,
        container_id: &ContainerId,
        resources: Resources,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns a watch that resolves at most once, when the container
    /// violates its grant. Unknown containers get a watch that never
    /// resolves.
    ///
    /// # Errors
    ///
    /// Returns an error only if the isolator has stopped.
    fn watch(&self, container_id: &ContainerId) -> impl Future<Output = Result<LimitationWatch>> + Send;

    /// Reports current resource usage. The default reports nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if usage could not be read.
    fn usage(
        &self,
        _container_id: &ContainerId,
    ) -> impl Future<Output = Result<ResourceStatistics>> + Send {
        async { Ok(ResourceStatistics::default()) }
    }

    /// Releases all bookkeeping for a container. Unknown containers are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only if the isolator has stopped.
    fn cleanup(&self, container_id: &ContainerId) -> impl Future<Output = Result<()>> + Send;
}

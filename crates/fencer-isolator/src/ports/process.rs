//! State owned by the network-ports isolator actor.

use std::collections::{HashMap, HashSet};

use fencer_common::error::{FencerError, Result};
use fencer_common::interval::IntervalSet;
use fencer_common::resources::Resources;
use fencer_common::types::{
    ContainerConfig, ContainerId, ContainerLaunchInfo, ContainerLimitation, ContainerState,
    LimitationReason, LimitedResource,
};

use super::collector::Listeners;
use crate::signal::{LimitationSignal, LimitationWatch};

#[derive(Debug, Default)]
struct Info {
    /// `None` leaves the container unconstrained.
    ports: Option<IntervalSet<u16>>,
    limitation: LimitationSignal,
}

/// The ports isolator's per-container table.
#[derive(Debug, Default)]
pub struct NetworkPortsProcess {
    infos: HashMap<ContainerId, Info>,
}

impl NetworkPortsProcess {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks the containers the containerizer still manages. Their grants
    /// are unknown until the next update, so they start unconstrained.
    ///
    /// # Errors
    ///
    /// Returns [`FencerError::DuplicateContainer`] if a container is listed
    /// twice or already tracked.
    pub fn recover(&mut self, states: &[ContainerState], _orphans: &HashSet<ContainerId>) -> Result<()> {
        for state in states {
            if self.infos.contains_key(&state.container_id) {
                return Err(FencerError::DuplicateContainer {
                    id: state.container_id.to_string(),
                });
            }
            let _ = self.infos.insert(state.container_id.clone(), Info::default());
        }
        Ok(())
    }

    /// Starts tracking a container with its initial grant.
    ///
    /// # Errors
    ///
    /// Returns [`FencerError::AlreadyPrepared`] if the container is known.
    pub fn prepare(
        &mut self,
        container_id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        if self.infos.contains_key(container_id) {
            return Err(FencerError::AlreadyPrepared {
                id: container_id.to_string(),
            });
        }
        let _ = self.infos.insert(container_id.clone(), Info::default());
        self.update(container_id, &config.resources);
        Ok(None)
    }

    /// Replaces the container's grant. A grant without ports leaves the
    /// previous one in place.
    pub fn update(&mut self, container_id: &ContainerId, resources: &Resources) {
        let Some(info) = self.infos.get_mut(container_id) else {
            tracing::warn!(container_id = %container_id, "ignoring update for unknown container");
            return;
        };
        match &resources.ports {
            Some(ports) => {
                tracing::debug!(container_id = %container_id, ports = %ports, "updated port grant");
                info.ports = Some(ports.clone());
            }
            None => tracing::debug!(container_id = %container_id, "no ports in grant, keeping previous"),
        }
    }

    /// Returns a watch on the container's limitation; a never-resolving
    /// watch for unknown containers.
    #[must_use]
    pub fn watch(&self, container_id: &ContainerId) -> LimitationWatch {
        if let Some(info) = self.infos.get(container_id) {
            return info.limitation.subscribe();
        }
        tracing::warn!(container_id = %container_id, "ignoring watch for unknown container");
        LimitationWatch::pending()
    }

    /// Stops tracking a container.
    pub fn cleanup(&mut self, container_id: &ContainerId) {
        if self.infos.remove(container_id).is_none() {
            tracing::info!(container_id = %container_id, "ignoring cleanup for unknown container");
        }
    }

    /// Containers to include in the next scan.
    #[must_use]
    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.infos.keys().cloned().collect()
    }

    /// The current grant of a container; `None` if unknown or
    /// unconstrained.
    #[must_use]
    pub fn grant(&self, container_id: &ContainerId) -> Option<&IntervalSet<u16>> {
        self.infos.get(container_id)?.ports.as_ref()
    }

    /// Raises a limitation for every constrained container listening on a
    /// port outside its grant.
    pub fn check(&self, listeners: &Listeners) {
        for (container_id, info) in &self.infos {
            let (Some(observed), Some(granted)) = (listeners.get(container_id), &info.ports) else {
                continue;
            };
            if granted.contains_set(observed) {
                continue;
            }

            let unallocated = observed - granted;
            let message =
                format!("Container {container_id} is listening on unallocated port(s) {unallocated}");
            let limitation = ContainerLimitation::new(
                LimitedResource::Ports(unallocated),
                message.clone(),
                LimitationReason::Ports,
            );
            if info.limitation.set(limitation) {
                tracing::warn!(container_id = %container_id, "{message}");
            }
        }
    }
}

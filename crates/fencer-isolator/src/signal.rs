//! Single-resolution limitation signal.
//!
//! A [`LimitationSignal`] is owned by a container record and written at
//! most once; any number of [`LimitationWatch`]es can observe it. Dropping
//! the signal with the record leaves outstanding watches pending forever.

use fencer_common::types::ContainerLimitation;
use tokio::sync::watch;

/// Write-once cell holding a container's limitation.
#[derive(Debug)]
pub struct LimitationSignal {
    tx: watch::Sender<Option<ContainerLimitation>>,
}

impl LimitationSignal {
    /// Creates an unresolved signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Resolves the signal with `limitation`.
    ///
    /// Returns `false` and leaves the stored value untouched if the signal
    /// was already resolved.
    pub fn set(&self, limitation: ContainerLimitation) -> bool {
        let mut pending = Some(limitation);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        })
    }

    /// Returns whether the signal has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Returns a new watch on this signal.
    #[must_use]
    pub fn subscribe(&self) -> LimitationWatch {
        LimitationWatch(Some(self.tx.subscribe()))
    }
}

impl Default for LimitationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a [`LimitationSignal`].
#[derive(Debug, Clone)]
pub struct LimitationWatch(Option<watch::Receiver<Option<ContainerLimitation>>>);

impl LimitationWatch {
    /// A watch that never resolves.
    #[must_use]
    pub const fn pending() -> Self {
        Self(None)
    }

    /// Returns the limitation if it has already been raised.
    #[must_use]
    pub fn peek(&self) -> Option<ContainerLimitation> {
        self.0.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// Waits for the limitation. Never returns if the signal is dropped
    /// unresolved or this is a [`pending`](Self::pending) watch.
    pub async fn wait(self) -> ContainerLimitation {
        if let Some(mut rx) = self.0 {
            let resolved = match rx.wait_for(Option::is_some).await {
                Ok(value) => (*value).clone(),
                Err(_) => None,
            };
            if let Some(limitation) = resolved {
                return limitation;
            }
        }
        std::future::pending().await
    }
}

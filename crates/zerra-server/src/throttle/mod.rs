//! Per-type concurrency throttles.
//!
//! Every provider and message type served by the router must be registered
//! with a fixed capacity during server setup. At request time the router
//! resolves the type's slot (an unknown type is a configuration fault and
//! consumes nothing) and then waits for a permit. Permits are released when
//! dropped, so cancellation and error paths give capacity back without any
//! explicit bookkeeping.
//!
//! Waiters are served in arrival order: tokio's semaphore queues acquirers
//! FIFO.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

const THROTTLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::throttle");

#[derive(Debug, Clone)]
struct Slot {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Registry of per-type counting semaphores.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    slots: DashMap<String, Slot>,
}

impl ThrottleRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `type_name` with the given capacity.
    ///
    /// The first registration for a type wins; later calls leave the existing
    /// slot untouched and return `false`. A capacity of zero is clamped to one.
    pub fn register(&self, type_name: impl Into<String>, capacity: usize) -> bool {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        match self.slots.entry(type_name.into()) {
            Entry::Occupied(entry) => {
                debug!(
                    target: THROTTLE_TARGET,
                    type_name = entry.key().as_str(),
                    "throttle already registered; keeping first capacity"
                );
                false
            }
            Entry::Vacant(entry) => {
                debug!(
                    target: THROTTLE_TARGET,
                    type_name = entry.key().as_str(),
                    capacity,
                    "throttle registered"
                );
                entry.insert(Slot {
                    semaphore: Arc::new(Semaphore::new(capacity)),
                    capacity,
                });
                true
            }
        }
    }

    /// Resolves the slot for `type_name` without consuming capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Unregistered`] when the type was never
    /// registered.
    pub fn resolve(&self, type_name: &str) -> Result<Throttle, ThrottleError> {
        self.slots
            .get(type_name)
            .map(|slot| Throttle {
                type_name: type_name.to_owned(),
                semaphore: Arc::clone(&slot.semaphore),
            })
            .ok_or_else(|| ThrottleError::Unregistered {
                type_name: type_name.to_owned(),
            })
    }

    /// Resolves the slot for `type_name` and waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError`] when the type is unknown or its semaphore
    /// was closed.
    pub async fn acquire(&self, type_name: &str) -> Result<ThrottlePermit, ThrottleError> {
        self.resolve(type_name)?.acquire().await
    }

    /// Registered capacity for `type_name`.
    #[must_use]
    pub fn capacity(&self, type_name: &str) -> Option<usize> {
        self.slots.get(type_name).map(|slot| slot.capacity)
    }

    /// Permits currently available for `type_name`.
    #[must_use]
    pub fn available(&self, type_name: &str) -> Option<usize> {
        self.slots
            .get(type_name)
            .map(|slot| slot.semaphore.available_permits())
    }

    /// Returns `true` when `type_name` has a registered slot.
    #[must_use]
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.slots.contains_key(type_name)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Resolved slot for a single type.
#[derive(Debug, Clone)]
pub struct Throttle {
    type_name: String,
    semaphore: Arc<Semaphore>,
}

impl Throttle {
    /// Waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Closed`] if the semaphore was closed.
    pub async fn acquire(self) -> Result<ThrottlePermit, ThrottleError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ThrottleError::Closed {
                type_name: self.type_name.clone(),
            })?;
        Ok(ThrottlePermit {
            type_name: self.type_name,
            _permit: permit,
        })
    }

    /// Type this slot throttles.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Held while a call runs; dropping it returns the slot.
#[derive(Debug)]
pub struct ThrottlePermit {
    type_name: String,
    _permit: OwnedSemaphorePermit,
}

impl ThrottlePermit {
    /// Type this permit was issued for.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Errors raised while resolving or acquiring throttles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleError {
    /// The type was never registered; a setup bug rather than a request error.
    #[error("no throttle registered for '{type_name}'")]
    Unregistered {
        /// Type that was looked up.
        type_name: String,
    },
    /// The semaphore was closed.
    #[error("throttle for '{type_name}' is closed")]
    Closed {
        /// Type whose throttle was closed.
        type_name: String,
    },
}

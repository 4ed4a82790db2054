//! Global admission gate for command processing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounds the number of commands processed concurrently across all types.
#[derive(Debug, Clone, Default)]
pub struct ReceiveCounter {
    ceiling: Option<usize>,
    in_flight: Arc<AtomicUsize>,
}

impl ReceiveCounter {
    /// Builds a counter; `None` admits without limit.
    #[must_use]
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            ceiling,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Admits one command if the ceiling allows it.
    ///
    /// The returned guard marks the command complete when dropped.
    #[must_use]
    pub fn try_begin(&self) -> Option<ReceiveGuard> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match self.ceiling {
                    Some(ceiling) if current >= ceiling => None,
                    _ => current.checked_add(1),
                }
            })
            .ok()
            .map(|_| ReceiveGuard {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    /// Commands currently admitted.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn ceiling(&self) -> Option<usize> {
        self.ceiling
    }
}

/// Admission held by one command; dropping it completes the receive.
#[derive(Debug)]
pub struct ReceiveGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

//! Device-wide session ceiling.
//!
//! The device accepts only a few simultaneous TCP sessions. Every
//! connection this crate opens (notification, pooled, dedicated) holds a
//! [`SessionPermit`] for its whole lifetime, so the ceiling holds across
//! all three paths.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// SessionBudget
// ============================================================================

/// Counts open sessions against the device ceiling.
#[derive(Debug, Clone)]
pub struct SessionBudget {
    inner: Arc<BudgetInner>,
}

#[derive(Debug)]
struct BudgetInner {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    peak: AtomicUsize,
}

impl SessionBudget {
    /// Creates a budget allowing `ceiling` concurrent sessions.
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                semaphore: Arc::new(Semaphore::new(ceiling)),
                ceiling,
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a slot without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SessionPermit> {
        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok()?;
        Some(self.track(permit))
    }

    /// Waits for a slot.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the budget has been shut down.
    pub async fn acquire(&self) -> Result<SessionPermit> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(self.track(permit))
    }

    /// Returns the configured ceiling.
    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.inner.ceiling
    }

    /// Returns the number of sessions currently holding a slot.
    #[inline]
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.ceiling - self.inner.semaphore.available_permits()
    }

    /// Returns the highest number of simultaneous sessions seen.
    #[inline]
    #[must_use]
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> SessionPermit {
        let in_use = self.in_use();
        self.inner.peak.fetch_max(in_use, Ordering::Relaxed);
        trace!(in_use, ceiling = self.inner.ceiling, "Session slot taken");
        SessionPermit { _permit: permit }
    }
}

// ============================================================================
// SessionPermit
// ============================================================================

/// One occupied session slot; released on drop.
///
/// Keep it alive until after the socket is closed.
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

// ============================================================================
// Tests
// ============================================================================

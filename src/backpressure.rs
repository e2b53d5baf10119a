//! Backpressure handling for outbound frames.
//!
//! Every frame accepted for sending holds one slot until the writer task has
//! written it (or skipped it). When all slots are taken, senders wait for a
//! release and give up after the configured timeout.
//!
//! # Configuration
//!
//! - `max_pending`: Maximum number of pending frames (default: 1024)
//! - Timeout: How long to wait when backpressure is active (default: 5s)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{ConnectorError, Result};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default backpressure timeout (how long to wait for space to become available).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Inner {
    pending: AtomicUsize,
    max_pending: usize,
    timeout: Duration,
    released: Notify,
}

/// Shared counter of frames queued but not yet written.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    inner: Arc<Inner>,
}

impl BackpressureController {
    /// Create a controller with the given limit and wait timeout.
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(0),
                max_pending,
                timeout,
                released: Notify::new(),
            }),
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending_count() >= self.inner.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_pending(&self) -> usize {
        self.inner.max_pending
    }

    /// Try to reserve a slot without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_reserve(&self) -> Result<BackpressureGuard> {
        if self.try_acquire() {
            Ok(BackpressureGuard::new(self.clone()))
        } else {
            Err(ConnectorError::BackpressureTimeout)
        }
    }

    /// Reserve a slot, waiting for a release if necessary.
    ///
    /// Returns `Err(BackpressureTimeout)` if the timeout is reached.
    pub async fn reserve(&self) -> Result<BackpressureGuard> {
        let deadline = Instant::now() + self.inner.timeout;

        loop {
            // Register interest before checking so a release in between is not lost.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire() {
                return Ok(BackpressureGuard::new(self.clone()));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ConnectorError::BackpressureTimeout);
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.inner.pending.load(Ordering::Acquire);
        loop {
            if current >= self.inner.max_pending {
                return false;
            }
            match self.inner.pending.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        self.inner.released.notify_one();
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, DEFAULT_TIMEOUT)
    }
}

/// One reserved slot. Released on drop.
#[derive(Debug)]
pub struct BackpressureGuard {
    controller: BackpressureController,
}

impl BackpressureGuard {
    fn new(controller: BackpressureController) -> Self {
        Self { controller }
    }
}

impl Drop for BackpressureGuard {
    fn drop(&mut self) {
        self.controller.release();
    }
}

//! In-flight call tracking for graceful channel shutdown.
//!
//! # Responsibilities
//! - Count calls currently open on the processor channel
//! - Generate unique call IDs for tracing
//! - Refuse new calls once the channel starts closing
//! - Let shutdown wait (bounded) for the count to reach zero

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

/// Global atomic counter for call IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a processor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    /// Generate a new unique call ID.
    pub fn new() -> Self {
        Self(CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Shared {
    active: AtomicU64,
    closing: AtomicBool,
    drained: Notify,
}

/// Tracks open calls. Cheap to clone; clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct InflightCalls {
    shared: Arc<Shared>,
}

impl InflightCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new call. Returns `None` once closing has begun.
    pub fn track(&self) -> Option<CallGuard> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return None;
        }
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_inflight_calls(active);
        Some(CallGuard {
            shared: Arc::clone(&self.shared),
            id: CallId::new(),
        })
    }

    /// Get current open call count.
    pub fn active_count(&self) -> u64 {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Stop admitting new calls.
    pub fn begin_close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Wait until every open call has finished, or `grace` elapses.
    ///
    /// Returns `true` if the count reached zero in time.
    pub async fn wait_drained(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.shared.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a call's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct CallGuard {
    shared: Arc<Shared>,
    id: CallId,
}

impl CallGuard {
    /// Get this call's ID.
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let remaining = self.shared.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_inflight_calls(remaining);
        if remaining == 0 {
            self.shared.drained.notify_waiters();
        }
        tracing::trace!(call_id = %self.id, "Processor call finished");
    }
}

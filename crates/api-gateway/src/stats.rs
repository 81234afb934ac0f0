//! Atomic gateway statistics counters.
//!
//! Lock-free counters for request volume and retry behaviour, exposed on
//! `GET /api/stats`. All atomics use `Relaxed` ordering: these are monotonic
//! display counters with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: AtomicU64,
    upstream_attempts: AtomicU64,
    retries: AtomicU64,
    relayed: AtomicU64,
    exhausted: AtomicU64,
    dispatch_errors: AtomicU64,
    cancelled: AtomicU64,
    deadline_exceeded: AtomicU64,
    rejected: AtomicU64,
}

/// Thread-safe atomic gateway statistics. Cheap to clone (Arc).
#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub upstream_attempts: u64,
    pub retries: u64,
    pub relayed: u64,
    pub exhausted: u64,
    pub dispatch_errors: u64,
    pub cancelled: u64,
    pub deadline_exceeded: u64,
    pub rejected: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_attempts(&self) {
        self.inner.upstream_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend response (any status) made it back to the caller.
    pub fn inc_relayed(&self) {
        self.inner.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exhausted(&self) {
        self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Unknown service, unusable target or bad path parameter.
    pub fn inc_dispatch_errors(&self) {
        self.inner.dispatch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Client disconnect or shutdown before a terminal outcome.
    pub fn inc_cancelled(&self) {
        self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deadline_exceeded(&self) {
        self.inner.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    /// An upstream response that could not be relayed (oversized body).
    pub fn inc_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            upstream_attempts: self.inner.upstream_attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            relayed: self.inner.relayed.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
            dispatch_errors: self.inner.dispatch_errors.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            deadline_exceeded: self.inner.deadline_exceeded.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}

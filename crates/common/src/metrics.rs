//! Metrics collection for tally.
//!
//! Process-wide counters for the vote pipeline. They are cheap relaxed
//! atomics; [`Metrics::snapshot`] gives a consistent-enough copy for the
//! metrics endpoint.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    // === Ingest ===
    /// Responses persisted.
    pub votes_accepted: AtomicU64,
    /// Submissions rejected by validation.
    pub votes_rejected: AtomicU64,
    /// Vote events dropped because the engine channel was full.
    pub vote_events_dropped: AtomicU64,

    // === Aggregation ===
    /// Recounts run on the immediate path.
    pub recomputes_immediate: AtomicU64,
    /// Recounts run by a deferred timer or the sweep.
    pub recomputes_deferred: AtomicU64,
    /// Deferred timers that found themselves superseded.
    pub stale_timers: AtomicU64,
    /// Recounts that failed against the store.
    pub recompute_failures: AtomicU64,
    /// Lost compare-and-swap races on the control state.
    pub cas_conflicts: AtomicU64,
    /// Snapshot writes rejected because a newer generation was stored.
    pub snapshots_superseded: AtomicU64,

    // === Real-time ===
    /// Active SSE connections.
    pub sse_connections_active: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub votes_accepted: u64,
    pub votes_rejected: u64,
    pub vote_events_dropped: u64,
    pub recomputes_immediate: u64,
    pub recomputes_deferred: u64,
    pub stale_timers: u64,
    pub recompute_failures: u64,
    pub cas_conflicts: u64,
    pub snapshots_superseded: u64,
    pub sse_connections_active: u64,
}

impl MetricsSnapshot {
    /// Total recounts of either kind.
    #[must_use]
    pub const fn recomputes_total(&self) -> u64 {
        self.recomputes_immediate + self.recomputes_deferred
    }
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a persisted response.
    pub fn record_vote_accepted(&self) {
        self.votes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected submission.
    pub fn record_vote_rejected(&self) {
        self.votes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a vote event that never reached the engine.
    pub fn record_vote_event_dropped(&self) {
        self.vote_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed recount.
    pub fn record_recompute(&self, deferred: bool) {
        if deferred {
            self.recomputes_deferred.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recomputes_immediate.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a deferred timer that no-opped.
    pub fn record_stale_timer(&self) {
        self.stale_timers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recount that failed.
    pub fn record_recompute_failure(&self) {
        self.recompute_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lost compare-and-swap.
    pub fn record_cas_conflict(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot write that lost to a newer generation.
    pub fn record_snapshot_superseded(&self) {
        self.snapshots_superseded.fetch_add(1, Ordering::Relaxed);
    }

    /// Track an SSE connection opening.
    pub fn sse_connected(&self) {
        self.sse_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Track an SSE connection closing.
    pub fn sse_disconnected(&self) {
        self.sse_connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Copy every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            votes_accepted: self.votes_accepted.load(Ordering::Relaxed),
            votes_rejected: self.votes_rejected.load(Ordering::Relaxed),
            vote_events_dropped: self.vote_events_dropped.load(Ordering::Relaxed),
            recomputes_immediate: self.recomputes_immediate.load(Ordering::Relaxed),
            recomputes_deferred: self.recomputes_deferred.load(Ordering::Relaxed),
            stale_timers: self.stale_timers.load(Ordering::Relaxed),
            recompute_failures: self.recompute_failures.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            snapshots_superseded: self.snapshots_superseded.load(Ordering::Relaxed),
            sse_connections_active: self.sse_connections_active.load(Ordering::Relaxed),
        }
    }
}

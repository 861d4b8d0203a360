//! Observability and Metrics
//!
//! Counters for negotiations, daemon calls and framed traffic.
//!
//! Uses atomic counters for thread-safe metrics collection. Each
//! `MultistreamSelect` and `DaemonApi` owns its own instance; there is no
//! process-wide collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one engine or session
#[derive(Debug)]
pub struct Metrics {
    /// Negotiations started (either role)
    pub negotiations_total: AtomicU64,
    /// Negotiations that agreed on a protocol
    pub negotiations_success: AtomicU64,
    /// Negotiations that ended without agreement
    pub negotiations_failed: AtomicU64,
    /// `na` replies sent by the responder
    pub na_sent: AtomicU64,
    /// Handlers that returned an error
    pub handler_errors: AtomicU64,
    /// Daemon requests sent
    pub rpc_total: AtomicU64,
    /// Daemon requests answered with a remote error
    pub rpc_remote_errors: AtomicU64,
    /// Daemon requests that failed locally
    pub rpc_local_errors: AtomicU64,
    /// Inbound streams accepted from the daemon
    pub streams_accepted: AtomicU64,
    /// Inbound streams dropped for lack of a handler
    pub streams_dropped: AtomicU64,
    /// Pubsub messages delivered to callbacks
    pub pubsub_messages: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            negotiations_total: AtomicU64::new(0),
            negotiations_success: AtomicU64::new(0),
            negotiations_failed: AtomicU64::new(0),
            na_sent: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            rpc_total: AtomicU64::new(0),
            rpc_remote_errors: AtomicU64::new(0),
            rpc_local_errors: AtomicU64::new(0),
            streams_accepted: AtomicU64::new(0),
            streams_dropped: AtomicU64::new(0),
            pubsub_messages: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn negotiation_attempt(&self) {
        self.negotiations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn negotiation_success(&self) {
        self.negotiations_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn negotiation_failed(&self) {
        self.negotiations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn na_reply(&self) {
        self.na_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rpc_sent(&self) {
        self.rpc_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rpc_remote_error(&self) {
        self.rpc_remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rpc_local_error(&self) {
        self.rpc_local_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_accepted(&self) {
        self.streams_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_dropped(&self) {
        self.streams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pubsub_message(&self) {
        self.pubsub_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            negotiations_total: self.negotiations_total.load(Ordering::Relaxed),
            negotiations_success: self.negotiations_success.load(Ordering::Relaxed),
            negotiations_failed: self.negotiations_failed.load(Ordering::Relaxed),
            na_sent: self.na_sent.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            rpc_total: self.rpc_total.load(Ordering::Relaxed),
            rpc_remote_errors: self.rpc_remote_errors.load(Ordering::Relaxed),
            rpc_local_errors: self.rpc_local_errors.load(Ordering::Relaxed),
            streams_accepted: self.streams_accepted.load(Ordering::Relaxed),
            streams_dropped: self.streams_dropped.load(Ordering::Relaxed),
            pubsub_messages: self.pubsub_messages.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log a summary at info level
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            negotiations = s.negotiations_total,
            negotiated = s.negotiations_success,
            rpc = s.rpc_total,
            rpc_remote_errors = s.rpc_remote_errors,
            rpc_local_errors = s.rpc_local_errors,
            streams = s.streams_accepted,
            uptime_secs = s.uptime_secs,
            "Metrics summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub negotiations_total: u64,
    pub negotiations_success: u64,
    pub negotiations_failed: u64,
    pub na_sent: u64,
    pub handler_errors: u64,
    pub rpc_total: u64,
    pub rpc_remote_errors: u64,
    pub rpc_local_errors: u64,
    pub streams_accepted: u64,
    pub streams_dropped: u64,
    pub pubsub_messages: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.negotiation_attempt();
        metrics.negotiation_attempt();
        metrics.negotiation_success();
        metrics.na_reply();
        metrics.rpc_sent();
        metrics.rpc_remote_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.negotiations_total, 2);
        assert_eq!(snapshot.negotiations_success, 1);
        assert_eq!(snapshot.na_sent, 1);
        assert_eq!(snapshot.rpc_total, 1);
        assert_eq!(snapshot.rpc_remote_errors, 1);
        assert_eq!(snapshot.rpc_local_errors, 0);
    }
}

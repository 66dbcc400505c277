//! Global atomic counters for attribution activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the CLI does so before exiting).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    commits_signed: AtomicU64,
    commits_rejected: AtomicU64,
    verifications: AtomicU64,
    verifications_valid: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            commits_signed: AtomicU64::new(0),
            commits_rejected: AtomicU64::new(0),
            verifications: AtomicU64::new(0),
            verifications_valid: AtomicU64::new(0),
        }
    }

    pub fn inc_commits_signed(&self) {
        self.commits_signed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commits_signed", "counter incremented");
    }

    pub fn inc_commits_rejected(&self) {
        self.commits_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commits_rejected", "counter incremented");
    }

    /// Count one verification, and one valid verification if `valid`.
    pub fn record_verification(&self, valid: bool) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        if valid {
            self.verifications_valid.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "verifications", valid, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            commits_signed = self.commits_signed(),
            commits_rejected = self.commits_rejected(),
            verifications = self.verifications(),
            verifications_valid = self.verifications_valid(),
        );
    }

    pub fn commits_signed(&self) -> u64 {
        self.commits_signed.load(Ordering::Relaxed)
    }

    pub fn commits_rejected(&self) -> u64 {
        self.commits_rejected.load(Ordering::Relaxed)
    }

    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }

    pub fn verifications_valid(&self) -> u64 {
        self.verifications_valid.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.commits_signed.store(0, Ordering::Relaxed);
        self.commits_rejected.store(0, Ordering::Relaxed);
        self.verifications.store(0, Ordering::Relaxed);
        self.verifications_valid.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_commits_signed();
        m.inc_commits_signed();
        m.inc_commits_rejected();
        m.record_verification(true);
        m.record_verification(false);

        assert_eq!(m.commits_signed(), 2);
        assert_eq!(m.commits_rejected(), 1);
        assert_eq!(m.verifications(), 2);
        assert_eq!(m.verifications_valid(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_commits_signed();
        m.inc_commits_rejected();
        m.record_verification(true);
        m.reset();
        assert_eq!(m.commits_signed(), 0);
        assert_eq!(m.commits_rejected(), 0);
        assert_eq!(m.verifications(), 0);
        assert_eq!(m.verifications_valid(), 0);
    }
}

//! Counters for validation activity

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsInfo {
    /// Calls to `request_validation`
    pub requested: usize,
    /// Requests dropped because one was already pending
    pub deduplicated: usize,
    /// Workers spawned
    pub dispatched: usize,
    /// Evaluations running right now
    pub evaluating: usize,
    /// Highest number of simultaneous evaluations seen
    pub peak_evaluating: usize,
    pub published: usize,
    pub discarded: usize,
    pub failed: usize,
}

impl StatsInfo {
    /// Dispatched validations that reached a terminal state
    pub fn finished(&self) -> usize {
        self.published + self.discarded + self.failed
    }

    /// Dispatched validations not yet finished
    pub fn outstanding(&self) -> usize {
        self.dispatched.saturating_sub(self.finished())
    }

    pub fn format_stats(&self) -> String {
        format!(
            "{} requested, {} deduplicated, {} published, {} discarded, {} failed (peak {} concurrent)",
            self.requested,
            self.deduplicated,
            self.published,
            self.discarded,
            self.failed,
            self.peak_evaluating
        )
    }
}

/// Shared validation counters
#[derive(Debug)]
pub struct ValidationStats {
    requested: AtomicUsize,
    deduplicated: AtomicUsize,
    dispatched: AtomicUsize,
    evaluating: AtomicUsize,
    peak_evaluating: AtomicUsize,
    published: AtomicUsize,
    discarded: AtomicUsize,
    failed: AtomicUsize,
    start_time: Instant,
}

impl Default for ValidationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationStats {
    pub fn new() -> Self {
        Self {
            requested: AtomicUsize::new(0),
            deduplicated: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
            evaluating: AtomicUsize::new(0),
            peak_evaluating: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark an evaluation as started and update the peak
    pub fn start_evaluation(&self) {
        let now = self.evaluating.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_evaluating.fetch_max(now, Ordering::SeqCst);
    }

    pub fn end_evaluation(&self) {
        self.evaluating.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn get_info(&self) -> StatsInfo {
        StatsInfo {
            requested: self.requested.load(Ordering::SeqCst),
            deduplicated: self.deduplicated.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            evaluating: self.evaluating.load(Ordering::SeqCst),
            peak_evaluating: self.peak_evaluating.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

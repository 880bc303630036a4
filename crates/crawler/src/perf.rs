// perf.rs - Timing and counters for the crawler's dispatch path
//
// Controlled via the CRAWLER_PERF environment variable:
//   CRAWLER_PERF=1        # log the duration of every analyzer callback
//   CRAWLER_PERF=verbose  # also warn when a callback exceeds its threshold

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static PERF_ENABLED: OnceLock<bool> = OnceLock::new();
static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Callbacks slower than this are reported in verbose mode
pub const SLOW_CALLBACK_MS: u64 = 250;

pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("CRAWLER_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("CRAWLER_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use crawler::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("syntax:document#1");
/// // ... do work ...
/// ```
pub struct TimingGuard {
    start: Instant,
    name: String,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    pub fn with_threshold(name: impl Into<String>, threshold_ms: u64) -> Self {
        Self::build(name.into(), Some(threshold_ms))
    }

    fn build(name: String, threshold_warn_ms: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms,
            enabled: is_enabled(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Running totals for one workspace's dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    items_dispatched: AtomicUsize,
    callbacks: AtomicUsize,
    faults: AtomicUsize,
    cancellations: AtomicUsize,
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub items_dispatched: usize,
    pub callbacks: usize,
    pub faults: usize,
    pub cancellations: usize,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_item(&self) {
        self.items_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            items_dispatched: self.items_dispatched.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self, label: &str) {
        if !is_enabled() {
            return;
        }
        let s = self.snapshot();
        log::info!(
            "[PERF] {}: {} items, {} callbacks, {} faults, {} cancelled",
            label,
            s.items_dispatched,
            s.callbacks,
            s.faults,
            s.cancellations
        );
    }
}

//! Run statistics: lock-free counters on the hot path, one histogram
//! behind a mutex, per-VU rows appended under a single writer lock when a
//! VU exits.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;

/// One completed request, as the runner reports it.
#[derive(Debug, Clone)]
pub struct RequestMeta<'a> {
    pub name: &'a str,
    /// None for transport failures before any response.
    pub status: Option<u16>,
    pub latency: Duration,
    pub bytes_received: u64,
    pub passed: bool,
    pub attempts: u32,
    pub assertion_failures: u64,
    pub evaluator_fell_back: bool,
}

#[derive(Debug)]
pub struct RunStats {
    requests_total: AtomicU64,
    passed_total: AtomicU64,
    failed_total: AtomicU64,
    retried_requests_total: AtomicU64,
    assertion_failures_total: AtomicU64,
    evaluator_fallbacks_total: AtomicU64,
    transport_errors_total: AtomicU64,
    iterations_total: AtomicU64,
    bytes_received_total: AtomicU64,
    dropped_events_total: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
    per_vu: Mutex<Vec<VuSummary>>,
}

impl Default for RunStats {
    fn default() -> Self {
        // Up to 10 minutes in microseconds at 3 significant figures.
        let hist = Histogram::new_with_bounds(1, 600_000_000, 3).expect("static bounds");
        Self {
            requests_total: AtomicU64::new(0),
            passed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            retried_requests_total: AtomicU64::new(0),
            assertion_failures_total: AtomicU64::new(0),
            evaluator_fallbacks_total: AtomicU64::new(0),
            transport_errors_total: AtomicU64::new(0),
            iterations_total: AtomicU64::new(0),
            bytes_received_total: AtomicU64::new(0),
            dropped_events_total: AtomicU64::new(0),
            latency_us: Mutex::new(hist),
            per_vu: Mutex::new(Vec::new()),
        }
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, meta: &RequestMeta<'_>) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if meta.passed {
            self.passed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        if meta.attempts > 1 {
            self.retried_requests_total.fetch_add(1, Ordering::Relaxed);
        }
        if meta.status.is_none() {
            self.transport_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        if meta.evaluator_fell_back {
            self.evaluator_fallbacks_total.fetch_add(1, Ordering::Relaxed);
        }
        self.assertion_failures_total
            .fetch_add(meta.assertion_failures, Ordering::Relaxed);
        self.bytes_received_total
            .fetch_add(meta.bytes_received, Ordering::Relaxed);

        let micros = (meta.latency.as_micros() as u64).max(1);
        let mut hist = self.latency_us.lock().unwrap_or_else(|e| e.into_inner());
        let _ = hist.record(micros);
    }

    pub fn record_iteration(&self) {
        self.iterations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_event(&self) {
        self.dropped_events_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Single-writer merge point for a finished VU's results.
    pub fn push_vu_summary(&self, summary: VuSummary) {
        self.per_vu
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(summary);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations_total.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    pub fn summarize(&self, elapsed: Duration) -> RunSummary {
        let hist = self.latency_us.lock().unwrap_or_else(|e| e.into_inner());

        let latency = if hist.is_empty() {
            LatencySummary::default()
        } else {
            LatencySummary {
                min_ms: hist.min() as f64 / 1000.0,
                mean_ms: hist.mean() / 1000.0,
                max_ms: hist.max() as f64 / 1000.0,
                p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
                p90_ms: hist.value_at_quantile(0.90) as f64 / 1000.0,
                p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
                p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            }
        };

        let mut per_vu = self
            .per_vu
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        per_vu.sort_by_key(|v| v.vu);

        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let elapsed_s = elapsed.as_secs_f64();

        RunSummary {
            requests_total,
            passed_total: self.passed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            retried_requests_total: self.retried_requests_total.load(Ordering::Relaxed),
            assertion_failures_total: self.assertion_failures_total.load(Ordering::Relaxed),
            evaluator_fallbacks_total: self.evaluator_fallbacks_total.load(Ordering::Relaxed),
            transport_errors_total: self.transport_errors_total.load(Ordering::Relaxed),
            iterations_total: self.iterations_total.load(Ordering::Relaxed),
            bytes_received_total: self.bytes_received_total.load(Ordering::Relaxed),
            dropped_events_total: self.dropped_events_total.load(Ordering::Relaxed),
            run_duration: elapsed,
            rps: if elapsed_s > 0.0 {
                requests_total as f64 / elapsed_s
            } else {
                0.0
            },
            latency,
            per_vu,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Per-VU accumulation, owned by the VU task and merged at exit.
#[derive(Debug, Clone, Default)]
pub struct VuSummary {
    pub vu: u64,
    pub iterations: u64,
    pub requests: u64,
    pub passed: u64,
    pub failed: u64,
    pub total_latency_ms: f64,
}

impl VuSummary {
    pub fn new(vu: u64) -> Self {
        Self {
            vu,
            ..Self::default()
        }
    }

    pub fn record_request(&mut self, latency: Duration, passed: bool) {
        self.requests += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.total_latency_ms += latency.as_secs_f64() * 1000.0;
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.requests as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub requests_total: u64,
    pub passed_total: u64,
    pub failed_total: u64,
    pub retried_requests_total: u64,
    pub assertion_failures_total: u64,
    pub evaluator_fallbacks_total: u64,
    pub transport_errors_total: u64,
    pub iterations_total: u64,
    pub bytes_received_total: u64,
    pub dropped_events_total: u64,
    pub run_duration: Duration,
    pub rps: f64,
    pub latency: LatencySummary,
    pub per_vu: Vec<VuSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(passed: bool, latency_ms: u64) -> RequestMeta<'static> {
        RequestMeta {
            name: "r",
            status: Some(if passed { 200 } else { 500 }),
            latency: Duration::from_millis(latency_ms),
            bytes_received: 100,
            passed,
            attempts: 1,
            assertion_failures: 0,
            evaluator_fell_back: false,
        }
    }

    #[test]
    fn counts_and_latency_aggregate() {
        let stats = RunStats::new();
        stats.record_request(&meta(true, 10));
        stats.record_request(&meta(true, 20));
        stats.record_request(&meta(false, 30));
        stats.record_iteration();

        let summary = stats.summarize(Duration::from_secs(1));
        assert_eq!(summary.requests_total, 3);
        assert_eq!(summary.passed_total, 2);
        assert_eq!(summary.failed_total, 1);
        assert_eq!(summary.iterations_total, 1);
        assert_eq!(summary.bytes_received_total, 300);
        assert!((summary.rps - 3.0).abs() < 1e-9);
        assert!(summary.latency.min_ms >= 9.0 && summary.latency.min_ms <= 11.0);
        assert!(summary.latency.max_ms >= 29.0 && summary.latency.max_ms <= 31.0);
    }

    #[test]
    fn transport_errors_and_retries_counted() {
        let stats = RunStats::new();
        let mut m = meta(false, 5);
        m.status = None;
        m.attempts = 2;
        m.evaluator_fell_back = true;
        stats.record_request(&m);

        let summary = stats.summarize(Duration::from_secs(1));
        assert_eq!(summary.transport_errors_total, 1);
        assert_eq!(summary.retried_requests_total, 1);
        assert_eq!(summary.evaluator_fallbacks_total, 1);
    }

    #[test]
    fn vu_summaries_sorted_by_vu() {
        let stats = RunStats::new();
        stats.push_vu_summary(VuSummary::new(2));
        stats.push_vu_summary(VuSummary::new(1));

        let summary = stats.summarize(Duration::from_secs(1));
        let ids: Vec<_> = summary.per_vu.iter().map(|v| v.vu).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}

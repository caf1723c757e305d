use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Calculate the p50 (median) latency in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// Calculate the p95 latency in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// Calculate the p99 latency in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage iteration counters.
///
/// Cloning shares the underlying counters, so the runner thread records into
/// the same instance the pipeline reads from.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    iterations: Arc<AtomicU64>,
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    /// Create a new metrics collector keeping `latency_window` latencies
    pub fn new(latency_window: usize) -> Self {
        Self {
            iterations: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(latency_window),
            start_time: Instant::now(),
        }
    }

    /// Record one completed `iterate()` call and how long it took
    pub fn record_iteration(&self, elapsed: Duration) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.latency_tracker.record(elapsed.as_nanos() as u64);
    }

    /// Total number of `iterate()` calls
    pub fn total_iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Iterations per second since the metrics were created
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_iterations() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_iterations: self.total_iterations(),
            throughput_ips: self.throughput_ips(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p95_us: self.latency_tracker.p95_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_iterations: u64,
    pub throughput_ips: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Iterations: {}, Throughput: {:.2} it/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_iterations,
            self.throughput_ips,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.p50_us(), 5.0);
        assert!(tracker.p99_us() >= tracker.p50_us());
    }

    #[test]
    fn test_tracker_window_slides() {
        let tracker = PercentileTracker::new(3);
        for i in 0..10 {
            tracker.record(i);
        }
        assert_eq!(tracker.count(), 3);
    }

    #[test]
    fn test_stage_metrics() {
        let metrics = StageMetrics::new(100);
        let shared = metrics.clone();
        for _ in 0..100 {
            shared.record_iteration(Duration::from_micros(1));
        }
        assert_eq!(metrics.total_iterations(), 100);
        assert!(metrics.snapshot().latency_p50_us > 0.0);
    }
}

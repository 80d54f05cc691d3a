// Byte-count / throughput reporting for a retrieval run.
//
// The retriever is the only writer; observers watch a broadcast value.
// Throughput is re-sampled at most every 100ms so per-segment deltas do
// not produce noisy spikes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Minimum spacing between throughput samples.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetrievalProgress {
    pub bytes_written: u64,
    /// Instantaneous throughput in bytes per second, from the most recent
    /// sample window.
    pub throughput_bps: f64,
}

#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<RetrievalProgress>,
    bytes_written: u64,
    throughput_bps: f64,
    last_sample_at: Instant,
    last_sample_bytes: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RetrievalProgress::default());
        Self {
            tx,
            bytes_written: 0,
            throughput_bps: 0.0,
            last_sample_at: Instant::now(),
            last_sample_bytes: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RetrievalProgress> {
        self.tx.subscribe()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Start accounting for a new run: counters back to zero, published.
    pub fn reset(&mut self) {
        self.bytes_written = 0;
        self.throughput_bps = 0.0;
        self.last_sample_at = Instant::now();
        self.last_sample_bytes = 0;
        let _ = self.tx.send(RetrievalProgress::default());
    }

    /// Record `delta` freshly written bytes and publish the new totals.
    pub fn record(&mut self, delta: u64) {
        self.bytes_written += delta;

        let now = Instant::now();
        let window = now.duration_since(self.last_sample_at);
        if window >= MIN_SAMPLE_INTERVAL {
            let delta_bytes = self.bytes_written - self.last_sample_bytes;
            self.throughput_bps = delta_bytes as f64 / window.as_secs_f64();
            self.last_sample_at = now;
            self.last_sample_bytes = self.bytes_written;
        }

        // Send regardless of receivers; progress display is optional.
        let _ = self.tx.send(RetrievalProgress {
            bytes_written: self.bytes_written,
            throughput_bps: self.throughput_bps,
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bytes_accumulate_immediately() {
        let mut tracker = ProgressTracker::new();
        let rx = tracker.subscribe();
        tracker.record(1_000);
        tracker.record(500);
        assert_eq!(rx.borrow().bytes_written, 1_500);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_starts_a_fresh_run() {
        let mut tracker = ProgressTracker::new();
        let rx = tracker.subscribe();
        tracker.record(1_000);
        assert_eq!(rx.borrow().bytes_written, 1_000);

        tracker.reset();
        assert_eq!(rx.borrow().bytes_written, 0);
        tracker.record(250);
        assert_eq!(rx.borrow().bytes_written, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_waits_for_sample_window() {
        let mut tracker = ProgressTracker::new();
        let rx = tracker.subscribe();

        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.record(4_096);
        // Window under 100ms: no sample yet.
        assert_eq!(rx.borrow().throughput_bps, 0.0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tracker.record(4_096);
        let sampled = rx.borrow().throughput_bps;
        assert!(sampled > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_reflects_window_delta() {
        let mut tracker = ProgressTracker::new();
        let rx = tracker.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        tracker.record(2_000);
        // 2000 bytes over 0.2s = 10_000 B/s.
        let sampled = rx.borrow().throughput_bps;
        assert!((sampled - 10_000.0).abs() < 1.0);
    }
}

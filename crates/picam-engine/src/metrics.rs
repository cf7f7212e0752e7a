//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use picam_types::SessionMetrics;

/// Collects counters shared between the control thread and the dispatch
/// workers.
#[derive(Default)]
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    skipped_buffers: AtomicU64,
    resubmit_failures: AtomicU64,
    stills_captured: AtomicU64,
    segments_rotated: AtomicU64,
    capture_toggles: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the uptime clock.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Stop the uptime clock.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a frame handed to the consumer.
    pub fn record_frame(&self, bytes: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a completed still image.
    pub fn record_still(&self, bytes: usize) {
        self.stills_captured.fetch_add(1, Ordering::Relaxed);
        self.record_frame(bytes);
    }

    /// Record a buffer dropped for a missing or repeated timestamp.
    pub fn record_skip(&self) {
        self.skipped_buffers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a buffer that could not be handed back to its port.
    pub fn record_resubmit_failure(&self) {
        self.resubmit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment(&self) {
        self.segments_rotated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_toggle(&self) {
        self.capture_toggles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resubmit_failures(&self) -> u64 {
        self.resubmit_failures.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> SessionMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        SessionMetrics {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            skipped_buffers: self.skipped_buffers.load(Ordering::Relaxed),
            resubmit_failures: self.resubmit_failures.load(Ordering::Relaxed),
            stills_captured: self.stills_captured.load(Ordering::Relaxed),
            segments_rotated: self.segments_rotated.load(Ordering::Relaxed),
            capture_toggles: self.capture_toggles.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = MetricsCollector::new();
        metrics.start();
        metrics.record_frame(100);
        metrics.record_still(50);
        metrics.record_skip();
        metrics.record_toggle();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_delivered, 2);
        assert_eq!(snapshot.bytes_delivered, 150);
        assert_eq!(snapshot.stills_captured, 1);
        assert_eq!(snapshot.skipped_buffers, 1);
        assert_eq!(snapshot.capture_toggles, 1);
        assert_eq!(metrics.resubmit_failures(), 0);
    }
}

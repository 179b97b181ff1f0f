//! Lightweight atomics-based counters, logged at debug level rather than
//! exported anywhere. Kept deliberately small: this is a process/ELF
//! threat monitor, not a metrics-scraped service.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    lines_read: AtomicU64,
    lines_malformed: AtomicU64,
    events_decoded: AtomicU64,
    events_dropped_by_filter: AtomicU64,
    correlation_pending_inserted: AtomicU64,
    correlation_paired: AtomicU64,
    correlation_expired: AtomicU64,
    threats_raised: AtomicU64,
    tasks_created: AtomicU64,
    tasks_from_procfs: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn line_malformed(&self) {
        self.lines_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_decoded(&self) {
        self.events_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped_by_filter(&self) {
        self.events_dropped_by_filter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_pending_inserted(&self) {
        self.correlation_pending_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_paired(&self) {
        self.correlation_paired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_expired(&self, count: u64) {
        self.correlation_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn threat_raised(&self) {
        self.threats_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_from_procfs(&self) {
        self.tasks_from_procfs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_snapshot(&self) {
        log::debug!(
            "metrics: lines_read={} malformed={} decoded={} dropped={} \
             pending_inserted={} paired={} expired={} threats={} tasks={} procfs_tasks={}",
            self.lines_read.load(Ordering::Relaxed),
            self.lines_malformed.load(Ordering::Relaxed),
            self.events_decoded.load(Ordering::Relaxed),
            self.events_dropped_by_filter.load(Ordering::Relaxed),
            self.correlation_pending_inserted.load(Ordering::Relaxed),
            self.correlation_paired.load(Ordering::Relaxed),
            self.correlation_expired.load(Ordering::Relaxed),
            self.threats_raised.load(Ordering::Relaxed),
            self.tasks_created.load(Ordering::Relaxed),
            self.tasks_from_procfs.load(Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering as O;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        assert_eq!(m.lines_read.load(O::Relaxed), 0);
        m.line_read();
        m.line_read();
        m.event_decoded();
        assert_eq!(m.lines_read.load(O::Relaxed), 2);
        assert_eq!(m.events_decoded.load(O::Relaxed), 1);
    }

    #[test]
    fn correlation_expired_accumulates_batch_counts() {
        let m = Metrics::new();
        m.correlation_expired(3);
        m.correlation_expired(2);
        assert_eq!(m.correlation_expired.load(O::Relaxed), 5);
    }
}

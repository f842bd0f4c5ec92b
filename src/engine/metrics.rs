//! ARRAYMETA - Store Metrics & Observability
//! Provides atomic counters for tracking metadata operations
//! in a lock-free, thread-safe manner using `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic operation counters shared by every session of a `Context`.
///
/// All counters use `Ordering::Relaxed`; they are for observability,
/// not synchronization.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Total number of buffered `put_metadata` calls.
    pub puts: AtomicU64,
    /// Total number of buffered `delete_metadata` calls.
    pub deletes: AtomicU64,
    /// Total number of point and ordinal lookups.
    pub gets: AtomicU64,
    /// Fragments persisted (session flushes and consolidations).
    pub fragments_written: AtomicU64,
    /// Fragments loaded while building an index.
    pub fragments_read: AtomicU64,
    /// Completed consolidations.
    pub consolidations: AtomicU64,
    /// Total fragment bytes written to disk.
    pub bytes_written: AtomicU64,
    /// Total fragment bytes read from disk.
    pub bytes_read: AtomicU64,
    /// Rejected key material.
    pub auth_failures: AtomicU64,
    started: Instant,
}

impl EngineMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            fragments_written: AtomicU64::new(0),
            fragments_read: AtomicU64::new(0),
            consolidations: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fragment of `size` bytes written to disk.
    pub fn record_fragment_write(&self, size: usize) {
        self.fragments_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record a fragment of `size` bytes read from disk.
    pub fn record_fragment_read(&self, size: usize) {
        self.fragments_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_consolidation(&self) {
        self.consolidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Get total number of client operations (puts + deletes + gets).
    pub fn total_ops(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.gets.load(Ordering::Relaxed)
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "\n═══ ARRAYMETA Metrics ═══\n\
             Operations:\n\
               puts:           {}\n\
               deletes:        {}\n\
               gets:           {}\n\
               consolidations: {}\n\
             Fragments:\n\
               written:        {} ({} bytes)\n\
               read:           {} ({} bytes)\n\
             Security:\n\
               auth failures:  {}\n\
             Uptime: {:.2}s",
            self.puts.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.gets.load(Ordering::Relaxed),
            self.consolidations.load(Ordering::Relaxed),
            self.fragments_written.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.fragments_read.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operations() {
        let m = EngineMetrics::new();

        m.record_put();
        m.record_put();
        m.record_delete();
        m.record_get();
        m.record_fragment_write(100);
        m.record_fragment_read(60);
        m.record_fragment_read(40);
        m.record_consolidation();
        m.record_auth_failure();

        assert_eq!(m.puts.load(Ordering::Relaxed), 2);
        assert_eq!(m.deletes.load(Ordering::Relaxed), 1);
        assert_eq!(m.fragments_written.load(Ordering::Relaxed), 1);
        assert_eq!(m.bytes_written.load(Ordering::Relaxed), 100);
        assert_eq!(m.fragments_read.load(Ordering::Relaxed), 2);
        assert_eq!(m.bytes_read.load(Ordering::Relaxed), 100);
        assert_eq!(m.auth_failures.load(Ordering::Relaxed), 1);
        assert_eq!(m.total_ops(), 4);
    }

    #[test]
    fn test_report_format() {
        let m = EngineMetrics::default();
        m.record_fragment_write(10);
        let report = m.report();
        assert!(report.contains("puts:"));
        assert!(report.contains("written:"));
        assert!(report.contains("auth failures:"));
    }
}

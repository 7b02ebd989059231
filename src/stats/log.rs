//! Ingest statistics.
//!
//! Counts what happened to readings on their way through the pipeline. Only
//! counts are kept, never reading values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Pipeline counters for the current session plus any persisted history.
#[derive(Debug)]
pub struct IngestLog {
    /// Readings delivered to the sinks by the active producer
    readings_forwarded: AtomicU64,
    /// Readings dropped because their producer was not the active one
    readings_discarded: AtomicU64,
    /// Lines from the live link that failed to parse
    malformed_lines: AtomicU64,
    /// Individual sink deliveries that failed
    delivery_failures: AtomicU64,
    /// Unexpected losses of the live link
    disconnects: AtomicU64,
    /// Records removed by retention sweeps
    records_purged: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestLog {
    pub fn new() -> Self {
        Self {
            readings_forwarded: AtomicU64::new(0),
            readings_discarded: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            records_purged: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from, and saves back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!(error = %e, "could not load previous ingest stats");
        }

        log
    }

    pub fn record_forwarded(&self) {
        self.readings_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.readings_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged(&self, count: u64) {
        self.records_purged.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            readings_forwarded: self.readings_forwarded.load(Ordering::Relaxed),
            readings_discarded: self.readings_discarded.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            records_purged: self.records_purged.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Ingest Statistics:\n\
             - Readings forwarded: {}\n\
             - Readings discarded: {}\n\
             - Malformed lines: {}\n\
             - Delivery failures: {}\n\
             - Link disconnects: {}\n\
             - Records purged: {}\n\
             - Session duration: {} seconds",
            stats.readings_forwarded,
            stats.readings_discarded,
            stats.malformed_lines,
            stats.delivery_failures,
            stats.disconnects,
            stats.records_purged,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk. Does nothing without a persistence path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                readings_forwarded: stats.readings_forwarded,
                readings_discarded: stats.readings_discarded,
                malformed_lines: stats.malformed_lines,
                delivery_failures: stats.delivery_failures,
                disconnects: stats.disconnects,
                records_purged: stats.records_purged,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.readings_forwarded
                    .store(persisted.readings_forwarded, Ordering::Relaxed);
                self.readings_discarded
                    .store(persisted.readings_discarded, Ordering::Relaxed);
                self.malformed_lines
                    .store(persisted.malformed_lines, Ordering::Relaxed);
                self.delivery_failures
                    .store(persisted.delivery_failures, Ordering::Relaxed);
                self.disconnects
                    .store(persisted.disconnects, Ordering::Relaxed);
                self.records_purged
                    .store(persisted.records_purged, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for IngestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of ingest statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStats {
    pub readings_forwarded: u64,
    pub readings_discarded: u64,
    pub malformed_lines: u64,
    pub delivery_failures: u64,
    pub disconnects: u64,
    pub records_purged: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    readings_forwarded: u64,
    readings_discarded: u64,
    malformed_lines: u64,
    delivery_failures: u64,
    disconnects: u64,
    records_purged: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared ingest log.
pub type SharedIngestLog = Arc<IngestLog>;

pub fn create_shared_log() -> SharedIngestLog {
    Arc::new(IngestLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedIngestLog {
    Arc::new(IngestLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_log_counting() {
        let log = IngestLog::new();

        log.record_forwarded();
        log.record_forwarded();
        log.record_discarded(3);
        log.record_malformed();
        log.record_purged(10);

        let stats = log.stats();
        assert_eq!(stats.readings_forwarded, 2);
        assert_eq!(stats.readings_discarded, 3);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.records_purged, 10);
        assert_eq!(stats.disconnects, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats").join("ingest.json");

        let log = IngestLog::with_persistence(path.clone());
        log.record_forwarded();
        log.record_delivery_failure();
        log.save().unwrap();

        let reloaded = IngestLog::with_persistence(path);
        let stats = reloaded.stats();
        assert_eq!(stats.readings_forwarded, 1);
        assert_eq!(stats.delivery_failures, 1);
    }

    #[test]
    fn test_corrupt_persisted_stats_start_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.json");
        std::fs::write(&path, "not json").unwrap();

        let log = IngestLog::with_persistence(path);
        assert_eq!(log.stats().readings_forwarded, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = IngestLog::new().summary();
        assert!(summary.contains("Readings forwarded"));
        assert!(summary.contains("Malformed lines"));
        assert!(summary.contains("Records purged"));
    }
}

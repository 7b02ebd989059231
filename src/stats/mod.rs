//! Statistics about what the pipeline ingested, dropped and purged.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, IngestLog, IngestStats,
    SharedIngestLog,
};

//! sensor-window - thermal and light reading ingestion.
//!
//! This library takes readings from a serial-attached sensor board (or from a
//! synthetic generator standing in for it), keeps them in a SQLite store with
//! age-based retention, and maintains a sliding in-memory window for display.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        sensor-window                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐                                              │
//! │  │ Live Source │──┐                      ┌────────────────┐   │
//! │  │  (serial)   │  │   ┌─────────────┐ ┌─▶│ Retention Store│   │
//! │  └─────────────┘  ├──▶│   Arbiter   │─┤  │   (SQLite)     │   │
//! │  ┌─────────────┐  │   │ (one active)│ │  └────────────────┘   │
//! │  │  Synthetic  │──┘   └─────────────┘ │  ┌────────────────┐   │
//! │  │  Generator  │             │        └─▶│ Window Buffer  │   │
//! │  └─────────────┘             ▼           │  (last W min)  │   │
//! │                        ┌───────────┐     └────────────────┘   │
//! │                        │ Event Bus │──▶ subscribers           │
//! │                        └───────────┘                          │
//! │         Scheduler: poll 100ms · purge 60s · window 1s         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_window::{
//!     create_shared_buffer, create_shared_log, EventBus, Mode, SourceArbiter,
//!     SyntheticGenerator, WindowBuffer,
//! };
//!
//! let stats = create_shared_log();
//! let buffer = create_shared_buffer(WindowBuffer::new(10));
//!
//! let mut arbiter = SourceArbiter::new(SyntheticGenerator::default(), EventBus::new(), stats);
//! arbiter.add_sink(buffer.clone());
//! arbiter.set_mode(Mode::Simulation).expect("generator failed to start");
//! arbiter
//!     .connect("/dev/ttyUSB0", Default::default())
//!     .expect("failed to open port");
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod store;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, SerialConfig};
pub use crate::core::{create_shared_buffer, SharedWindowBuffer, WindowBuffer};
pub use events::{EventBus, PipelineEvent, ReadingSink, SinkError};
pub use scheduler::{Scheduler, Timings};
pub use source::{
    Activity, BaudRate, Channel, ConnectionStatus, LiveSource, Mode, Reading, SourceArbiter,
    SourceError, SyntheticGenerator, ThermalState, WindowPoint,
};
pub use stats::{create_shared_log, IngestLog, IngestStats, SharedIngestLog};
pub use store::{create_shared_store, RetentionRecord, RetentionStore, SharedStore, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

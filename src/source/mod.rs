//! Reading producers.
//!
//! Two producers can feed the pipeline: a live serial link and a synthetic
//! generator. The [`SourceArbiter`] decides which one is forwarded.

pub mod arbiter;
pub mod error;
pub mod parser;
pub mod serial;
pub mod simulator;
pub mod types;

// Re-export commonly used types
pub use arbiter::{Activity, Mode, SourceArbiter};
pub use error::{SourceError, SourceResult};
pub use parser::{parse_line, parse_line_at};
pub use serial::{
    available_ports, BaudRate, LiveSource, MemoryTransport, MemoryTransportHandle, PollOutcome,
    Transport,
};
pub use simulator::SyntheticGenerator;
pub use types::{Channel, ConnectionStatus, Reading, ThermalState, WindowPoint};

//! Producer arbitration.
//!
//! The arbiter owns the live source and the synthetic generator and decides
//! which of them feeds the sinks. Whatever the mode, at most one producer has
//! its readings forwarded.
//!
//! | mode       | link         | generator | activity  |
//! |------------|--------------|-----------|-----------|
//! | Hardware   | disconnected | stopped   | Idle      |
//! | Hardware   | connected    | stopped   | Live      |
//! | Simulation | disconnected | stopped   | Idle      |
//! | Simulation | connected    | running   | Synthetic |

use crate::events::{EventBus, PipelineEvent, ReadingSink};
use crate::source::error::SourceResult;
use crate::source::serial::{BaudRate, LiveSource, PollOutcome, Transport};
use crate::source::simulator::SyntheticGenerator;
use crate::source::types::Reading;
use crate::stats::SharedIngestLog;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which producer the operator has selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Readings come from the live link.
    #[default]
    Hardware,
    /// Readings are generated while the live link is connected.
    Simulation,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Hardware => "hardware",
            Mode::Simulation => "simulation",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hardware" | "hw" => Ok(Mode::Hardware),
            "simulation" | "sim" => Ok(Mode::Simulation),
            other => Err(format!(
                "unknown mode '{other}', expected 'hardware' or 'simulation'"
            )),
        }
    }
}

/// Which producer is forwarding readings right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    Idle,
    Live,
    Synthetic,
}

/// Single point through which readings reach the sinks.
pub struct SourceArbiter {
    mode: Mode,
    live: LiveSource,
    generator: SyntheticGenerator,
    sinks: Vec<Box<dyn ReadingSink>>,
    events: EventBus,
    stats: SharedIngestLog,
}

impl SourceArbiter {
    /// Create an arbiter in hardware mode with the link disconnected.
    pub fn new(generator: SyntheticGenerator, events: EventBus, stats: SharedIngestLog) -> Self {
        Self {
            mode: Mode::Hardware,
            live: LiveSource::new(),
            generator,
            sinks: Vec::new(),
            events,
            stats,
        }
    }

    /// Register a sink. Sinks receive readings in registration order.
    pub fn add_sink(&mut self, sink: impl ReadingSink + 'static) {
        debug!(sink = sink.name(), "sink registered");
        self.sinks.push(Box::new(sink));
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Select a producer.
    ///
    /// Hardware stops the generator. Simulation starts it only when the link is
    /// connected; otherwise it stays armed until a connection exists.
    pub fn set_mode(&mut self, mode: Mode) -> SourceResult<()> {
        if mode != self.mode {
            info!(from = %self.mode, to = %mode, "mode changed");
            self.mode = mode;
        }
        self.sync_generator()
    }

    /// Open a serial link. In simulation mode the generator follows the link.
    pub fn connect(&mut self, port: &str, baud: BaudRate) -> SourceResult<()> {
        let result = self.live.connect(port, baud);
        self.publish_status_changes();
        // A failed reconnect may still have closed the previous link.
        let synced = self.sync_generator();
        result.and(synced)
    }

    /// Use an already-open transport as the live link.
    pub fn attach(&mut self, label: &str, transport: Box<dyn Transport>) -> SourceResult<()> {
        self.live.attach(label, transport);
        self.publish_status_changes();
        self.sync_generator()
    }

    /// Close the live link. Returns `true` if a link was actually closed.
    pub fn disconnect(&mut self) -> bool {
        let closed = self.live.disconnect();
        self.publish_status_changes();
        if self.mode == Mode::Simulation {
            self.stop_generator();
        }
        closed
    }

    /// Poll the live link once, forwarding its reading in hardware mode.
    ///
    /// Returns the forwarded reading, if any. In simulation mode the link is
    /// still drained but its readings are discarded.
    pub fn poll_live(&mut self) -> Option<Reading> {
        let outcome = self.live.poll();
        self.publish_status_changes();

        match outcome {
            PollOutcome::Idle => None,
            PollOutcome::Reading(reading) if self.mode == Mode::Hardware => {
                self.forward(reading);
                Some(reading)
            }
            PollOutcome::Reading(_) => {
                self.stats.record_discarded(1);
                None
            }
            PollOutcome::Malformed(_) => {
                self.stats.record_malformed();
                None
            }
            PollOutcome::Disconnected(_) => {
                self.stats.record_disconnect();
                if self.mode == Mode::Simulation {
                    self.stop_generator();
                }
                None
            }
        }
    }

    /// Offer a reading taken from the generator queue.
    ///
    /// It is forwarded only while the generator is the active producer.
    pub fn accept_generated(&mut self, reading: Reading) -> bool {
        if self.activity() == Activity::Synthetic {
            self.forward(reading);
            true
        } else {
            self.stats.record_discarded(1);
            false
        }
    }

    /// Forward every reading currently queued by the generator.
    pub fn pump_generator(&mut self) -> usize {
        let mut forwarded = 0;
        while let Some(reading) = self.generator.try_recv() {
            if self.accept_generated(reading) {
                forwarded += 1;
            }
        }
        forwarded
    }

    /// A handle on the generator queue for blocking waits.
    pub fn generator_receiver(&self) -> Receiver<Reading> {
        self.generator.receiver().clone()
    }

    pub fn activity(&self) -> Activity {
        match (self.mode, self.live.is_connected()) {
            (_, false) => Activity::Idle,
            (Mode::Hardware, true) => Activity::Live,
            (Mode::Simulation, true) if self.generator.is_running() => Activity::Synthetic,
            (Mode::Simulation, true) => Activity::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.live.is_connected()
    }

    pub fn live(&self) -> &LiveSource {
        &self.live
    }

    pub fn generator(&self) -> &SyntheticGenerator {
        &self.generator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Disconnect and stop the generator.
    pub fn shutdown(&mut self) {
        self.stop_generator();
        self.live.disconnect();
        self.publish_status_changes();
        info!("source arbiter shut down");
    }

    fn sync_generator(&mut self) -> SourceResult<()> {
        let wanted = self.mode == Mode::Simulation && self.live.is_connected();
        if wanted && !self.generator.is_running() {
            self.generator.start()?;
        } else if !wanted {
            self.stop_generator();
        }
        Ok(())
    }

    fn stop_generator(&mut self) {
        if !self.generator.is_running() {
            return;
        }
        self.generator.stop();
        let stale = self.generator.drain();
        if stale > 0 {
            debug!(stale, "discarded queued generator readings");
            self.stats.record_discarded(stale as u64);
        }
    }

    fn forward(&mut self, reading: Reading) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.accept(&reading) {
                warn!(error = %e, "reading not delivered");
                self.stats.record_delivery_failure();
            }
        }
        self.events.publish(PipelineEvent::Reading(reading));
        self.stats.record_forwarded();
    }

    fn publish_status_changes(&mut self) {
        for status in self.live.take_status_changes() {
            self.events.publish_status(status);
        }
    }
}

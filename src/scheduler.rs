//! Periodic driver for the pipeline.
//!
//! One loop owns the arbiter and fires each task when it is due: live polling,
//! generator hand-off, retention purge and window re-derivation. Waiting is
//! done on the generator queue, so synthetic readings are handled as soon as
//! they arrive.

use crate::config::Config;
use crate::core::windowing::{write_buffer, SharedWindowBuffer};
use crate::source::arbiter::SourceArbiter;
use crate::source::types::Reading;
use crate::stats::SharedIngestLog;
use crate::store::{lock_store, SharedStore};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the window's lower bound is recomputed without new readings.
pub const WINDOW_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a single wait so shutdown is noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Periods and horizons the scheduler runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub poll_interval: Duration,
    pub purge_interval: Duration,
    pub window_refresh: Duration,
    pub retention: chrono::Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Timings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            purge_interval: config.purge_interval,
            window_refresh: WINDOW_REFRESH_INTERVAL,
            retention: config.retention(),
        }
    }
}

#[derive(Debug)]
struct Periodic {
    interval: Duration,
    next_due: Instant,
}

impl Periodic {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
        }
    }

    /// Returns true and schedules the next run if the task is due at `now`.
    fn fire(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = now + self.interval;
        true
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}

/// Drives the arbiter, the retention store and the window buffer.
pub struct Scheduler {
    arbiter: SourceArbiter,
    buffer: SharedWindowBuffer,
    store: Option<SharedStore>,
    stats: SharedIngestLog,
    generated: Receiver<Reading>,
    retention: chrono::Duration,
    poll: Periodic,
    purge: Periodic,
    refresh: Periodic,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// The arbiter should already have the buffer (and the store, if any)
    /// registered as sinks; the scheduler only maintains them.
    pub fn new(
        arbiter: SourceArbiter,
        buffer: SharedWindowBuffer,
        store: Option<SharedStore>,
        stats: SharedIngestLog,
        timings: Timings,
    ) -> Self {
        let now = Instant::now();
        let generated = arbiter.generator_receiver();
        Self {
            arbiter,
            buffer,
            store,
            stats,
            generated,
            retention: timings.retention,
            poll: Periodic::new(timings.poll_interval, now),
            purge: Periodic::new(timings.purge_interval, now),
            refresh: Periodic::new(timings.window_refresh, now),
        }
    }

    /// Load the window buffer from the store's retained history.
    ///
    /// Returns how many readings the buffer holds afterwards.
    pub fn seed_window(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let records = match lock_store(store).query_recent(self.retention) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "could not load history, starting with an empty window");
                return 0;
            }
        };

        let mut buffer = write_buffer(&self.buffer);
        buffer.load(records.iter().map(|r| r.reading()));
        info!(
            retained = records.len(),
            in_window = buffer.len(),
            "window seeded from store"
        );
        buffer.len()
    }

    /// Run every task that is due at `now`.
    pub fn run_due(&mut self, now: Instant) {
        if self.poll.fire(now) {
            self.arbiter.poll_live();
        }

        self.arbiter.pump_generator();

        if self.purge.fire(now) {
            self.purge_now();
        }

        if self.refresh.fire(now) {
            let removed = write_buffer(&self.buffer).prune_at(Utc::now());
            if removed > 0 {
                debug!(removed, "window bound advanced");
            }
        }
    }

    /// Run the retention sweep immediately.
    ///
    /// Returns the number of purged records, or `None` without a usable store.
    pub fn purge_now(&mut self) -> Option<usize> {
        let store = self.store.as_ref()?;
        match lock_store(store).purge_older_than(self.retention) {
            Ok(removed) => {
                self.stats.record_purged(removed as u64);
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "retention purge failed");
                None
            }
        }
    }

    /// Time until the next periodic task is due.
    pub fn next_wait(&self, now: Instant) -> Duration {
        [&self.poll, &self.purge, &self.refresh]
            .iter()
            .map(|task| task.remaining(now))
            .min()
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT)
    }

    /// Run until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(mode = %self.arbiter.mode(), "scheduler running");

        while running.load(Ordering::SeqCst) {
            let wait = self.next_wait(Instant::now());
            match self.generated.recv_timeout(wait) {
                Ok(reading) => {
                    self.arbiter.accept_generated(reading);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
            }
            self.run_due(Instant::now());
        }

        info!("scheduler stopped");
    }

    pub fn arbiter(&self) -> &SourceArbiter {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut SourceArbiter {
        &mut self.arbiter
    }

    pub fn buffer(&self) -> &SharedWindowBuffer {
        &self.buffer
    }

    pub fn store(&self) -> Option<&SharedStore> {
        self.store.as_ref()
    }

    /// Stop both producers and persist statistics.
    pub fn shutdown(&mut self) {
        self.arbiter.shutdown();
        if let Err(e) = self.stats.save() {
            warn!(error = %e, "could not save ingest stats");
        }
    }
}

//! Synthetic reading generator.
//!
//! Stands in for the device when no hardware feed is wanted. Light follows a
//! one-minute sine wave with uniform noise; the thermal flag is an independent
//! coin flip each tick.

use crate::source::error::{SourceError, SourceResult};
use crate::source::types::Reading;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Default time between generated readings.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Probability that a tick reports the high thermal state.
pub const THERMAL_HIGH_PROBABILITY: f64 = 0.3;

pub const LIGHT_MIDPOINT: f64 = 1000.0;
pub const LIGHT_AMPLITUDE: f64 = 800.0;
pub const LIGHT_PERIOD_SECS: f64 = 60.0;
pub const LIGHT_NOISE: i64 = 100;
pub const LIGHT_MIN: i64 = 100;
pub const LIGHT_MAX: i64 = 2000;

const QUEUE_CAPACITY: usize = 1_024;

/// Noise-free light level at `at`.
///
/// The phase is wall-clock time modulo the period, so it does not depend on
/// when the generator was started.
pub fn light_waveform(at: DateTime<Utc>) -> f64 {
    let secs = at.timestamp_millis() as f64 / 1000.0;
    let phase = secs.rem_euclid(LIGHT_PERIOD_SECS);
    LIGHT_MIDPOINT + LIGHT_AMPLITUDE * (phase * 2.0 * PI / LIGHT_PERIOD_SECS).sin()
}

/// Generate one reading for time `at`.
pub fn sample<R: Rng + ?Sized>(rng: &mut R, at: DateTime<Utc>) -> Reading {
    let thermal = i64::from(rng.gen_bool(THERMAL_HIGH_PROBABILITY));
    let noise = rng.gen_range(-LIGHT_NOISE..=LIGHT_NOISE);
    let light = (light_waveform(at) + noise as f64) as i64;
    Reading::at(at, thermal, light.clamp(LIGHT_MIN, LIGHT_MAX))
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Ticking generator running on a background thread.
pub struct SyntheticGenerator {
    interval: Duration,
    seed: Option<u64>,
    sender: Sender<Reading>,
    receiver: Receiver<Reading>,
    worker: Option<Worker>,
}

impl SyntheticGenerator {
    /// Create a stopped generator ticking every `interval`.
    pub fn new(interval: Duration) -> Self {
        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        Self {
            interval,
            seed: None,
            sender,
            receiver,
            worker: None,
        }
    }

    /// Use a fixed RNG seed for reproducible output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Start ticking. Starting a running generator does nothing.
    pub fn start(&mut self) -> SourceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let sender = self.sender.clone();
        let interval = self.interval;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let handle = thread::Builder::new()
            .name("synthetic-generator".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let reading = sample(&mut rng, Utc::now());
                        if sender.try_send(reading).is_err() {
                            debug!("generator queue full, dropping reading");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| SourceError::GeneratorSpawn(e.to_string()))?;

        self.worker = Some(Worker { stop_tx, handle });
        info!(interval_ms = interval.as_millis() as u64, "synthetic generator started");
        Ok(())
    }

    /// Stop ticking. Safe to call when already stopped.
    ///
    /// Returns once the worker thread has exited, so nothing is generated after
    /// this call. Readings generated before it may still be queued.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("synthetic generator thread panicked");
            }
            info!("synthetic generator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Get the receiver for generated readings.
    pub fn receiver(&self) -> &Receiver<Reading> {
        &self.receiver
    }

    /// Try to receive a reading without blocking.
    pub fn try_recv(&self) -> Option<Reading> {
        self.receiver.try_recv().ok()
    }

    /// Discard every queued reading, returning how many were dropped.
    pub fn drain(&self) -> usize {
        self.receiver.try_iter().count()
    }
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl Drop for SyntheticGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_bounds_over_many_ticks() {
        let mut rng = StdRng::seed_from_u64(7);
        let start = Utc::now();
        for i in 0..10_000 {
            let at = start + chrono::Duration::milliseconds(i * 1000);
            let reading = sample(&mut rng, at);
            assert!((LIGHT_MIN..=LIGHT_MAX).contains(&reading.light));
            assert!(reading.thermal == 0 || reading.thermal == 1);
        }
    }

    #[test]
    fn test_thermal_rate_is_roughly_thirty_percent() {
        let mut rng = StdRng::seed_from_u64(42);
        let at = Utc::now();
        let highs: i64 = (0..10_000).map(|_| sample(&mut rng, at).thermal).sum();
        assert!((2_700..=3_300).contains(&highs), "got {highs} highs");
    }

    #[test]
    fn test_waveform_follows_wall_clock_phase() {
        let zero = Utc.timestamp_opt(1_700_000_040, 0).unwrap();
        // 1_700_000_040 is a multiple of 60, so the phase is zero.
        assert!((light_waveform(zero) - LIGHT_MIDPOINT).abs() < 1e-6);

        let quarter = zero + chrono::Duration::seconds(15);
        assert!((light_waveform(quarter) - 1800.0).abs() < 1e-6);

        let three_quarter = zero + chrono::Duration::seconds(45);
        assert!((light_waveform(three_quarter) - 200.0).abs() < 1e-6);

        let next_period = zero + chrono::Duration::seconds(75);
        assert!((light_waveform(next_period) - light_waveform(quarter)).abs() < 1e-6);
    }

    #[test]
    fn test_noise_stays_within_band() {
        let mut rng = StdRng::seed_from_u64(3);
        let at = Utc.timestamp_opt(1_700_000_040, 0).unwrap();
        for _ in 0..1_000 {
            let light = sample(&mut rng, at).light;
            assert!((900..=1100).contains(&light), "light {light}");
        }
    }

    #[test]
    fn test_start_stop_emits_and_halts() {
        let mut generator = SyntheticGenerator::new(Duration::from_millis(5)).with_seed(1);
        generator.start().unwrap();
        assert!(generator.is_running());

        let first = generator
            .receiver()
            .recv_timeout(Duration::from_secs(2))
            .expect("generator should tick");
        assert!((LIGHT_MIN..=LIGHT_MAX).contains(&first.light));

        generator.stop();
        assert!(!generator.is_running());
        generator.drain();

        thread::sleep(Duration::from_millis(30));
        assert!(generator.try_recv().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut generator = SyntheticGenerator::new(Duration::from_millis(5));
        generator.stop();
        generator.stop();
        assert!(!generator.is_running());

        generator.start().unwrap();
        generator.start().unwrap();
        generator.stop();
        generator.stop();
        assert!(!generator.is_running());
    }
}

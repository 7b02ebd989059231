//! Sliding display window over recent readings.
//!
//! Each channel keeps its points in arrival order, which is also time order for
//! both producers. Pruning relies on that: it trims a prefix and stops at the
//! first point inside the window.

use crate::config::MAX_HORIZON_MINUTES;
use crate::events::{ReadingSink, SinkError};
use crate::source::types::{Channel, Reading, WindowPoint};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Default width of the display window in minutes.
pub const DEFAULT_WINDOW_MINUTES: i64 = 10;

/// Per-channel ordered points bounded to the last `window` of time.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    window: Duration,
    lower_bound: Option<DateTime<Utc>>,
    thermal: VecDeque<WindowPoint>,
    light: VecDeque<WindowPoint>,
    current_thermal: Option<WindowPoint>,
    current_light: Option<WindowPoint>,
}

impl WindowBuffer {
    /// Create an empty buffer holding the last `window_minutes` minutes.
    ///
    /// The width is clamped to `0..=MAX_HORIZON_MINUTES`.
    pub fn new(window_minutes: i64) -> Self {
        Self::with_window(window_width(window_minutes))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            lower_bound: None,
            thermal: VecDeque::new(),
            light: VecDeque::new(),
            current_thermal: None,
            current_light: None,
        }
    }

    /// Replace both channels with a bulk historical set.
    ///
    /// The current point of each channel becomes the last loaded reading.
    pub fn load<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = Reading>,
    {
        self.load_at(readings, Utc::now());
    }

    pub fn load_at<I>(&mut self, readings: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = Reading>,
    {
        self.thermal.clear();
        self.light.clear();
        self.current_thermal = None;
        self.current_light = None;

        let mut loaded = 0usize;
        for reading in readings {
            self.push(&reading);
            loaded += 1;
        }

        self.prune_at(now);
        debug!(loaded, retained = self.len(), "window buffer loaded");
    }

    /// Append a reading to both channels and prune against the current time.
    pub fn append(&mut self, reading: &Reading) {
        self.append_at(reading, Utc::now());
    }

    pub fn append_at(&mut self, reading: &Reading, now: DateTime<Utc>) {
        self.push(reading);
        self.prune_at(now);
    }

    /// Change the window width and prune immediately.
    pub fn set_window(&mut self, minutes: i64) {
        self.set_window_at(minutes, Utc::now());
    }

    pub fn set_window_at(&mut self, minutes: i64, now: DateTime<Utc>) {
        self.window = window_width(minutes);
        self.prune_at(now);
    }

    /// Recompute the lower bound as `now - window` and drop every older point.
    ///
    /// Returns the number of readings removed. Only a prefix is ever removed.
    pub fn prune_at(&mut self, now: DateTime<Utc>) -> usize {
        let bound = now - self.window;
        self.lower_bound = Some(bound);

        let removed = trim_prefix(&mut self.thermal, bound);
        let removed_light = trim_prefix(&mut self.light, bound);
        debug_assert_eq!(removed, removed_light);
        removed
    }

    /// Snapshot of one channel, oldest first.
    pub fn points(&self, channel: Channel) -> Vec<WindowPoint> {
        self.series(channel).iter().copied().collect()
    }

    /// Iterate one channel without copying, oldest first.
    pub fn iter(&self, channel: Channel) -> impl Iterator<Item = &WindowPoint> {
        self.series(channel).iter()
    }

    /// Latest point of a channel, even if it has since left the window.
    pub fn current(&self, channel: Channel) -> Option<WindowPoint> {
        match channel {
            Channel::Thermal => self.current_thermal,
            Channel::Light => self.current_light,
        }
    }

    /// Number of readings held (each reading is one point per channel).
    pub fn len(&self) -> usize {
        self.thermal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thermal.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The bound computed by the last prune.
    pub fn lower_bound(&self) -> Option<DateTime<Utc>> {
        self.lower_bound
    }

    fn series(&self, channel: Channel) -> &VecDeque<WindowPoint> {
        match channel {
            Channel::Thermal => &self.thermal,
            Channel::Light => &self.light,
        }
    }

    /// Append to the tail of both channels.
    ///
    /// Precondition: readings arrive in non-decreasing timestamp order. A reading
    /// older than the tail is pinned to the tail timestamp so the prefix trim
    /// stays correct.
    fn push(&mut self, reading: &Reading) {
        let mut reading = *reading;
        if let Some(tail) = self.thermal.back() {
            if reading.timestamp < tail.timestamp {
                warn!(
                    timestamp = %reading.timestamp,
                    tail = %tail.timestamp,
                    "out-of-order reading pinned to window tail"
                );
                reading.timestamp = tail.timestamp;
            }
        }

        let thermal = reading.point(Channel::Thermal);
        let light = reading.point(Channel::Light);
        self.thermal.push_back(thermal);
        self.light.push_back(light);
        self.current_thermal = Some(thermal);
        self.current_light = Some(light);
    }
}

impl Default for WindowBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MINUTES)
    }
}

fn window_width(minutes: i64) -> Duration {
    Duration::minutes(minutes.clamp(0, MAX_HORIZON_MINUTES))
}

fn trim_prefix(series: &mut VecDeque<WindowPoint>, bound: DateTime<Utc>) -> usize {
    let mut removed = 0;
    while let Some(front) = series.front() {
        if front.timestamp < bound {
            series.pop_front();
            removed += 1;
        } else {
            break;
        }
    }
    removed
}

/// Thread-safe shared window buffer.
///
/// Writers take the write lock for a whole append-then-prune, so readers never
/// observe a half-updated buffer.
pub type SharedWindowBuffer = Arc<RwLock<WindowBuffer>>;

/// Create a new shared window buffer.
pub fn create_shared_buffer(buffer: WindowBuffer) -> SharedWindowBuffer {
    Arc::new(RwLock::new(buffer))
}

pub fn read_buffer(buffer: &SharedWindowBuffer) -> RwLockReadGuard<'_, WindowBuffer> {
    buffer.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_buffer(buffer: &SharedWindowBuffer) -> RwLockWriteGuard<'_, WindowBuffer> {
    buffer.write().unwrap_or_else(PoisonError::into_inner)
}

impl ReadingSink for SharedWindowBuffer {
    fn name(&self) -> &'static str {
        "window buffer"
    }

    fn accept(&mut self, reading: &Reading) -> Result<(), SinkError> {
        write_buffer(self).append(reading);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn ago(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        now - Duration::seconds(secs)
    }

    #[test]
    fn test_append_projects_both_channels() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        buffer.append_at(&Reading::at(now, 1, 1523), now);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.points(Channel::Thermal)[0].value, 1);
        assert_eq!(buffer.points(Channel::Light)[0].value, 1523);
        assert_eq!(buffer.current(Channel::Light).unwrap().value, 1523);
    }

    #[test]
    fn test_append_prunes_expired_points() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        buffer.append_at(&Reading::at(ago(now, 15 * 60), 0, 100), ago(now, 15 * 60));
        buffer.append_at(&Reading::at(ago(now, 11 * 60), 0, 200), ago(now, 11 * 60));
        assert_eq!(buffer.len(), 2);

        buffer.append_at(&Reading::at(now, 1, 300), now);
        let lights: Vec<i64> = buffer.iter(Channel::Light).map(|p| p.value).collect();
        assert_eq!(lights, vec![300]);
        assert_eq!(buffer.lower_bound(), Some(now - Duration::minutes(10)));
    }

    #[test]
    fn test_load_replaces_and_sets_current() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        buffer.append_at(&Reading::at(now, 0, 999), now);

        let history = vec![
            Reading::at(ago(now, 50 * 60), 0, 10),
            Reading::at(ago(now, 8 * 60), 1, 20),
            Reading::at(ago(now, 60), 0, 30),
        ];
        buffer.load_at(history, now);

        let lights: Vec<i64> = buffer.iter(Channel::Light).map(|p| p.value).collect();
        assert_eq!(lights, vec![20, 30]);
        assert_eq!(buffer.current(Channel::Light).unwrap().value, 30);
        assert_eq!(buffer.current(Channel::Thermal).unwrap().value, 0);
    }

    #[test]
    fn test_load_empty_clears_current() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        buffer.append_at(&Reading::at(now, 1, 500), now);
        buffer.load_at(Vec::new(), now);

        assert!(buffer.is_empty());
        assert!(buffer.current(Channel::Thermal).is_none());
    }

    #[test]
    fn test_set_window_shrinks_and_prunes() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(60);
        for secs in [50 * 60, 20 * 60, 5 * 60, 30] {
            buffer.append_at(&Reading::at(ago(now, secs), 0, secs), now);
        }
        assert_eq!(buffer.len(), 4);

        buffer.set_window_at(10, now);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.window(), Duration::minutes(10));
    }

    #[test]
    fn test_prune_only_trims_prefix() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        let earlier = ago(now, 20 * 60);
        buffer.append_at(&Reading::at(earlier, 0, 1), earlier);
        buffer.append_at(&Reading::at(ago(now, 60), 0, 2), earlier);
        assert_eq!(buffer.len(), 2);

        let removed = buffer.prune_at(now);
        assert_eq!(removed, 1);
        let lights: Vec<i64> = buffer.iter(Channel::Light).map(|p| p.value).collect();
        assert_eq!(lights, vec![2]);
        assert_eq!(buffer.prune_at(now), 0);
    }

    #[test]
    fn test_oversized_window_is_clamped() {
        let mut buffer = WindowBuffer::new(i64::MAX / 1000);
        assert_eq!(buffer.window(), Duration::minutes(MAX_HORIZON_MINUTES));

        buffer.set_window_at(-5, Utc::now());
        assert_eq!(buffer.window(), Duration::zero());
    }

    #[test]
    fn test_out_of_order_reading_is_pinned_to_tail() {
        let now = Utc::now();
        let mut buffer = WindowBuffer::new(10);
        buffer.append_at(&Reading::at(now, 0, 1), now);
        buffer.append_at(&Reading::at(ago(now, 30), 0, 2), now);

        let points = buffer.points(Channel::Light);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].timestamp, now);
        assert_eq!(points[1].value, 2);
    }

    #[test]
    fn test_shared_buffer_as_sink() {
        let mut shared = create_shared_buffer(WindowBuffer::default());
        shared.accept(&Reading::new(0, 450)).unwrap();
        let buffer = read_buffer(&shared);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.current(Channel::Light).unwrap().value, 450);
    }

    #[test]
    fn test_concurrent_reader_sees_whole_updates() {
        let shared = create_shared_buffer(WindowBuffer::new(1));
        let start = Utc::now() - Duration::minutes(5);
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let shared = shared.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 0..2_000i64 {
                    let at = start + Duration::milliseconds(i * 150);
                    write_buffer(&shared).append_at(&Reading::at(at, i % 2, i), at);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        while !done.load(Ordering::SeqCst) {
            let buffer = read_buffer(&shared);
            let thermal = buffer.points(Channel::Thermal);
            let light = buffer.points(Channel::Light);
            assert_eq!(thermal.len(), light.len());
            if let Some(bound) = buffer.lower_bound() {
                assert!(thermal.iter().chain(&light).all(|p| p.timestamp >= bound));
            }
        }
        writer.join().unwrap();

        let buffer = read_buffer(&shared);
        let bound = buffer.lower_bound().unwrap();
        assert!(buffer.iter(Channel::Light).all(|p| p.timestamp >= bound));
        assert_eq!(buffer.current(Channel::Light).unwrap().value, 1_999);
    }

    proptest! {
        #[test]
        fn prop_channels_stay_sorted_and_bounded(
            offsets in proptest::collection::vec(0i64..3_600, 1..200),
            window_minutes in 1i64..30,
        ) {
            let now = Utc::now();
            let mut buffer = WindowBuffer::new(window_minutes);
            for (i, secs) in offsets.iter().enumerate() {
                buffer.append_at(&Reading::at(ago(now, *secs), 0, i as i64), now);
            }

            let bound = now - Duration::minutes(window_minutes);
            for channel in Channel::ALL {
                let points = buffer.points(channel);
                prop_assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
                prop_assert!(points.iter().all(|p| p.timestamp >= bound));
            }
            prop_assert_eq!(
                buffer.points(Channel::Thermal).len(),
                buffer.points(Channel::Light).len()
            );
        }
    }
}

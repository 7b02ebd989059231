//! Reading types shared by every producer and consumer in the pipeline.
//!
//! A [`Reading`] carries one thermal flag and one light level. Downstream it is
//! projected onto two independent [`Channel`]s, each holding [`WindowPoint`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single timestamped sample from whichever producer is active.
///
/// Readings are immutable once built. The live source stamps them with the
/// receipt time; the wire protocol carries no timestamp of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// When the reading was received or generated
    pub timestamp: DateTime<Utc>,
    /// Thermal flag, 0 (normal) or 1 (high)
    pub thermal: i64,
    /// Light level. Only generated readings are clamped to a fixed range.
    pub light: i64,
}

impl Reading {
    /// Create a reading stamped with the current time.
    pub fn new(thermal: i64, light: i64) -> Self {
        Self::at(Utc::now(), thermal, light)
    }

    /// Create a reading with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, thermal: i64, light: i64) -> Self {
        Self {
            timestamp,
            thermal,
            light,
        }
    }

    /// The value this reading contributes to `channel`.
    pub fn value(&self, channel: Channel) -> i64 {
        match channel {
            Channel::Thermal => self.thermal,
            Channel::Light => self.light,
        }
    }

    /// Project this reading onto one channel.
    pub fn point(&self, channel: Channel) -> WindowPoint {
        WindowPoint {
            timestamp: self.timestamp,
            value: self.value(channel),
        }
    }

    pub fn thermal_state(&self) -> ThermalState {
        ThermalState::from_flag(self.thermal)
    }
}

/// Interpretation of the thermal flag for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalState {
    Normal,
    High,
}

impl ThermalState {
    /// Any flag other than 1 is shown as normal.
    pub fn from_flag(flag: i64) -> Self {
        if flag == 1 {
            ThermalState::High
        } else {
            ThermalState::Normal
        }
    }

    /// Label used on status lines, e.g. `1 (high)`.
    pub fn label(&self) -> &'static str {
        match self {
            ThermalState::Normal => "0 (normal)",
            ThermalState::High => "1 (high)",
        }
    }
}

/// One of the two scalar series a reading projects onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Thermal,
    Light,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Thermal, Channel::Light];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Thermal => "thermal",
            Channel::Light => "light",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reading projected onto a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPoint {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// Connection state change reported by the live source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the live link is usable after this change
    pub connected: bool,
    /// Human-readable reason, e.g. `connected to /dev/ttyUSB0`
    pub message: String,
}

impl ConnectionStatus {
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            connected: true,
            message: message.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            connected: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_projects_onto_channels() {
        let reading = Reading::new(1, 1523);
        assert_eq!(reading.point(Channel::Thermal).value, 1);
        assert_eq!(reading.point(Channel::Light).value, 1523);
        assert_eq!(
            reading.point(Channel::Thermal).timestamp,
            reading.point(Channel::Light).timestamp
        );
    }

    #[test]
    fn test_thermal_state_labels() {
        assert_eq!(Reading::new(1, 500).thermal_state(), ThermalState::High);
        assert_eq!(Reading::new(0, 500).thermal_state(), ThermalState::Normal);
        assert_eq!(ThermalState::High.label(), "1 (high)");
        assert_eq!(ThermalState::Normal.label(), "0 (normal)");
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Thermal.to_string(), "thermal");
        assert_eq!(Channel::Light.to_string(), "light");
        assert_eq!(Channel::ALL.len(), 2);
    }
}

//! Location sensing abstraction.
//!
//! A [`LocationSensor`] pushes position samples for as long as its watch is
//! active. Implementors provide the actual mechanism; the tracker only sees
//! [`SensorEvent`]s on a channel and a [`Subscription`] to cancel the watch.

pub mod nmea;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::subscription::Subscription;

pub use nmea::{NmeaSensor, NmeaSource};

/// Capacity of the channel between a sensor and its consumer.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 100;

/// One position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Direction of travel in degrees, if the sensor knows it.
    pub heading: Option<f64>,
    /// Ground speed in metres per second, if the sensor knows it.
    pub speed: Option<f64>,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

/// Something a watch reports.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A new position fix.
    Sample(Sample),
    /// The watch failed; no more events follow.
    Error(String),
}

/// Options for a location watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Accept only the sensor's most accurate fixes.
    pub high_accuracy: bool,
    /// Oldest fix accepted, relative to the newest one already delivered.
    pub maximum_age: Duration,
    /// Longest wait for the next fix before the watch fails.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for WatchOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            maximum_age: config.maximum_age(),
            timeout: config.timeout(),
        }
    }
}

/// Trait for location sources.
pub trait LocationSensor: Send + Sync + std::fmt::Debug {
    /// The name of this sensor (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Check if this device can sense its location at all.
    fn is_available(&self) -> bool;

    /// Start a continuous watch.
    ///
    /// Samples and at most one terminal error are sent through `tx` until the
    /// returned subscription is cancelled. Must be called from within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be started.
    fn start_watch(
        &self,
        options: WatchOptions,
        tx: mpsc::Sender<SensorEvent>,
    ) -> Result<Subscription>;
}

//! Float state: the unit of synchronized data.
//!
//! A [`FloatState`] is the local, read-only view of one float's remote record.
//! It is rebuilt from scratch from every snapshot the store pushes, and it is
//! the only place where the store's timestamp encodings are understood.
//!
//! Writers never send whole records. They send one of the partial patches
//! built by the `*_patch` functions in this module.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::Entity;
use crate::sensor::Sample;
use crate::store::{Document, Patch};

/// Remote field names.
pub mod fields {
    /// Latitude in degrees.
    pub const LAT: &str = "lat";
    /// Longitude in degrees.
    pub const LNG: &str = "lng";
    /// Speed in metres per second.
    pub const SPEED: &str = "speed";
    /// Sensor heading in degrees.
    pub const HEADING: &str = "heading";
    /// Manual marker rotation in degrees.
    pub const ANGLE_DEG: &str = "angleDeg";
    /// Last update time.
    pub const UPDATED_AT: &str = "updatedAt";
    /// Battery level.
    pub const BATTERY: &str = "battery";
    /// Publishing device name.
    pub const DEVICE: &str = "device";
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the coordinate lies within the geographic range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lng)
    }
}

/// The latest known attributes of one float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatState {
    /// Registry identifier.
    pub id: String,
    /// Display name (local only).
    pub name: String,
    /// Latitude.
    pub lat: Option<f64>,
    /// Longitude.
    pub lng: Option<f64>,
    /// Speed in metres per second.
    pub speed: Option<f64>,
    /// Sensor heading in degrees.
    pub heading: Option<f64>,
    /// Manual rotation override in degrees.
    pub angle_deg: Option<f64>,
    /// Last update as epoch milliseconds.
    pub updated_at: Option<i64>,
    /// Battery level.
    pub battery: Option<f64>,
    /// Publishing device name.
    pub device: Option<String>,
}

impl FloatState {
    /// A state holding only identity, used before any snapshot arrives.
    #[must_use]
    pub fn stub(entity: Entity) -> Self {
        Self {
            id: entity.id.to_string(),
            name: entity.name.to_string(),
            lat: None,
            lng: None,
            speed: None,
            heading: None,
            angle_deg: None,
            updated_at: None,
            battery: None,
            device: None,
        }
    }

    /// Build a state from a store snapshot.
    ///
    /// Every field comes from the snapshot alone. Missing fields, wrongly typed
    /// fields and a missing document all yield unknown values.
    #[must_use]
    pub fn from_snapshot(entity: Entity, snapshot: Option<&Document>) -> Self {
        let Some(doc) = snapshot else {
            return Self::stub(entity);
        };

        Self {
            id: entity.id.to_string(),
            name: entity.name.to_string(),
            lat: number(doc, fields::LAT),
            lng: number(doc, fields::LNG),
            speed: number(doc, fields::SPEED),
            heading: number(doc, fields::HEADING),
            angle_deg: number(doc, fields::ANGLE_DEG),
            updated_at: doc.get(fields::UPDATED_AT).and_then(normalize_timestamp),
            battery: number(doc, fields::BATTERY),
            device: doc
                .get(fields::DEVICE)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// The coordinate, if both latitude and longitude are known.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Position::new(lat, lng)),
            _ => None,
        }
    }

    /// The marker rotation in degrees.
    #[must_use]
    pub fn rotation(&self) -> f64 {
        rotation(self.angle_deg, self.heading)
    }

    /// The last update time.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Whether the last update is older than `threshold` at `now`.
    ///
    /// A float that never reported is not stale; it is simply unknown.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Option<Duration>) -> bool {
        let (Some(threshold), Some(updated)) = (threshold, self.updated_at()) else {
            return false;
        };
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return false;
        };
        now - updated > threshold
    }
}

/// Rotation fallback: manual angle, else heading, else zero.
#[must_use]
pub fn rotation(angle_deg: Option<f64>, heading: Option<f64>) -> f64 {
    angle_deg
        .filter(|a| a.is_finite())
        .or_else(|| heading.filter(|h| h.is_finite()))
        .unwrap_or(0.0)
}

fn number(doc: &Document, key: &str) -> Option<f64> {
    doc.get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

/// Convert any stored timestamp encoding to epoch milliseconds.
///
/// Accepts plain numbers (already milliseconds), server timestamp objects
/// (`{"seconds", "nanos"}`, also with `nanoseconds` or underscore-prefixed
/// keys) and RFC 3339 strings. Anything else is `None`.
#[must_use]
pub fn normalize_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| f64_to_millis(f.round()))
        }),
        Value::Object(map) => {
            let seconds = ["seconds", "_seconds"]
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(Value::as_i64)?;
            let nanos = ["nanos", "nanoseconds", "_nanoseconds"]
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            seconds
                .checked_mul(1_000)
                .and_then(|ms| ms.checked_add(nanos / 1_000_000))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn f64_to_millis(f: f64) -> Option<i64> {
    // i64::MAX is not exactly representable; stay inside the safe range.
    const LIMIT: f64 = 9.0e18;
    (f.abs() < LIMIT).then(|| f as i64)
}

/// Fields written when a tracker session starts.
#[must_use]
pub fn session_start_patch(device: &str) -> Patch {
    Patch::new()
        .set(fields::DEVICE, device)
        .server_timestamp(fields::UPDATED_AT)
}

/// Fields written for every location sample.
///
/// Heading and speed that are missing or not finite are written as null.
#[must_use]
pub fn sample_patch(sample: &Sample, device: &str) -> Patch {
    Patch::new()
        .set(fields::LAT, sample.lat)
        .set(fields::LNG, sample.lng)
        .set(fields::HEADING, finite_or_null(sample.heading))
        .set(fields::SPEED, finite_or_null(sample.speed))
        .set(fields::DEVICE, device)
        .server_timestamp(fields::UPDATED_AT)
}

/// Fields written when a marker is dragged to a new coordinate.
#[must_use]
pub fn move_patch(position: Position) -> Patch {
    Patch::new()
        .set(fields::LAT, position.lat)
        .set(fields::LNG, position.lng)
        .server_timestamp(fields::UPDATED_AT)
}

/// Fields written when a manual rotation is saved.
#[must_use]
pub fn angle_patch(angle_deg: i32) -> Patch {
    Patch::new().set(fields::ANGLE_DEG, angle_deg)
}

fn finite_or_null(value: Option<f64>) -> Value {
    value
        .filter(|v| v.is_finite())
        .map_or(Value::Null, Value::from)
}

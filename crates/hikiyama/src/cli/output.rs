//! Plain-text rendering for CLI output.

use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::float::FloatState;
use crate::registry;
use crate::sync::FloatTable;

const UNKNOWN: &str = "-";

/// One line per registered float: identifier and display name.
#[must_use]
pub fn registry_listing() -> String {
    let mut out = String::new();
    for entity in registry::entities() {
        let _ = writeln!(out, "{}  {}", entity.id, entity.name);
    }
    out
}

/// The status table shown by `status` and `view`.
///
/// The display name is the last column so wide characters don't break the
/// alignment of the others.
#[must_use]
pub fn status_table(table: &FloatTable, now: DateTime<Utc>, stale_after: Option<Duration>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<7} {:>10} {:>11} {:>5} {:>6} {:<14} {:<16} NAME",
        "ID", "LAT", "LNG", "ROT", "SPEED", "DEVICE", "UPDATED"
    );
    for state in table.iter() {
        let _ = writeln!(out, "{}", status_row(state, now, stale_after));
    }
    out
}

fn status_row(state: &FloatState, now: DateTime<Utc>, stale_after: Option<Duration>) -> String {
    let coordinate = |v: Option<f64>| v.map_or_else(|| UNKNOWN.to_string(), |v| format!("{v:.5}"));
    let speed = state
        .speed
        .map_or_else(|| UNKNOWN.to_string(), |s| format!("{s:.1}"));
    let updated = match state.updated_at() {
        Some(at) => {
            let mut text = format_age(now, at);
            if state.is_stale(now, stale_after) {
                text.push_str(" stale");
            }
            text
        }
        None => UNKNOWN.to_string(),
    };

    format!(
        "{:<7} {:>10} {:>11} {:>5.0} {:>6} {:<14} {:<16} {}",
        state.id,
        coordinate(state.lat),
        coordinate(state.lng),
        state.rotation(),
        speed,
        truncate(state.device.as_deref().unwrap_or(UNKNOWN), 14),
        updated,
        state.name,
    )
}

/// Human-readable age of `at` relative to `now`, e.g. `42s ago`.
#[must_use]
pub fn format_age(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

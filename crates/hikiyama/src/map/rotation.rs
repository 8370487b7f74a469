//! Manual marker rotation editor.

use tracing::info;

use crate::error::Result;
use crate::float::{self, FloatState};
use crate::registry;
use crate::store::{DocumentStore, Patch};

/// Lowest selectable angle.
pub const MIN_ANGLE: i32 = -180;
/// Highest selectable angle.
pub const MAX_ANGLE: i32 = 180;
/// Degrees per quick step.
pub const STEP_DEGREES: i32 = 15;

/// Editing state for one float's manual rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationEditor {
    float_id: &'static str,
    angle: i32,
}

impl RotationEditor {
    /// Start editing. The initial angle is the manual angle if set, else the
    /// rounded heading, else zero.
    #[must_use]
    pub fn new(float_id: &'static str, angle_deg: Option<f64>, heading: Option<f64>) -> Self {
        let initial = angle_deg
            .filter(|a| a.is_finite())
            .or_else(|| heading.filter(|h| h.is_finite()))
            .map_or(0, round_degrees);
        Self {
            float_id,
            angle: initial,
        }
    }

    /// Start editing a float from its current state.
    #[must_use]
    pub fn for_state(state: &FloatState) -> Option<Self> {
        let entity = registry::lookup(&state.id)?;
        Some(Self::new(entity.id, state.angle_deg, state.heading))
    }

    /// The float being edited.
    #[must_use]
    pub fn float_id(&self) -> &'static str {
        self.float_id
    }

    /// The current angle.
    #[must_use]
    pub fn angle(&self) -> i32 {
        self.angle
    }

    /// Set the angle, clamped to the slider range.
    pub fn set(&mut self, degrees: i32) -> i32 {
        self.angle = degrees.clamp(MIN_ANGLE, MAX_ANGLE);
        self.angle
    }

    /// Move by `steps` quick steps (negative turns counter-clockwise).
    pub fn step(&mut self, steps: i32) -> i32 {
        self.set(self.angle.saturating_add(steps.saturating_mul(STEP_DEGREES)))
    }

    /// Set the angle back to zero.
    pub fn reset(&mut self) -> i32 {
        self.set(0)
    }

    /// The patch *Save* writes. Only the angle is touched.
    #[must_use]
    pub fn patch(&self) -> Patch {
        float::angle_patch(self.angle)
    }

    /// Save the angle to the float's record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn save(&self, store: &dyn DocumentStore) -> Result<()> {
        store.merge(self.float_id, self.patch()).await?;
        info!(float = self.float_id, angle = self.angle, "Saved marker rotation");
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_degrees(degrees: f64) -> i32 {
    degrees
        .round()
        .clamp(f64::from(MIN_ANGLE), f64::from(MAX_ANGLE)) as i32
}

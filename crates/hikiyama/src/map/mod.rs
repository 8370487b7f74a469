//! Map view state.
//!
//! [`MapView`] is the interaction model behind the map: which basemap is
//! shown, where the camera is, whether edit mode is on and which marker is
//! selected. Drawing is left to the front end; this module decides what gets
//! drawn and what a gesture writes to the store.

pub mod geojson;
pub mod glyph;
pub mod rotation;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MapConfig;
use crate::error::Result;
use crate::float::{self, Position};
use crate::registry;
use crate::store::{DocumentStore, Patch};
use crate::sync::FloatTable;

pub use geojson::{to_geojson, FeatureCollection};
pub use glyph::marker_svg;
pub use rotation::RotationEditor;

/// Background tile layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basemap {
    /// Street map.
    #[default]
    Street,
    /// Satellite imagery.
    Satellite,
}

impl Basemap {
    /// The other basemap.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Street => Self::Satellite,
            Self::Satellite => Self::Street,
        }
    }
}

impl std::fmt::Display for Basemap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Street => write!(f, "street"),
            Self::Satellite => write!(f, "satellite"),
        }
    }
}

/// One drawable marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Float identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Marker coordinate.
    pub position: Position,
    /// Rotation in degrees.
    pub rotation: f64,
    /// Whether the marker can be dragged.
    pub draggable: bool,
    /// Whether the marker is selected.
    pub selected: bool,
    /// Whether the float's last update is older than the stale threshold.
    pub stale: bool,
}

impl Marker {
    /// The marker glyph as SVG.
    #[must_use]
    pub fn svg(&self) -> String {
        marker_svg(self.name, self.rotation)
    }
}

/// Interaction state of the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapView {
    config: MapConfig,
    basemap: Basemap,
    center: Position,
    zoom: u8,
    edit_mode: bool,
    selected: Option<&'static str>,
}

impl MapView {
    /// A view at the configured default center and zoom, street basemap,
    /// edit mode off and nothing selected.
    #[must_use]
    pub fn new(config: &MapConfig) -> Self {
        Self {
            config: config.clone(),
            basemap: Basemap::default(),
            center: Position::new(config.center_lat, config.center_lng),
            zoom: config.default_zoom,
            edit_mode: false,
            selected: None,
        }
    }

    /// The current basemap.
    #[must_use]
    pub fn basemap(&self) -> Basemap {
        self.basemap
    }

    /// Switch between street and satellite. Writes nothing.
    pub fn toggle_basemap(&mut self) -> Basemap {
        self.basemap = self.basemap.toggled();
        debug!(basemap = %self.basemap, "Switched basemap");
        self.basemap
    }

    /// Tile URL template for the current basemap.
    #[must_use]
    pub fn tile_url_template(&self) -> &str {
        match self.basemap {
            Basemap::Street => &self.config.street_tiles,
            Basemap::Satellite => &self.config.satellite_tiles,
        }
    }

    /// Camera center.
    #[must_use]
    pub fn center(&self) -> Position {
        self.center
    }

    /// Camera zoom.
    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Reset center and zoom to the configured defaults.
    pub fn recenter(&mut self) {
        self.center = Position::new(self.config.center_lat, self.config.center_lng);
        self.zoom = self.config.default_zoom;
    }

    /// Whether edit mode is on.
    #[must_use]
    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    /// Turn edit mode on or off.
    pub fn set_edit_mode(&mut self, on: bool) {
        if self.edit_mode != on {
            info!(edit_mode = on, "Edit mode changed");
        }
        self.edit_mode = on;
    }

    /// Flip edit mode and return the new value.
    pub fn toggle_edit_mode(&mut self) -> bool {
        self.set_edit_mode(!self.edit_mode);
        self.edit_mode
    }

    /// The selected float.
    #[must_use]
    pub fn selected(&self) -> Option<&'static str> {
        self.selected
    }

    /// Select a float without moving the camera. Returns false if `id` is not
    /// registered.
    pub fn select(&mut self, id: &str) -> bool {
        match registry::lookup(id) {
            Some(entity) => {
                self.selected = Some(entity.id);
                true
            }
            None => false,
        }
    }

    /// Whether the marker for `id` can be dragged right now.
    #[must_use]
    pub fn is_draggable(&self, id: &str) -> bool {
        self.edit_mode && self.selected == Some(id)
    }

    /// Derive the markers to draw. Floats without a full coordinate have no
    /// marker.
    #[must_use]
    pub fn markers(
        &self,
        table: &FloatTable,
        now: DateTime<Utc>,
        stale_after: Option<Duration>,
    ) -> Vec<Marker> {
        table
            .iter()
            .filter_map(|state| {
                let entity = registry::lookup(&state.id)?;
                let position = state.position()?;
                Some(Marker {
                    id: entity.id,
                    name: entity.name,
                    position,
                    rotation: state.rotation(),
                    draggable: self.is_draggable(entity.id),
                    selected: self.selected == Some(entity.id),
                    stale: state.is_stale(now, stale_after),
                })
            })
            .collect()
    }

    /// Handle a click on a marker: select it and fly to it.
    pub fn click(&mut self, marker: &Marker) {
        self.selected = Some(marker.id);
        self.center = marker.position;
        self.zoom = self.config.focus_zoom;
        debug!(float = marker.id, "Selected marker");
    }

    /// The patch a drag end on `id` at `position` would write, if any.
    #[must_use]
    pub fn drag_patch(&self, id: &str, position: Position) -> Option<Patch> {
        self.is_draggable(id).then(|| float::move_patch(position))
    }

    /// Handle a drag end. Returns whether a write was made.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn drag_end(
        &self,
        store: &dyn DocumentStore,
        id: &str,
        position: Position,
    ) -> Result<bool> {
        let Some(patch) = self.drag_patch(id, position) else {
            debug!(float = id, "Ignoring drag on a marker that is not editable");
            return Ok(false);
        };
        store.merge(id, patch).await?;
        info!(float = id, %position, "Moved float");
        Ok(true)
    }
}

//! GeoJSON export of the visible markers.
//!
//! Coordinates follow RFC 7946 order: `[longitude, latitude]`.

use serde::Serialize;

use super::Marker;

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    /// One feature per marker.
    pub features: Vec<Feature>,
}

/// A marker as a GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    /// Float identifier.
    pub id: &'static str,
    /// Point geometry.
    pub geometry: Point,
    /// Marker attributes.
    pub properties: Properties,
}

/// A GeoJSON point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Point")]
pub struct Point {
    /// `[longitude, latitude]`.
    pub coordinates: [f64; 2],
}

/// Feature properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Properties {
    /// Display name.
    pub name: &'static str,
    /// Rotation in degrees.
    pub rotation: f64,
    /// Whether the float is selected.
    pub selected: bool,
    /// Whether the float's last update is stale.
    pub stale: bool,
}

impl From<&Marker> for Feature {
    fn from(marker: &Marker) -> Self {
        Self {
            id: marker.id,
            geometry: Point {
                coordinates: [marker.position.lng, marker.position.lat],
            },
            properties: Properties {
                name: marker.name,
                rotation: marker.rotation,
                selected: marker.selected,
                stale: marker.stale,
            },
        }
    }
}

/// Build a feature collection from markers.
#[must_use]
pub fn to_geojson(markers: &[Marker]) -> FeatureCollection {
    FeatureCollection {
        features: markers.iter().map(Feature::from).collect(),
    }
}

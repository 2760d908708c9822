//! The atomic feature model every format converts to and from
//!
//! Composite geometries (multi-geometries, collections) never appear here: they only
//! exist as parse-time transients and are flattened by [`crate::explode`].

use crate::color::{self, Color};
use crate::config::Config;
use crate::utils;
use geo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A WGS84 position with optional elevation in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon,
            lat,
            elevation: None,
        }
    }

    pub fn with_elevation(lon: f64, lat: f64, elevation: f64) -> Self {
        Self {
            lon,
            lat,
            elevation: Some(elevation),
        }
    }

    /// Within [-180, 180] x [-90, 90], finite, and with a finite elevation if any
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
            && self.elevation.is_none_or(f64::is_finite)
    }

    /// Position as written by GeoJSON and KML: `[lon, lat]` or `[lon, lat, ele]`
    pub fn to_position(&self) -> Vec<f64> {
        match self.elevation {
            Some(ele) => vec![self.lon, self.lat, ele],
            None => vec![self.lon, self.lat],
        }
    }

    /// Read a GeoJSON position; a non-finite third value is treated as no elevation
    pub fn from_position(position: &[f64]) -> Option<Self> {
        match position {
            [lon, lat] => Some(Self::new(*lon, *lat)),
            [lon, lat, ele, ..] if ele.is_finite() => Some(Self::with_elevation(*lon, *lat, *ele)),
            [lon, lat, ..] => Some(Self::new(*lon, *lat)),
            _ => None,
        }
    }

    #[inline]
    pub fn to_geo(&self) -> geo::Coord<f64> {
        geo::Coord {
            x: self.lon,
            y: self.lat,
        }
    }
}

/// Geometry kinds the editor supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    /// A single outer ring, stored open (the closing vertex is implied)
    Polygon(Vec<Coord>),
}

impl Geometry {
    /// All vertices in order (the polygon ring without its closing vertex)
    pub fn coords(&self) -> &[Coord] {
        match self {
            Geometry::Point(coord) => std::slice::from_ref(coord),
            Geometry::LineString(coords) | Geometry::Polygon(coords) => coords,
        }
    }

    /// Polygon rings closed by repeating the first vertex, other kinds unchanged
    pub fn closed_coords(&self) -> Vec<Coord> {
        let mut coords = self.coords().to_vec();
        if let Geometry::Polygon(ring) = self
            && let Some(first) = ring.first()
        {
            coords.push(*first);
        }
        coords
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) => GeometryKind::LineString,
            Geometry::Polygon(_) => GeometryKind::Polygon,
        }
    }

    pub fn has_elevation(&self) -> bool {
        self.coords().iter().any(|c| c.elevation.is_some())
    }
}

/// Discriminant of [`Geometry`], also used for user-facing labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

impl GeometryKind {
    /// Label used when naming the parts of a geometry collection
    pub fn label(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Marker",
            GeometryKind::LineString => "Path",
            GeometryKind::Polygon => "Area",
        }
    }
}

/// Metadata carried alongside a geometry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` means "use the configured default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    /// Opaque external activity identifier, preserved verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_id: Option<String>,
    /// KMZ entry the feature was read from; only used to regroup on KMZ export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Flat file the feature was imported from; only used to group on KMZ export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_file: Option<String>,
    /// Unrecognized GeoJSON properties, kept for GeoJSON round trips
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Properties {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// One atomic geometry with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    pub fn point(coord: Coord) -> Self {
        Self::new(Geometry::Point(coord), Properties::default())
    }

    pub fn line(coords: Vec<Coord>) -> Self {
        Self::new(Geometry::LineString(coords), Properties::default())
    }

    pub fn polygon(ring: Vec<Coord>) -> Self {
        Self::new(Geometry::Polygon(ring), Properties::default())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.properties.name = Some(name.into());
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.properties.color = Some(color);
        self
    }

    pub fn with_provenance_id(mut self, id: impl Into<String>) -> Self {
        self.properties.provenance_id = Some(id.into());
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.properties.source_path = Some(path.into());
        self
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.properties.name.as_deref()
    }

    /// Color to emit: the feature's own, else the configured default
    pub fn effective_color(&self, config: &Config) -> Color {
        let own = self.properties.color.map(|c| c.to_string());
        color::resolve([own.as_deref()], &config.palette, config.default_color)
    }
}

/// Summary of a feature set
#[derive(Debug, Clone, Default)]
pub struct FeatureSetInfo {
    pub markers: usize,
    pub paths: usize,
    pub areas: usize,
    /// Total number of vertices
    pub total_points: usize,
    /// Summed length of paths and area perimeters in meters
    pub total_length_meters: f64,
    /// WGS84 bounds (x = lon, y = lat), `None` when empty
    pub bounding_box: Option<Rect<f64>>,
}

/// Ordered collection of features handed to and returned from every conversion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn as_slice(&self) -> &[Feature] {
        &self.features
    }

    pub fn get(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn into_vec(self) -> Vec<Feature> {
        self.features
    }

    /// Counts, length and bounds of the whole set
    pub fn summary(&self) -> FeatureSetInfo {
        let mut info = FeatureSetInfo::default();

        for feature in &self.features {
            match feature.geometry.kind() {
                GeometryKind::Point => info.markers += 1,
                GeometryKind::LineString => info.paths += 1,
                GeometryKind::Polygon => info.areas += 1,
            }

            let coords = feature.geometry.coords();
            info.total_points += coords.len();
            info.total_length_meters += feature
                .geometry
                .closed_coords()
                .windows(2)
                .map(|pair| utils::haversine_distance(&pair[0], &pair[1]))
                .sum::<f64>();

            for coord in coords {
                info.bounding_box = Some(utils::expand_rect(info.bounding_box, coord.to_geo()));
            }
        }

        info
    }
}

impl From<Vec<Feature>> for FeatureSet {
    fn from(features: Vec<Feature>) -> Self {
        Self { features }
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

impl Extend<Feature> for FeatureSet {
    fn extend<T: IntoIterator<Item = Feature>>(&mut self, iter: T) {
        self.features.extend(iter);
    }
}

impl IntoIterator for FeatureSet {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl<'a> IntoIterator for &'a FeatureSet {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

//! Per-format parsers and serializers
//!
//! | Format | Parse | Serialize |
//! |--------|-------|-----------|
//! | GeoJSON | Feature or FeatureCollection | FeatureCollection |
//! | GPX | tracks, routes, waypoints + style/provenance extensions | tracks and waypoints |
//! | KML | placemarks with inline or shared styles | placemarks with inline styles |
//! | KMZ | every KML entry independently, other entries passed through | manifest + grouped sub-documents |

pub mod geojson;
pub mod gpx;
pub mod kml;
pub mod kmz;

use std::fmt;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    GeoJson,
    Gpx,
    Kml,
    Kmz,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::GeoJson, Format::Gpx, Format::Kml, Format::Kmz];

    /// Detect the format from a file extension (case-insensitive, with or without dot)
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension
            .trim_start_matches('.')
            .to_ascii_lowercase()
            .as_str()
        {
            "geojson" | "json" => Some(Format::GeoJson),
            "gpx" => Some(Format::Gpx),
            "kml" => Some(Format::Kml),
            "kmz" => Some(Format::Kmz),
            _ => None,
        }
    }

    /// Preferred file extension, without dot
    pub fn extension(&self) -> &'static str {
        match self {
            Format::GeoJson => "geojson",
            Format::Gpx => "gpx",
            Format::Kml => "kml",
            Format::Kmz => "kmz",
        }
    }

    /// Whether the serialized form is binary
    pub fn is_binary(&self) -> bool {
        matches!(self, Format::Kmz)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::GeoJson => "GeoJSON",
            Format::Gpx => "GPX",
            Format::Kml => "KML",
            Format::Kmz => "KMZ",
        })
    }
}

//! Map Interchange Library - Feature Conversion Core
//!
//! This library converts map features (markers, paths and areas with optional elevation)
//! between GeoJSON, GPX, KML and KMZ, and packs feature sets into compact URL-safe share
//! strings. Names, colors, elevation and provenance IDs survive round trips.
//!
//! # Architecture
//!
//! - **[`color`]**: Canonical colors and the candidate fallback chain
//! - **[`explode`]**: Multi-geometries and collections into atomic features
//! - **[`formats`]**: Per-format parsers and serializers
//! - **[`share`]**: Quantized, polyline-encoded, compressed share strings
//! - **[`FeatureSet`]**: The ordered, atomic collection every conversion uses
//!
//! Every entry point is a pure function over in-memory buffers taking an explicit
//! [`Config`]; nothing here touches files, the network or global state.

pub mod color;
mod config;
pub mod explode;
mod feature;
pub mod formats;
pub mod share;
pub mod utils;

// Public API exports
pub use color::Color;
pub use config::{Config, Palette};
pub use feature::{Coord, Feature, FeatureSet, FeatureSetInfo, Geometry, GeometryKind, Properties};
pub use formats::Format;
pub use formats::kmz::{KmzEntryFailure, KmzImport, PassthroughEntry};
pub use share::DecodeError;

/// Structurally invalid input for one of the file formats
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {format} input: {reason}")]
pub struct ParseError {
    pub format: Format,
    pub reason: String,
}

impl ParseError {
    pub fn new(format: Format, reason: impl Into<String>) -> Self {
        Self {
            format,
            reason: reason.into(),
        }
    }
}

/// Failures while producing output that cannot be expressed as plain text
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("KMZ archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polyline encoding error: {0}")]
    Polyline(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{geojson, gpx, kml, kmz};

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Config = Config::default;
        let _: fn() -> FeatureSet = FeatureSet::new;
        let _: fn(&[u8], &Config) -> Result<KmzImport> = kmz::parse;
    }

    #[test]
    fn test_gpx_to_geojson_scenario() {
        let gpx_text = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpx_style="http://www.topografix.com/GPX/gpx_style/0/2">
  <trk>
    <name>Morning</name>
    <extensions>
      <gpx_style:line><gpx_style:color>E51B23</gpx_style:color></gpx_style:line>
    </extensions>
    <trkseg>
      <trkpt lat="47.0" lon="7.0"><ele>100</ele></trkpt>
      <trkpt lat="47.001" lon="7.001"><ele>110</ele></trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let config = Config::default();
        let features = gpx::parse(gpx_text, &config).unwrap();
        let output = geojson::serialize(&features, &config);
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();

        let collection = json["features"].as_array().unwrap();
        assert_eq!(collection.len(), 1);
        let feature = &collection[0];
        assert_eq!(feature["geometry"]["type"], "LineString");
        assert_eq!(feature["properties"]["stroke"], "#E51B23");
        assert_eq!(
            feature["geometry"]["coordinates"],
            serde_json::json!([[7.0, 47.0, 100.0], [7.001, 47.001, 110.0]])
        );

        let keys: Vec<&String> = feature["properties"].as_object().unwrap().keys().collect();
        assert!(keys
            .iter()
            .all(|k| !k.contains("gpx_style") && !k.contains("extensions")));
        assert!(!keys.iter().any(|k| k.as_str() == config.provenance_key));
    }

    #[test]
    fn test_kml_round_trip_preserves_metadata() {
        let config = Config::default();
        let original: FeatureSet = vec![
            Feature::line(vec![
                Coord::with_elevation(7.0, 47.0, 100.0),
                Coord::with_elevation(7.01, 47.01, 120.0),
            ])
            .with_name("Climb & descent")
            .with_color(Color::new(0x1E, 0x88, 0xE5))
            .with_provenance_id("9876543210"),
            Feature::point(Coord::new(7.5, 46.5))
                .with_name("Hut")
                .with_color(config.palette.get("Teal").unwrap()),
        ]
        .into();

        let text = kml::serialize(&original, &kml::KmlOptions::default(), &config);
        let parsed = kml::parse(&text, &config).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_share_round_trip_bounded_precision() {
        let config = Config::default();
        let original: FeatureSet = vec![
            Feature::line(vec![
                Coord::with_elevation(7.12345, 47.54321, 432.0),
                Coord::with_elevation(7.12445, 47.54421, 440.0),
            ])
            .with_name("Ridge")
            .with_provenance_id("42"),
            Feature::polygon(vec![
                Coord::new(-0.12, 51.5),
                Coord::new(-0.11, 51.5),
                Coord::new(-0.11, 51.51),
            ])
            .with_color(Color::new(0x00, 0x96, 0x88)),
            Feature::point(Coord::new(13.405, 52.52)),
        ]
        .into();

        let encoded = share::encode(&original, &config).unwrap().unwrap();
        let decoded = share::decode(&encoded, &config).unwrap();

        let expected: FeatureSet = original
            .into_iter()
            .map(|mut f| {
                f.properties.color.get_or_insert(config.default_color);
                f
            })
            .collect();
        assert_eq!(decoded, expected);
    }
}

//! Compact, URL-safe share strings
//!
//! A feature set becomes a list of short-keyed records:
//!
//! | key | content |
//! |-----|---------|
//! | `t` | `m` marker, `p` path, `a` area |
//! | `c` | `[lon, lat]` for markers, an encoded polyline otherwise |
//! | `n`, `d` | name, description |
//! | `s` | `RRGGBB`, only when it differs from the default color |
//! | `e` | integer elevations, one per vertex |
//! | `sid` | provenance ID |
//!
//! The records are wrapped in `{"version": 1, "features": [...]}`, DEFLATE-compressed and
//! written with the URL-safe base64 alphabet without padding, so the result can be pasted
//! into a URL as-is.

use crate::explode::{RawFeature, explode};
use crate::utils::round_to;
use crate::{Color, Config, ExportError, Feature, FeatureSet, Geometry, GeometryKind, Properties};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use geojson::Value;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Share string decoding failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported share version {found}")]
    UnsupportedVersion { found: u64 },

    #[error("corrupt share payload: {0}")]
    CorruptPayload(String),

    #[error("share string contains no usable features")]
    EmptyResult,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    version: u32,
    features: &'a [Record],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    t: String,
    c: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Payload {
    Point([f64; 2]),
    Polyline(String),
}

const TAG_MARKER: &str = "m";
const TAG_PATH: &str = "p";
const TAG_AREA: &str = "a";

/// Encode a feature set as a share string
///
/// Returns `Ok(None)` for an empty set: there is nothing to share.
///
/// # Errors
///
/// Returns [`ExportError`] if a coordinate cannot be polyline-encoded or compression fails.
pub fn encode(features: &FeatureSet, config: &Config) -> Result<Option<String>, ExportError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("share::encode");

    if features.is_empty() {
        return Ok(None);
    }

    let records = features
        .iter()
        .map(|feature| to_record(feature, config))
        .collect::<Result<Vec<_>, _>>()?;
    let json = serde_json::to_string(&Envelope {
        version: config.share_version,
        features: &records,
    })?;

    let encoded = compress(&json)?;
    tracing::debug!(
        features = records.len(),
        json_bytes = json.len(),
        encoded_len = encoded.len(),
        "Encoded share string"
    );
    Ok(Some(encoded))
}

fn to_record(feature: &Feature, config: &Config) -> Result<Record, ExportError> {
    let factor = config.share_factor();
    let coords = feature.geometry.coords();

    let (tag, payload) = match &feature.geometry {
        Geometry::Point(coord) => (
            TAG_MARKER,
            Payload::Point([round_to(coord.lon, factor), round_to(coord.lat, factor)]),
        ),
        Geometry::LineString(_) | Geometry::Polygon(_) => {
            let tag = match feature.geometry.kind() {
                GeometryKind::Polygon => TAG_AREA,
                _ => TAG_PATH,
            };
            let line = polyline::encode_coordinates(
                coords.iter().map(|c| c.to_geo()),
                config.share_precision,
            )
            .map_err(|e| ExportError::Polyline(e.to_string()))?;
            (tag, Payload::Polyline(line))
        }
    };

    let props = &feature.properties;
    Ok(Record {
        t: tag.to_string(),
        c: payload,
        n: props.name.clone(),
        d: props.description.clone(),
        s: props
            .color
            .filter(|color| *color != config.default_color)
            .map(|color| color.to_hex_digits()),
        e: shared_elevations(feature),
        sid: props.provenance_id.clone(),
    })
}

/// Elevations only when every vertex has one and they are not all zero
fn shared_elevations(feature: &Feature) -> Option<Vec<i64>> {
    let elevations: Vec<f64> = feature
        .geometry
        .coords()
        .iter()
        .map(|c| c.elevation)
        .collect::<Option<_>>()?;
    if elevations.iter().all(|ele| *ele == 0.0) {
        return None;
    }
    Some(elevations.iter().map(|ele| ele.round() as i64).collect())
}

fn compress(json: &str) -> Result<String, ExportError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(json.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

fn decompress(input: &str) -> Result<String, DecodeError> {
    let compressed = URL_SAFE_NO_PAD
        .decode(input.trim())
        .map_err(|e| DecodeError::CorruptPayload(format!("invalid base64: {e}")))?;
    let mut json = String::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| DecodeError::CorruptPayload(format!("decompression failed: {e}")))?;
    Ok(json)
}

/// Decode a share string
///
/// A malformed record is skipped with a warning; everything else is all-or-nothing.
///
/// # Errors
///
/// - [`DecodeError::CorruptPayload`] when the string cannot be decompressed or is not an
///   envelope
/// - [`DecodeError::UnsupportedVersion`] for any version other than the configured one
/// - [`DecodeError::EmptyResult`] when no record survives
pub fn decode(input: &str, config: &Config) -> Result<FeatureSet, DecodeError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("share::decode");

    let json = decompress(input)?;
    let envelope: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| DecodeError::CorruptPayload(format!("invalid JSON: {e}")))?;

    let version = envelope
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| DecodeError::CorruptPayload("missing version".to_string()))?;
    if version != u64::from(config.share_version) {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let records = envelope
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| DecodeError::CorruptPayload("missing features array".to_string()))?;

    let mut features = FeatureSet::new();
    for (index, value) in records.iter().enumerate() {
        let record = match Record::deserialize(value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(index, "Skipping malformed share record: {}", e);
                continue;
            }
        };
        match from_record(record, config) {
            Some(feature) => features.push(feature),
            None => tracing::warn!(index, "Skipping unusable share record"),
        }
    }

    if features.is_empty() {
        return Err(DecodeError::EmptyResult);
    }
    Ok(features)
}

fn from_record(record: Record, config: &Config) -> Option<Feature> {
    let factor = config.share_factor();

    let mut positions: Vec<Vec<f64>> = match &record.c {
        Payload::Point([lon, lat]) => vec![vec![*lon, *lat]],
        Payload::Polyline(line) => polyline::decode_polyline(line, config.share_precision)
            .ok()?
            .0
            .into_iter()
            .map(|c| vec![round_to(c.x, factor), round_to(c.y, factor)])
            .collect(),
    };

    if let Some(elevations) = &record.e {
        if elevations.len() != positions.len() {
            tracing::debug!(
                elevations = elevations.len(),
                vertices = positions.len(),
                "Elevation count does not match vertex count"
            );
            return None;
        }
        for (position, ele) in positions.iter_mut().zip(elevations) {
            position.push(*ele as f64);
        }
    }

    let value = match (record.t.as_str(), &record.c) {
        (TAG_MARKER, Payload::Point(_)) => Value::Point(positions.pop()?),
        (TAG_PATH, Payload::Polyline(_)) => Value::LineString(positions),
        (TAG_AREA, Payload::Polyline(_)) => Value::Polygon(vec![positions]),
        _ => return None,
    };

    let color = record
        .s
        .as_deref()
        .and_then(Color::parse_hex)
        .unwrap_or(config.default_color);
    let properties = Properties {
        name: record.n,
        description: record.d,
        color: Some(color),
        provenance_id: record.sid,
        ..Properties::default()
    };

    // Validates ranges and vertex counts
    let mut exploded = explode(RawFeature::new(Some(value), properties));
    match exploded.len() {
        1 => exploded.pop(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coord;
    use serde_json::json;

    fn envelope_string(value: serde_json::Value) -> String {
        compress(&value.to_string()).unwrap()
    }

    fn encode_default(features: Vec<Feature>) -> String {
        encode(&features.into(), &Config::default()).unwrap().unwrap()
    }

    #[test]
    fn test_empty_set_encodes_to_nothing() {
        assert_eq!(encode(&FeatureSet::new(), &Config::default()).unwrap(), None);
    }

    #[test]
    fn test_default_point_record_is_minimal() {
        let encoded = encode_default(vec![Feature::point(Coord::new(13.405, 52.52))]);
        let envelope: serde_json::Value =
            serde_json::from_str(&decompress(&encoded).unwrap()).unwrap();

        assert_eq!(envelope["version"], 1);
        assert_eq!(
            envelope["features"][0],
            json!({"t": "m", "c": [13.405, 52.52]})
        );
    }

    #[test]
    fn test_explicit_default_color_is_omitted() {
        let config = Config::default();
        let encoded = encode_default(vec![
            Feature::point(Coord::new(1.0, 2.0)).with_color(config.default_color),
        ]);
        let json = decompress(&encoded).unwrap();
        assert!(!json.contains("\"s\""));
    }

    #[test]
    fn test_output_is_url_safe() {
        let features: Vec<Feature> = (0..50)
            .map(|i| {
                Feature::line(vec![
                    Coord::new(i as f64 * 0.01, 45.0),
                    Coord::new(i as f64 * 0.01 + 0.005, 45.005),
                ])
                .with_name(format!("Line {i} with spaces & symbols?"))
            })
            .collect();
        let encoded = encode_default(features);
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_zero_elevations_are_dropped() {
        let encoded = encode_default(vec![Feature::line(vec![
            Coord::with_elevation(7.0, 47.0, 0.0),
            Coord::with_elevation(7.1, 47.1, 0.0),
        ])]);
        let decoded = decode(&encoded, &Config::default()).unwrap();
        assert!(!decoded.get(0).unwrap().geometry.has_elevation());
    }

    #[test]
    fn test_partial_elevations_are_dropped() {
        let encoded = encode_default(vec![Feature::line(vec![
            Coord::with_elevation(7.0, 47.0, 300.0),
            Coord::new(7.1, 47.1),
        ])]);
        let json = decompress(&encoded).unwrap();
        assert!(!json.contains("\"e\""));
    }

    #[test]
    fn test_elevation_rounded_to_meters() {
        let encoded = encode_default(vec![Feature::point(Coord::with_elevation(
            7.0, 47.0, 1234.6,
        ))]);
        let decoded = decode(&encoded, &Config::default()).unwrap();
        assert_eq!(
            decoded.get(0).unwrap().geometry,
            Geometry::Point(Coord::with_elevation(7.0, 47.0, 1235.0))
        );
    }

    #[test]
    fn test_coordinates_quantized() {
        let encoded = encode_default(vec![Feature::line(vec![
            Coord::new(7.123456789, 47.987654321),
            Coord::new(7.2, 48.0),
        ])]);
        let decoded = decode(&encoded, &Config::default()).unwrap();
        assert_eq!(
            decoded.get(0).unwrap().geometry.coords()[0],
            Coord::new(7.12346, 47.98765)
        );
    }

    #[test]
    fn test_unsupported_version() {
        let encoded = envelope_string(json!({"version": 2, "features": []}));
        assert_eq!(
            decode(&encoded, &Config::default()),
            Err(DecodeError::UnsupportedVersion { found: 2 })
        );
    }

    #[test]
    fn test_corrupt_payloads() {
        let config = Config::default();
        assert!(matches!(
            decode("not*base64", &config),
            Err(DecodeError::CorruptPayload(_))
        ));
        assert!(matches!(
            decode(&URL_SAFE_NO_PAD.encode(b"plain bytes"), &config),
            Err(DecodeError::CorruptPayload(_))
        ));
        assert!(matches!(
            decode(&compress("{not json").unwrap(), &config),
            Err(DecodeError::CorruptPayload(_))
        ));
        assert!(matches!(
            decode(&envelope_string(json!({"features": []})), &config),
            Err(DecodeError::CorruptPayload(_))
        ));
        assert!(matches!(
            decode(&envelope_string(json!({"version": 1})), &config),
            Err(DecodeError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let encoded = envelope_string(json!({"version": 1, "features": [
            {"t": "x", "c": [1.0, 2.0]},
            {"t": "p", "c": [1.0, 2.0]},
            {"t": "m"},
            {"t": "m", "c": [500.0, 2.0]},
            {"t": "m", "c": [1.0, 2.0], "e": [1, 2]},
            {"t": "m", "c": [1.0, 2.0], "n": "Kept", "s": "009688"}
        ]}));
        let decoded = decode(&encoded, &Config::default()).unwrap();
        assert_eq!(decoded.len(), 1);
        let feature = decoded.get(0).unwrap();
        assert_eq!(feature.name(), Some("Kept"));
        assert_eq!(feature.properties.color, Some(Color::new(0x00, 0x96, 0x88)));
    }

    #[test]
    fn test_no_usable_records() {
        let encoded = envelope_string(json!({"version": 1, "features": [{"t": "x"}]}));
        assert_eq!(
            decode(&encoded, &Config::default()),
            Err(DecodeError::EmptyResult)
        );
    }

    #[test]
    fn test_custom_precision_round_trip() {
        let config = Config {
            share_precision: 6,
            ..Config::default()
        };
        let original: FeatureSet = vec![
            Feature::line(vec![
                Coord::new(7.123456, 47.654321),
                Coord::new(7.123457, 47.654322),
            ])
            .with_color(config.default_color),
        ]
        .into();
        let encoded = encode(&original, &config).unwrap().unwrap();
        assert_eq!(decode(&encoded, &config).unwrap(), original);
    }
}

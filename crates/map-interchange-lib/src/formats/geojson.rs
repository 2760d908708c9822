//! GeoJSON parsing and serialization
//!
//! Accepts a single `Feature` or a `FeatureCollection` (RFC 7946) and always writes a
//! `FeatureCollection` with simplestyle color properties (`stroke`, `fill`, `marker-color`).

use crate::color;
use crate::explode::{RawFeature, explode_all};
use crate::{Config, Feature, FeatureSet, Format, Geometry, ParseError, Properties, Result};
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue, Value};

/// Color properties, in resolution order
const COLOR_KEYS: [&str; 4] = ["stroke", "marker-color", "fill", "color"];

/// Styling keys owned by the serializer; not carried as extra properties
const STYLE_KEYS: [&str; 9] = [
    "stroke",
    "stroke-width",
    "stroke-opacity",
    "fill",
    "fill-opacity",
    "marker-color",
    "marker-size",
    "marker-symbol",
    "color",
];

const STROKE_WIDTH: f64 = 3.0;
const FILL_OPACITY: f64 = 0.2;

/// Parse GeoJSON text into atomic features
///
/// # Errors
///
/// Returns [`ParseError`] for malformed JSON, a missing `type`, or a top-level object
/// that is neither a `Feature` nor a `FeatureCollection`.
pub fn parse(text: &str, config: &Config) -> Result<FeatureSet> {
    #[cfg(feature = "profiling")]
    profiling::scope!("geojson::parse");

    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| ParseError::new(Format::GeoJson, e.to_string()))?;

    let features = match geojson {
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Geometry(_) => {
            return Err(ParseError::new(
                Format::GeoJson,
                "expected a Feature or FeatureCollection, found a bare Geometry",
            ));
        }
    };

    let raws = features.into_iter().map(|feature| {
        RawFeature::new(
            feature.geometry.map(|g| g.value),
            properties_from_map(feature.properties, config),
        )
    });
    Ok(explode_all(raws).into())
}

/// Typed properties from a GeoJSON-style property bag
///
/// Shared with the KML reader, whose intermediate tree uses the same property names.
pub(crate) fn properties_from_map(map: Option<JsonObject>, config: &Config) -> Properties {
    let Some(mut map) = map else {
        return Properties::default();
    };

    let color = color::try_resolve(
        COLOR_KEYS
            .iter()
            .map(|key| map.get(*key).and_then(JsonValue::as_str)),
        &config.palette,
    );

    let name = map.remove("name").and_then(value_to_string);
    let description = map.remove("description").and_then(value_to_string);
    let provenance_id = map
        .remove(&config.provenance_key)
        .and_then(value_to_string);

    let extra = map
        .into_iter()
        .filter(|(key, _)| !STYLE_KEYS.contains(&key.as_str()) && !config.is_internal_key(key))
        .collect();

    Properties {
        name,
        description,
        color,
        provenance_id,
        source_path: None,
        origin_file: None,
        extra,
    }
}

/// Strings are taken verbatim, numbers and booleans are stringified, the rest ignored
fn value_to_string(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Serialize features as a pretty-printed `FeatureCollection`
pub fn serialize(features: &FeatureSet, config: &Config) -> String {
    #[cfg(feature = "profiling")]
    profiling::scope!("geojson::serialize");

    let collection = FeatureCollection {
        bbox: None,
        features: features
            .iter()
            .map(|feature| to_geojson_feature(feature, config))
            .collect(),
        foreign_members: None,
    };
    format!("{:#}", GeoJson::from(collection).to_json_value())
}

fn to_geojson_feature(feature: &Feature, config: &Config) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geometry_value(&feature.geometry))),
        id: None,
        properties: Some(properties_to_map(feature, config)),
        foreign_members: None,
    }
}

/// Geometry from the in-memory coordinates, polygon rings closed
pub(crate) fn geometry_value(geometry: &Geometry) -> Value {
    let positions = || {
        geometry
            .closed_coords()
            .iter()
            .map(|c| c.to_position())
            .collect::<Vec<_>>()
    };
    match geometry {
        Geometry::Point(coord) => Value::Point(coord.to_position()),
        Geometry::LineString(_) => Value::LineString(positions()),
        Geometry::Polygon(_) => Value::Polygon(vec![positions()]),
    }
}

fn properties_to_map(feature: &Feature, config: &Config) -> JsonObject {
    let props = &feature.properties;
    let color = feature.effective_color(config).to_string();
    let mut map = JsonObject::new();

    if let Some(name) = &props.name {
        map.insert("name".to_string(), JsonValue::from(name.as_str()));
    }
    if let Some(description) = &props.description {
        map.insert(
            "description".to_string(),
            JsonValue::from(description.as_str()),
        );
    }

    map.insert("stroke".to_string(), JsonValue::from(color.as_str()));
    match feature.geometry {
        Geometry::Point(_) => {
            map.insert("marker-color".to_string(), JsonValue::from(color.as_str()));
        }
        Geometry::LineString(_) => {
            map.insert("stroke-width".to_string(), JsonValue::from(STROKE_WIDTH));
        }
        Geometry::Polygon(_) => {
            map.insert("stroke-width".to_string(), JsonValue::from(STROKE_WIDTH));
            map.insert("fill".to_string(), JsonValue::from(color.as_str()));
            map.insert("fill-opacity".to_string(), JsonValue::from(FILL_OPACITY));
        }
    }

    if let Some(id) = &props.provenance_id {
        map.insert(config.provenance_key.clone(), JsonValue::from(id.as_str()));
    }

    for (key, value) in &props.extra {
        if !config.is_internal_key(key) && !map.contains_key(key) {
            map.insert(key.clone(), value.clone());
        }
    }

    map
}

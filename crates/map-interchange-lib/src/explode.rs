//! Decomposition of parse-time geometries into atomic features
//!
//! Parsers produce [`RawFeature`]s whose geometry is any GeoJSON geometry value,
//! including multi-geometries and collections. [`explode`] turns each of them into
//! zero or more [`Feature`]s with deterministic names:
//!
//! - `Multi*` geometries number their elements by position: `Ride`, `Ride 2`, `Ride 3`.
//! - Geometry collections label each child by kind and only number repeated kinds:
//!   `Trip (Path)`, `Trip (Path 2)`, `Trip (Marker)`.
//!
//! The two naming policies are intentionally independent.

use crate::feature::{Coord, Feature, Geometry, GeometryKind, Properties};
use geojson::Value;
use std::collections::HashMap;

/// A feature whose geometry may still be composite
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub geometry: Option<Value>,
    pub properties: Properties,
}

impl RawFeature {
    pub fn new(geometry: Option<Value>, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
        }
    }
}

impl From<Feature> for RawFeature {
    fn from(feature: Feature) -> Self {
        let value = match &feature.geometry {
            Geometry::Point(coord) => Value::Point(coord.to_position()),
            Geometry::LineString(coords) => {
                Value::LineString(coords.iter().map(Coord::to_position).collect())
            }
            Geometry::Polygon(_) => Value::Polygon(vec![
                feature
                    .geometry
                    .closed_coords()
                    .iter()
                    .map(Coord::to_position)
                    .collect(),
            ]),
        };
        Self::new(Some(value), feature.properties)
    }
}

/// Flatten one raw feature into atomic features
///
/// Unsupported or degenerate geometries are dropped without error.
pub fn explode(raw: RawFeature) -> Vec<Feature> {
    let RawFeature {
        geometry,
        properties,
    } = raw;
    let mut out = Vec::new();
    if let Some(value) = geometry {
        explode_value(value, properties, &mut out);
    }
    out
}

/// Explode every raw feature, keeping encounter order
pub fn explode_all<I>(raws: I) -> Vec<Feature>
where
    I: IntoIterator<Item = RawFeature>,
{
    raws.into_iter().flat_map(explode).collect()
}

fn explode_value(value: Value, properties: Properties, out: &mut Vec<Feature>) {
    match value {
        Value::GeometryCollection(children) => {
            explode_collection(children.into_iter().map(|g| g.value).collect(), properties, out)
        }
        Value::MultiPoint(points) => explode_multi(points, properties, out, point_geometry),
        Value::MultiLineString(lines) => explode_multi(lines, properties, out, line_geometry),
        Value::MultiPolygon(polygons) => {
            explode_multi(polygons, properties, out, polygon_geometry)
        }
        simple => {
            if let Some(geometry) = simple_geometry(simple) {
                out.push(Feature::new(geometry, properties));
            }
        }
    }
}

/// Element 1 keeps the base name, element N > 1 gets `" N"`
fn explode_multi<T>(
    elements: Vec<T>,
    properties: Properties,
    out: &mut Vec<Feature>,
    convert: fn(T) -> Option<Geometry>,
) {
    let numbered = elements.len() > 1;
    for (index, element) in elements.into_iter().enumerate() {
        let Some(geometry) = convert(element) else {
            continue;
        };
        let mut props = properties.clone();
        if numbered && index > 0 {
            props.name = suffixed(props.name, |name| format!("{name} {}", index + 1));
        }
        out.push(Feature::new(geometry, props));
    }
}

/// Each child is labelled by kind; a kind's second occurrence onwards is numbered
fn explode_collection(children: Vec<Value>, properties: Properties, out: &mut Vec<Feature>) {
    let mut seen: HashMap<GeometryKind, usize> = HashMap::new();

    for child in children {
        let Some(kind) = value_kind(&child) else {
            if matches!(child, Value::GeometryCollection(_)) {
                explode_value(child, properties.clone(), out);
            } else {
                tracing::debug!("Dropping unsupported geometry inside collection");
            }
            continue;
        };

        let occurrence = seen.entry(kind).or_insert(0);
        *occurrence += 1;

        let mut props = properties.clone();
        props.name = suffixed(props.name, |name| match *occurrence {
            1 => format!("{name} ({})", kind.label()),
            n => format!("{name} ({} {n})", kind.label()),
        });
        explode_value(child, props, out);
    }
}

/// Blank names are left as they are instead of turning into a bare suffix
fn suffixed(name: Option<String>, suffix: impl FnOnce(String) -> String) -> Option<String> {
    name.map(|name| {
        if name.trim().is_empty() {
            name
        } else {
            suffix(name)
        }
    })
}

fn value_kind(value: &Value) -> Option<GeometryKind> {
    match value {
        Value::Point(_) | Value::MultiPoint(_) => Some(GeometryKind::Point),
        Value::LineString(_) | Value::MultiLineString(_) => Some(GeometryKind::LineString),
        Value::Polygon(_) | Value::MultiPolygon(_) => Some(GeometryKind::Polygon),
        Value::GeometryCollection(_) => None,
    }
}

fn simple_geometry(value: Value) -> Option<Geometry> {
    match value {
        Value::Point(position) => point_geometry(position),
        Value::LineString(positions) => line_geometry(positions),
        Value::Polygon(rings) => polygon_geometry(rings),
        _ => None,
    }
}

fn point_geometry(position: Vec<f64>) -> Option<Geometry> {
    let coord = Coord::from_position(&position).filter(Coord::is_valid);
    if coord.is_none() {
        tracing::warn!("Dropping point with invalid position {:?}", position);
    }
    coord.map(Geometry::Point)
}

fn line_geometry(positions: Vec<Vec<f64>>) -> Option<Geometry> {
    let coords = coords_from_positions(&positions)?;
    if coords.len() < 2 {
        tracing::debug!("Dropping line with {} vertices", coords.len());
        return None;
    }
    Some(Geometry::LineString(coords))
}

/// Only the outer ring survives; holes are not supported by the editor
fn polygon_geometry(rings: Vec<Vec<Vec<f64>>>) -> Option<Geometry> {
    if rings.len() > 1 {
        tracing::debug!("Ignoring {} polygon hole(s)", rings.len() - 1);
    }
    let outer = rings.into_iter().next()?;
    let mut coords = coords_from_positions(&outer)?;
    if coords.len() > 1 && same_position(&coords[0], &coords[coords.len() - 1]) {
        coords.pop();
    }
    if coords.len() < 3 {
        tracing::debug!("Dropping polygon with {} distinct vertices", coords.len());
        return None;
    }
    Some(Geometry::Polygon(coords))
}

fn coords_from_positions(positions: &[Vec<f64>]) -> Option<Vec<Coord>> {
    let coords: Option<Vec<Coord>> = positions
        .iter()
        .map(|p| Coord::from_position(p).filter(Coord::is_valid))
        .collect();
    if coords.is_none() {
        tracing::warn!("Dropping geometry with invalid or out-of-range coordinates");
    }
    coords
}

#[inline]
fn same_position(a: &Coord, b: &Coord) -> bool {
    a.lon == b.lon && a.lat == b.lat
}

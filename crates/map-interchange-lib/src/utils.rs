//! Utility functions for distances, bounds, rounding and text handling

use crate::feature::Coord;
use geo::Rect;
use std::borrow::Cow;

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6371000.0;

/// Haversine distance between two coordinates in meters (elevation ignored)
#[inline]
pub fn haversine_distance(p1: &Coord, p2: &Coord) -> f64 {
    let lat1 = p1.lat.to_radians();
    let lat2 = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Grow a rectangle so it contains `coord`, starting a new one when there is none
#[inline]
pub fn expand_rect(rect: Option<Rect<f64>>, coord: geo::Coord<f64>) -> Rect<f64> {
    match rect {
        Some(bbox) => Rect::new(
            geo::Coord {
                x: bbox.min().x.min(coord.x),
                y: bbox.min().y.min(coord.y),
            },
            geo::Coord {
                x: bbox.max().x.max(coord.x),
                y: bbox.max().y.max(coord.y),
            },
        ),
        None => Rect::new(coord, coord),
    }
}

/// Round to `factor` units (e.g. 1e5 keeps five decimal digits)
#[inline]
pub fn round_to(value: f64, factor: f64) -> f64 {
    (value * factor).round() / factor
}

/// Escape `< > & ' "` for XML text and attribute values
#[inline]
pub fn xml_escape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

/// Make a display name usable as an archive file name
///
/// Path separators and characters rejected by common file systems become `_`;
/// an empty result falls back to `fallback`.
pub fn sanitize_file_stem(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Last path component without its extension: `files/Trail.kml` -> `Trail`
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

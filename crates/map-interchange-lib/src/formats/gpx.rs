//! GPX 1.1 parsing and serialization
//!
//! Structure (tracks, routes, waypoints) is read with the `gpx` crate, which skips
//! `<extensions>`. Colors and provenance IDs live in those extensions, so a second pass
//! over the DOM collects them per element and pairs them with the parsed elements by index.

use crate::color::{self, Color};
use crate::explode::{RawFeature, explode_all};
use crate::utils::xml_escape;
use crate::{Config, Feature, FeatureSet, Format, Geometry, ParseError, Properties, Result};
use geojson::Value;
use std::fmt::Write;

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const GPX_STYLE_NS: &str = "http://www.topografix.com/GPX/gpx_style/0/2";
const OSMAND_NS: &str = "https://osmand.net";
const MAPX_NS: &str = "urn:map-interchange:gpx:1";
const CREATOR: &str = "map-interchange";

/// Local names of extension elements that carry a color
const COLOR_ELEMENTS: [&str; 2] = ["color", "DisplayColor"];

/// Document-level export options
#[derive(Debug, Clone, Default)]
pub struct GpxOptions {
    /// Written as `<metadata><name>` when set
    pub name: Option<String>,
}

/// Extension data found next to one `<trk>`, `<rte>` or `<wpt>`
#[derive(Debug, Clone, Default, PartialEq)]
struct Sidecar {
    color: Option<Color>,
    provenance_id: Option<String>,
}

/// Sidecars of the document, one list per element kind in document order
#[derive(Debug, Default)]
struct Sidecars {
    tracks: Vec<Sidecar>,
    routes: Vec<Sidecar>,
    waypoints: Vec<Sidecar>,
}

/// Parse GPX text into atomic features: tracks first, then routes, then waypoints
///
/// # Errors
///
/// Returns [`ParseError`] when the document is not well-formed GPX.
pub fn parse(text: &str, config: &Config) -> Result<FeatureSet> {
    #[cfg(feature = "profiling")]
    profiling::scope!("gpx::parse");

    let data = gpx::read(text.as_bytes()).map_err(|e| ParseError::new(Format::Gpx, e.to_string()))?;
    let doc =
        roxmltree::Document::parse(text).map_err(|e| ParseError::new(Format::Gpx, e.to_string()))?;
    let sidecars = collect_sidecars(&doc, config);

    let tracks = aligned(&sidecars.tracks, data.tracks.len(), "track");
    let routes = aligned(&sidecars.routes, data.routes.len(), "route");
    let waypoints = aligned(&sidecars.waypoints, data.waypoints.len(), "waypoint");

    let mut raws = Vec::with_capacity(data.tracks.len() + data.routes.len() + data.waypoints.len());

    for (index, track) in data.tracks.iter().enumerate() {
        let mut lines: Vec<Vec<Vec<f64>>> = track
            .segments
            .iter()
            .map(|segment| segment.points.iter().map(position).collect())
            .collect();
        let geometry = match lines.len() {
            0 => None,
            1 => lines.pop().map(Value::LineString),
            _ => Some(Value::MultiLineString(lines)),
        };
        raws.push(RawFeature::new(
            geometry,
            properties(
                track.name.as_deref(),
                track.description.as_deref(),
                tracks.get(index),
            ),
        ));
    }

    for (index, route) in data.routes.iter().enumerate() {
        raws.push(RawFeature::new(
            Some(Value::LineString(route.points.iter().map(position).collect())),
            properties(
                route.name.as_deref(),
                route.description.as_deref(),
                routes.get(index),
            ),
        ));
    }

    for (index, waypoint) in data.waypoints.iter().enumerate() {
        raws.push(RawFeature::new(
            Some(Value::Point(position(waypoint))),
            properties(
                waypoint.name.as_deref(),
                waypoint.description.as_deref(),
                waypoints.get(index),
            ),
        ));
    }

    Ok(explode_all(raws).into())
}

fn position(waypoint: &gpx::Waypoint) -> Vec<f64> {
    let point = waypoint.point();
    match waypoint.elevation {
        Some(ele) => vec![point.x(), point.y(), ele],
        None => vec![point.x(), point.y()],
    }
}

fn properties(name: Option<&str>, description: Option<&str>, sidecar: Option<&Sidecar>) -> Properties {
    let non_empty = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Properties {
        name: non_empty(name),
        description: non_empty(description),
        color: sidecar.and_then(|s| s.color),
        provenance_id: sidecar.and_then(|s| s.provenance_id.clone()),
        ..Properties::default()
    }
}

/// Sidecars are only used when they line up one-to-one with the parsed elements
fn aligned<'a>(sidecars: &'a [Sidecar], expected: usize, kind: &str) -> &'a [Sidecar] {
    if sidecars.len() == expected {
        sidecars
    } else {
        tracing::warn!(
            kind,
            found = sidecars.len(),
            expected,
            "Skipping GPX extensions: element count mismatch"
        );
        &[]
    }
}

fn collect_sidecars(doc: &roxmltree::Document, config: &Config) -> Sidecars {
    let mut sidecars = Sidecars::default();
    for node in doc.root_element().children().filter(|n| n.is_element()) {
        let list = match node.tag_name().name() {
            "trk" => &mut sidecars.tracks,
            "rte" => &mut sidecars.routes,
            "wpt" => &mut sidecars.waypoints,
            _ => continue,
        };
        list.push(extract_sidecar(node, config));
    }
    sidecars
}

fn extract_sidecar(node: roxmltree::Node, config: &Config) -> Sidecar {
    let Some(extensions) = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "extensions")
    else {
        return Sidecar::default();
    };

    let elements = || extensions.descendants().filter(|n| n.is_element());

    let candidates: Vec<&str> = elements()
        .filter(|n| COLOR_ELEMENTS.contains(&n.tag_name().name()))
        .filter_map(|n| n.text())
        .map(|text| strip_alpha(text.trim()))
        .collect();
    let color = color::try_resolve(candidates.into_iter().map(Some), &config.palette);

    let provenance_id = elements()
        .find(|n| n.tag_name().name() == config.provenance_key)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Sidecar {
        color,
        provenance_id,
    }
}

/// `#AARRGGBB` / `AARRGGBB` (OsmAnd) becomes `RRGGBB`; anything else is left alone
fn strip_alpha(value: &str) -> &str {
    let digits = value.strip_prefix('#').unwrap_or(value);
    if digits.len() == 8 && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        &digits[2..]
    } else {
        value
    }
}

/// Serialize features as a GPX 1.1 document
///
/// Points become `<wpt>`; paths and areas become single-segment `<trk>`s, areas closed.
pub fn serialize(features: &FeatureSet, options: &GpxOptions, config: &Config) -> String {
    #[cfg(feature = "profiling")]
    profiling::scope!("gpx::serialize");

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<gpx version=\"1.1\" creator=\"{CREATOR}\" xmlns=\"{GPX_NS}\" \
         xmlns:gpx_style=\"{GPX_STYLE_NS}\" xmlns:osmand=\"{OSMAND_NS}\" xmlns:mapx=\"{MAPX_NS}\">"
    );

    if let Some(name) = &options.name {
        let _ = writeln!(
            out,
            "  <metadata>\n    <name>{}</name>\n  </metadata>",
            xml_escape(name)
        );
    }

    // The schema wants waypoints before tracks
    for feature in features.iter() {
        if let Geometry::Point(coord) = &feature.geometry {
            let _ = writeln!(out, "  <wpt lat=\"{}\" lon=\"{}\">", coord.lat, coord.lon);
            if let Some(ele) = coord.elevation {
                let _ = writeln!(out, "    <ele>{ele}</ele>");
            }
            write_text_elements(&mut out, feature, "    ");
            out.push_str("    <extensions>\n");
            write_color_extensions(&mut out, feature, config, false);
            write_provenance(&mut out, feature, config);
            out.push_str("    </extensions>\n");
            out.push_str("  </wpt>\n");
        }
    }

    for feature in features.iter() {
        if matches!(feature.geometry, Geometry::Point(_)) {
            continue;
        }
        out.push_str("  <trk>\n");
        write_text_elements(&mut out, feature, "    ");
        out.push_str("    <extensions>\n");
        write_color_extensions(&mut out, feature, config, true);
        write_provenance(&mut out, feature, config);
        out.push_str("    </extensions>\n");
        out.push_str("    <trkseg>\n");
        for coord in feature.geometry.closed_coords() {
            let _ = match coord.elevation {
                Some(ele) => writeln!(
                    out,
                    "      <trkpt lat=\"{}\" lon=\"{}\"><ele>{ele}</ele></trkpt>",
                    coord.lat, coord.lon
                ),
                None => writeln!(out, "      <trkpt lat=\"{}\" lon=\"{}\"/>", coord.lat, coord.lon),
            };
        }
        out.push_str("    </trkseg>\n");
        out.push_str("  </trk>\n");
    }

    out.push_str("</gpx>\n");
    out
}

fn write_text_elements(out: &mut String, feature: &Feature, indent: &str) {
    if let Some(name) = &feature.properties.name {
        let _ = writeln!(out, "{indent}<name>{}</name>", xml_escape(name));
    }
    if let Some(description) = &feature.properties.description {
        let _ = writeln!(out, "{indent}<desc>{}</desc>", xml_escape(description));
    }
}

fn write_color_extensions(out: &mut String, feature: &Feature, config: &Config, line: bool) {
    let color = feature.effective_color(config);
    if line {
        let _ = writeln!(
            out,
            "      <gpx_style:line><gpx_style:color>{}</gpx_style:color></gpx_style:line>",
            color.to_hex_digits()
        );
    }
    let _ = writeln!(out, "      <osmand:color>{}</osmand:color>", color.to_argb_hex());
}

fn write_provenance(out: &mut String, feature: &Feature, config: &Config) {
    if let Some(id) = &feature.properties.provenance_id {
        let _ = writeln!(
            out,
            "      <mapx:{key}>{}</mapx:{key}>",
            xml_escape(id),
            key = config.provenance_key
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coord;

    const TRACK_AND_WAYPOINTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:osmand="https://osmand.net" xmlns:x="urn:example">
  <wpt lat="46.5" lon="7.5">
    <name>Hut</name>
    <extensions><osmand:color>#FF009688</osmand:color><x:activity_id>77</x:activity_id></extensions>
  </wpt>
  <wpt lat="46.6" lon="7.6"><name>Lake</name></wpt>
  <rte>
    <name>Planned</name>
    <rtept lat="46.0" lon="7.0"/>
    <rtept lat="46.1" lon="7.1"/>
  </rte>
  <trk>
    <name>Ride</name>
    <extensions><x:DisplayColor>Blue</x:DisplayColor></extensions>
    <trkseg>
      <trkpt lat="47.0" lon="7.0"><ele>100</ele></trkpt>
      <trkpt lat="47.1" lon="7.1"><ele>110</ele></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="48.0" lon="8.0"/>
      <trkpt lat="48.1" lon="8.1"/>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_parse_order_tracks_routes_waypoints() {
        let features = parse(TRACK_AND_WAYPOINTS, &Config::default()).unwrap();
        let names: Vec<_> = features.iter().map(Feature::name).collect();
        assert_eq!(
            names,
            vec![
                Some("Ride"),
                Some("Ride 2"),
                Some("Planned"),
                Some("Hut"),
                Some("Lake")
            ]
        );
    }

    #[test]
    fn test_parse_extensions_by_index() {
        let config = Config::default();
        let features = parse(TRACK_AND_WAYPOINTS, &config).unwrap();

        let ride = features.get(0).unwrap();
        assert_eq!(ride.properties.color, config.palette.get("Blue"));
        assert_eq!(
            ride.geometry.coords()[1],
            Coord::with_elevation(7.1, 47.1, 110.0)
        );

        let hut = features.get(3).unwrap();
        assert_eq!(hut.properties.color, Some(Color::new(0x00, 0x96, 0x88)));
        assert_eq!(hut.properties.provenance_id.as_deref(), Some("77"));

        let lake = features.get(4).unwrap();
        assert_eq!(lake.properties.color, None);
        assert_eq!(lake.properties.provenance_id, None);
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse("<gpx><trk>", &Config::default()).unwrap_err();
        assert_eq!(err.format, Format::Gpx);
        assert!(parse("not xml at all", &Config::default()).is_err());
    }

    #[test]
    fn test_strip_alpha() {
        assert_eq!(strip_alpha("#FF112233"), "112233");
        assert_eq!(strip_alpha("80112233"), "112233");
        assert_eq!(strip_alpha("#112233"), "#112233");
        assert_eq!(strip_alpha("Teal"), "Teal");
    }

    #[test]
    fn test_serialize_escapes_and_extensions() {
        let config = Config::default();
        let features: FeatureSet = vec![
            Feature::line(vec![Coord::new(7.0, 47.0), Coord::new(7.1, 47.1)])
                .with_name("Tom & Jerry's <route>")
                .with_color(Color::new(0x1E, 0x88, 0xE5))
                .with_provenance_id("123"),
        ]
        .into();
        let text = serialize(&features, &GpxOptions::default(), &config);

        assert!(text.contains("<name>Tom &amp; Jerry&apos;s &lt;route&gt;</name>"));
        assert!(text.contains("<gpx_style:color>1E88E5</gpx_style:color>"));
        assert!(text.contains("<osmand:color>#FF1E88E5</osmand:color>"));
        assert!(text.contains("<mapx:activity_id>123</mapx:activity_id>"));
        assert!(!text.contains("<metadata>"));
    }

    #[test]
    fn test_serialize_closes_polygon() {
        let features: FeatureSet = vec![Feature::polygon(vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.0),
            Coord::new(1.0, 1.0),
        ])]
        .into();
        let text = serialize(&features, &GpxOptions::default(), &Config::default());
        assert_eq!(text.matches("<trkpt").count(), 4);
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let original: FeatureSet = vec![
            Feature::line(vec![
                Coord::with_elevation(7.0, 47.0, 100.5),
                Coord::with_elevation(7.001, 47.001, 110.0),
            ])
            .with_name("Morning")
            .with_color(Color::new(0xE5, 0x1B, 0x23))
            .with_provenance_id("555"),
            Feature::point(Coord::new(7.5, 46.5))
                .with_name("Hut")
                .with_color(Color::new(0x00, 0x96, 0x88)),
        ]
        .into();

        let options = GpxOptions {
            name: Some("Export".to_string()),
        };
        let text = serialize(&original, &options, &config);
        let parsed = parse(&text, &config).unwrap();
        assert_eq!(parsed, original);
    }
}

//! KML 2.2 parsing and serialization
//!
//! Parsing walks the DOM into a GeoJSON tree (one feature per Placemark, MultiGeometry as
//! a geometry collection), augments that tree with marker colors and provenance IDs taken
//! from the source document, and only then explodes it into atomic features.
//!
//! Marker colors are paired with Point features by position. When the number of
//! Point-placemarks in the source does not match the number of Point features in the tree
//! the augmentation is skipped entirely rather than risk coloring the wrong markers.
//! Provenance IDs follow the same rule against the full placemark list.

use crate::color::{self, Color, icon_palette_name};
use crate::explode::{RawFeature, explode_all};
use crate::formats::geojson::properties_from_map;
use crate::utils::xml_escape;
use crate::{Config, Coord, Feature, FeatureSet, Format, Geometry, ParseError, Result};
use geojson::{JsonObject, JsonValue, Value};
use roxmltree::Node;
use std::collections::HashMap;
use std::fmt::Write;

const KML_NS: &str = "http://www.opengis.net/kml/2.2";
const DEFAULT_DOCUMENT_NAME: &str = "Map features";
const LINE_WIDTH: u32 = 3;
const FILL_ALPHA: u8 = 0x33;

const GEOMETRY_ELEMENTS: [&str; 7] = [
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiGeometry",
    "Track",
    "MultiTrack",
];

/// Document-level export options
#[derive(Debug, Clone, Default)]
pub struct KmlOptions {
    /// `<Document><name>`; a generic name is used when unset
    pub name: Option<String>,
}

/// Colors declared by one `<Style>`
#[derive(Debug, Clone, Default)]
struct StyleInfo {
    line: Option<Color>,
    poly: Option<Color>,
    icon: Option<Color>,
    icon_href: Option<String>,
}

/// Shared styles addressable through `<styleUrl>`
#[derive(Debug, Default)]
struct StyleSheet {
    styles: HashMap<String, StyleInfo>,
}

impl StyleSheet {
    fn from_document(doc: &roxmltree::Document) -> Self {
        let mut styles = HashMap::new();
        for node in doc.descendants().filter(|n| n.has_tag_name("Style")) {
            if let Some(id) = node.attribute("id") {
                styles.insert(id.to_string(), read_style(node));
            }
        }

        // StyleMaps resolve to their `normal` pair
        let mut mapped = Vec::new();
        for node in doc.descendants().filter(|n| n.has_tag_name("StyleMap")) {
            let Some(id) = node.attribute("id") else {
                continue;
            };
            let normal = node
                .children()
                .filter(|n| n.has_tag_name("Pair"))
                .find(|pair| child_text(*pair, "key") == Some("normal"));
            let Some(pair) = normal else {
                continue;
            };
            let info = match child(pair, "Style") {
                Some(style) => Some(read_style(style)),
                None => child_text(pair, "styleUrl")
                    .and_then(|url| styles.get(fragment(url)))
                    .cloned(),
            };
            if let Some(info) = info {
                mapped.push((id.to_string(), info));
            }
        }
        styles.extend(mapped);

        Self { styles }
    }

    fn lookup(&self, url: &str) -> Option<&StyleInfo> {
        self.styles.get(fragment(url))
    }
}

/// `doc.kml#style` and `#style` both address `style`
fn fragment(url: &str) -> &str {
    url.rsplit_once('#').map_or(url, |(_, id)| id)
}

fn read_style(node: Node) -> StyleInfo {
    let color_at = |path: &[&str]| path_text(node, path).and_then(Color::from_kml);
    StyleInfo {
        line: color_at(&["LineStyle", "color"]),
        poly: color_at(&["PolyStyle", "color"]),
        icon: color_at(&["IconStyle", "color"]),
        icon_href: path_text(node, &["IconStyle", "Icon", "href"]).map(str::to_string),
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn path_text<'a>(node: Node<'a, '_>, path: &[&str]) -> Option<&'a str> {
    let (last, parents) = path.split_last()?;
    let parent = parents
        .iter()
        .try_fold(node, |current, name| child(current, name))?;
    child_text(parent, last)
}

/// Parse a KML document into atomic features
///
/// # Errors
///
/// Returns [`ParseError`] when the XML is malformed or the root element is not `<kml>`.
pub fn parse(text: &str, config: &Config) -> Result<FeatureSet> {
    #[cfg(feature = "profiling")]
    profiling::scope!("kml::parse");

    let doc =
        roxmltree::Document::parse(text).map_err(|e| ParseError::new(Format::Kml, e.to_string()))?;
    if !doc.root_element().has_tag_name("kml") {
        return Err(ParseError::new(
            Format::Kml,
            format!("expected <kml> root, found <{}>", doc.root_element().tag_name().name()),
        ));
    }

    let styles = StyleSheet::from_document(&doc);
    let placemarks: Vec<Node> = doc
        .descendants()
        .filter(|n| n.has_tag_name("Placemark"))
        .collect();

    let mut tree = build_tree(&placemarks, &styles);
    augment_marker_colors(&mut tree, &placemarks, &styles, config);
    augment_provenance(&mut tree, &placemarks, config);

    let raws = tree.into_iter().map(|feature| {
        RawFeature::new(
            feature.geometry.map(|g| g.value),
            properties_from_map(feature.properties, config),
        )
    });
    Ok(explode_all(raws).into())
}

/// One feature per placemark with a usable geometry, in document order
fn build_tree(placemarks: &[Node], styles: &StyleSheet) -> Vec<geojson::Feature> {
    let mut tree = Vec::with_capacity(placemarks.len());
    for &placemark in placemarks {
        let Some(value) = find_geometry(placemark).and_then(geometry_value) else {
            tracing::debug!("Skipping placemark without a usable geometry");
            continue;
        };

        let mut properties = JsonObject::new();
        if let Some(name) = child_text(placemark, "name") {
            properties.insert("name".to_string(), JsonValue::from(name));
        }
        if let Some(description) = child_text(placemark, "description") {
            properties.insert("description".to_string(), JsonValue::from(description));
        }
        if !matches!(value, Value::Point(_))
            && let Some(color) = line_color(placemark, &value, styles)
        {
            properties.insert("stroke".to_string(), JsonValue::from(color.to_string()));
        }

        tree.push(geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(value)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }
    tree
}

fn find_geometry<'a, 'input>(placemark: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    placemark
        .children()
        .find(|n| n.is_element() && GEOMETRY_ELEMENTS.contains(&n.tag_name().name()))
}

fn geometry_value(node: Node) -> Option<Value> {
    match node.tag_name().name() {
        "Point" => coordinates(node).into_iter().next().map(Value::Point),
        "LineString" => Some(Value::LineString(coordinates(node))),
        "LinearRing" => Some(Value::Polygon(vec![coordinates(node)])),
        "Polygon" => {
            let outer = child(node, "outerBoundaryIs").and_then(|b| child(b, "LinearRing"))?;
            Some(Value::Polygon(vec![coordinates(outer)]))
        }
        "MultiGeometry" => Some(Value::GeometryCollection(
            node.children()
                .filter(|n| n.is_element())
                .filter_map(geometry_value)
                .map(geojson::Geometry::new)
                .collect(),
        )),
        "Track" => Some(Value::LineString(track_coordinates(node))),
        "MultiTrack" => Some(Value::MultiLineString(
            node.children()
                .filter(|n| n.has_tag_name("Track"))
                .map(track_coordinates)
                .collect(),
        )),
        _ => None,
    }
}

/// `<coordinates>lon,lat[,alt] lon,lat[,alt] ...</coordinates>`
fn coordinates(node: Node) -> Vec<Vec<f64>> {
    let Some(text) = child_text(node, "coordinates") else {
        return Vec::new();
    };
    text.split_whitespace()
        .filter_map(|tuple| parse_tuple(tuple.split(',')))
        .collect()
}

/// `<gx:coord>lon lat alt</gx:coord>` children of a `gx:Track`
fn track_coordinates(node: Node) -> Vec<Vec<f64>> {
    node.children()
        .filter(|n| n.has_tag_name("coord"))
        .filter_map(|n| n.text())
        .filter_map(|text| parse_tuple(text.split_whitespace()))
        .collect()
}

fn parse_tuple<'a>(parts: impl Iterator<Item = &'a str>) -> Option<Vec<f64>> {
    let values: std::result::Result<Vec<f64>, _> =
        parts.map(|part| part.trim().parse::<f64>()).collect();
    match values {
        Ok(values) if values.len() >= 2 => Some(values),
        _ => {
            tracing::debug!("Skipping malformed KML coordinate tuple");
            None
        }
    }
}

/// Inline style first, then the shared one; areas fall back to their fill color
fn line_color(placemark: Node, value: &Value, styles: &StyleSheet) -> Option<Color> {
    let inline = child(placemark, "Style").map(read_style).unwrap_or_default();
    let shared = child_text(placemark, "styleUrl").and_then(|url| styles.lookup(url));

    let line = inline.line.or_else(|| shared.and_then(|s| s.line));
    if matches!(value, Value::Polygon(_)) {
        line.or(inline.poly).or_else(|| shared.and_then(|s| s.poly))
    } else {
        line
    }
}

fn marker_color(placemark: Node, styles: &StyleSheet, config: &Config) -> Option<Color> {
    let inline = child(placemark, "Style").map(read_style).unwrap_or_default();
    let style_url = child_text(placemark, "styleUrl");
    let shared = style_url.and_then(|url| styles.lookup(url));

    let candidates = [
        inline.icon.map(|c| c.to_string()),
        inline
            .icon_href
            .as_deref()
            .and_then(icon_palette_name)
            .map(str::to_string),
        style_url.and_then(icon_palette_name).map(str::to_string),
        shared.and_then(|s| s.icon).map(|c| c.to_string()),
    ];
    color::try_resolve(candidates.iter().map(Option::as_deref), &config.palette)
}

fn augment_marker_colors(
    tree: &mut [geojson::Feature],
    placemarks: &[Node],
    styles: &StyleSheet,
    config: &Config,
) {
    let markers: Vec<Node> = placemarks
        .iter()
        .copied()
        .filter(|p| find_geometry(*p).is_some_and(|g| g.has_tag_name("Point")))
        .collect();
    let mut points: Vec<&mut geojson::Feature> = tree
        .iter_mut()
        .filter(|f| matches!(f.geometry.as_ref().map(|g| &g.value), Some(Value::Point(_))))
        .collect();

    if markers.len() != points.len() {
        tracing::warn!(
            markers = markers.len(),
            points = points.len(),
            "Skipping KML marker colors: marker count mismatch"
        );
        return;
    }

    for (marker, feature) in markers.into_iter().zip(points.iter_mut()) {
        if let Some(color) = marker_color(marker, styles, config) {
            feature.set_property("marker-color", color.to_string());
        }
    }
}

fn augment_provenance(tree: &mut [geojson::Feature], placemarks: &[Node], config: &Config) {
    if placemarks.len() != tree.len() {
        tracing::warn!(
            placemarks = placemarks.len(),
            features = tree.len(),
            "Skipping KML provenance IDs: placemark count mismatch"
        );
        return;
    }

    for (&placemark, feature) in placemarks.iter().zip(tree.iter_mut()) {
        if let Some(id) = extended_data(placemark, &config.provenance_key) {
            feature.set_property(config.provenance_key.clone(), id.to_string());
        }
    }
}

/// `<ExtendedData><Data name="key"><value>` or `<SchemaData><SimpleData name="key">`
fn extended_data<'a>(placemark: Node<'a, '_>, key: &str) -> Option<&'a str> {
    let data = child(placemark, "ExtendedData")?;
    let named = |n: &Node| n.attribute("name") == Some(key);

    if let Some(value) = data
        .children()
        .filter(|n| n.has_tag_name("Data"))
        .find(named)
        .and_then(|n| child_text(n, "value"))
    {
        return Some(value);
    }

    data.children()
        .filter(|n| n.has_tag_name("SchemaData"))
        .flat_map(|n| n.children())
        .filter(|n| n.has_tag_name("SimpleData"))
        .find(named)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Serialize features as a single KML document
pub fn serialize(features: &FeatureSet, options: &KmlOptions, config: &Config) -> String {
    #[cfg(feature = "profiling")]
    profiling::scope!("kml::serialize");

    let name = options.name.as_deref().unwrap_or(DEFAULT_DOCUMENT_NAME);
    write_document(name, features.iter(), config)
}

/// A complete KML document; also used for the sub-documents of a KMZ archive
pub(crate) fn write_document<'a>(
    name: &str,
    features: impl Iterator<Item = &'a Feature>,
    config: &Config,
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(out, "<kml xmlns=\"{KML_NS}\">");
    out.push_str("  <Document>\n");
    let _ = writeln!(out, "    <name>{}</name>", xml_escape(name));
    for feature in features {
        write_placemark(&mut out, feature, config);
    }
    out.push_str("  </Document>\n");
    out.push_str("</kml>\n");
    out
}

fn write_placemark(out: &mut String, feature: &Feature, config: &Config) {
    let props = &feature.properties;
    let color = feature.effective_color(config);

    out.push_str("    <Placemark>\n");
    if let Some(name) = &props.name {
        let _ = writeln!(out, "      <name>{}</name>", xml_escape(name));
    }
    if let Some(description) = &props.description {
        let _ = writeln!(
            out,
            "      <description>{}</description>",
            xml_escape(description)
        );
    }

    out.push_str("      <Style>\n");
    match feature.geometry {
        Geometry::Point(_) => {
            let _ = writeln!(
                out,
                "        <IconStyle><color>{}</color></IconStyle>",
                color.to_kml()
            );
        }
        Geometry::LineString(_) => {
            let _ = writeln!(
                out,
                "        <LineStyle><color>{}</color><width>{LINE_WIDTH}</width></LineStyle>",
                color.to_kml()
            );
        }
        Geometry::Polygon(_) => {
            let _ = writeln!(
                out,
                "        <LineStyle><color>{}</color><width>{LINE_WIDTH}</width></LineStyle>",
                color.to_kml()
            );
            let _ = writeln!(
                out,
                "        <PolyStyle><color>{}</color></PolyStyle>",
                color.to_kml_with_alpha(FILL_ALPHA)
            );
        }
    }
    out.push_str("      </Style>\n");

    if let Some(id) = &props.provenance_id {
        let _ = writeln!(
            out,
            "      <ExtendedData><Data name=\"{}\"><value>{}</value></Data></ExtendedData>",
            xml_escape(&config.provenance_key),
            xml_escape(id)
        );
    }

    let altitude = if feature.geometry.has_elevation() {
        "<altitudeMode>absolute</altitudeMode>"
    } else {
        ""
    };
    let coords = format_coordinates(&feature.geometry.closed_coords());
    let _ = match feature.geometry {
        Geometry::Point(_) => writeln!(
            out,
            "      <Point>{altitude}<coordinates>{coords}</coordinates></Point>"
        ),
        Geometry::LineString(_) => writeln!(
            out,
            "      <LineString>{altitude}<coordinates>{coords}</coordinates></LineString>"
        ),
        Geometry::Polygon(_) => writeln!(
            out,
            "      <Polygon>{altitude}<outerBoundaryIs><LinearRing><coordinates>{coords}</coordinates></LinearRing></outerBoundaryIs></Polygon>"
        ),
    };
    out.push_str("    </Placemark>\n");
}

fn format_coordinates(coords: &[Coord]) -> String {
    coords
        .iter()
        .map(|c| match c.elevation {
            Some(ele) => format!("{},{},{}", c.lon, c.lat, ele),
            None => format!("{},{}", c.lon, c.lat),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:gx="http://www.google.com/kml/ext/2.2">
<Document>{body}</Document>
</kml>"#
        )
    }

    fn parse_default(text: &str) -> FeatureSet {
        parse(text, &Config::default()).unwrap()
    }

    #[test]
    fn test_parse_inline_line_style() {
        let features = parse_default(&kml(
            r#"<Placemark>
                <name>Ridge</name>
                <Style><LineStyle><color>FF231BE5</color></LineStyle></Style>
                <LineString><coordinates>7,47,100 7.1,47.1,120</coordinates></LineString>
            </Placemark>"#,
        ));
        let feature = features.get(0).unwrap();
        assert_eq!(feature.name(), Some("Ridge"));
        assert_eq!(feature.properties.color, Some(Color::new(0xE5, 0x1B, 0x23)));
        assert_eq!(
            feature.geometry,
            Geometry::LineString(vec![
                Coord::with_elevation(7.0, 47.0, 100.0),
                Coord::with_elevation(7.1, 47.1, 120.0),
            ])
        );
    }

    #[test]
    fn test_parse_shared_style_and_style_map() {
        let features = parse_default(&kml(
            r##"<Style id="blue-line"><LineStyle><color>ffe5881e</color></LineStyle></Style>
            <StyleMap id="blue-map">
                <Pair><key>normal</key><styleUrl>#blue-line</styleUrl></Pair>
                <Pair><key>highlight</key><styleUrl>#other</styleUrl></Pair>
            </StyleMap>
            <Style id="green-area"><PolyStyle><color>802E7D32</color></PolyStyle></Style>
            <Folder>
                <Placemark>
                    <styleUrl>#blue-map</styleUrl>
                    <LineString><coordinates>0,0 1,1</coordinates></LineString>
                </Placemark>
                <Placemark>
                    <styleUrl>#green-area</styleUrl>
                    <Polygon><outerBoundaryIs><LinearRing>
                        <coordinates>0,0 1,0 1,1 0,0</coordinates>
                    </LinearRing></outerBoundaryIs></Polygon>
                </Placemark>
            </Folder>"##,
        ));
        assert_eq!(features.len(), 2);
        assert_eq!(
            features.get(0).unwrap().properties.color,
            Some(Color::new(0x1E, 0x88, 0xE5))
        );
        let area = features.get(1).unwrap();
        assert_eq!(area.properties.color, Some(Color::new(0x32, 0x7D, 0x2E)));
        assert_eq!(area.geometry.coords().len(), 3);
    }

    #[test]
    fn test_parse_marker_color_candidates() {
        let config = Config::default();
        let features = parse_default(&kml(
            r##"<Style id="icon-shared"><IconStyle><color>FF00FF00</color></IconStyle></Style>
            <Placemark>
                <Style><IconStyle><Icon><href>https://example.com/icons/marker-Purple.png</href></Icon></IconStyle></Style>
                <Point><coordinates>1,1</coordinates></Point>
            </Placemark>
            <Placemark>
                <styleUrl>#marker-Teal</styleUrl>
                <Point><coordinates>2,2</coordinates></Point>
            </Placemark>
            <Placemark>
                <styleUrl>#icon-shared</styleUrl>
                <Point><coordinates>3,3</coordinates></Point>
            </Placemark>
            <Placemark>
                <Point><coordinates>4,4</coordinates></Point>
            </Placemark>"##,
        ));
        let colors: Vec<_> = features.iter().map(|f| f.properties.color).collect();
        assert_eq!(
            colors,
            vec![
                config.palette.get("Purple"),
                config.palette.get("Teal"),
                Some(Color::new(0x00, 0xFF, 0x00)),
                None,
            ]
        );
    }

    #[test]
    fn test_marker_augmentation_skipped_on_count_mismatch() {
        // The second point has no coordinates, so the tree holds fewer points than markers
        let features = parse_default(&kml(
            r#"<Placemark>
                <Style><IconStyle><color>FF231BE5</color></IconStyle></Style>
                <Point><coordinates>1,1</coordinates></Point>
            </Placemark>
            <Placemark><Point></Point></Placemark>"#,
        ));
        assert_eq!(features.len(), 1);
        assert_eq!(features.get(0).unwrap().properties.color, None);
    }

    #[test]
    fn test_parse_multi_geometry_and_provenance() {
        let features = parse_default(&kml(
            r#"<Placemark>
                <name>Trip</name>
                <ExtendedData><Data name="activity_id"><value>314</value></Data></ExtendedData>
                <MultiGeometry>
                    <LineString><coordinates>0,0 1,1</coordinates></LineString>
                    <LineString><coordinates>1,1 2,2</coordinates></LineString>
                    <Point><coordinates>2,2</coordinates></Point>
                </MultiGeometry>
            </Placemark>"#,
        ));
        let names: Vec<_> = features.iter().map(Feature::name).collect();
        assert_eq!(
            names,
            vec![Some("Trip (Path)"), Some("Trip (Path 2)"), Some("Trip (Marker)")]
        );
        assert!(
            features
                .iter()
                .all(|f| f.properties.provenance_id.as_deref() == Some("314"))
        );
    }

    #[test]
    fn test_provenance_skipped_on_count_mismatch() {
        let features = parse_default(&kml(
            r#"<Placemark><name>Folder note</name></Placemark>
            <Placemark>
                <ExtendedData><Data name="activity_id"><value>314</value></Data></ExtendedData>
                <LineString><coordinates>0,0 1,1</coordinates></LineString>
            </Placemark>"#,
        ));
        assert_eq!(features.len(), 1);
        assert_eq!(features.get(0).unwrap().properties.provenance_id, None);
    }

    #[test]
    fn test_parse_gx_track() {
        let features = parse_default(&kml(
            r#"<Placemark>
                <gx:Track>
                    <when>2024-01-01T00:00:00Z</when>
                    <gx:coord>7 47 500</gx:coord>
                    <gx:coord>7.1 47.1 510</gx:coord>
                </gx:Track>
            </Placemark>"#,
        ));
        assert_eq!(
            features.get(0).unwrap().geometry,
            Geometry::LineString(vec![
                Coord::with_elevation(7.0, 47.0, 500.0),
                Coord::with_elevation(7.1, 47.1, 510.0),
            ])
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = parse("<kml><Document>", &Config::default()).unwrap_err();
        assert_eq!(err.format, Format::Kml);
        assert!(parse("<gpx/>", &Config::default()).is_err());
    }

    #[test]
    fn test_serialize_inline_styles() {
        let config = Config::default();
        let features: FeatureSet = vec![
            Feature::polygon(vec![
                Coord::new(0.0, 0.0),
                Coord::new(1.0, 0.0),
                Coord::new(1.0, 1.0),
            ])
            .with_name("<Field>"),
        ]
        .into();
        let text = serialize(
            &features,
            &KmlOptions {
                name: Some("Farm".to_string()),
            },
            &config,
        );
        assert!(text.contains("<name>Farm</name>"));
        assert!(text.contains("<name>&lt;Field&gt;</name>"));
        assert!(text.contains("<color>FF231BE5</color>"));
        assert!(text.contains("<color>33231BE5</color>"));
        assert!(text.contains("<coordinates>0,0 1,0 1,1 0,0</coordinates>"));
        assert!(!text.contains("styleUrl"));
        assert!(!text.contains("altitudeMode"));
    }
}

//! Configuration shared by every parser, serializer and the share codec
//!
//! Nothing in the crate reads global state: callers build a [`Config`] (usually
//! `Config::default()`) and pass it into each entry point, so differently configured
//! conversions can run side by side.

use crate::color::Color;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from palette names to canonical colors
///
/// Lookups are case-sensitive exact matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Palette {
    colors: BTreeMap<String, Color>,
}

impl Palette {
    pub fn new() -> Self {
        Self {
            colors: BTreeMap::new(),
        }
    }

    pub fn with_color(mut self, name: impl Into<String>, color: Color) -> Self {
        self.insert(name, color);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, color: Color) {
        self.colors.insert(name.into(), color);
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<Color> {
        self.colors.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Color)> {
        self.colors.iter().map(|(name, color)| (name.as_str(), *color))
    }
}

impl Default for Palette {
    /// The editor's built-in drawing palette
    fn default() -> Self {
        Self::new()
            .with_color("Red", Color::new(0xE5, 0x1B, 0x23))
            .with_color("Orange", Color::new(0xFF, 0x8C, 0x00))
            .with_color("Yellow", Color::new(0xFF, 0xD7, 0x00))
            .with_color("Green", Color::new(0x2E, 0x7D, 0x32))
            .with_color("Teal", Color::new(0x00, 0x96, 0x88))
            .with_color("Blue", Color::new(0x1E, 0x88, 0xE5))
            .with_color("Purple", Color::new(0x8E, 0x24, 0xAA))
            .with_color("Pink", Color::new(0xD8, 0x1B, 0x60))
            .with_color("Brown", Color::new(0x6D, 0x4C, 0x41))
            .with_color("Gray", Color::new(0x75, 0x75, 0x75))
            .with_color("Black", Color::new(0x00, 0x00, 0x00))
            .with_color("White", Color::new(0xFF, 0xFF, 0xFF))
    }
}

/// Configuration for parsing, serialization and share encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named colors understood in KML icon URLs, Garmin `DisplayColor` and plain properties
    pub palette: Palette,
    /// Color applied when a feature has none; also omitted from share strings
    pub default_color: Color,
    /// Decimal digits kept by the share codec (5 digits is roughly 1.1 m)
    pub share_precision: u32,
    /// Share envelope version written by `encode` and the only one `decode` accepts
    pub share_version: u32,
    /// Property / `<Data name>` / extension element name carrying provenance IDs
    pub provenance_key: String,
    /// Property keys never emitted to GeoJSON (keys starting with `_` are always dropped)
    pub internal_property_keys: Vec<String>,
    /// Root manifest entry of generated KMZ archives
    pub kmz_manifest_path: String,
    /// Directory of generated KMZ sub-documents, with trailing slash
    pub kmz_files_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            default_color: Color::new(0xE5, 0x1B, 0x23),
            share_precision: 5,
            share_version: 1,
            provenance_key: "activity_id".to_string(),
            internal_property_keys: vec![
                "_style".to_string(),
                "_internal".to_string(),
                "source_path".to_string(),
                "origin_file".to_string(),
            ],
            kmz_manifest_path: "doc.kml".to_string(),
            kmz_files_dir: "files/".to_string(),
        }
    }
}

impl Config {
    /// Whether a property key is internal bookkeeping and must not reach GeoJSON output
    pub fn is_internal_key(&self, key: &str) -> bool {
        key.starts_with('_') || self.internal_property_keys.iter().any(|k| k == key)
    }

    /// Multiplier between degrees and the integer units of the share codec
    #[inline]
    pub(crate) fn share_factor(&self) -> f64 {
        10f64.powi(self.share_precision as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.share_precision, 5);
        assert_eq!(config.share_version, 1);
        assert_eq!(config.default_color.to_string(), "#E51B23");
        assert_eq!(config.palette.len(), 12);
        assert_eq!((config.share_factor() - 100_000.0).abs(), 0.0);
    }

    #[test]
    fn test_internal_keys() {
        let config = Config::default();
        assert!(config.is_internal_key("_style"));
        assert!(config.is_internal_key("_anything"));
        assert!(config.is_internal_key("source_path"));
        assert!(!config.is_internal_key("name"));
        assert!(!config.is_internal_key("surface"));
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: Config =
            serde_json::from_str(r##"{"default_color": "#1E88E5", "palette": {"Sky": "87CEEB"}}"##)
                .unwrap();
        assert_eq!(config.default_color.to_string(), "#1E88E5");
        assert_eq!(config.palette.len(), 1);
        assert_eq!(config.palette.get("Sky").unwrap().to_string(), "#87CEEB");
        assert_eq!(config.share_precision, 5);
    }
}

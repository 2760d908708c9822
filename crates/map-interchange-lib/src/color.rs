//! Canonical colors and the multi-source color resolution policy
//!
//! Colors reach the interchange core in many shapes: `#RRGGBB` strings from GeoJSON
//! `stroke` properties, bare `RRGGBB` from GPX extensions, `AABBGGRR` from KML styles and
//! palette names hidden inside KML icon URLs. All of them are normalized to [`Color`].

use crate::config::Palette;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?([0-9A-Fa-f]{6})$").expect("valid hex color pattern"));

static KML_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?([0-9A-Fa-f]{8})$").expect("valid KML color pattern"));

/// `#marker-Teal`, `marker-Teal.png` or `https://host/icons/marker-Teal.png`
static ICON_PALETTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^#|^|/)[^/#]+?-([A-Za-z]+)(?:\.[A-Za-z0-9]+)?$")
        .expect("valid icon palette pattern")
});

/// A validated RGB color with implicit full opacity
///
/// Always displayed and serialized in canonical form: `#RRGGBB`, uppercase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    rgb: [u8; 3],
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { rgb: [r, g, b] }
    }

    /// Parse a 6-hex-digit color, with or without a leading `#`
    ///
    /// Anything else (wrong length, non-hex digits, alpha channel) yields `None`.
    pub fn parse_hex(value: &str) -> Option<Self> {
        let caps = HEX_COLOR.captures(value)?;
        let digits = caps.get(1)?.as_str();
        Some(Self::new(
            u8::from_str_radix(&digits[0..2], 16).ok()?,
            u8::from_str_radix(&digits[2..4], 16).ok()?,
            u8::from_str_radix(&digits[4..6], 16).ok()?,
        ))
    }

    /// Convert a KML `AABBGGRR` color, dropping the alpha channel
    pub fn from_kml(value: &str) -> Option<Self> {
        let caps = KML_COLOR.captures(value.trim())?;
        let digits = caps.get(1)?.as_str();
        Some(Self::new(
            u8::from_str_radix(&digits[6..8], 16).ok()?,
            u8::from_str_radix(&digits[4..6], 16).ok()?,
            u8::from_str_radix(&digits[2..4], 16).ok()?,
        ))
    }

    /// KML `AABBGGRR` form with full opacity
    pub fn to_kml(&self) -> String {
        self.to_kml_with_alpha(0xFF)
    }

    pub fn to_kml_with_alpha(&self, alpha: u8) -> String {
        let [r, g, b] = self.rgb;
        format!("{alpha:02X}{b:02X}{g:02X}{r:02X}")
    }

    /// `RRGGBB` without the leading `#`
    pub fn to_hex_digits(&self) -> String {
        let [r, g, b] = self.rgb;
        format!("{r:02X}{g:02X}{b:02X}")
    }

    /// `#AARRGGBB` with full opacity, as understood by OsmAnd and similar GPX consumers
    pub fn to_argb_hex(&self) -> String {
        format!("#FF{}", self.to_hex_digits())
    }

    #[inline]
    pub fn rgb(&self) -> [u8; 3] {
        self.rgb
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex_digits())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s).ok_or_else(|| format!("not a 6-digit hex color: {s:?}"))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Resolve a single candidate: hex first, then an exact palette name
fn resolve_one(candidate: &str, palette: &Palette) -> Option<Color> {
    Color::parse_hex(candidate).or_else(|| palette.get(candidate))
}

/// First candidate that resolves, or `None`
///
/// Parsers use this so that "no color in the source" stays distinguishable from
/// "the source asked for the default color".
pub fn try_resolve<'a, I>(candidates: I, palette: &Palette) -> Option<Color>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| resolve_one(candidate, palette))
}

/// First candidate that resolves, falling back to `default`
///
/// Malformed candidates are skipped, never reported.
pub fn resolve<'a, I>(candidates: I, palette: &Palette, default: Color) -> Color
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    try_resolve(candidates, palette).unwrap_or(default)
}

/// Extract the palette name embedded in a KML icon URL or style fragment
///
/// Returns the raw name; whether it exists in the palette is decided by the resolver.
pub fn icon_palette_name(reference: &str) -> Option<&str> {
    ICON_PALETTE_NAME
        .captures(reference.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_parse_hex_normalizes_case_and_hash() {
        let color = Color::parse_hex("e51b23").unwrap();
        assert_eq!(color.to_string(), "#E51B23");
        assert_eq!(Color::parse_hex("#E51b23"), Some(color));
    }

    #[test]
    fn test_parse_hex_rejects_malformed() {
        assert!(Color::parse_hex("#zzzzzz").is_none());
        assert!(Color::parse_hex("#12345").is_none());
        assert!(Color::parse_hex("FF112233").is_none());
        assert!(Color::parse_hex("").is_none());
        assert!(Color::parse_hex(" #112233 ").is_none());
        assert!(Color::parse_hex("#112233\n").is_none());
    }

    #[test]
    fn test_kml_conversion() {
        let color = Color::from_kml("FF231BE5").unwrap();
        assert_eq!(color.to_string(), "#E51B23");
        assert_eq!(color.to_kml(), "FF231BE5");

        let lower = Color::from_kml("ff231be5").unwrap();
        assert_eq!(lower, color);
        assert_eq!(lower.to_kml().to_lowercase(), "ff231be5");
    }

    #[test]
    fn test_kml_alpha_is_dropped() {
        let transparent = Color::from_kml("00231BE5").unwrap();
        assert_eq!(transparent.to_string(), "#E51B23");
        assert!(Color::from_kml("231BE5").is_none());
    }

    #[test]
    fn test_resolve_falls_through_invalid_to_palette() {
        let config = Config::default();
        let resolved = resolve(
            [Some("#zzzzzz"), Some("Teal")],
            &config.palette,
            config.default_color,
        );
        assert_eq!(Some(resolved), config.palette.get("Teal"));
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let config = Config::default();
        let resolved = resolve(
            [Some("#zzzzzz"), None, Some("#112233"), Some("Teal")],
            &config.palette,
            config.default_color,
        );
        assert_eq!(resolved.to_string(), "#112233");
    }

    #[test]
    fn test_resolve_empty_uses_default() {
        let config = Config::default();
        let resolved = resolve(Vec::<Option<&str>>::new(), &config.palette, config.default_color);
        assert_eq!(resolved, config.default_color);
        assert!(try_resolve([None, Some("nope")], &config.palette).is_none());
    }

    #[test]
    fn test_palette_lookup_is_case_sensitive() {
        let config = Config::default();
        assert!(try_resolve([Some("teal")], &config.palette).is_none());
        assert!(try_resolve([Some("Teal")], &config.palette).is_some());
    }

    #[test]
    fn test_icon_palette_name() {
        assert_eq!(icon_palette_name("#marker-Teal"), Some("Teal"));
        assert_eq!(icon_palette_name("marker-Blue.png"), Some("Blue"));
        assert_eq!(
            icon_palette_name("https://example.org/icons/marker-Red.png"),
            Some("Red")
        );
        assert_eq!(icon_palette_name("#style1"), None);
        assert_eq!(icon_palette_name("icon.png"), None);
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let color = Color::new(0x11, 0x22, 0x33);
        let json = serde_json::to_string(&color).unwrap();
        assert_eq!(json, "\"#112233\"");
        let back: Color = serde_json::from_str("\"112233\"").unwrap();
        assert_eq!(back, color);
    }
}

use crate::error::CliError;
use clap::{Parser, Subcommand, ValueEnum};
use map_interchange_lib::{Color, Config, Format, Palette};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Map Interchange - Convert map features between GeoJSON, GPX, KML and KMZ and build share strings
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,

    /// Color used when a feature has none (hex, e.g. "#E51B23")
    #[clap(long, global = true, value_name = "COLOR")]
    pub default_color: Option<Color>,

    /// Decimal digits kept by share strings (5 is roughly 1.1 m)
    #[clap(long, global = true, value_parser = clap::value_parser!(u32).range(1..=7))]
    pub precision: Option<u32>,

    /// JSON file mapping palette names to hex colors, merged over the built-in palette
    #[clap(long, global = true, value_name = "FILE")]
    pub palette: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Convert one or more files into a single output file
    Convert {
        /// Input files; the format is detected from the extension
        #[clap(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,

        /// Output format (defaults to the output file extension)
        #[clap(short, long, value_enum)]
        to: Option<OutputFormat>,

        /// Output file (stdout when omitted)
        #[clap(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Encode or decode share strings
    Share {
        #[clap(subcommand)]
        action: ShareAction,
    },

    /// Print a summary of the features in the given files
    Info {
        #[clap(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ShareAction {
    /// Print the share string for the features in the given files
    Encode {
        #[clap(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,
    },

    /// Turn a share string back into a file
    Decode {
        /// The share string
        encoded: String,

        /// Output format (defaults to the output file extension)
        #[clap(short, long, value_enum)]
        to: Option<OutputFormat>,

        /// Output file (stdout when omitted)
        #[clap(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Geojson,
    Gpx,
    Kml,
    Kmz,
}

impl From<OutputFormat> for Format {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Geojson => Format::GeoJson,
            OutputFormat::Gpx => Format::Gpx,
            OutputFormat::Kml => Format::Kml,
            OutputFormat::Kmz => Format::Kmz,
        }
    }
}

/// Explicit `--to` wins, otherwise the output extension decides
pub fn resolve_format(to: Option<OutputFormat>, output: Option<&Path>) -> Result<Format, CliError> {
    to.map(Format::from)
        .or_else(|| {
            output
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str())
                .and_then(Format::from_extension)
        })
        .ok_or(CliError::MissingFormat)
}

impl Settings {
    /// Library configuration from defaults plus the global flags
    pub fn to_config(&self) -> Result<Config, CliError> {
        let mut config = Config::default();

        if let Some(path) = &self.palette {
            let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
                path: path.clone(),
                source,
            })?;
            let palette: Palette =
                serde_json::from_str(&text).map_err(|source| CliError::Palette {
                    path: path.clone(),
                    source,
                })?;
            for (name, color) in palette.iter() {
                config.palette.insert(name, color);
            }
            tracing::debug!(colors = config.palette.len(), "Loaded palette");
        }
        if let Some(color) = self.default_color {
            config.default_color = color;
        }
        if let Some(precision) = self.precision {
            config.share_precision = precision;
        }

        Ok(config)
    }
}

use map_interchange_lib::{DecodeError, ExportError, ParseError};
use std::path::PathBuf;

/// Everything that can make a command fail
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output: {0}")]
    Stdout(#[from] std::io::Error),

    #[error(
        "unsupported input format: {} (expected .geojson, .json, .gpx, .kml or .kmz)",
        .0.display()
    )]
    UnknownFormat(PathBuf),

    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("invalid palette {}: {source}", path.display())]
    Palette {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no output format: pass --to or an output file with a known extension")]
    MissingFormat,

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, CliError>;

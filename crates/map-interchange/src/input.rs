//! Reading input files into one feature set

use crate::error::{CliError, Result};
use map_interchange_lib::formats::{geojson, gpx, kml, kmz};
use map_interchange_lib::utils::file_stem;
use map_interchange_lib::{Config, FeatureSet, Format, KmzEntryFailure, ParseError, PassthroughEntry};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Features and archive leftovers of one input file
#[derive(Debug, Default)]
pub struct LoadedInput {
    pub features: FeatureSet,
    pub passthrough: Vec<PassthroughEntry>,
    pub failures: Vec<KmzEntryFailure>,
}

/// All inputs, concatenated in argument order
#[derive(Debug, Default)]
pub struct Inputs {
    pub features: FeatureSet,
    pub passthrough: Vec<PassthroughEntry>,
    pub failures: Vec<(PathBuf, KmzEntryFailure)>,
}

/// Load files in parallel; the first unreadable or invalid file aborts the load
pub fn load_all(paths: &[PathBuf], config: &Config) -> Result<Inputs> {
    #[cfg(feature = "profiling")]
    profiling::scope!("input::load_all");

    let loaded: Vec<LoadedInput> = paths
        .par_iter()
        .map(|path| {
            let bytes = std::fs::read(path).map_err(|source| CliError::Read {
                path: path.clone(),
                source,
            })?;
            parse_input(path, bytes, config)
        })
        .collect::<Result<_>>()?;

    let mut inputs = Inputs::default();
    for (path, input) in paths.iter().zip(loaded) {
        inputs.features.extend(input.features);
        inputs.passthrough.extend(input.passthrough);
        inputs
            .failures
            .extend(input.failures.into_iter().map(|f| (path.clone(), f)));
    }

    tracing::info!(
        files = paths.len(),
        features = inputs.features.len(),
        "Loaded inputs"
    );
    Ok(inputs)
}

/// Parse one file's contents according to its extension
///
/// Flat files tag their features with the file stem so a KMZ export keeps them together.
pub fn parse_input(path: &Path, bytes: Vec<u8>, config: &Config) -> Result<LoadedInput> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Format::from_extension)
        .ok_or_else(|| CliError::UnknownFormat(path.to_path_buf()))?;

    let parse_error = |source: ParseError| CliError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let features = match format {
        Format::GeoJson => as_text(bytes, format).and_then(|text| geojson::parse(&text, config)),
        Format::Gpx => as_text(bytes, format).and_then(|text| gpx::parse(&text, config)),
        Format::Kml => as_text(bytes, format).and_then(|text| kml::parse(&text, config)),
        Format::Kmz => {
            let import = kmz::parse(&bytes, config).map_err(parse_error)?;
            for failure in &import.failures {
                tracing::warn!(file = %path.display(), "Skipped KMZ entry: {}", failure);
            }
            return Ok(LoadedInput {
                features: import.features,
                passthrough: import.passthrough,
                failures: import.failures,
            });
        }
    }
    .map_err(parse_error)?;

    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| file_stem(name).to_string());
    let features = features
        .into_iter()
        .map(|mut feature| {
            feature.properties.origin_file = stem.clone();
            feature
        })
        .collect();

    Ok(LoadedInput {
        features,
        ..LoadedInput::default()
    })
}

fn as_text(bytes: Vec<u8>, format: Format) -> std::result::Result<String, ParseError> {
    String::from_utf8(bytes).map_err(|_| ParseError::new(format, "input is not valid UTF-8"))
}

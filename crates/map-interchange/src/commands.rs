//! Subcommand implementations

use crate::error::{CliError, Result};
use crate::input::{self, Inputs};
use crate::settings::{Command, OutputFormat, ShareAction, resolve_format};
use map_interchange_lib::formats::{geojson, gpx, kml, kmz};
use map_interchange_lib::utils::file_stem;
use map_interchange_lib::{Config, FeatureSet, FeatureSetInfo, Format, PassthroughEntry, share};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Convert { inputs, to, output } => convert(&inputs, to, output, config),
        Command::Share { action } => match action {
            ShareAction::Encode { inputs } => share_encode(&inputs, config),
            ShareAction::Decode {
                encoded,
                to,
                output,
            } => share_decode(&encoded, to, output, config),
        },
        Command::Info { inputs } => info(&inputs, config),
    }
}

fn convert(
    paths: &[PathBuf],
    to: Option<OutputFormat>,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let format = resolve_format(to, output.as_deref())?;
    let Inputs {
        features,
        passthrough,
        ..
    } = input::load_all(paths, config)?;

    if !passthrough.is_empty() && format != Format::Kmz {
        tracing::warn!(
            entries = passthrough.len(),
            "Archive entries are only kept when converting to KMZ"
        );
    }
    write_output(&features, &passthrough, format, output.as_deref(), config)
}

fn share_encode(paths: &[PathBuf], config: &Config) -> Result<()> {
    let inputs = input::load_all(paths, config)?;
    match share::encode(&inputs.features, config)? {
        Some(encoded) => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{encoded}")?;
        }
        None => tracing::warn!("Nothing to share: the inputs contain no features"),
    }
    Ok(())
}

fn share_decode(
    encoded: &str,
    to: Option<OutputFormat>,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let format = resolve_format(to, output.as_deref())?;
    let features = share::decode(encoded.trim(), config)?;
    tracing::info!(features = features.len(), "Decoded share string");
    write_output(&features, &[], format, output.as_deref(), config)
}

fn info(paths: &[PathBuf], config: &Config) -> Result<()> {
    let inputs = input::load_all(paths, config)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(render_info(&inputs.features.summary()).as_bytes())?;
    for (path, failure) in &inputs.failures {
        writeln!(stdout, "Unreadable entry in {}: {failure}", path.display())?;
    }
    Ok(())
}

fn render_info(info: &FeatureSetInfo) -> String {
    let mut out = format!(
        "Markers: {}\nPaths:   {}\nAreas:   {}\nPoints:  {}\nLength:  {:.2} km\n",
        info.markers,
        info.paths,
        info.areas,
        info.total_points,
        info.total_length_meters / 1000.0
    );
    match info.bounding_box {
        Some(rect) => out.push_str(&format!(
            "Bounds:  {:.5},{:.5} .. {:.5},{:.5}\n",
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y
        )),
        None => out.push_str("Bounds:  none\n"),
    }
    out
}

/// Serialize into the chosen format and write to the output file or stdout
fn write_output(
    features: &FeatureSet,
    passthrough: &[PassthroughEntry],
    format: Format,
    output: Option<&Path>,
    config: &Config,
) -> Result<()> {
    #[cfg(feature = "profiling")]
    profiling::scope!("commands::write_output");

    let name = output
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|n| file_stem(n).to_string());

    let bytes = match format {
        Format::GeoJson => geojson::serialize(features, config).into_bytes(),
        Format::Gpx => gpx::serialize(features, &gpx::GpxOptions { name }, config).into_bytes(),
        Format::Kml => kml::serialize(features, &kml::KmlOptions { name }, config).into_bytes(),
        Format::Kmz => kmz::serialize(features, passthrough, &kml::KmlOptions { name }, config)?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, &bytes).map_err(|source| CliError::WriteFile {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!(
                path = %path.display(),
                %format,
                features = features.len(),
                "Wrote output"
            );
        }
        None => {
            if format.is_binary() {
                tracing::warn!("Writing binary {format} output to stdout; pass -o to write a file");
            }
            std::io::stdout().lock().write_all(&bytes)?;
        }
    }
    Ok(())
}

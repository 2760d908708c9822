//! KMZ archives: zipped KML with a root manifest and sub-documents
//!
//! Import parses every `.kml` entry on its own and tags the resulting features with the
//! entry path. Entries that yield no features (the manifest, images, other sidecar files)
//! are kept as opaque blobs so an export can put them back unchanged.
//!
//! Export partitions features by origin into sub-documents under `files/` and writes a
//! manifest with one `NetworkLink` per sub-document, sorted by display name.

use crate::formats::kml::{self, KmlOptions};
use crate::utils::{file_stem, sanitize_file_stem, xml_escape};
use crate::{Config, ExportError, Feature, FeatureSet, Format, ParseError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DEFAULT_DOCUMENT_NAME: &str = "Map features";
const DRAWN_FEATURES: &str = "Drawn features";
const ACTIVITIES: &str = "Activities";

/// An archive entry carried through unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// A KML entry that could not be parsed; its siblings are unaffected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {error}")]
pub struct KmzEntryFailure {
    pub path: String,
    pub error: ParseError,
}

/// Everything recovered from a KMZ archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KmzImport {
    pub features: FeatureSet,
    pub passthrough: Vec<PassthroughEntry>,
    pub failures: Vec<KmzEntryFailure>,
}

/// Parse a KMZ archive
///
/// Entries that cannot be read or parsed are reported in [`KmzImport::failures`] and
/// never affect their siblings. Their bytes are kept as pass-through blobs when they can
/// still be recovered, so re-exporting the archive does not lose them.
///
/// # Errors
///
/// Returns [`ParseError`] only when the archive itself cannot be read.
pub fn parse(bytes: &[u8], config: &Config) -> Result<KmzImport> {
    #[cfg(feature = "profiling")]
    profiling::scope!("kmz::parse");

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::new(Format::Kmz, format!("failed to open archive: {e}")))?;

    let mut import = KmzImport::default();

    for index in 0..archive.len() {
        let (path, is_dir, stored) = match archive.by_index_raw(index) {
            Ok(raw) => (
                raw.name().to_string(),
                raw.is_dir(),
                raw.compression() == CompressionMethod::Stored,
            ),
            Err(e) => {
                let path = format!("#{index}");
                tracing::warn!(path = %path, error = %e, "Unreadable archive entry");
                import.failures.push(KmzEntryFailure {
                    path,
                    error: ParseError::new(Format::Kmz, format!("unreadable entry: {e}")),
                });
                continue;
            }
        };
        if is_dir {
            continue;
        }

        let data = match read_entry(&mut archive, index) {
            Ok(data) => data,
            Err(reason) => {
                tracing::warn!(path = %path, %reason, "Failed to read archive entry");
                // Stored entries can still be carried over byte for byte
                if stored && let Some(bytes) = read_raw_entry(&mut archive, index) {
                    import.passthrough.push(PassthroughEntry {
                        path: path.clone(),
                        bytes,
                    });
                }
                import.failures.push(KmzEntryFailure {
                    path,
                    error: ParseError::new(Format::Kmz, format!("failed to read entry: {reason}")),
                });
                continue;
            }
        };

        if !is_kml_path(&path) {
            import.passthrough.push(PassthroughEntry { path, bytes: data });
            continue;
        }

        match parse_entry(&data, config) {
            Ok(features) if features.is_empty() => {
                tracing::debug!(path = %path, "KML entry has no features, keeping as-is");
                import.passthrough.push(PassthroughEntry { path, bytes: data });
            }
            Ok(features) => {
                import.features.extend(
                    features
                        .into_iter()
                        .map(|feature| feature.with_source_path(path.as_str())),
                );
            }
            Err(error) => {
                tracing::warn!(path = %path, %error, "Failed to parse KML entry");
                import.failures.push(KmzEntryFailure {
                    path: path.clone(),
                    error,
                });
                import.passthrough.push(PassthroughEntry { path, bytes: data });
            }
        }
    }

    tracing::info!(
        features = import.features.len(),
        passthrough = import.passthrough.len(),
        failures = import.failures.len(),
        "Imported KMZ archive"
    );
    Ok(import)
}

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Decompressed entry contents, checksum verified
fn read_entry(archive: &mut Archive<'_>, index: usize) -> std::result::Result<Vec<u8>, String> {
    let mut entry = archive.by_index(index).map_err(|e| e.to_string())?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data).map_err(|e| e.to_string())?;
    Ok(data)
}

fn read_raw_entry(archive: &mut Archive<'_>, index: usize) -> Option<Vec<u8>> {
    let mut entry = archive.by_index_raw(index).ok()?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data).ok()?;
    Some(data)
}

fn is_kml_path(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("kml"))
}

fn parse_entry(data: &[u8], config: &Config) -> Result<FeatureSet> {
    let text = std::str::from_utf8(data)
        .map_err(|e| ParseError::new(Format::Kml, format!("entry is not UTF-8: {e}")))?;
    kml::parse(text, config)
}

/// Where an exported feature came from; decides its sub-document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Origin {
    /// Sub-document of an imported KMZ
    Archive(String),
    /// Imported from an external activity provider
    Activity,
    /// Imported from a flat GeoJSON/GPX/KML file
    File(String),
    /// Created in the editor
    Drawn,
}

impl Origin {
    fn of(feature: &Feature) -> Self {
        let props = &feature.properties;
        if let Some(path) = &props.source_path {
            Origin::Archive(path.clone())
        } else if props.provenance_id.is_some() {
            Origin::Activity
        } else if let Some(file) = &props.origin_file {
            Origin::File(file.clone())
        } else {
            Origin::Drawn
        }
    }

    fn display_name(&self) -> &str {
        match self {
            Origin::Archive(path) | Origin::File(path) => file_stem(path),
            Origin::Activity => ACTIVITIES,
            Origin::Drawn => DRAWN_FEATURES,
        }
    }
}

/// One generated KML sub-document
struct SubDocument<'a> {
    name: String,
    path: String,
    features: Vec<&'a Feature>,
}

/// Build a KMZ archive from features and previously imported pass-through entries
///
/// Output is deterministic: the manifest comes first, sub-documents follow in manifest
/// order, pass-through entries last in their given order.
///
/// # Errors
///
/// Returns [`ExportError`] if the archive cannot be assembled.
pub fn serialize(
    features: &FeatureSet,
    passthrough: &[PassthroughEntry],
    options: &KmlOptions,
    config: &Config,
) -> std::result::Result<Vec<u8>, ExportError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("kmz::serialize");

    let manifest_path = config.kmz_manifest_path.as_str();
    let passthrough: Vec<&PassthroughEntry> = passthrough
        .iter()
        .filter(|entry| {
            let keep = entry.path != manifest_path;
            if !keep {
                tracing::debug!("Dropping imported manifest, it is regenerated");
            }
            keep
        })
        .collect();

    let documents = partition(features, &passthrough, config);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let file_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let document_name = options.name.as_deref().unwrap_or(DEFAULT_DOCUMENT_NAME);
    writer.start_file(manifest_path, file_options)?;
    writer.write_all(write_manifest(document_name, &documents).as_bytes())?;

    for document in &documents {
        let text = kml::write_document(&document.name, document.features.iter().copied(), config);
        writer.start_file(document.path.as_str(), file_options)?;
        writer.write_all(text.as_bytes())?;
    }

    for entry in passthrough {
        writer.start_file(entry.path.as_str(), file_options)?;
        writer.write_all(&entry.bytes)?;
    }

    let bytes = writer.finish()?.into_inner();
    tracing::info!(
        documents = documents.len(),
        features = features.len(),
        bytes = bytes.len(),
        "Built KMZ archive"
    );
    Ok(bytes)
}

/// Group features by origin and give every group a unique archive path
///
/// Groups from an imported archive reclaim their original path first; the rest get
/// generated names. The result is sorted by display name, ties by path.
fn partition<'a>(
    features: &'a FeatureSet,
    passthrough: &[&PassthroughEntry],
    config: &Config,
) -> Vec<SubDocument<'a>> {
    let mut groups: Vec<(Origin, Vec<&'a Feature>)> = Vec::new();
    let mut index: HashMap<Origin, usize> = HashMap::new();
    for feature in features.iter() {
        let origin = Origin::of(feature);
        let slot = *index.entry(origin.clone()).or_insert_with(|| {
            groups.push((origin, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(feature);
    }

    // Claim order must not depend on feature order
    groups.sort_by(|(a, _), (b, _)| {
        let archive_first = |o: &Origin| !matches!(o, Origin::Archive(_));
        (archive_first(a), a.display_name(), a).cmp(&(archive_first(b), b.display_name(), b))
    });

    let mut used: HashSet<String> = passthrough.iter().map(|e| e.path.clone()).collect();
    used.insert(config.kmz_manifest_path.clone());

    let mut documents: Vec<SubDocument> = groups
        .into_iter()
        .map(|(origin, features)| {
            let name = origin.display_name().to_string();
            let path = match &origin {
                Origin::Archive(path) if !used.contains(path) => path.clone(),
                _ => unique_path(&config.kmz_files_dir, &name, &used),
            };
            used.insert(path.clone());
            SubDocument {
                name,
                path,
                features,
            }
        })
        .collect();

    documents.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    documents
}

/// `dir/Name.kml`, then `dir/Name1.kml`, `dir/Name2.kml`, ... until unused
fn unique_path(dir: &str, name: &str, used: &HashSet<String>) -> String {
    let stem = sanitize_file_stem(name, "Untitled");
    let candidate = format!("{dir}{stem}.kml");
    if !used.contains(&candidate) {
        return candidate;
    }
    (1u32..)
        .map(|n| format!("{dir}{stem}{n}.kml"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or(candidate)
}

fn write_manifest(name: &str, documents: &[SubDocument]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    out.push_str("  <Document>\n");
    let _ = writeln!(out, "    <name>{}</name>", xml_escape(name));
    for document in documents {
        out.push_str("    <NetworkLink>\n");
        let _ = writeln!(out, "      <name>{}</name>", xml_escape(&document.name));
        let _ = writeln!(
            out,
            "      <Link><href>{}</href></Link>",
            xml_escape(&document.path)
        );
        out.push_str("    </NetworkLink>\n");
    }
    out.push_str("  </Document>\n");
    out.push_str("</kml>\n");
    out
}

/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::catalog
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Translate RELEASES catalog text to and from release
    entries, derive entries from package files, and gate
    staged rollouts.

  Security / Safety Notes:
    Parsing is strict: malformed lines fail the whole catalog
    rather than yielding partial data.

  Dependencies:
    uuid for staging identifiers.

  Operational Scope:
    Used by the feed reader for remote and local catalogs and
    when synthesizing a catalog from a package directory.

  Revision History:
    2025-11-17 COD  Implemented RELEASES codec.
    2025-12-02 COD  Added staging percentage gate.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Structured parsing with explicit error paths
    - Deterministic serialization order
============================================================*/

use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, SynupdError};
use crate::hasher::ContentHasher;
use crate::release::ReleaseEntry;
use crate::version::ReleaseVersion;

/// Well-known catalog resource name, both remote and local.
pub const CATALOG_FILE_NAME: &str = "RELEASES";

/// Package file extension recognised in feed directories.
pub const PACKAGE_EXTENSION: &str = "nupkg";

/// Converts catalog text into release entries and back.
pub trait CatalogCodec: Send + Sync {
    fn parse(&self, text: &str) -> Result<Vec<ReleaseEntry>>;
    fn serialize(&self, entries: &[ReleaseEntry]) -> String;
}

/// Decides whether a staged entry is visible to this installation.
pub trait StagingFilter: Send + Sync {
    fn accepts(&self, entry: &ReleaseEntry, staging_id: Option<&Uuid>) -> bool;
}

/// Line-oriented RELEASES codec:
/// `[# <pct>% ]<sha1> <filename> <size>[ <baseUrl>]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleasesFileCodec;

impl CatalogCodec for ReleasesFileCodec {
    fn parse(&self, text: &str) -> Result<Vec<ReleaseEntry>> {
        let mut entries = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_start_matches('\u{feff}').trim();
            if line.is_empty() {
                continue;
            }

            let (staging, body) = match split_staging_prefix(line) {
                Some((percentage, body)) => (Some(percentage), body),
                None if line.starts_with('#') => continue,
                None => (None, line),
            };

            let mut entry = parse_line(body).map_err(|err| {
                SynupdError::Serialization(format!("RELEASES line {}: {err}", index + 1))
            })?;
            entry.staging_percentage = staging;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn serialize(&self, entries: &[ReleaseEntry]) -> String {
        let mut sorted: Vec<&ReleaseEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.is_delta.cmp(&b.is_delta).reverse())
                .then_with(|| a.filename.cmp(&b.filename))
        });

        let mut out = String::new();
        for entry in sorted {
            if let Some(percentage) = entry.staging_percentage {
                out.push_str(&format!("# {percentage}% "));
            }
            out.push_str(&format!(
                "{} {} {}",
                entry.content_hash.to_uppercase(),
                entry.filename,
                entry.file_size
            ));
            if let Some(base) = &entry.base_url {
                out.push(' ');
                out.push_str(base);
                if let Some(query) = &entry.query {
                    out.push_str(query);
                }
            }
            out.push('\n');
        }
        out
    }
}

fn split_staging_prefix(line: &str) -> Option<(f32, &str)> {
    let rest = line.strip_prefix('#')?.trim_start();
    let (number, body) = rest.split_once('%')?;
    let percentage = number.trim().parse::<f32>().ok()?;
    if !(0.0..=100.0).contains(&percentage) {
        return None;
    }
    let body = body.trim_start();
    if body.is_empty() {
        return None;
    }
    Some((percentage, body))
}

fn parse_line(line: &str) -> std::result::Result<ReleaseEntry, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 || tokens.len() > 4 {
        return Err(format!("expected 3 or 4 fields, found {}", tokens.len()));
    }

    let hash = tokens[0];
    if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{hash}` is not a 40-character hex digest"));
    }
    let file_size = tokens[2]
        .parse::<u64>()
        .map_err(|err| format!("invalid size `{}`: {err}", tokens[2]))?;

    // Absolute URLs in the filename column carry their own base and query.
    let (mut base_url, filename, mut query) = split_locator(tokens[1]);
    if let Some(explicit) = tokens.get(3) {
        let (base, query_part) = split_query(explicit);
        base_url = Some(base.to_string());
        query = query_part.map(str::to_string);
    }

    let parsed = parse_package_filename(&filename)?;
    Ok(ReleaseEntry {
        version: parsed.version,
        filename,
        file_size,
        content_hash: hash.to_string(),
        is_delta: parsed.is_delta,
        base_url,
        query,
        package_name: parsed.package_name,
        staging_percentage: None,
    })
}

fn split_query(raw: &str) -> (&str, Option<&str>) {
    match raw.find('?') {
        Some(idx) => (&raw[..idx], Some(&raw[idx..])),
        None => (raw, None),
    }
}

fn split_locator(raw: &str) -> (Option<String>, String, Option<String>) {
    if !raw.contains("://") {
        return (None, raw.to_string(), None);
    }
    let (path, query) = split_query(raw);
    match path.rfind('/') {
        Some(idx) => (
            Some(path[..=idx].to_string()),
            path[idx + 1..].to_string(),
            query.map(str::to_string),
        ),
        None => (None, path.to_string(), query.map(str::to_string)),
    }
}

/// Components encoded in a package file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFileName {
    pub package_name: String,
    pub version: ReleaseVersion,
    pub is_delta: bool,
}

/// Parse `<packageName>-<version>[-delta|-full].nupkg`.
pub fn parse_package_filename(filename: &str) -> std::result::Result<PackageFileName, String> {
    let stem = filename
        .strip_suffix(&format!(".{PACKAGE_EXTENSION}"))
        .ok_or_else(|| format!("`{filename}` is not a .{PACKAGE_EXTENSION} package"))?;

    let (stem, is_delta) = if let Some(rest) = stem.strip_suffix("-delta") {
        (rest, true)
    } else if let Some(rest) = stem.strip_suffix("-full") {
        (rest, false)
    } else {
        (stem, false)
    };

    let split = stem
        .char_indices()
        .zip(stem.chars().skip(1))
        .find(|((_, c), next)| *c == '-' && next.is_ascii_digit())
        .map(|((idx, _), _)| idx)
        .ok_or_else(|| format!("`{filename}` does not encode a version"))?;

    let package_name = &stem[..split];
    let version = ReleaseVersion::parse(&stem[split + 1..]).map_err(|err| err.to_string())?;
    Ok(PackageFileName {
        package_name: package_name.to_string(),
        version,
        is_delta,
    })
}

/// Build a catalog entry describing a package file on disk.
pub fn entry_from_file(path: &Path, hasher: &dyn ContentHasher) -> Result<ReleaseEntry> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            SynupdError::Filesystem(format!("Package path {} has no file name", path.display()))
        })?
        .to_string();
    let parsed = parse_package_filename(&filename).map_err(SynupdError::Serialization)?;
    let metadata = std::fs::metadata(path).map_err(|err| {
        SynupdError::Filesystem(format!("Failed to stat {}: {err}", path.display()))
    })?;
    let content_hash = hasher.hash_file(path)?;

    Ok(ReleaseEntry::new(
        parsed.package_name,
        parsed.version,
        filename,
        metadata.len(),
        content_hash,
        parsed.is_delta,
    ))
}

/// Admits unstaged entries; staged entries only for installs whose
/// identifier falls into the published percentage bucket.
#[derive(Debug, Default, Clone, Copy)]
pub struct PercentageStagingFilter;

impl StagingFilter for PercentageStagingFilter {
    fn accepts(&self, entry: &ReleaseEntry, staging_id: Option<&Uuid>) -> bool {
        let Some(percentage) = entry.staging_percentage else {
            return true;
        };
        let Some(id) = staging_id else {
            return false;
        };
        let bytes = id.as_bytes();
        let bucket = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let position = f64::from(bucket) / f64::from(u32::MAX) * 100.0;
        position < f64::from(percentage)
    }
}

/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::release
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Shared structures describing published release packages,
    fetched catalog bundles, and computed update plans.

  Security / Safety Notes:
    Pure data containers; no I/O performed outside the plan
    persistence helper.

  Dependencies:
    serde for plan persistence, serde_json for output.

  Operational Scope:
    Passed from the feed reader into the resolver, and from
    the resolver into the fetch pipeline and apply step.

  Revision History:
    2024-11-04 COD  Introduced shared VersionInfo type.
    2025-11-17 COD  Replaced with release catalog model.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Clear data contracts between modules
    - Serializable structures for plan output
============================================================*/

use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynupdError};
use crate::version::ReleaseVersion;

/// Whether the manager is bootstrapping a fresh install or updating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateIntention {
    Install,
    Update,
}

/// One published package in a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub version: ReleaseVersion,
    pub filename: String,
    pub file_size: u64,
    pub content_hash: String,
    pub is_delta: bool,
    pub base_url: Option<String>,
    pub query: Option<String>,
    pub package_name: String,
    #[serde(default)]
    pub staging_percentage: Option<f32>,
}

impl ReleaseEntry {
    pub fn new(
        package_name: impl Into<String>,
        version: ReleaseVersion,
        filename: impl Into<String>,
        file_size: u64,
        content_hash: impl Into<String>,
        is_delta: bool,
    ) -> Self {
        Self {
            version,
            filename: filename.into(),
            file_size,
            content_hash: content_hash.into(),
            is_delta,
            base_url: None,
            query: None,
            package_name: package_name.into(),
            staging_percentage: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_staging_percentage(mut self, percentage: f32) -> Self {
        self.staging_percentage = Some(percentage);
        self
    }

    /// Case-insensitive comparison against a hex digest.
    pub fn hash_matches(&self, digest: &str) -> bool {
        self.content_hash.eq_ignore_ascii_case(digest)
    }

    /// Relative locator used when fetching this entry from a feed.
    pub fn relative_url(&self) -> String {
        let mut url = String::new();
        if let Some(base) = &self.base_url {
            url.push_str(base);
        }
        url.push_str(&self.filename);
        if let Some(query) = &self.query {
            url.push_str(query);
        }
        url
    }
}

impl PartialEq for ReleaseEntry {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename && self.version == other.version
    }
}

impl Eq for ReleaseEntry {}

impl Hash for ReleaseEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filename.hash(state);
        self.version.hash(state);
    }
}

/// Highest-versioned entry of a catalog, if any.
pub fn latest_release(entries: &[ReleaseEntry]) -> Option<&ReleaseEntry> {
    entries.iter().max_by(|a, b| a.version.cmp(&b.version))
}

/// Remote catalog, local catalog, and the release currently installed.
#[derive(Debug, Clone)]
pub struct RemoteAndLocalReleases {
    pub remote: Vec<ReleaseEntry>,
    pub local: Option<Vec<ReleaseEntry>>,
    pub current_release: Option<ReleaseEntry>,
}

impl RemoteAndLocalReleases {
    pub fn new(
        remote: Vec<ReleaseEntry>,
        local: Option<Vec<ReleaseEntry>>,
        current_release: Option<ReleaseEntry>,
    ) -> Self {
        Self {
            remote,
            local,
            current_release,
        }
    }
}

/// Ordered set of packages that moves an installation to a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub currently_installed_version: Option<ReleaseEntry>,
    pub releases_to_apply: Vec<ReleaseEntry>,
    pub future_release_entry: Option<ReleaseEntry>,
    pub package_directory: PathBuf,
}

impl UpdateInfo {
    pub fn new(
        currently_installed_version: Option<ReleaseEntry>,
        releases_to_apply: Vec<ReleaseEntry>,
        package_directory: impl Into<PathBuf>,
    ) -> Self {
        let future_release_entry = latest_release(&releases_to_apply)
            .cloned()
            .or_else(|| currently_installed_version.clone());
        Self {
            currently_installed_version,
            releases_to_apply,
            future_release_entry,
            package_directory: package_directory.into(),
        }
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.currently_installed_version.is_none()
    }

    pub fn is_noop(&self) -> bool {
        self.releases_to_apply.is_empty()
    }

    pub fn total_download_size(&self) -> u64 {
        self.releases_to_apply
            .iter()
            .fold(0_u64, |acc, entry| acc.saturating_add(entry.file_size))
    }

    /// Where each package of the plan lands on disk.
    pub fn package_paths(&self) -> Vec<PathBuf> {
        self.releases_to_apply
            .iter()
            .map(|entry| self.package_directory.join(&entry.filename))
            .collect()
    }
}

/// Persist an update plan as pretty JSON.
pub fn write_update_plan(info: &UpdateInfo, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to create plan directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let file = File::create(path).map_err(|err| {
        SynupdError::Filesystem(format!(
            "Failed to create plan file {}: {err}",
            path.display()
        ))
    })?;
    serde_json::to_writer_pretty(file, info).map_err(|err| {
        SynupdError::Serialization(format!("Failed to write plan {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Load a plan previously written by [`write_update_plan`].
pub fn read_update_plan(path: &Path) -> Result<UpdateInfo> {
    let file = File::open(path).map_err(|err| {
        SynupdError::Filesystem(format!("Failed to open plan {}: {err}", path.display()))
    })?;
    serde_json::from_reader(file).map_err(|err| {
        SynupdError::Serialization(format!("Failed to parse plan {}: {err}", path.display()))
    })
}

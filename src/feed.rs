/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::feed
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Obtain the local and remote RELEASES catalogs and bundle
    them with the currently installed release.

  Security / Safety Notes:
    Read-only against the remote feed. May wipe and recreate
    the local package directory when its catalog is unusable;
    the wipe runs under the installation lock.
    Writes a synthesized RELEASES into directory feeds that
    lack one.

  Dependencies:
    urlencoding for query parameters, tokio for backoff.

  Operational Scope:
    First stage of every check; its output feeds the resolver.

  Revision History:
    2024-11-04 COD  Implemented retrying feed client.
    2025-11-17 COD  Reworked for RELEASES catalogs and
                    directory feeds.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Retry with exponential backoff on transient failures
    - Corrupt remote data is fatal, corrupt local data is not
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use urlencoding::encode;
use uuid::Uuid;

use crate::catalog::{
    entry_from_file, CatalogCodec, StagingFilter, CATALOG_FILE_NAME, PACKAGE_EXTENSION,
};
use crate::downloader::PackageDownloader;
use crate::error::{Result, SynupdError};
use crate::hasher::ContentHasher;
use crate::lock::UpdateLock;
use crate::logger::Logger;
use crate::progress::Progress;
use crate::release::{latest_release, ReleaseEntry, RemoteAndLocalReleases, UpdateIntention};
use crate::staging::get_or_create_staged_user_id;

/// Where a feed lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    Http(String),
    Directory(PathBuf),
}

impl FeedLocation {
    pub fn parse(location: &str) -> Self {
        let lowered = location.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            FeedLocation::Http(location.to_string())
        } else {
            FeedLocation::Directory(PathBuf::from(location))
        }
    }
}

/// Reads RELEASES catalogs from a feed and from the local package directory.
#[derive(Clone)]
pub struct FeedReader {
    downloader: Arc<dyn PackageDownloader>,
    hasher: Arc<dyn ContentHasher>,
    codec: Arc<dyn CatalogCodec>,
    staging: Arc<dyn StagingFilter>,
    logger: Arc<Logger>,
    max_retries: usize,
    reset_lock: Option<Arc<dyn UpdateLock>>,
}

impl FeedReader {
    pub fn new(
        downloader: Arc<dyn PackageDownloader>,
        hasher: Arc<dyn ContentHasher>,
        codec: Arc<dyn CatalogCodec>,
        staging: Arc<dyn StagingFilter>,
        logger: Arc<Logger>,
        max_retries: usize,
    ) -> Self {
        Self {
            downloader,
            hasher,
            codec,
            staging,
            logger,
            max_retries,
            reset_lock: None,
        }
    }

    /// Take `lock` around any wipe of the package directory. Leave unset
    /// when the caller already holds the installation lock.
    pub fn with_reset_lock(mut self, lock: Arc<dyn UpdateLock>) -> Self {
        self.reset_lock = Some(lock);
        self
    }

    /// Fetch both catalogs. `local_catalog_path` is the RELEASES file inside
    /// the package directory.
    pub async fn fetch_catalogs(
        &self,
        intention: UpdateIntention,
        local_catalog_path: &Path,
        remote_location: &str,
        progress: Progress,
    ) -> Result<RemoteAndLocalReleases> {
        let package_directory = local_catalog_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let local = match intention {
            UpdateIntention::Update => match self.read_local_catalog(local_catalog_path) {
                Ok(entries) => Some(entries),
                Err(err) => {
                    self.logger.warn(
                        "FEED",
                        format!("Failed to load local releases, starting from scratch: {err}"),
                    );
                    self.reset_package_directory(&package_directory).await?;
                    None
                }
            },
            UpdateIntention::Install => {
                self.reset_package_directory(&package_directory).await?;
                None
            }
        };

        let staging_id = match intention {
            UpdateIntention::Update => {
                get_or_create_staged_user_id(&package_directory, &self.logger)
            }
            UpdateIntention::Install => None,
        };

        let latest_local = local.as_deref().and_then(latest_release);
        let raw = match FeedLocation::parse(remote_location) {
            FeedLocation::Http(base) => {
                self.fetch_remote_catalog(&base, latest_local).await?
            }
            FeedLocation::Directory(dir) => self.read_directory_catalog(&dir)?,
        };
        progress(50);

        let remote = self.parse_remote(&raw, staging_id.as_ref())?;
        progress(100);

        let current_release = latest_local.cloned();
        self.logger.info(
            "FEED",
            format!(
                "remote={} local={} current={}",
                remote.len(),
                local.as_ref().map_or(0, Vec::len),
                current_release
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |entry| entry.version.to_string())
            ),
        );
        Ok(RemoteAndLocalReleases::new(remote, local, current_release))
    }

    async fn reset_package_directory(&self, dir: &Path) -> Result<()> {
        let _guard = match &self.reset_lock {
            Some(lock) => Some(lock.acquire().await?),
            None => None,
        };
        clear_directory(dir)
    }

    fn read_local_catalog(&self, path: &Path) -> Result<Vec<ReleaseEntry>> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SynupdError::Filesystem(format!("Failed to read {}: {err}", path.display()))
        })?;
        self.codec.parse(&raw)
    }

    fn parse_remote(&self, raw: &[u8], staging_id: Option<&Uuid>) -> Result<Vec<ReleaseEntry>> {
        let text = std::str::from_utf8(raw).map_err(|err| {
            SynupdError::CorruptCatalog(format!("catalog is not valid UTF-8: {err}"))
        })?;
        let entries = self
            .codec
            .parse(text)
            .map_err(|err| SynupdError::CorruptCatalog(err.to_string()))?;

        let admitted: Vec<ReleaseEntry> = entries
            .into_iter()
            .filter(|entry| self.staging.accepts(entry, staging_id))
            .collect();
        if admitted.is_empty() {
            return Err(SynupdError::CorruptCatalog(
                "remote release file is empty".into(),
            ));
        }
        Ok(admitted)
    }

    async fn fetch_remote_catalog(
        &self,
        base: &str,
        latest_local: Option<&ReleaseEntry>,
    ) -> Result<Vec<u8>> {
        let url = catalog_url(base, latest_local);
        self.logger.info("FEED", format!("Downloading RELEASES from {url}"));

        let mut attempt = 0;
        loop {
            match self.downloader.fetch_bytes(&url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    self.logger.warn(
                        "FEED",
                        format!("Catalog request failed (attempt {attempt}): {err}"),
                    );
                    let exponent = (attempt as u32).min(8);
                    let backoff = Duration::from_millis(100_u64.saturating_mul(1_u64 << exponent));
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn read_directory_catalog(&self, dir: &Path) -> Result<Vec<u8>> {
        if !dir.is_dir() {
            return Err(SynupdError::SourceUnavailable(format!(
                "update directory {} does not exist",
                dir.display()
            )));
        }

        let catalog = dir.join(CATALOG_FILE_NAME);
        if !catalog.exists() {
            self.synthesize_catalog(dir, &catalog)?;
        }

        self.logger.info(
            "FEED",
            format!("Reading RELEASES from {}", catalog.display()),
        );
        std::fs::read(&catalog).map_err(|err| {
            SynupdError::SourceUnavailable(format!("Failed to read {}: {err}", catalog.display()))
        })
    }

    fn synthesize_catalog(&self, dir: &Path, catalog: &Path) -> Result<()> {
        let read = std::fs::read_dir(dir).map_err(|err| {
            SynupdError::SourceUnavailable(format!("Failed to list {}: {err}", dir.display()))
        })?;
        let mut packages: Vec<PathBuf> = read
            .filter_map(|item| item.ok().map(|item| item.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(PACKAGE_EXTENSION)
            })
            .collect();
        if packages.is_empty() {
            return Err(SynupdError::SourceUnavailable(format!(
                "update directory {} has no RELEASES file and no packages",
                dir.display()
            )));
        }
        packages.sort();

        self.logger.warn(
            "FEED",
            format!(
                "The directory {} did not contain a RELEASES file, generating one",
                dir.display()
            ),
        );
        let entries = packages
            .iter()
            .map(|path| entry_from_file(path, self.hasher.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        std::fs::write(catalog, self.codec.serialize(&entries)).map_err(|err| {
            SynupdError::Filesystem(format!("Failed to write {}: {err}", catalog.display()))
        })
    }
}

/// `<base>/RELEASES`, plus identification parameters once something is
/// installed.
pub fn catalog_url(base: &str, latest_local: Option<&ReleaseEntry>) -> String {
    let mut url = format!("{}/{CATALOG_FILE_NAME}", base.trim_end_matches('/'));
    if let Some(latest) = latest_local {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&format!(
            "id={}&localVersion={}&arch={}",
            encode(&latest.package_name),
            encode(&latest.version.to_string()),
            encode(std::env::consts::ARCH)
        ));
    }
    url
}

fn clear_directory(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|err| {
            SynupdError::Filesystem(format!("Failed to clear {}: {err}", dir.display()))
        })?;
    }
    std::fs::create_dir_all(dir).map_err(|err| {
        SynupdError::Filesystem(format!("Failed to create {}: {err}", dir.display()))
    })
}

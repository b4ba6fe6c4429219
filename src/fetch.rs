/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::fetch
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Materialize a batch of release packages in the local
    package directory and verify each against its catalog
    size and SHA-1.

  Security / Safety Notes:
    Packages that fail verification are deleted before the
    error is returned. Bodies land in `.partial` files and are
    renamed only once complete.

  Dependencies:
    tokio (tasks, semaphore, fs), tokio-util cancellation.

  Operational Scope:
    Invoked by the update manager between planning and apply.

  Revision History:
    2024-11-04 COD  Implemented bounded parallel requests.
    2025-11-17 COD  Reworked into package fetch pipeline.
    2025-12-09 COD  Hashing moved to the blocking pool.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Bounded concurrency with ordered joins
    - Integrity failures never leave files behind
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::downloader::PackageDownloader;
use crate::error::{Result, SynupdError};
use crate::feed::FeedLocation;
use crate::hasher::ContentHasher;
use crate::logger::Logger;
use crate::progress::{Progress, WeightedProgress};
use crate::release::ReleaseEntry;

const PARTIAL_SUFFIX: &str = "partial";

/// Downloads or copies release packages and verifies them.
#[derive(Clone)]
pub struct ReleaseFetcher {
    downloader: Arc<dyn PackageDownloader>,
    hasher: Arc<dyn ContentHasher>,
    logger: Arc<Logger>,
    max_parallel: usize,
}

impl ReleaseFetcher {
    /// `max_parallel == 0` lets the whole batch download at once.
    pub fn new(
        downloader: Arc<dyn PackageDownloader>,
        hasher: Arc<dyn ContentHasher>,
        logger: Arc<Logger>,
        max_parallel: usize,
    ) -> Self {
        Self {
            downloader,
            hasher,
            logger,
            max_parallel,
        }
    }

    /// Bring every entry of `releases` into `package_directory` from `source`
    /// and verify it.
    pub async fn fetch_and_verify(
        &self,
        source: &str,
        releases: &[ReleaseEntry],
        package_directory: &Path,
        progress: Progress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if releases.is_empty() {
            progress(100);
            return Ok(());
        }

        tokio::fs::create_dir_all(package_directory).await.map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to create package directory {}: {err}",
                package_directory.display()
            ))
        })?;

        let weighted = Arc::new(WeightedProgress::new(releases.len(), progress));
        match FeedLocation::parse(source) {
            FeedLocation::Http(base) => {
                self.download_all(&base, releases, package_directory, &weighted, cancel)
                    .await?
            }
            FeedLocation::Directory(dir) => {
                self.copy_all(&dir, releases, package_directory, &weighted, cancel)
                    .await?
            }
        }

        if cancel.is_cancelled() {
            return Err(SynupdError::Cancelled);
        }
        self.verify_all(releases, package_directory).await?;
        self.logger.info(
            "FETCH",
            format!("Verified {} package(s) in {}", releases.len(), package_directory.display()),
        );
        Ok(())
    }

    /// Hash the batch on the blocking pool; packages can be large.
    async fn verify_all(&self, releases: &[ReleaseEntry], package_directory: &Path) -> Result<()> {
        let releases = releases.to_vec();
        let package_directory = package_directory.to_path_buf();
        let hasher = Arc::clone(&self.hasher);
        let logger = Arc::clone(&self.logger);
        tokio::task::spawn_blocking(move || {
            releases.iter().try_for_each(|entry| {
                verify_package(entry, &package_directory, hasher.as_ref(), &logger)
            })
        })
        .await
        .map_err(|err| SynupdError::Runtime(format!("Verification task failed: {err}")))?
    }

    async fn download_all(
        &self,
        base: &str,
        releases: &[ReleaseEntry],
        package_directory: &Path,
        weighted: &Arc<WeightedProgress>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let limit = if self.max_parallel == 0 {
            releases.len()
        } else {
            self.max_parallel
        };
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let batch = cancel.child_token();
        let mut tasks = Vec::with_capacity(releases.len());

        for (index, entry) in releases.iter().enumerate() {
            let job = DownloadJob {
                index,
                url: package_url(base, entry),
                dest: package_directory.join(&entry.filename),
            };
            let downloader = Arc::clone(&self.downloader);
            let logger = Arc::clone(&self.logger);
            let semaphore = Arc::clone(&semaphore);
            let weighted = Arc::clone(weighted);
            let token = batch.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(SynupdError::Cancelled),
                    permit = semaphore.acquire_owned() => permit
                        .map_err(|_| SynupdError::Runtime("download semaphore closed".into()))?,
                };
                download_one(job, downloader, logger, weighted, token).await
            }));
        }

        let mut first_error = None;
        for task in tasks {
            let outcome = task
                .await
                .map_err(|err| SynupdError::Runtime(format!("Download task failed: {err}")))
                .and_then(|result| result);
            if let Err(err) = outcome {
                if first_error.is_none() {
                    batch.cancel();
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(_) if cancel.is_cancelled() => Err(SynupdError::Cancelled),
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn copy_all(
        &self,
        source_dir: &Path,
        releases: &[ReleaseEntry],
        package_directory: &Path,
        weighted: &Arc<WeightedProgress>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for (index, entry) in releases.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SynupdError::Cancelled);
            }
            let from = source_dir.join(&entry.filename);
            let to = package_directory.join(&entry.filename);
            self.logger.debug(
                "FETCH",
                format!("Copying {} to {}", from.display(), to.display()),
            );
            tokio::fs::copy(&from, &to).await.map_err(|err| {
                SynupdError::Filesystem(format!("Failed to copy {}: {err}", from.display()))
            })?;
            weighted.complete(index);
        }
        Ok(())
    }
}

struct DownloadJob {
    index: usize,
    url: String,
    dest: PathBuf,
}

async fn download_one(
    job: DownloadJob,
    downloader: Arc<dyn PackageDownloader>,
    logger: Arc<Logger>,
    weighted: Arc<WeightedProgress>,
    token: CancellationToken,
) -> Result<()> {
    let index = job.index;
    let sink = Arc::clone(&weighted);
    let item_progress: Progress = Arc::new(move |p| sink.update(index, p));
    let partial = partial_path(&job.dest);

    let result = download_with_case_fallback(
        downloader.as_ref(),
        &logger,
        &job.url,
        &partial,
        item_progress,
        &token,
    )
    .await;
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }

    tokio::fs::rename(&partial, &job.dest).await.map_err(|err| {
        SynupdError::Filesystem(format!(
            "Failed to move {} into place: {err}",
            partial.display()
        ))
    })?;
    weighted.complete(index);
    Ok(())
}

/// Absolute URL of a package; an absolute `base_url` on the entry wins over
/// the feed base.
pub fn package_url(source: &str, entry: &ReleaseEntry) -> String {
    let relative = entry.relative_url();
    if relative.contains("://") {
        return relative;
    }
    format!(
        "{}/{}",
        source.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Fetch `url`, retrying once with the URL lower-cased for case-insensitive
/// hosts that were published with mismatched casing.
pub async fn download_with_case_fallback(
    downloader: &dyn PackageDownloader,
    logger: &Logger,
    url: &str,
    dest: &Path,
    progress: Progress,
    cancel: &CancellationToken,
) -> Result<()> {
    match downloader
        .fetch_to_file(url, dest, Arc::clone(&progress), cancel)
        .await
    {
        Ok(()) => Ok(()),
        Err(SynupdError::Cancelled) => Err(SynupdError::Cancelled),
        Err(err) => {
            let lowered = url.to_lowercase();
            logger.warn(
                "FETCH",
                format!("Download of {url} failed ({err}), retrying as {lowered}"),
            );
            downloader.fetch_to_file(&lowered, dest, progress, cancel).await
        }
    }
}

/// Check that `entry` exists in `package_directory` with the catalog size
/// and hash. Mismatching files are removed.
pub fn verify_package(
    entry: &ReleaseEntry,
    package_directory: &Path,
    hasher: &dyn ContentHasher,
    logger: &Logger,
) -> Result<()> {
    let path = package_directory.join(&entry.filename);
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            logger.error("VERIFY", format!("{} is missing", path.display()));
            return Err(SynupdError::MissingAfterDownload {
                path: path.display().to_string(),
            });
        }
    };

    if metadata.len() != entry.file_size {
        logger.error(
            "VERIFY",
            format!(
                "{} is {} bytes, expected {}; deleting",
                entry.filename,
                metadata.len(),
                entry.file_size
            ),
        );
        remove_quietly(&path, logger);
        return Err(SynupdError::SizeMismatch {
            filename: entry.filename.clone(),
            expected: entry.file_size,
            actual: metadata.len(),
        });
    }

    let digest = hasher.hash_file(&path)?;
    if !entry.hash_matches(&digest) {
        logger.error(
            "VERIFY",
            format!("{} has hash {digest}, expected {}; deleting", entry.filename, entry.content_hash),
        );
        remove_quietly(&path, logger);
        return Err(SynupdError::HashMismatch {
            filename: entry.filename.clone(),
            expected: entry.content_hash.clone(),
            actual: digest,
        });
    }
    Ok(())
}

fn remove_quietly(path: &Path, logger: &Logger) {
    if let Err(err) = std::fs::remove_file(path) {
        logger.warn(
            "VERIFY",
            format!("Failed to delete {}: {err}", path.display()),
        );
    }
}

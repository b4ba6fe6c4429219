/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::manager
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Orchestrate catalog retrieval, update planning, package
    fetch, and the external apply step for one installation.

  Security / Safety Notes:
    Mutating steps run under the installation lock. Package
    application and uninstaller registration are delegated to
    caller-supplied collaborators.

  Dependencies:
    async-trait for collaborator seams, tokio-util for
    cancellation.

  Operational Scope:
    Primary entry point for embedding applications.

  Revision History:
    2024-11-04 COD  Established orchestration entry point.
    2025-11-17 COD  Rebuilt around the update sequence.
    2025-12-09 COD  Session log; install checks take the lock;
                    registration failures fail the attempt.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Lock held only for mutating steps
    - Single bounded retry with full packages
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::catalog::{
    CatalogCodec, PercentageStagingFilter, ReleasesFileCodec, StagingFilter, CATALOG_FILE_NAME,
};
use crate::config::UpdaterConfig;
use crate::downloader::{HttpDownloader, PackageDownloader};
use crate::error::{Result, SynupdError};
use crate::feed::FeedReader;
use crate::fetch::ReleaseFetcher;
use crate::hasher::{ContentHasher, Sha1Hasher};
use crate::lock::{FileUpdateLock, UpdateLock, UpdateLockGuard};
use crate::logger::Logger;
use crate::progress::{sub_range, Progress};
use crate::release::{latest_release, ReleaseEntry, RemoteAndLocalReleases, UpdateInfo, UpdateIntention};
use crate::resolver::{calculate_update_info, latest_update_info, PlanOptions};

/// Installs verified packages into the application directory.
#[async_trait]
pub trait ReleaseApplier: Send + Sync {
    async fn apply(&self, info: &UpdateInfo, progress: Progress) -> Result<()>;
}

/// Records the installation with the platform's uninstall registry.
#[async_trait]
pub trait UninstallRegistrar: Send + Sync {
    async fn register(&self, root: &Path) -> Result<()>;
}

/// Entry point tying the feed, resolver, fetch pipeline, and apply step
/// together for one installation root.
pub struct UpdateManager {
    root_dir: PathBuf,
    update_source: String,
    min_prerelease: Option<String>,
    lock_checks: bool,
    catalog_retries: usize,
    max_parallel_downloads: usize,
    downloader: Arc<dyn PackageDownloader>,
    hasher: Arc<dyn ContentHasher>,
    codec: Arc<dyn CatalogCodec>,
    staging: Arc<dyn StagingFilter>,
    lock: Arc<dyn UpdateLock>,
    applier: Arc<dyn ReleaseApplier>,
    uninstaller: Option<Arc<dyn UninstallRegistrar>>,
    logger: Arc<Logger>,
    cancel: CancellationToken,
}

impl UpdateManager {
    /// Build a manager that logs to a fresh session file under the
    /// configured log directory.
    pub fn open(config: &UpdaterConfig, applier: Arc<dyn ReleaseApplier>) -> Result<Self> {
        config.validate()?;
        let logger = Logger::for_session(&config.log_dir(), config.verbose)?;
        Self::from_config(config, applier, Arc::new(logger))
    }

    /// Build a manager with the production collaborators described by
    /// `config`.
    pub fn from_config(
        config: &UpdaterConfig,
        applier: Arc<dyn ReleaseApplier>,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        config.validate()?;
        let root_dir = config.root_dir();
        let downloader = HttpDownloader::new(&config.http)?;
        let lock = FileUpdateLock::for_root(&root_dir, config.lock.timeout());

        Ok(Self {
            update_source: config.update_source.clone(),
            min_prerelease: config.min_prerelease.clone(),
            lock_checks: config.lock.lock_checks,
            catalog_retries: config.http.catalog_retries,
            max_parallel_downloads: config.http.max_parallel_downloads,
            downloader: Arc::new(downloader),
            hasher: Arc::new(Sha1Hasher),
            codec: Arc::new(ReleasesFileCodec),
            staging: Arc::new(PercentageStagingFilter),
            lock: Arc::new(lock),
            applier,
            uninstaller: None,
            logger,
            cancel: CancellationToken::new(),
            root_dir,
        })
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn PackageDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn UpdateLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_staging_filter(mut self, staging: Arc<dyn StagingFilter>) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn CatalogCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_uninstall_registrar(mut self, registrar: Arc<dyn UninstallRegistrar>) -> Self {
        self.uninstaller = Some(registrar);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn package_directory(&self) -> PathBuf {
        self.root_dir.join("packages")
    }

    /// Token observed by every fetch this manager performs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `holding_lock` tells the reader whether the caller already owns the
    /// installation lock; if not, package directory wipes take it.
    fn feed(&self, holding_lock: bool) -> FeedReader {
        let reader = FeedReader::new(
            Arc::clone(&self.downloader),
            Arc::clone(&self.hasher),
            Arc::clone(&self.codec),
            Arc::clone(&self.staging),
            Arc::clone(&self.logger),
            self.catalog_retries,
        );
        if holding_lock {
            reader
        } else {
            reader.with_reset_lock(Arc::clone(&self.lock))
        }
    }

    fn fetcher(&self) -> ReleaseFetcher {
        ReleaseFetcher::new(
            Arc::clone(&self.downloader),
            Arc::clone(&self.hasher),
            Arc::clone(&self.logger),
            self.max_parallel_downloads,
        )
    }

    async fn acquire_lock(&self) -> Result<UpdateLockGuard> {
        let guard = self.lock.acquire().await;
        if let Err(err) = &guard {
            self.logger.error("LOCK", format!("Couldn't acquire update lock: {err}"));
        }
        guard
    }

    /// Read the local and remote catalogs. The lock is taken only if the
    /// package directory has to be wiped.
    pub async fn fetch_all_releases(
        &self,
        intention: UpdateIntention,
        progress: Progress,
    ) -> Result<RemoteAndLocalReleases> {
        self.read_catalogs(intention, progress, false).await
    }

    async fn read_catalogs(
        &self,
        intention: UpdateIntention,
        progress: Progress,
        holding_lock: bool,
    ) -> Result<RemoteAndLocalReleases> {
        self.feed(holding_lock)
            .fetch_catalogs(
                intention,
                &self.package_directory().join(CATALOG_FILE_NAME),
                &self.update_source,
                progress,
            )
            .await
    }

    /// Plan a path to `target` from previously fetched catalogs.
    pub fn calculate_update_path(
        &self,
        releases: &RemoteAndLocalReleases,
        target: Option<&ReleaseEntry>,
        allow_downgrade: bool,
        ignore_delta_updates: bool,
        intention: UpdateIntention,
    ) -> Result<UpdateInfo> {
        let options = PlanOptions {
            allow_downgrade,
            ignore_delta_updates,
            min_prerelease: self.min_prerelease.clone(),
            ..PlanOptions::new(intention)
        };
        calculate_update_info(
            releases,
            target,
            &options,
            &self.package_directory(),
            &self.logger,
        )
    }

    /// Fetch catalogs and plan a path to the newest admitted release.
    ///
    /// Install checks wipe the package directory and always hold the lock.
    /// Update checks hold it when `lock.lock_checks` is set, and otherwise
    /// only around a wipe forced by an unreadable local catalog.
    pub async fn check_for_update(
        &self,
        allow_downgrade: bool,
        ignore_delta_updates: bool,
        intention: UpdateIntention,
        progress: Progress,
    ) -> Result<UpdateInfo> {
        let guard = if self.lock_checks || intention == UpdateIntention::Install {
            Some(self.acquire_lock().await?)
        } else {
            None
        };

        let releases = self
            .read_catalogs(intention, sub_range(&progress, 0, 66), guard.is_some())
            .await?;
        drop(guard);
        let options = PlanOptions {
            allow_downgrade,
            ignore_delta_updates,
            min_prerelease: self.min_prerelease.clone(),
            ..PlanOptions::new(intention)
        };
        let info = latest_update_info(
            &releases,
            &options,
            &self.package_directory(),
            &self.logger,
        )?;
        progress(100);
        Ok(info)
    }

    /// Download and verify `releases` into the package directory.
    pub async fn download_releases(
        &self,
        releases: &[ReleaseEntry],
        progress: Progress,
    ) -> Result<()> {
        let _guard = self.acquire_lock().await?;
        self.fetcher()
            .fetch_and_verify(
                &self.update_source,
                releases,
                &self.package_directory(),
                progress,
                &self.cancel,
            )
            .await
    }

    pub async fn download_release(&self, release: &ReleaseEntry) -> Result<()> {
        self.download_releases(std::slice::from_ref(release), crate::progress::silent())
            .await
    }

    /// Hand a verified plan to the applier.
    pub async fn apply_releases(&self, info: &UpdateInfo, progress: Progress) -> Result<()> {
        let _guard = self.acquire_lock().await?;
        self.logger.info(
            "APPLY",
            format!(
                "Applying {} package(s) towards {}",
                info.releases_to_apply.len(),
                info.future_release_entry
                    .as_ref()
                    .map_or_else(|| "nothing".to_string(), |e| e.version.to_string())
            ),
        );
        self.applier.apply(info, progress).await
    }

    /// Fresh install: check, download, then apply the newest release.
    pub async fn full_install(&self, progress: Progress) -> Result<UpdateInfo> {
        let outcome = self.full_install_steps(progress).await;
        if let Err(err) = &outcome {
            self.logger.error("INSTALL", format!("Install failed: {err}"));
        }
        self.seal_session_log();
        outcome
    }

    async fn full_install_steps(&self, progress: Progress) -> Result<UpdateInfo> {
        let info = self
            .check_for_update(false, false, UpdateIntention::Install, sub_range(&progress, 0, 33))
            .await?;
        self.download_releases(&info.releases_to_apply, sub_range(&progress, 33, 66))
            .await?;
        self.apply_releases(&info, sub_range(&progress, 66, 100))
            .await?;
        Ok(info)
    }

    /// Bring the installation up to date. A failed attempt is retried once
    /// with delta packages disabled. Returns the newest applied release.
    pub async fn update_app(
        &self,
        allow_downgrade: bool,
        progress: Progress,
    ) -> Result<Option<ReleaseEntry>> {
        let outcome = self.update_app_attempts(allow_downgrade, progress).await;
        self.seal_session_log();
        outcome
    }

    async fn update_app_attempts(
        &self,
        allow_downgrade: bool,
        progress: Progress,
    ) -> Result<Option<ReleaseEntry>> {
        let mut ignore_delta_updates = false;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .update_app_once(allow_downgrade, ignore_delta_updates, &progress)
                .await
            {
                Ok(applied) => return Ok(applied),
                Err(SynupdError::Cancelled) => return Err(SynupdError::Cancelled),
                Err(err) if attempt < 2 => {
                    self.logger.warn(
                        "UPDATE",
                        format!("Failed to update, retrying with full packages: {err}"),
                    );
                    ignore_delta_updates = true;
                }
                Err(err) => {
                    self.logger.error("UPDATE", format!("Update failed: {err}"));
                    return Err(err);
                }
            }
        }
    }

    async fn update_app_once(
        &self,
        allow_downgrade: bool,
        ignore_delta_updates: bool,
        progress: &Progress,
    ) -> Result<Option<ReleaseEntry>> {
        let info = self
            .check_for_update(
                allow_downgrade,
                ignore_delta_updates,
                UpdateIntention::Update,
                sub_range(progress, 0, 33),
            )
            .await?;
        self.download_releases(&info.releases_to_apply, sub_range(progress, 33, 66))
            .await?;
        self.apply_releases(&info, sub_range(progress, 66, 100))
            .await?;

        if let Some(registrar) = &self.uninstaller {
            registrar.register(&self.root_dir).await.map_err(|err| {
                self.logger.warn(
                    "UPDATE",
                    format!("Couldn't write uninstall registry entry: {err}"),
                );
                err
            })?;
        }

        Ok(latest_release(&info.releases_to_apply).cloned())
    }

    /// Seal the session log; a failure here never masks the operation result.
    fn seal_session_log(&self) {
        if let Err(err) = self.logger.finalize() {
            self.logger.warn("LOGGER", format!("Couldn't seal session log: {err}"));
        }
    }
}

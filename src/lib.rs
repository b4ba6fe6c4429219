/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Update client core for desktop applications. Reads a
    RELEASES feed, plans the cheapest verified path from the
    installed release to the newest one, and fetches the
    packages that path needs.

  Security / Safety Notes:
    Operates within user privileges. Performs HTTPS GET
    requests and writes only beneath the installation root,
    the system temp directory (lock files), and directory
    feeds lacking a RELEASES file.

  Dependencies:
    tokio runtime, reqwest transport, thiserror errors,
    chrono-stamped logging.

  Operational Scope:
    Embedded by installers and running applications through
    `UpdateManager`; package application itself is external.

  Revision History:
    2025-10-28 COD  Authored core runtime.
    2025-11-17 COD  Re-scoped as Syn-Upd update core library.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via config file
============================================================*/

pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod hasher;
pub mod lock;
pub mod logger;
pub mod manager;
pub mod progress;
pub mod release;
pub mod resolver;
pub mod staging;
pub mod version;

pub use catalog::{CatalogCodec, PercentageStagingFilter, ReleasesFileCodec, StagingFilter};
pub use config::UpdaterConfig;
pub use downloader::{HttpDownloader, PackageDownloader};
pub use error::{Result, SynupdError};
pub use hasher::{ContentHasher, Sha1Hasher};
pub use lock::{FileUpdateLock, NoopUpdateLock, UpdateLock, UpdateLockGuard};
pub use logger::Logger;
pub use manager::{ReleaseApplier, UninstallRegistrar, UpdateManager};
pub use progress::Progress;
pub use release::{ReleaseEntry, RemoteAndLocalReleases, UpdateInfo, UpdateIntention};
pub use version::ReleaseVersion;

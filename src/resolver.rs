/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::resolver
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Compute the minimal-cost ordered sequence of full and
    delta packages that moves an installation from its
    current release to a target release.

  Security / Safety Notes:
    Pure computation over catalog data; never touches disk
    or network.

  Dependencies:
    std::collections::BTreeMap for version-keyed indices.

  Operational Scope:
    Invoked by the update manager after the feed reader has
    produced remote and local catalogs.

  Revision History:
    2025-11-17 COD  Implemented delta-aware path resolution.
    2025-12-02 COD  Added pre-release gating and delta opt-out.
    2025-12-09 COD  Current release ignores trailing local deltas.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic output independent of catalog order
    - Gap-free chains between installed and target versions
    - Explicit error taxonomy for invalid requests
============================================================*/

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::Path;

use crate::error::{Result, SynupdError};
use crate::logger::Logger;
use crate::release::{RemoteAndLocalReleases, ReleaseEntry, UpdateInfo, UpdateIntention};
use crate::version::ReleaseVersion;

/// Packages published for a single version.
#[derive(Debug, Default)]
struct VersionSlot<'a> {
    full: Option<&'a ReleaseEntry>,
    delta: Option<&'a ReleaseEntry>,
}

/// Version-keyed view over a catalog, built once per resolution.
struct CatalogIndex<'a> {
    slots: BTreeMap<ReleaseVersion, VersionSlot<'a>>,
}

impl<'a> CatalogIndex<'a> {
    fn build(entries: &'a [ReleaseEntry]) -> Self {
        let mut slots: BTreeMap<ReleaseVersion, VersionSlot<'a>> = BTreeMap::new();
        for entry in entries {
            let slot = slots.entry(entry.version.clone()).or_default();
            // First entry per kind wins; later ones are mirrors of the same package.
            if entry.is_delta {
                slot.delta.get_or_insert(entry);
            } else {
                slot.full.get_or_insert(entry);
            }
        }
        Self { slots }
    }

    fn contains(&self, version: &ReleaseVersion) -> bool {
        self.slots.contains_key(version)
    }

    fn window<'s>(
        &'s self,
        lower: Bound<&ReleaseVersion>,
        upper: &ReleaseVersion,
    ) -> impl DoubleEndedIterator<Item = (&'s ReleaseVersion, &'s VersionSlot<'a>)> {
        self.slots
            .range::<ReleaseVersion, _>((lower, Bound::Included(upper)))
    }

    /// Highest full package inside the window.
    fn nearest_full(
        &self,
        lower: Bound<&ReleaseVersion>,
        upper: &ReleaseVersion,
    ) -> Option<&'a ReleaseEntry> {
        self.window(lower, upper)
            .rev()
            .find_map(|(_, slot)| slot.full)
    }

    /// Every version inside the window has a delta package.
    fn delta_chain_complete(
        &self,
        lower: Bound<&ReleaseVersion>,
        upper: &ReleaseVersion,
    ) -> bool {
        self.window(lower, upper).all(|(_, slot)| slot.delta.is_some())
    }

    /// `base` (optionally) followed by every delta in `(base, target]`.
    fn direct_path(
        &self,
        base: &'a ReleaseEntry,
        target: &ReleaseVersion,
        include_base: bool,
    ) -> Vec<&'a ReleaseEntry> {
        if base.version == *target {
            return vec![base];
        }

        let mut path = Vec::new();
        if include_base {
            path.push(base);
        }
        path.extend(
            self.window(Bound::Excluded(&base.version), target)
                .filter_map(|(_, slot)| slot.delta),
        );
        path
    }
}

fn total_size(path: &[&ReleaseEntry]) -> u64 {
    path.iter()
        .fold(0_u64, |acc, entry| acc.saturating_add(entry.file_size))
}

/// Compute the update path from `current` to `target` over `available`.
///
/// `current` is `None` when bootstrapping a fresh installation. The returned
/// plan lists packages strictly ascending by version with no duplicate
/// versions.
pub fn resolve<'a>(
    current: Option<&'a ReleaseEntry>,
    target: Option<&'a ReleaseEntry>,
    available: &'a [ReleaseEntry],
    package_directory: &Path,
    allow_downgrade: bool,
) -> Result<UpdateInfo> {
    let target = target.ok_or_else(|| SynupdError::InvalidTarget("no target release".into()))?;
    if available.is_empty() {
        return Err(SynupdError::InvalidTarget(
            "catalog of available releases is empty".into(),
        ));
    }

    let index = CatalogIndex::build(available);
    if !index.contains(&target.version) {
        return Err(SynupdError::InvalidTarget(format!(
            "version {} is not present in the catalog",
            target.version
        )));
    }

    if let Some(current) = current {
        if current.version == target.version {
            return Ok(UpdateInfo::new(
                Some(current.clone()),
                Vec::new(),
                package_directory,
            ));
        }
    }

    let target_version = &target.version;
    let is_downgrade = current.is_some_and(|current| target.version < current.version);
    let path: Vec<&ReleaseEntry> = match current {
        Some(current) if is_downgrade => {
            if !allow_downgrade {
                return Err(SynupdError::DowngradeNotAllowed {
                    from: current.version.to_string(),
                    to: target.version.to_string(),
                });
            }
            let nearest_full = index
                .nearest_full(Bound::Unbounded, target_version)
                .ok_or_else(|| SynupdError::NoFullPackageAvailable {
                    version: target.version.to_string(),
                })?;
            index.direct_path(nearest_full, target_version, true)
        }
        None => {
            let nearest_full = index
                .nearest_full(Bound::Unbounded, target_version)
                .ok_or_else(|| SynupdError::NoFullPackageAvailable {
                    version: target.version.to_string(),
                })?;
            index.direct_path(nearest_full, target_version, true)
        }
        Some(current) => upgrade_path(&index, current, target_version),
    };

    let mut releases: Vec<ReleaseEntry> = path.into_iter().cloned().collect();
    releases.sort_by(|a, b| a.version.cmp(&b.version));
    releases.dedup_by(|later, earlier| later.version == earlier.version);

    Ok(UpdateInfo::new(
        current.cloned(),
        releases,
        package_directory,
    ))
}

fn upgrade_path<'a>(
    index: &CatalogIndex<'a>,
    current: &'a ReleaseEntry,
    target: &ReleaseVersion,
) -> Vec<&'a ReleaseEntry> {
    let lower = Bound::Excluded(&current.version);
    let Some(nearest_full) = index.nearest_full(lower, target) else {
        return index.direct_path(current, target, false);
    };

    if !index.delta_chain_complete(lower, target) {
        return index.direct_path(nearest_full, target, false);
    }

    let delta_path = index.direct_path(current, target, false);
    let full_path = index.direct_path(nearest_full, target, true);
    if total_size(&delta_path) < total_size(&full_path) {
        delta_path
    } else {
        full_path
    }
}

/// Knobs applied when turning fetched catalogs into an update plan.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub intention: UpdateIntention,
    pub allow_downgrade: bool,
    pub ignore_delta_updates: bool,
    /// `None` considers every release, `Some("")` stable releases only, and
    /// `Some(tag)` stable releases plus pre-releases labelled `>= tag`.
    pub min_prerelease: Option<String>,
}

impl PlanOptions {
    pub fn new(intention: UpdateIntention) -> Self {
        Self {
            intention,
            allow_downgrade: false,
            ignore_delta_updates: false,
            min_prerelease: None,
        }
    }
}

/// The release a local catalog says is installed: the highest-versioned full
/// package. A newer delta without its full package does not hide it.
pub fn find_current_version(local: &[ReleaseEntry]) -> Option<&ReleaseEntry> {
    local
        .iter()
        .rev()
        .filter(|entry| !entry.is_delta)
        .max_by(|a, b| a.version.cmp(&b.version))
}

fn should_consider(entry: &ReleaseEntry, min_prerelease: &str) -> bool {
    match entry.version.prerelease() {
        None => true,
        Some(_) if min_prerelease.trim().is_empty() => false,
        Some(label) => label >= min_prerelease.trim().to_ascii_lowercase().as_str(),
    }
}

/// Plan an update towards `target` from fetched catalogs.
pub fn calculate_update_info(
    releases: &RemoteAndLocalReleases,
    target: Option<&ReleaseEntry>,
    options: &PlanOptions,
    package_directory: &Path,
    logger: &Logger,
) -> Result<UpdateInfo> {
    let target =
        target.ok_or_else(|| SynupdError::InvalidTarget("no target release selected".into()))?;

    let remote: Vec<ReleaseEntry> = releases
        .remote
        .iter()
        .filter(|entry| !(options.ignore_delta_updates && entry.is_delta))
        .cloned()
        .collect();
    if remote.is_empty() {
        return Err(SynupdError::InvalidTarget(
            "no valid remote release available".into(),
        ));
    }

    let remote_versions: BTreeSet<&ReleaseVersion> =
        remote.iter().map(|entry| &entry.version).collect();
    let current = releases
        .local
        .as_deref()
        .and_then(find_current_version)
        .filter(|current| remote_versions.contains(&current.version));

    match current {
        None => {
            if options.intention == UpdateIntention::Install {
                logger.info("PLAN", "First run, starting from scratch");
            } else {
                logger.warn("PLAN", "No local releases found, starting from scratch");
            }
        }
        Some(current) if current.version == target.version => {
            logger.info("PLAN", "No updates, remote and local are the same");
        }
        Some(current) => {
            logger.debug(
                "PLAN",
                format!("Resolving {} → {}", current.version, target.version),
            );
        }
    }

    let info = resolve(
        current,
        Some(target),
        &remote,
        package_directory,
        options.allow_downgrade,
    )?;
    logger.info(
        "PLAN",
        format!(
            "packages={} bytes={} bootstrap={}",
            info.releases_to_apply.len(),
            info.total_download_size(),
            info.is_bootstrapping()
        ),
    );
    Ok(info)
}

/// Plan an update towards the newest remote release admitted by the
/// pre-release policy.
pub fn latest_update_info(
    releases: &RemoteAndLocalReleases,
    options: &PlanOptions,
    package_directory: &Path,
    logger: &Logger,
) -> Result<UpdateInfo> {
    let considered: Vec<&ReleaseEntry> = match options.min_prerelease.as_deref() {
        None => releases.remote.iter().collect(),
        Some(min) => releases
            .remote
            .iter()
            .filter(|entry| should_consider(entry, min))
            .collect(),
    };

    let target = match considered.into_iter().max_by(|a, b| a.version.cmp(&b.version)) {
        Some(latest) => Some(latest),
        None => {
            logger.info(
                "PLAN",
                "No remote release admitted by pre-release policy; staying on current",
            );
            releases.local.as_deref().and_then(find_current_version)
        }
    };

    calculate_update_info(releases, target, options, package_directory, logger)
}

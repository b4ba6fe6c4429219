/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::staging
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Persist the per-installation identifier used to place a
    user into a staged rollout bucket.

  Security / Safety Notes:
    The identifier is random and carries no user data.

  Dependencies:
    uuid (v4) for identifier generation.

  Operational Scope:
    Read by the feed reader before filtering remote entries.

  Revision History:
    2025-12-02 COD  Added staged user identifier.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Failure degrades to "no staged releases"
============================================================*/

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::logger::Logger;

/// File name of the identifier inside the package directory.
pub const STAGING_ID_FILE: &str = ".betaId";

pub fn staging_id_path(package_directory: &Path) -> PathBuf {
    package_directory.join(STAGING_ID_FILE)
}

/// Read the stored identifier, creating one if absent or unreadable.
///
/// Returns `None` when a fresh identifier cannot be persisted.
pub fn get_or_create_staged_user_id(package_directory: &Path, logger: &Logger) -> Option<Uuid> {
    let path = staging_id_path(package_directory);
    if let Ok(raw) = std::fs::read_to_string(&path) {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => return Some(id),
            Err(err) => logger.warn(
                "STAGING",
                format!("Discarding invalid staging id at {}: {err}", path.display()),
            ),
        }
    }

    let id = Uuid::new_v4();
    let persisted = std::fs::create_dir_all(package_directory)
        .and_then(|_| std::fs::write(&path, id.to_string()));
    match persisted {
        Ok(()) => {
            logger.debug("STAGING", format!("Generated staging id {id}"));
            Some(id)
        }
        Err(err) => {
            logger.warn(
                "STAGING",
                format!("Couldn't write staging id to {}: {err}", path.display()),
            );
            None
        }
    }
}

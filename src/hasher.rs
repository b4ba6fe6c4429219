/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::hasher
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Compute content digests used to verify downloaded
    packages and to derive stable lock keys.

  Security / Safety Notes:
    SHA-1 matches the digest published in RELEASES catalogs;
    it is used for integrity against transport corruption,
    not as a signature.

  Dependencies:
    sha1 (RustCrypto Digest API, sibling of sha2).

  Operational Scope:
    Called by the fetch pipeline after each package lands on
    disk and by the catalog codec when synthesizing entries.

  Revision History:
    2025-11-17 COD  Introduced pluggable content hashing.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Streaming reads with bounded memory
    - Lower-case hex output for deterministic comparison
============================================================*/

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Result, SynupdError};

/// Produces a hex digest of package content.
pub trait ContentHasher: Send + Sync {
    fn hash_reader(&self, reader: &mut dyn Read) -> Result<String>;

    fn hash_bytes(&self, bytes: &[u8]) -> Result<String> {
        let mut cursor = bytes;
        self.hash_reader(&mut cursor)
    }

    fn hash_file(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|err| {
            SynupdError::Filesystem(format!("Failed to open {} for hashing: {err}", path.display()))
        })?;
        self.hash_reader(&mut file)
    }
}

/// SHA-1 hasher matching the RELEASES catalog format.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha1Hasher;

impl ContentHasher for Sha1Hasher {
    fn hash_reader(&self, reader: &mut dyn Read) -> Result<String> {
        let mut hasher = Sha1::new();
        let mut buffer = [0_u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

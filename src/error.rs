/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Upd-Core error types so update callers can
    tell input, integrity, network, and contention failures
    apart.

  Security / Safety Notes:
    Error contexts expose file names, versions, and URLs only;
    no request headers or staging identifiers are rendered.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for thin command-line callers.

  Revision History:
    2024-11-04 COD  Established shared error definitions.
    2025-11-17 COD  Added resolver, integrity and lock kinds.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Upd-Core operations.
pub type Result<T> = std::result::Result<T, SynupdError>;

/// Enumerates high-level error domains surfaced by Syn-Upd-Core.
#[derive(Debug, Error)]
pub enum SynupdError {
    #[error("Invalid update target: {0}")]
    InvalidTarget(String),
    #[error("Downgrade from {from} to {to} requested with downgrades disabled")]
    DowngradeNotAllowed { from: String, to: String },
    #[error("No full package exists at or before version {version}")]
    NoFullPackageAvailable { version: String },
    #[error("Update source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Remote catalog is corrupt: {0}")]
    CorruptCatalog(String),
    #[error("Package {path} should exist after download but does not")]
    MissingAfterDownload { path: String },
    #[error("Package {filename} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },
    #[error("Package {filename} hash {actual} does not match {expected}")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("Another update operation holds the lock for {root}")]
    UpdateInProgress { root: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SynupdError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Numeric form of [`SynupdError::exit_code`].
    pub fn code(&self) -> u8 {
        match self {
            SynupdError::InvalidTarget(_) => 12,
            SynupdError::DowngradeNotAllowed { .. } => 13,
            SynupdError::NoFullPackageAvailable { .. } => 14,
            SynupdError::Config(_) => 20,
            SynupdError::Network(_) => 30,
            SynupdError::Serialization(_) => 31,
            SynupdError::SourceUnavailable(_) => 32,
            SynupdError::CorruptCatalog(_) => 33,
            SynupdError::Filesystem(_) => 40,
            SynupdError::Io(_) => 41,
            SynupdError::MissingAfterDownload { .. } => 42,
            SynupdError::SizeMismatch { .. } => 43,
            SynupdError::HashMismatch { .. } => 44,
            SynupdError::Runtime(_) => 50,
            SynupdError::UpdateInProgress { .. } => 60,
            SynupdError::Cancelled => 61,
        }
    }

    /// True for failures worth another attempt against the same source.
    pub fn is_transient(&self) -> bool {
        matches!(self, SynupdError::Network(_))
    }

    /// True when a downloaded artifact failed verification.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SynupdError::MissingAfterDownload { .. }
                | SynupdError::SizeMismatch { .. }
                | SynupdError::HashMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let errors = [
            SynupdError::InvalidTarget("x".into()),
            SynupdError::DowngradeNotAllowed {
                from: "2.0.0".into(),
                to: "1.0.0".into(),
            },
            SynupdError::NoFullPackageAvailable {
                version: "1.0.0".into(),
            },
            SynupdError::SourceUnavailable("x".into()),
            SynupdError::CorruptCatalog("x".into()),
            SynupdError::MissingAfterDownload { path: "x".into() },
            SynupdError::SizeMismatch {
                filename: "x".into(),
                expected: 1,
                actual: 2,
            },
            SynupdError::HashMismatch {
                filename: "x".into(),
                expected: "a".into(),
                actual: "b".into(),
            },
            SynupdError::UpdateInProgress { root: "x".into() },
            SynupdError::Cancelled,
            SynupdError::Config("x".into()),
            SynupdError::Network("x".into()),
            SynupdError::Serialization("x".into()),
            SynupdError::Filesystem("x".into()),
            SynupdError::Runtime("x".into()),
            SynupdError::Io(io::Error::other("x")),
        ];

        let mut codes: Vec<u8> = errors.iter().map(SynupdError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(SynupdError::Network("reset".into()).is_transient());
        assert!(!SynupdError::CorruptCatalog("empty".into()).is_transient());
        assert!(SynupdError::HashMismatch {
            filename: "a".into(),
            expected: "b".into(),
            actual: "c".into(),
        }
        .is_integrity());
    }
}

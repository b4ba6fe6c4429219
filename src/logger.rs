/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::logger
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Per-session update log. Each check, download, and apply
    run appends stamped lines to one file, sealed afterwards
    with a SHA-256 sidecar.

  Security / Safety Notes:
    Staging identifiers and query strings are never passed to
    the logger by callers in this crate.

  Dependencies:
    chrono for stamps, sha2 for the session seal.

  Operational Scope:
    Shared across spawned download tasks through `Arc`.

  Revision History:
    2024-11-04 COD  Established logging module.
    2025-11-17 COD  Added silent logger for embedded callers.
    2025-12-09 COD  Session files under the configured log dir;
                    seal written next to the session file.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only logging with UTC timestamps
    - Deterministic formatting for auditability
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Result, SynupdError};

/// Extension appended to a session file for its digest.
pub const SEAL_EXTENSION: &str = "sha256";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn always_mirrored(self) -> bool {
        matches!(self, LogLevel::Warn | LogLevel::Error)
    }
}

#[derive(Debug)]
struct SessionFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

/// Update-session logger. Lines look like
/// `2025-12-09T10:00:00Z [WARN] [FEED] message`.
#[derive(Debug)]
pub struct Logger {
    session: Option<SessionFile>,
    verbose: bool,
}

impl Logger {
    /// Open `update_<stamp>.log` inside `log_dir`, creating the directory.
    pub fn for_session(log_dir: &Path, verbose: bool) -> Result<Self> {
        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f");
        Self::new(Some(log_dir.join(format!("update_{stamp}.log"))), verbose)
    }

    /// Append to `path` when given; otherwise only mirror to stderr.
    pub fn new(path: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let session = path.map(open_session).transpose()?;
        Ok(Self { session, verbose })
    }

    /// No file; warnings and errors still reach stderr.
    pub fn silent() -> Self {
        Self {
            session: None,
            verbose: false,
        }
    }

    pub fn log<S: AsRef<str>>(&self, level: LogLevel, code: &str, message: S) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format!("{stamp} [{}] [{code}] {}", level.as_str(), message.as_ref());

        if self.verbose || level.always_mirrored() {
            eprintln!("{line}");
        }
        let Some(session) = &self.session else {
            return;
        };
        let Ok(mut writer) = session.writer.lock() else {
            return;
        };
        if let Err(err) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            eprintln!("{stamp} [ERROR] [LOGGER] Failed to append to session log: {err}");
        }
    }

    pub fn info<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Info, code, message);
    }

    pub fn warn<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Warn, code, message);
    }

    pub fn error<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Error, code, message);
    }

    pub fn debug<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Debug, code, message);
    }

    /// Session file, if this logger has one.
    pub fn path(&self) -> Option<&Path> {
        self.session.as_ref().map(|session| session.path.as_path())
    }

    /// Write `<session>.sha256` in `sha256sum` format. Safe to call after
    /// every operation; the seal always covers the whole file so far.
    pub fn finalize(&self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        if let Ok(mut writer) = session.writer.lock() {
            let _ = writer.flush();
        }

        let data = std::fs::read(&session.path).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to read session log {}: {err}",
                session.path.display()
            ))
        })?;
        let seal = seal_path(&session.path);
        let name = session
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        std::fs::write(&seal, format!("{:x}  {name}\n", Sha256::digest(&data))).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to write session seal {}: {err}",
                seal.display()
            ))
        })
    }
}

/// `<session>.sha256` beside the session file.
pub fn seal_path(session: &Path) -> PathBuf {
    let mut raw = session.as_os_str().to_os_string();
    raw.push(".");
    raw.push(SEAL_EXTENSION);
    PathBuf::from(raw)
}

fn open_session(path: PathBuf) -> Result<SessionFile> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to create log directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| {
            SynupdError::Filesystem(format!("Failed to open log file {}: {err}", path.display()))
        })?;
    Ok(SessionFile {
        path,
        writer: Mutex::new(BufWriter::new(file)),
    })
}

/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::version
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Model release versions of the form
    major.minor.patch[.revision][-prerelease] with a total
    ordering suitable for path resolution.

  Security / Safety Notes:
    Pure value type; no I/O performed in this module.

  Dependencies:
    semver for pre-release label precedence.

  Operational Scope:
    Keys every catalog index built by the resolver and is
    parsed out of package file names by the catalog codec.

  Revision History:
    2025-11-17 COD  Introduced four-part release versions.
    2025-12-09 COD  Pre-release labels compare case-insensitively.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic ordering independent of input order
    - Structured parsing with clear failure modes
============================================================*/

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Prerelease;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SynupdError};

/// A published application version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub revision: u64,
    pub pre: Prerelease,
}

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            pre: Prerelease::EMPTY,
        }
    }

    /// Parse `1.2.3`, `1.2.3.4`, `1.2`, or any of those with a `-label` suffix.
    /// Labels compare case-insensitively, so they are stored lowercased.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let (numbers, label) = match raw.split_once('-') {
            Some((numbers, label)) => (numbers, Some(label)),
            None => (raw, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(SynupdError::Serialization(format!(
                "Version `{raw}` must have two to four numeric components"
            )));
        }

        let mut components = [0_u64; 4];
        for (slot, part) in components.iter_mut().zip(parts.iter()) {
            *slot = part.parse::<u64>().map_err(|err| {
                SynupdError::Serialization(format!(
                    "Version `{raw}` has invalid component `{part}`: {err}"
                ))
            })?;
        }

        let pre = match label {
            Some("") => {
                return Err(SynupdError::Serialization(format!(
                    "Version `{raw}` has an empty pre-release label"
                )))
            }
            Some(label) => Prerelease::new(&label.to_ascii_lowercase()).map_err(|err| {
                SynupdError::Serialization(format!(
                    "Version `{raw}` has invalid pre-release label: {err}"
                ))
            })?,
            None => Prerelease::EMPTY,
        };

        Ok(Self {
            major: components[0],
            minor: components[1],
            patch: components[2],
            revision: components[3],
            pre,
        })
    }

    /// The pre-release label, or `None` for a stable release.
    pub fn prerelease(&self) -> Option<&str> {
        if self.pre.is_empty() {
            None
        } else {
            Some(self.pre.as_str())
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| self.revision.cmp(&other.revision))
            .then_with(|| self.pre.cmp(&other.pre))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

impl FromStr for ReleaseVersion {
    type Err = SynupdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReleaseVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: &str) -> ReleaseVersion {
        ReleaseVersion::parse(raw).expect("version must parse")
    }

    #[test]
    fn parses_three_and_four_part_versions() {
        let three = v("1.2.3");
        assert_eq!((three.major, three.minor, three.patch, three.revision), (1, 2, 3, 0));

        let four = v("1.2.3.4-beta.2");
        assert_eq!(four.revision, 4);
        assert_eq!(four.prerelease(), Some("beta.2"));
        assert_eq!(four.to_string(), "1.2.3.4-beta.2");
    }

    #[test]
    fn two_part_versions_default_patch() {
        assert_eq!(v("2.5"), ReleaseVersion::new(2, 5, 0));
    }

    #[test]
    fn revision_orders_before_prerelease() {
        assert!(v("1.0.0.1") > v("1.0.0"));
        assert!(v("1.0.0.1-alpha") > v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("2.0.5-alpha.12") < v("2.0.5-alpha.14"));
        assert!(v("2.0.5-alpha.14") < v("2.0.5"));
    }

    #[test]
    fn prerelease_labels_ignore_case() {
        assert_eq!(v("1.0.0-Beta"), v("1.0.0-beta"));
        assert_eq!(v("1.0.0-BETA.2").cmp(&v("1.0.0-beta.2")), Ordering::Equal);
        assert!(v("1.0.0-Alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-RC.1") < v("1.0.0"));
        assert_eq!(v("1.0.0-Beta").prerelease(), Some("beta"));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(ReleaseVersion::parse("1").is_err());
        assert!(ReleaseVersion::parse("1.x.0").is_err());
        assert!(ReleaseVersion::parse("1.2.3.4.5").is_err());
        assert!(ReleaseVersion::parse("1.0.0-").is_err());
    }

    #[test]
    fn serializes_as_display_string() {
        let json = serde_json::to_string(&v("3.1.0-rc.1")).expect("serialize");
        assert_eq!(json, "\"3.1.0-rc.1\"");
        let back: ReleaseVersion = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, v("3.1.0-rc.1"));
    }
}

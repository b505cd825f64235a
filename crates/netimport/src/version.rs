//! Release version parsing and requirement matching
//!
//! Package index releases are keyed by version strings; requirement lines
//! pin or bound them with `==`, `>=` or `<=`.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during version parsing
#[derive(Debug, Error)]
pub enum VersionError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid constraint format: {0}")]
    InvalidConstraint(String),
}

/// Release version (MAJOR.MINOR.PATCH with an optional pre-release tag)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

/// Version requirement
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Exact version (==1.2.3)
    Exact(Version),

    /// Greater than or equal (>=1.2.3)
    GreaterThanOrEqual(Version),

    /// Less than or equal (<=1.2.3)
    LessThanOrEqual(Version),

    /// Any version (the index's latest)
    Any,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);

        // Drop build metadata
        let s = s.split('+').next().unwrap_or(s);

        let (core, prerelease) = match s.find('-') {
            Some(pos) => (&s[..pos], Some(s[pos + 1..].to_string())),
            None => (s, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{}'",
                s
            )));
        }

        let number = |part: &str, what: &str| {
            part.parse::<u64>()
                .map_err(|_| VersionError::InvalidVersion(format!("Invalid {} version: {}", what, part)))
        };

        Ok(Version {
            major: number(parts[0], "major")?,
            minor: number(parts[1], "minor")?,
            patch: number(parts[2], "patch")?,
            prerelease,
        })
    }

    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            // Versions with a pre-release tag sort before the release
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl Constraint {
    /// Build a constraint from an operator and a version string
    pub fn from_operator(op: &str, version: &str) -> Result<Self, VersionError> {
        let version = Version::parse(version)?;
        match op {
            "==" => Ok(Constraint::Exact(version)),
            ">=" => Ok(Constraint::GreaterThanOrEqual(version)),
            "<=" => Ok(Constraint::LessThanOrEqual(version)),
            _ => Err(VersionError::InvalidConstraint(format!("{}{}", op, version))),
        }
    }

    /// Parse a constraint string (`==1.2.3`, `>=1.2.3`, `<=1.2.3`, `*`)
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(Constraint::Any);
        }

        for op in ["==", ">=", "<="] {
            if let Some(rest) = s.strip_prefix(op) {
                return Self::from_operator(op, rest.trim());
            }
        }

        Err(VersionError::InvalidConstraint(s.to_string()))
    }

    /// Check if a version satisfies this constraint
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Exact(v) => version == v,
            Constraint::GreaterThanOrEqual(v) => version >= v,
            Constraint::LessThanOrEqual(v) => version <= v,
        }
    }

    /// The pinned version, for `==` constraints
    pub fn pinned(&self) -> Option<&Version> {
        match self {
            Constraint::Exact(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => write!(f, "*"),
            Constraint::Exact(v) => write!(f, "=={}", v),
            Constraint::GreaterThanOrEqual(v) => write!(f, ">={}", v),
            Constraint::LessThanOrEqual(v) => write!(f, "<={}", v),
        }
    }
}

//! Patch identifiers.
//!
//! A patch file is named after the driver it targets and the half-open
//! version range it claims to cover:
//!
//! ```text
//! <kind>--<driver>[:<driver-version>]--<start>--<end>
//! vanilla--e1000e--20620--20621
//! external--ixgbe:3.11.33--30800--99999
//! ```
//!
//! Versions are written in canonical form, so `decompose(compose(x)) == x`.
//! Range rewriting (minimization, infinity extension) recomposes the name
//! with new bounds and never touches patch content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatchIdError;
use crate::version::VersionId;

/// Separator between identifier fields.
pub const FIELD_SEPARATOR: &str = "--";

/// Where a driver comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Shipped in-tree with the kernel.
    Vanilla,
    /// Out-of-tree vendor driver.
    External,
    /// Locally maintained driver.
    Custom,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::External => "external",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = PatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vanilla" => Ok(Self::Vanilla),
            "external" => Ok(Self::External),
            "custom" => Ok(Self::Custom),
            other => Err(PatchIdError::UnknownKind(other.to_string())),
        }
    }
}

/// Identifies a patch target independently of kernel version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverKey {
    pub kind: DriverKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DriverKey {
    /// Create a key, validating that the fields survive a round trip.
    pub fn new(kind: DriverKind, name: &str, version: Option<&str>) -> Result<Self, PatchIdError> {
        if !is_field_safe(name) || name.contains(':') {
            return Err(PatchIdError::InvalidName(name.to_string()));
        }
        if let Some(v) = version {
            if !is_field_safe(v) {
                return Err(PatchIdError::InvalidName(format!("{}:{}", name, v)));
            }
        }
        Ok(Self {
            kind,
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    /// In-tree driver shorthand.
    pub fn vanilla(name: &str) -> Result<Self, PatchIdError> {
        Self::new(DriverKind::Vanilla, name, None)
    }

    /// The `driver[:version]` field of a patch identifier.
    pub fn field(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for DriverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, FIELD_SEPARATOR, self.field())
    }
}

/// A `-` at either edge would merge with a neighbouring separator.
fn is_field_safe(field: &str) -> bool {
    !field.is_empty()
        && !field.contains(FIELD_SEPARATOR)
        && !field.contains('/')
        && !field.starts_with('-')
        && !field.ends_with('-')
}

/// A driver plus the half-open version range `[start, end)` a patch covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchRange {
    pub driver: DriverKey,
    pub start: VersionId,
    pub end: VersionId,
}

impl PatchRange {
    /// Create a range; requires `start < end`, a finite start and bounds
    /// that survive the canonical encoding.
    pub fn new(driver: DriverKey, start: VersionId, end: VersionId) -> Result<Self, PatchIdError> {
        start.ensure_encodable()?;
        end.ensure_encodable()?;
        if start >= end || start.is_infinity() {
            return Err(PatchIdError::EmptyRange {
                start: start.canonical(),
                end: end.canonical(),
            });
        }
        Ok(Self { driver, start, end })
    }

    /// The one-version-wide range starting at `version`.
    pub fn single(driver: DriverKey, version: VersionId) -> Result<Self, PatchIdError> {
        Self::new(driver, version, version.next())
    }

    /// Same driver and start, new end.
    pub fn with_end(&self, end: VersionId) -> Result<Self, PatchIdError> {
        Self::new(self.driver.clone(), self.start, end)
    }

    /// Returns true if `version` lies inside the range.
    pub fn contains(&self, version: VersionId) -> bool {
        self.start <= version && version < self.end
    }

    /// Returns true if the range is exactly one version wide.
    pub fn is_single(&self) -> bool {
        self.start.next() == self.end
    }

    /// Encode into a patch identifier.
    pub fn compose(&self) -> String {
        [
            self.driver.kind.as_str().to_string(),
            self.driver.field(),
            self.start.canonical(),
            self.end.canonical(),
        ]
        .join(FIELD_SEPARATOR)
    }

    /// Decode a patch identifier.
    pub fn decompose(id: &str) -> Result<Self, PatchIdError> {
        let fields: Vec<&str> = id.split(FIELD_SEPARATOR).collect();
        let [kind, driver, start, end] = fields.as_slice() else {
            return Err(PatchIdError::Malformed(id.to_string()));
        };

        let kind: DriverKind = kind.parse()?;
        let (name, version) = match driver.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (*driver, None),
        };
        let driver = DriverKey::new(kind, name, version)?;
        Self::new(driver, VersionId::parse(start)?, VersionId::parse(end)?)
    }
}

impl fmt::Display for PatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compose())
    }
}

impl FromStr for PatchRange {
    type Err = PatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decompose(s)
    }
}

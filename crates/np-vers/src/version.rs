//! Kernel version identifiers.
//!
//! A [`VersionId`] is either a kernel release or the infinity sentinel,
//! which sorts after every release. The canonical form is the kernel's
//! `KERNEL_VERSION` code in hex (`2.6.32` -> `20620`), which keeps patch
//! file names fixed-width and sortable.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::VersError;

/// Canonical spelling of the infinity sentinel.
pub const INFINITY_CANONICAL: &str = "99999";

/// Last minor release of each major series from 3 on. Stepping past it
/// rolls over to the next major.
const SERIES_ENDS: &[(u32, u32)] = &[(3, 19), (4, 20), (5, 19)];

/// Last release of the 2.6 series.
const LAST_2_6_PATCH: u32 = 39;

/// Largest component that fits the two-hex-digit canonical fields.
pub const MAX_COMPONENT: u32 = 0xff;

/// An ordered kernel version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionId {
    /// A concrete kernel release.
    Release { major: u32, minor: u32, patch: u32 },
    /// No known upper bound.
    Infinity,
}

impl VersionId {
    /// Create a release version without checking it against the
    /// canonical encoding; see [`release`](Self::release).
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self::Release { major, minor, patch }
    }

    /// Create a release version whose canonical form decodes back to it.
    pub fn release(major: u32, minor: u32, patch: u32) -> Result<Self, VersError> {
        let version = Self::new(major, minor, patch);
        version.ensure_encodable()?;
        Ok(version)
    }

    /// Fails unless `parse(canonical())` yields `self` again.
    ///
    /// Components above [`MAX_COMPONENT`] spill into the neighbouring hex
    /// field, and `9.153.153` spells the infinity sentinel.
    pub fn ensure_encodable(&self) -> Result<(), VersError> {
        match *self {
            Self::Infinity => Ok(()),
            Self::Release { major, minor, patch }
                if major > MAX_COMPONENT
                    || minor > MAX_COMPONENT
                    || patch > MAX_COMPONENT
                    || self.canonical() == INFINITY_CANONICAL =>
            {
                Err(VersError::OutOfRange(format!("{}.{}.{}", major, minor, patch)))
            }
            Self::Release { .. } => Ok(()),
        }
    }

    /// Returns true for the infinity sentinel.
    pub fn is_infinity(&self) -> bool {
        matches!(self, Self::Infinity)
    }

    /// Decompose into `(major, minor, patch)`; `None` for infinity.
    pub fn components(&self) -> Option<(u32, u32, u32)> {
        match *self {
            Self::Release { major, minor, patch } => Some((major, minor, patch)),
            Self::Infinity => None,
        }
    }

    /// The next version in the kernel numbering scheme.
    ///
    /// Within 2.6 the third component steps; from 3.0 on the minor steps.
    /// Series ends roll the major (`2.6.39 -> 3.0`, `3.19 -> 4.0`, ...).
    pub fn next(&self) -> VersionId {
        match *self {
            Self::Infinity => Self::Infinity,
            Self::Release { major: 2, minor: 6, patch } if patch >= LAST_2_6_PATCH => {
                Self::new(3, 0, 0)
            }
            Self::Release { major, minor, patch } if major < 3 => Self::new(major, minor, patch + 1),
            Self::Release { major, minor, .. } => {
                let ends_series = SERIES_ENDS
                    .iter()
                    .any(|&(m, last)| m == major && minor >= last);
                if ends_series {
                    Self::new(major + 1, 0, 0)
                } else {
                    Self::new(major, minor + 1, 0)
                }
            }
        }
    }

    /// Fixed-width canonical form used in patch identifiers.
    pub fn canonical(&self) -> String {
        match *self {
            Self::Infinity => INFINITY_CANONICAL.to_string(),
            Self::Release { major, minor, patch } => {
                format!("{:x}{:02x}{:02x}", major, minor, patch)
            }
        }
    }

    /// Parse a free-form version string.
    ///
    /// Accepts dotted releases with optional decoration (`v3.8`,
    /// `linux-2.6.32`, `3.8-rc1`), canonical hex codes (`20620`) and the
    /// infinity spellings (`99999`, `inf`, `infinity`).
    pub fn parse(input: &str) -> Result<Self, VersError> {
        let s = input.trim();
        if s == INFINITY_CANONICAL
            || s.eq_ignore_ascii_case("inf")
            || s.eq_ignore_ascii_case("infinity")
        {
            return Ok(Self::Infinity);
        }

        if !s.contains('.') && (s.len() == 5 || s.len() == 6) && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::from_canonical(s, input);
        }

        let caps = dotted_re()
            .captures(s)
            .ok_or_else(|| VersError::Unparseable(input.to_string()))?;
        let component = |idx: usize| -> Result<u32, VersError> {
            match caps.get(idx) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| VersError::OutOfRange(input.to_string())),
                None => Ok(0),
            }
        };
        Self::release(component(1)?, component(2)?, component(3)?)
            .map_err(|_| VersError::OutOfRange(input.to_string()))
    }

    fn from_canonical(s: &str, input: &str) -> Result<Self, VersError> {
        let split = s.len() - 4;
        let field = |range: std::ops::Range<usize>| {
            u32::from_str_radix(&s[range], 16).map_err(|_| VersError::Unparseable(input.to_string()))
        };
        Ok(Self::new(field(0..split)?, field(split..split + 2)?, field(split + 2..s.len())?))
    }

    /// Iterate from `self` (inclusive) to `end` (exclusive) using [`next`](Self::next).
    pub fn iter_to(self, end: VersionId) -> VersionIter {
        VersionIter { current: self, end }
    }
}

fn dotted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("static version regex"))
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Infinity => write!(f, "inf"),
            Self::Release { major, minor, patch } if major >= 3 && patch == 0 => {
                write!(f, "{}.{}", major, minor)
            }
            Self::Release { major, minor, patch } => write!(f, "{}.{}.{}", major, minor, patch),
        }
    }
}

impl FromStr for VersionId {
    type Err = VersError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = VersError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionId> for String {
    fn from(v: VersionId) -> Self {
        v.canonical()
    }
}

/// Iterator over the versions of a half-open range.
///
/// Unbounded when the end is infinity; callers stop on their own condition.
#[derive(Debug, Clone)]
pub struct VersionIter {
    current: VersionId,
    end: VersionId,
}

impl Iterator for VersionIter {
    type Item = VersionId;

    fn next(&mut self) -> Option<VersionId> {
        if self.current >= self.end || self.current.is_infinity() {
            return None;
        }
        let v = self.current;
        self.current = v.next();
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(VersionId::new(2, 6, 32) < VersionId::new(2, 6, 33));
        assert!(VersionId::new(2, 6, 39) < VersionId::new(3, 0, 0));
        assert!(VersionId::new(3, 19, 0) < VersionId::new(4, 0, 0));
        assert!(VersionId::new(6, 1, 0) < VersionId::Infinity);
    }

    #[test]
    fn test_next_within_2_6() {
        assert_eq!(VersionId::new(2, 6, 32).next(), VersionId::new(2, 6, 33));
        assert_eq!(VersionId::new(2, 6, 39).next(), VersionId::new(3, 0, 0));
    }

    #[test]
    fn test_next_series_ends() {
        assert_eq!(VersionId::new(3, 8, 0).next(), VersionId::new(3, 9, 0));
        assert_eq!(VersionId::new(3, 8, 5).next(), VersionId::new(3, 9, 0));
        assert_eq!(VersionId::new(3, 19, 0).next(), VersionId::new(4, 0, 0));
        assert_eq!(VersionId::new(4, 20, 0).next(), VersionId::new(5, 0, 0));
        assert_eq!(VersionId::new(5, 19, 0).next(), VersionId::new(6, 0, 0));
        assert_eq!(VersionId::Infinity.next(), VersionId::Infinity);
    }

    #[test]
    fn test_canonical() {
        assert_eq!(VersionId::new(2, 6, 32).canonical(), "20620");
        assert_eq!(VersionId::new(3, 8, 0).canonical(), "30800");
        assert_eq!(VersionId::new(4, 20, 0).canonical(), "41400");
        assert_eq!(VersionId::Infinity.canonical(), "99999");
    }

    #[test]
    fn test_parse_dotted() {
        assert_eq!(VersionId::parse("2.6.32").unwrap(), VersionId::new(2, 6, 32));
        assert_eq!(VersionId::parse("v3.8").unwrap(), VersionId::new(3, 8, 0));
        assert_eq!(VersionId::parse("linux-4.1.0").unwrap(), VersionId::new(4, 1, 0));
        assert_eq!(VersionId::parse("3.8-rc1").unwrap(), VersionId::new(3, 8, 0));
    }

    #[test]
    fn test_parse_canonical() {
        assert_eq!(VersionId::parse("20620").unwrap(), VersionId::new(2, 6, 32));
        assert_eq!(VersionId::parse("41400").unwrap(), VersionId::new(4, 20, 0));
        assert_eq!(VersionId::parse("99999").unwrap(), VersionId::Infinity);
        assert_eq!(VersionId::parse("inf").unwrap(), VersionId::Infinity);
    }

    #[test]
    fn test_components_must_fit_canonical_fields() {
        assert!(VersionId::release(4, 9, 255).is_ok());
        assert!(matches!(VersionId::release(4, 9, 300), Err(VersError::OutOfRange(_))));
        assert!(VersionId::release(4, 256, 0).is_err());
        assert!(VersionId::release(256, 0, 0).is_err());
        // would be written as the infinity sentinel
        assert!(VersionId::release(9, 153, 153).is_err());

        assert!(matches!(VersionId::parse("4.9.300"), Err(VersError::OutOfRange(_))));
        let edge = VersionId::parse("4.9.255").unwrap();
        assert_eq!(VersionId::parse(&edge.canonical()).unwrap(), edge);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(VersionId::parse("netmap"), Err(VersError::Unparseable(_))));
        assert!(VersionId::parse("").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionId::new(2, 6, 32).to_string(), "2.6.32");
        assert_eq!(VersionId::new(3, 8, 0).to_string(), "3.8");
        assert_eq!(VersionId::new(3, 8, 5).to_string(), "3.8.5");
    }

    #[test]
    fn test_iter_to() {
        let versions: Vec<_> = VersionId::new(2, 6, 38)
            .iter_to(VersionId::new(3, 2, 0))
            .collect();
        assert_eq!(
            versions,
            vec![
                VersionId::new(2, 6, 38),
                VersionId::new(2, 6, 39),
                VersionId::new(3, 0, 0),
                VersionId::new(3, 1, 0),
            ]
        );
    }

    #[test]
    fn test_serde_uses_canonical_form() {
        let json = serde_json::to_string(&VersionId::new(2, 6, 32)).unwrap();
        assert_eq!(json, "\"20620\"");
        let parsed: VersionId = serde_json::from_str("\"99999\"").unwrap();
        assert_eq!(parsed, VersionId::Infinity);
    }
}

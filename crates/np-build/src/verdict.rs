//! Outcome of one apply-and-compile attempt.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Verdict for one kernel version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVerdict {
    /// The patch applied and the driver compiled.
    pub ok: bool,
    /// The compiler emitted warnings.
    pub warned: bool,
    /// Combined build output.
    #[serde(default)]
    pub log: String,
}

impl BuildVerdict {
    /// A successful build; `warned` is derived from the log.
    pub fn success(log: impl Into<String>) -> Self {
        let log = log.into();
        Self {
            ok: true,
            warned: has_compiler_warnings(&log),
            log,
        }
    }

    /// A failed build.
    pub fn failure(log: impl Into<String>) -> Self {
        Self {
            ok: false,
            warned: false,
            log: log.into(),
        }
    }

    /// Short status word for reports.
    pub fn status_str(&self) -> &'static str {
        match (self.ok, self.warned) {
            (false, _) => "failed",
            (true, true) => "warning",
            (true, false) => "ok",
        }
    }
}

fn warning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // file.c:123:45: warning: message  (column optional)
    RE.get_or_init(|| {
        Regex::new(r"^\S+:\d+:(?:\d+:)?\s*warning:").expect("static warning regex")
    })
}

/// Returns true if the build log contains gcc/clang style warnings.
pub fn has_compiler_warnings(log: &str) -> bool {
    log.lines().any(|line| warning_re().is_match(line.trim_start()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_warning_lines() {
        let log = "  CC [M]  e1000e/netdev.o\n\
                   e1000e/netdev.c:812:9: warning: unused variable 'na' [-Wunused-variable]\n";
        assert!(has_compiler_warnings(log));
    }

    #[test]
    fn test_ignores_plain_mentions() {
        let log = "make: warning: jobserver unavailable\nCC netdev.o\n";
        assert!(!has_compiler_warnings(log));
    }

    #[test]
    fn test_success_derives_warned() {
        assert!(!BuildVerdict::success("CC netdev.o").warned);
        assert!(BuildVerdict::success("x.c:1: warning: y").warned);
        assert_eq!(BuildVerdict::failure("boom").status_str(), "failed");
    }
}

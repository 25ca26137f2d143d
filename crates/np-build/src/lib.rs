//! Build verification backend for netmap patch management.
//!
//! Two pieces live here:
//! - [`runner`]: compiles one patch against one kernel tree, in a scoped
//!   temporary directory, with every driver but the target disabled
//! - [`cache`]: memoizes verdicts by kernel version, driver, patch content
//!   hash and source commit
//!
//! The cache is a pure memoization layer. An entry is only reused when the
//! stored patch hash and source commit match the request exactly.

pub mod cache;
pub mod error;
pub mod runner;
pub mod verdict;

pub use cache::{CacheEntry, CacheKey, CacheStats, DirVerdictCache, MemoryVerdictCache, VerdictCache};
pub use error::{BuildError, BuildResult, CacheError, CacheResult};
pub use runner::{BuildRequest, BuildRunner, CommandTemplate, MakeRunner, MakeRunnerConfig, SourceExport};
pub use verdict::BuildVerdict;

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of patch content.
pub fn content_sha256(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

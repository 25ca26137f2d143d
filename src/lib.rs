//! Netmap patch management
//!
//! Maintains minimal, verified sets of netmap driver patches across Linux
//! kernel releases. Per-version patches are extracted from a reference
//! repository, merged into the fewest ranges that reproduce them exactly,
//! opened up to future releases where possible, and build-verified against
//! every kernel version they cover.
//!
//! Version algebra and patch identifiers live in `np-vers`; the build
//! runner and verdict cache live in `np-build`.

pub mod config;
pub mod diffutil;
pub mod extend;
pub mod extract;
pub mod infinity;
pub mod locate;
pub mod minimize;
pub mod mock;
pub mod patch;
pub mod pipeline;
pub mod provision;
pub mod store;
pub mod telemetry;
pub mod vcs;
pub mod verify;

pub use config::{EffectiveConfig, Settings};
pub use np_build::{BuildVerdict, CacheStats, VerdictCache};
pub use np_vers::{DriverKey, DriverKind, PatchRange, VersionId};
pub use patch::Patch;
pub use pipeline::{Collaborators, DriverFilter, DriverSummary, Pipeline, PipelineError, PipelineResult};
pub use store::{Collection, PatchStore};
pub use verify::{VerifyOutcome, VerifyReport};

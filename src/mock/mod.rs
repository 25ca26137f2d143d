//! In-memory collaborators for tests and dry runs.
//!
//! - [`MockVcs`]: refs, diffs and exportable trees registered up front
//! - [`MockProvisioner`]: kernel trees mapped to versions
//! - [`MockBuildRunner`]: scripted verdicts with an invocation counter
//!
//! Each mock is cheap to clone; clones share state, so a test can keep a
//! handle while the pipeline owns another.

mod build;
mod provision;
mod vcs;

pub use build::{BuildScript, MockBuildRunner};
pub use provision::MockProvisioner;
pub use vcs::MockVcs;

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

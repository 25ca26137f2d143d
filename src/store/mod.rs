//! Patch collections.
//!
//! Patches live in three named collections:
//! - `pending`: extracted single-version patches awaiting minimization
//! - `rejected`: patches whose verification failed
//! - `final`: minimized patches ready to ship
//!
//! [`DirStore`] keeps each collection as a directory of patch files named
//! by their identifier; [`MemoryStore`] is the in-process equivalent.

mod dir;
mod memory;

pub use dir::{DirStore, PatchMeta};
pub use memory::MemoryStore;

use std::fmt;

use np_vers::{DriverKey, PatchIdError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::Patch;

/// Source commit recorded for patch files without metadata.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Errors from patch storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid patch metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid patch id: {0}")]
    InvalidId(#[from] PatchIdError),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A named patch collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Pending,
    Rejected,
    Final,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Pending, Collection::Rejected, Collection::Final];

    /// Directory name of the collection.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::Final => "final",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Storage for patch collections.
pub trait PatchStore {
    /// Patches in `collection`, optionally for one driver, sorted by range start.
    fn list(&self, collection: Collection, driver: Option<&DriverKey>) -> StoreResult<Vec<Patch>>;

    /// Look up a patch by identifier.
    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Patch>>;

    /// Store a patch under its identifier, replacing any previous one.
    fn put(&self, collection: Collection, patch: &Patch) -> StoreResult<()>;

    /// Remove a patch. Returns false if it was absent.
    fn remove(&self, collection: Collection, id: &str) -> StoreResult<bool>;

    /// Move a patch between collections. Returns false if it was absent.
    fn move_to(&self, from: Collection, to: Collection, id: &str) -> StoreResult<bool> {
        match self.get(from, id)? {
            Some(patch) => {
                self.put(to, &patch)?;
                self.remove(from, id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every patch of `collection`, optionally for one driver.
    fn clear(&self, collection: Collection, driver: Option<&DriverKey>) -> StoreResult<usize> {
        let patches = self.list(collection, driver)?;
        for patch in &patches {
            self.remove(collection, &patch.id())?;
        }
        Ok(patches.len())
    }
}

pub(crate) fn sort_patches(patches: &mut [Patch]) {
    patches.sort_by(|a, b| {
        (a.range.start, a.range.end, a.id()).cmp(&(b.range.start, b.range.end, b.id()))
    });
}

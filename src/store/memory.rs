use std::collections::BTreeMap;
use std::sync::Mutex;

use np_vers::DriverKey;

use super::{sort_patches, Collection, PatchStore, StoreError, StoreResult};
use crate::patch::Patch;

/// In-memory collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    patches: Mutex<BTreeMap<(Collection, String), Patch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of patches in `collection`.
    pub fn count(&self, collection: Collection) -> usize {
        self.patches
            .lock()
            .map(|p| p.keys().filter(|(c, _)| *c == collection).count())
            .unwrap_or(0)
    }
}

impl PatchStore for MemoryStore {
    fn list(&self, collection: Collection, driver: Option<&DriverKey>) -> StoreResult<Vec<Patch>> {
        let patches = self.patches.lock().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<Patch> = patches
            .iter()
            .filter(|((c, _), p)| *c == collection && driver.map_or(true, |d| *d == p.range.driver))
            .map(|(_, p)| p.clone())
            .collect();
        sort_patches(&mut out);
        Ok(out)
    }

    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Patch>> {
        let patches = self.patches.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(patches.get(&(collection, id.to_string())).cloned())
    }

    fn put(&self, collection: Collection, patch: &Patch) -> StoreResult<()> {
        let mut patches = self.patches.lock().map_err(|_| StoreError::Poisoned)?;
        patches.insert((collection, patch.id()), patch.clone());
        Ok(())
    }

    fn remove(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let mut patches = self.patches.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(patches.remove(&(collection, id.to_string())).is_some())
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use np_vers::{DriverKey, PatchRange};
use serde::{Deserialize, Serialize};

use super::{sort_patches, Collection, PatchStore, StoreResult, UNKNOWN_COMMIT};
use crate::patch::Patch;

const META_DIR: &str = ".meta";

/// Sidecar metadata stored next to a patch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMeta {
    pub source_commit: String,
    pub sha256: String,
    pub recorded_at: DateTime<Utc>,
}

/// Collections as directories under a work directory.
///
/// Layout: `<root>/<collection>/<patch-id>` with metadata in
/// `<root>/<collection>/.meta/<patch-id>.json`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.dir_name())
    }

    fn patch_path(&self, collection: Collection, id: &str) -> PathBuf {
        self.collection_dir(collection).join(id)
    }

    fn meta_path(&self, collection: Collection, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(META_DIR)
            .join(format!("{}.json", id))
    }

    fn read_patch(&self, collection: Collection, id: &str, range: PatchRange) -> StoreResult<Option<Patch>> {
        let content = match fs::read(self.patch_path(collection, id)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let source_commit = match fs::read_to_string(self.meta_path(collection, id)) {
            Ok(json) => serde_json::from_str::<PatchMeta>(&json)?.source_commit,
            Err(e) if e.kind() == io::ErrorKind::NotFound => UNKNOWN_COMMIT.to_string(),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Patch::new(range, content, source_commit)))
    }
}

/// Write via a temp file and rename.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

impl PatchStore for DirStore {
    fn list(&self, collection: Collection, driver: Option<&DriverKey>) -> StoreResult<Vec<Patch>> {
        let dir = self.collection_dir(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut patches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let range = match PatchRange::decompose(&name) {
                Ok(range) => range,
                Err(e) => {
                    tracing::warn!(
                        collection = %collection,
                        file = %name,
                        error = %e,
                        "skipping file with unparseable patch id"
                    );
                    continue;
                }
            };
            if driver.map_or(false, |d| *d != range.driver) {
                continue;
            }
            if let Some(patch) = self.read_patch(collection, &name, range)? {
                patches.push(patch);
            }
        }
        sort_patches(&mut patches);
        Ok(patches)
    }

    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Patch>> {
        let range = PatchRange::decompose(id)?;
        self.read_patch(collection, id, range)
    }

    fn put(&self, collection: Collection, patch: &Patch) -> StoreResult<()> {
        let id = patch.id();
        let meta = PatchMeta {
            source_commit: patch.source_commit.clone(),
            sha256: patch.sha256(),
            recorded_at: Utc::now(),
        };
        write_atomic(&self.patch_path(collection, &id), &patch.content)?;
        write_atomic(
            &self.meta_path(collection, &id),
            serde_json::to_string_pretty(&meta)?.as_bytes(),
        )?;
        Ok(())
    }

    fn remove(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let existed = match fs::remove_file(self.patch_path(collection, id)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(self.meta_path(collection, id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use np_vers::VersionId;
    use tempfile::TempDir;

    fn patch(minor: u32, content: &str) -> Patch {
        let driver = DriverKey::vanilla("e1000e").unwrap();
        let range = PatchRange::single(driver, VersionId::new(3, minor, 0)).unwrap();
        Patch::new(range, content, "c0ffee")
    }

    #[test]
    fn test_put_list_sorted() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        store.put(Collection::Pending, &patch(10, "b")).unwrap();
        store.put(Collection::Pending, &patch(8, "a")).unwrap();

        let listed = store.list(Collection::Pending, None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].range.start, VersionId::new(3, 8, 0));
        assert_eq!(listed[0].content, b"a");
        assert_eq!(listed[0].source_commit, "c0ffee");
        assert!(dir.path().join("pending/.meta/vanilla--e1000e--30800--30900.json").exists());
    }

    #[test]
    fn test_missing_meta_gives_unknown_commit() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        fs::create_dir_all(dir.path().join("final")).unwrap();
        fs::write(dir.path().join("final/vanilla--ixgbe--30800--99999"), "diff").unwrap();
        fs::write(dir.path().join("final/README"), "not a patch").unwrap();

        let listed = store.list(Collection::Final, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_commit, UNKNOWN_COMMIT);
    }

    #[test]
    fn test_non_utf8_content_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        let driver = DriverKey::vanilla("e1000e").unwrap();
        let range = PatchRange::single(driver, VersionId::new(3, 8, 0)).unwrap();
        let content = b"+ * Copyright Fran\xe7ois \xe9\xf4\n".to_vec();
        store.put(Collection::Pending, &Patch::new(range, content.clone(), "c0ffee")).unwrap();

        let listed = store.list(Collection::Pending, None).unwrap();
        assert_eq!(listed[0].content, content);
    }

    #[test]
    fn test_driver_filter() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        store.put(Collection::Pending, &patch(8, "a")).unwrap();
        let other = DriverKey::vanilla("igb").unwrap();
        store
            .put(
                Collection::Pending,
                &Patch::new(PatchRange::single(other.clone(), VersionId::new(3, 8, 0)).unwrap(), "x", "c"),
            )
            .unwrap();

        assert_eq!(store.list(Collection::Pending, Some(&other)).unwrap().len(), 1);
        assert_eq!(store.list(Collection::Pending, None).unwrap().len(), 2);
    }

    #[test]
    fn test_move_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        let p = patch(8, "a");
        store.put(Collection::Pending, &p).unwrap();

        assert!(store.move_to(Collection::Pending, Collection::Rejected, &p.id()).unwrap());
        assert!(store.get(Collection::Pending, &p.id()).unwrap().is_none());
        assert_eq!(store.get(Collection::Rejected, &p.id()).unwrap().unwrap(), p);
        assert!(!store.move_to(Collection::Pending, Collection::Rejected, &p.id()).unwrap());

        assert!(store.remove(Collection::Rejected, &p.id()).unwrap());
        assert!(!store.remove(Collection::Rejected, &p.id()).unwrap());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        store.put(Collection::Final, &patch(8, "a")).unwrap();
        store.put(Collection::Final, &patch(9, "b")).unwrap();
        assert_eq!(store.clear(Collection::Final, None).unwrap(), 2);
        assert!(store.list(Collection::Final, None).unwrap().is_empty());
    }
}

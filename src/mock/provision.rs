use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use np_vers::VersionId;

use super::lock;
use crate::provision::{KernelProvisioner, ProvisionError, ProvisionResult};

#[derive(Debug, Default)]
struct ProvisionState {
    trees: HashMap<VersionId, PathBuf>,
    broken: HashSet<VersionId>,
    calls: usize,
}

/// Kernel trees registered per version. Unregistered versions are
/// unprovisionable.
#[derive(Debug, Clone, Default)]
pub struct MockProvisioner {
    state: Arc<Mutex<ProvisionState>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tree(&self, version: VersionId, dir: &Path) {
        lock(&self.state).trees.insert(version, dir.to_path_buf());
    }

    /// Make provisioning `version` fail with an I/O error.
    pub fn break_version(&self, version: VersionId) {
        lock(&self.state).broken.insert(version);
    }

    pub fn provision_count(&self) -> usize {
        lock(&self.state).calls
    }
}

impl KernelProvisioner for MockProvisioner {
    fn provision(&self, version: VersionId) -> ProvisionResult<Option<PathBuf>> {
        let mut state = lock(&self.state);
        state.calls += 1;
        if state.broken.contains(&version) {
            return Err(ProvisionError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("mock provisioning failure for {}", version),
            )));
        }
        Ok(state.trees.get(&version).cloned())
    }
}

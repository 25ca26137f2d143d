//! Greedy range minimization.
//!
//! Walk the pending patches of a driver in range order, widening a pivot
//! patch over each adjacent successor it extends to. A gap or a refused
//! extension flushes the pivot. The widened pivot keeps its own content and
//! source commit; only the range end moves.

use std::sync::Arc;

use np_vers::{DriverKey, VersionId};

use crate::extend::ExtensionTester;
use crate::patch::Patch;
use crate::pipeline::PipelineResult;
use crate::store::{Collection, PatchStore};

/// Merge sorted, non-overlapping patches using `extend` as the oracle.
///
/// `extend(pivot, v)` is asked only with `v == pivot.range.end`.
pub fn coalesce<F>(patches: Vec<Patch>, mut extend: F) -> Vec<Patch>
where
    F: FnMut(&Patch, VersionId) -> bool,
{
    let mut merged = Vec::new();
    let mut patches = patches.into_iter();
    let Some(mut pivot) = patches.next() else {
        return merged;
    };

    for next in patches {
        if pivot.range.end != next.range.start {
            merged.push(std::mem::replace(&mut pivot, next));
            continue;
        }
        if !extend(&pivot, next.range.start) {
            merged.push(std::mem::replace(&mut pivot, next));
            continue;
        }
        match pivot.with_end(next.range.end) {
            Ok(widened) => pivot = widened,
            Err(_) => merged.push(std::mem::replace(&mut pivot, next)),
        }
    }
    merged.push(pivot);
    merged
}

pub struct Minimizer {
    store: Arc<dyn PatchStore>,
    tester: Arc<ExtensionTester>,
}

impl Minimizer {
    pub fn new(store: Arc<dyn PatchStore>, tester: Arc<ExtensionTester>) -> Self {
        Self { store, tester }
    }

    /// Minimize `driver`'s pending patches into its final collection.
    ///
    /// With nothing pending, the final collection is left alone.
    pub fn minimize(&self, driver: &DriverKey) -> PipelineResult<Vec<Patch>> {
        let pending = self.store.list(Collection::Pending, Some(driver))?;
        if pending.is_empty() {
            tracing::info!(driver = %driver.name, "nothing pending to minimize");
            return Ok(Vec::new());
        }
        let count = pending.len();

        let minimized = coalesce(pending, |pivot, version| self.tester.extend(pivot, version));

        let replaced = self.store.clear(Collection::Final, Some(driver))?;
        for patch in &minimized {
            self.store.put(Collection::Final, patch)?;
        }
        tracing::info!(
            driver = %driver.name,
            pending = count,
            minimized = minimized.len(),
            replaced,
            "minimized patches"
        );
        Ok(minimized)
    }
}

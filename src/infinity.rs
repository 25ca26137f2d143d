//! Open-ended ranges.
//!
//! A final patch that ends at the newest known version is presumed to keep
//! applying: its end is rewritten to infinity. Content and start never
//! change.

use np_vers::{DriverKey, VersionId};

use crate::pipeline::PipelineResult;
use crate::store::{Collection, PatchStore};

/// Re-store the final patch of `driver` ending at `version` with an
/// infinite end. Returns the new identifier, or `None` if no final patch
/// ends at `version`.
pub fn extend_to_infinity(
    store: &dyn PatchStore,
    driver: &DriverKey,
    version: VersionId,
) -> PipelineResult<Option<String>> {
    if version.is_infinity() {
        return Ok(None);
    }
    let finals = store.list(Collection::Final, Some(driver))?;
    let Some(patch) = finals.into_iter().find(|p| p.range.end == version) else {
        tracing::debug!(driver = %driver.name, %version, "no final patch ends here");
        return Ok(None);
    };

    let open = patch.with_end(VersionId::Infinity)?;
    store.put(Collection::Final, &open)?;
    store.remove(Collection::Final, &patch.id())?;
    tracing::info!(from = %patch.id(), to = %open.id(), "extended to infinity");
    Ok(Some(open.id()))
}

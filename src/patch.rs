//! A patch: range, content and the source commit it was produced against.

use std::borrow::Cow;

use np_build::content_sha256;
use np_vers::{PatchIdError, PatchRange, VersionId};
use serde::{Deserialize, Serialize};

/// A unified diff claimed valid over a version range.
///
/// Identity for caching is `(content, source_commit)`; the range only
/// names the patch. Content is raw bytes: driver sources are not always
/// UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub range: PatchRange,
    pub content: Vec<u8>,
    pub source_commit: String,
}

impl Patch {
    pub fn new(range: PatchRange, content: impl Into<Vec<u8>>, source_commit: impl Into<String>) -> Self {
        Self {
            range,
            content: content.into(),
            source_commit: source_commit.into(),
        }
    }

    /// File name of the patch.
    pub fn id(&self) -> String {
        self.range.compose()
    }

    /// Content for display, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn sha256(&self) -> String {
        content_sha256(&self.content)
    }

    /// Same content and commit, with the range's end replaced.
    pub fn with_end(&self, end: VersionId) -> Result<Self, PatchIdError> {
        Ok(Self {
            range: self.range.with_end(end)?,
            content: self.content.clone(),
            source_commit: self.source_commit.clone(),
        })
    }
}

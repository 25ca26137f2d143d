//! Kernel version algebra for netmap patch management.
//!
//! Versions are ordered, can be stepped to the next release of the kernel
//! numbering scheme, and have a fixed-width canonical form used in patch
//! file names. Patch identifiers encode the driver and the half-open version
//! range a patch claims to be valid for.

pub mod error;
pub mod patch_id;
pub mod version;

pub use error::{PatchIdError, VersError};
pub use patch_id::{DriverKey, DriverKind, PatchRange, FIELD_SEPARATOR};
pub use version::{VersionId, VersionIter, INFINITY_CANONICAL};

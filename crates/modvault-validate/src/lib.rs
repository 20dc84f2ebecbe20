//! Package validation for uploaded mods.
//!
//! [`ArchiveValidator`] implements [`modvault_core::PackageValidator`] by
//! reading the gzip-compressed tar package and the `{Ref}.uplugin`
//! descriptors inside it.
//!
//! Content objects are classified by extension: `.pak`, `.ucas` and `.utoc`
//! are `pak`; `.dll`, `.so` and `.dylib` are `binary`. Only pak content is
//! eligible for auto-approval.

pub mod descriptor;
pub mod extract;
pub mod layout;

pub use descriptor::{PluginDescriptor, PluginReference, SML_PLUGIN};
pub use extract::{object_type, ArchiveValidator};

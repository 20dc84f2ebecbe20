//! Data-shape checks applied between validation and the first write.

use crate::error::{FinalizeError, ValidationError};
use crate::types::{ContentObject, Mod, ModInfo, PackageFormat};

/// The only object type trusted without review.
pub const TRUSTED_OBJECT_TYPE: &str = "pak";

/// Whether a version can skip manual review.
///
/// True iff the list is non-empty and every object is a pak. An empty list
/// has nothing proving it is safe, so it goes to review too.
pub fn is_auto_approvable(objects: &[ContentObject]) -> bool {
    !objects.is_empty()
        && objects
            .iter()
            .all(|obj| obj.object_type == TRUSTED_OBJECT_TYPE)
}

/// The package must declare the owning mod's reference.
pub fn check_reference(owner: &Mod, info: &ModInfo) -> Result<(), ValidationError> {
    if info.mod_reference != owner.mod_reference {
        return Err(ValidationError::ReferenceMismatch {
            expected: owner.mod_reference.clone(),
            actual: info.mod_reference.clone(),
        });
    }
    Ok(())
}

/// The package must use the multi-target layout and declare at least one
/// target.
pub fn check_format(info: &ModInfo) -> Result<(), FinalizeError> {
    if info.format != PackageFormat::MultiTargetPlugin {
        return Err(FinalizeError::Format {
            found: info.format.to_string(),
        });
    }
    if info.targets.is_empty() {
        return Err(FinalizeError::Format {
            found: "multi_target_plugin without targets".to_string(),
        });
    }
    Ok(())
}

//! ArchiveValidator: PackageValidator over tar.gz packages.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use modvault_core::{
    ContentObject, ExtractOptions, ModInfo, PackageFormat, PackageValidator, ValidationError,
};

use crate::descriptor::PluginDescriptor;
use crate::layout::{self, Layout, PackageFile};

/// Content object type for a file name, if it is one.
pub fn object_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pak" | "ucas" | "utoc" => Some("pak"),
        "dll" | "so" | "dylib" => Some("binary"),
        _ => None,
    }
}

/// Reads mod info from the package archive itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveValidator;

impl ArchiveValidator {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction, used by the async trait method.
    pub fn extract_sync(
        &self,
        package: &[u8],
        options: ExtractOptions,
        expected_reference: &str,
    ) -> Result<ModInfo, ValidationError> {
        let files = layout::read_package(package, options.with_validation)?;
        let layout = layout::detect(&files, expected_reference)?;

        if options.with_validation {
            check_layout(&files, &layout)?;
        }

        let descriptors = parse_descriptors(&files, &layout)?;
        let (primary_target, primary) = descriptors
            .iter()
            .next()
            .ok_or_else(|| ValidationError::MissingDescriptor {
                reference: layout.reference.clone(),
            })?;

        if options.with_validation {
            check_consistent(primary_target, primary, &descriptors)?;
        }

        let version = primary.sem_version.clone().unwrap_or_default();
        let semver =
            semver::Version::parse(&version).map_err(|e| ValidationError::InvalidVersion {
                version: version.clone(),
                reason: e.to_string(),
            })?;

        let deps = primary.dependencies();
        let objects: Vec<ContentObject> = files
            .iter()
            .filter_map(|f| object_type(&f.path).map(|t| ContentObject::new(&f.path, t)))
            .collect();

        let targets = match layout.format {
            PackageFormat::MultiTargetPlugin => layout.descriptors.keys().cloned().collect(),
            PackageFormat::SingleTargetPlugin => Vec::new(),
        };

        let metadata = if options.with_metadata {
            metadata(primary, &layout, &files)
        } else {
            serde_json::Value::Null
        };

        debug!(
            mod_reference = %layout.reference,
            version = %version,
            format = %layout.format,
            objects = objects.len(),
            "package extracted"
        );

        Ok(ModInfo {
            mod_reference: layout.reference.clone(),
            version,
            semver,
            sml_version: primary.sml_version(),
            hash: hex::encode(Sha256::digest(package)),
            size: package.len() as u64,
            format: layout.format,
            targets,
            objects,
            dependencies: deps.required,
            optional_dependencies: deps.optional,
            metadata,
        })
    }
}

#[async_trait]
impl PackageValidator for ArchiveValidator {
    async fn extract(
        &self,
        package: &[u8],
        options: ExtractOptions,
        expected_reference: &str,
    ) -> Result<ModInfo, ValidationError> {
        self.extract_sync(package, options, expected_reference)
    }
}

fn parse_descriptors(
    files: &[PackageFile],
    layout: &Layout,
) -> Result<BTreeMap<String, PluginDescriptor>, ValidationError> {
    let mut parsed = BTreeMap::new();
    for (target, path) in &layout.descriptors {
        let raw = files
            .iter()
            .find(|f| &f.path == path)
            .and_then(|f| f.contents.as_deref())
            .ok_or_else(|| ValidationError::MissingDescriptor {
                reference: layout.reference.clone(),
            })?;
        parsed.insert(target.clone(), PluginDescriptor::parse(path, raw)?);
    }
    Ok(parsed)
}

fn check_layout(files: &[PackageFile], layout: &Layout) -> Result<(), ValidationError> {
    if layout.format != PackageFormat::MultiTargetPlugin {
        return Ok(());
    }
    if let Some(dir) = layout.bare_dirs.first() {
        return Err(ValidationError::InconsistentTargets {
            reason: format!("target '{}' has no {}.uplugin", dir, layout.reference),
        });
    }
    if let Some(stray) = files.iter().find(|f| f.target().is_none()) {
        return Err(ValidationError::Malformed {
            reason: format!("file '{}' is outside every target", stray.path),
        });
    }
    Ok(())
}

fn check_consistent(
    primary_target: &str,
    primary: &PluginDescriptor,
    descriptors: &BTreeMap<String, PluginDescriptor>,
) -> Result<(), ValidationError> {
    let expected = primary.dependencies();
    for (target, descriptor) in descriptors {
        if descriptor.sem_version != primary.sem_version {
            return Err(ValidationError::InconsistentTargets {
                reason: format!(
                    "target '{}' declares version {:?}, '{}' declares {:?}",
                    target, descriptor.sem_version, primary_target, primary.sem_version
                ),
            });
        }
        if descriptor.dependencies() != expected {
            return Err(ValidationError::InconsistentTargets {
                reason: format!(
                    "target '{}' declares different dependencies than '{}'",
                    target, primary_target
                ),
            });
        }
    }
    Ok(())
}

fn metadata(
    descriptor: &PluginDescriptor,
    layout: &Layout,
    files: &[PackageFile],
) -> serde_json::Value {
    let mut targets = serde_json::Map::new();
    for target in layout.descriptors.keys().filter(|t| !t.is_empty()) {
        let (count, bytes) = files
            .iter()
            .filter(|f| f.target() == Some(target.as_str()))
            .fold((0u64, 0u64), |(n, b), f| (n + 1, b + f.size));
        targets.insert(target.clone(), json!({ "files": count, "bytes": bytes }));
    }

    json!({
        "friendly_name": descriptor.friendly_name,
        "description": descriptor.description,
        "created_by": descriptor.created_by,
        "targets": targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_types() {
        assert_eq!(object_type("Windows/Content/Paks/ModA.pak"), Some("pak"));
        assert_eq!(object_type("x/ModA.UCAS"), Some("pak"));
        assert_eq!(object_type("x/ModA.utoc"), Some("pak"));
        assert_eq!(object_type("Windows/Binaries/ModA.dll"), Some("binary"));
        assert_eq!(object_type("LinuxServer/libModA.so"), Some("binary"));
        assert_eq!(object_type("Mac/ModA.dylib"), Some("binary"));
        assert_eq!(object_type("Windows/ModA.uplugin"), None);
        assert_eq!(object_type("README"), None);
    }
}

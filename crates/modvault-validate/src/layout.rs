//! Archive walking and layout detection.
//!
//! A multi-target package keeps everything under one top-level directory per
//! target, each holding `{Ref}.uplugin`. A single-target package has the
//! descriptor at the archive root.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;

use modvault_core::{PackageFormat, ValidationError};

const DESCRIPTOR_EXT: &str = ".uplugin";

/// A regular file in the package. Only descriptor contents are kept.
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub path: String,
    pub size: u64,
    pub contents: Option<Vec<u8>>,
}

impl PackageFile {
    pub fn is_descriptor(&self) -> bool {
        self.path.ends_with(DESCRIPTOR_EXT)
    }

    /// Top-level directory, if the file is not at the root.
    pub fn target(&self) -> Option<&str> {
        self.path.split_once('/').map(|(dir, _)| dir)
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

fn malformed(reason: impl Into<String>) -> ValidationError {
    ValidationError::Malformed {
        reason: reason.into(),
    }
}

fn descriptor_stem(file: &PackageFile) -> &str {
    file.file_name().trim_end_matches(DESCRIPTOR_EXT)
}

/// Whether every component of `path` is a plain name.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Read every regular file from a tar.gz package.
///
/// With `check_paths`, absolute paths and `..` components are rejected.
pub fn read_package(package: &[u8], check_paths: bool) -> Result<Vec<PackageFile>, ValidationError> {
    let mut archive = tar::Archive::new(GzDecoder::new(package));
    let entries = archive
        .entries()
        .map_err(|e| malformed(format!("unreadable archive: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| malformed(format!("unreadable entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw = entry
            .path()
            .map_err(|e| malformed(format!("bad entry path: {}", e)))?
            .to_string_lossy()
            .replace('\\', "/");
        if check_paths && !is_safe_path(&raw) {
            return Err(malformed(format!("unsafe path '{}'", raw)));
        }
        let path = raw.trim_start_matches("./").to_string();

        let size = entry
            .header()
            .size()
            .map_err(|e| malformed(format!("bad entry size: {}", e)))?;

        let contents = if path.ends_with(DESCRIPTOR_EXT) {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| malformed(format!("{}: {}", path, e)))?;
            Some(buf)
        } else {
            None
        };

        files.push(PackageFile {
            path,
            size,
            contents,
        });
    }

    if files.is_empty() {
        return Err(malformed("package contains no files"));
    }
    Ok(files)
}

/// Where each descriptor lives and which layout that implies.
#[derive(Debug, Clone)]
pub struct Layout {
    pub format: PackageFormat,

    /// Mod reference (descriptor file stem).
    pub reference: String,

    /// Descriptor path per target; a single `""` entry for single-target.
    pub descriptors: BTreeMap<String, String>,

    /// Top-level directories that do not carry the descriptor.
    pub bare_dirs: Vec<String>,
}

/// Detect the layout and locate the descriptor for `expected_reference`.
///
/// When no descriptor is named after `expected_reference` but every
/// descriptor in the package shares one name, that name is used so the
/// caller can report the mismatch.
pub fn detect(files: &[PackageFile], expected_reference: &str) -> Result<Layout, ValidationError> {
    let candidates: Vec<&PackageFile> = files
        .iter()
        .filter(|f| f.is_descriptor() && f.path.matches('/').count() <= 1)
        .collect();

    let reference = if candidates
        .iter()
        .any(|f| descriptor_stem(f) == expected_reference)
    {
        expected_reference.to_string()
    } else {
        let mut stems: Vec<String> = candidates
            .iter()
            .map(|f| descriptor_stem(f).to_string())
            .collect();
        stems.sort();
        stems.dedup();
        match stems.as_slice() {
            [only] => only.clone(),
            _ => {
                return Err(ValidationError::MissingDescriptor {
                    reference: expected_reference.to_string(),
                })
            }
        }
    };
    let descriptor_name = format!("{}{}", reference, DESCRIPTOR_EXT);

    if files.iter().any(|f| f.path == descriptor_name) {
        let mut descriptors = BTreeMap::new();
        descriptors.insert(String::new(), descriptor_name);
        return Ok(Layout {
            format: PackageFormat::SingleTargetPlugin,
            reference,
            descriptors,
            bare_dirs: Vec::new(),
        });
    }

    let mut descriptors = BTreeMap::new();
    let mut dirs: Vec<&str> = files.iter().filter_map(PackageFile::target).collect();
    dirs.sort_unstable();
    dirs.dedup();

    let mut bare_dirs = Vec::new();
    for dir in dirs {
        let path = format!("{}/{}", dir, descriptor_name);
        if files.iter().any(|f| f.path == path) {
            descriptors.insert(dir.to_string(), path);
        } else {
            bare_dirs.push(dir.to_string());
        }
    }

    Ok(Layout {
        format: PackageFormat::MultiTargetPlugin,
        reference,
        descriptors,
        bare_dirs,
    })
}

//! Package archive handling: gzip-compressed tar.
//!
//! A multi-target package holds one top-level directory per target. Splitting
//! copies one directory's files into a fresh archive with the `{target}/`
//! prefix removed. Output is deterministic (zeroed mtimes, fixed owner) so the
//! same package always yields the same target hash.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, Header, HeaderMode};

use modvault_core::{StoreError, StoreResult};

fn archive_error(e: std::io::Error) -> StoreError {
    StoreError::Archive {
        message: e.to_string(),
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build a package archive from `(path, contents)` pairs.
pub fn write_package<'a, I>(entries: I) -> StoreResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(Vec::new(), Compression::default());
    let mut tar = Builder::new(encoder);
    tar.mode(HeaderMode::Deterministic);

    for (path, data) in entries {
        write_entry(&mut tar, path, data)?;
    }

    let encoder = tar.into_inner().map_err(archive_error)?;
    encoder.finish().map_err(archive_error)
}

/// Extract one target's files into their own archive.
///
/// Fails with [`StoreError::TargetMissing`] when the package has no regular
/// file under `{target}/`.
pub fn split_target(package: &[u8], target: &str) -> StoreResult<Vec<u8>> {
    let prefix = format!("{}/", target);
    let mut archive = Archive::new(GzDecoder::new(package));
    let entries = archive.entries().map_err(archive_error)?;

    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(Vec::new(), Compression::default());
    let mut out = Builder::new(encoder);
    out.mode(HeaderMode::Deterministic);

    let mut written = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(archive_error)?
            .to_string_lossy()
            .replace('\\', "/");
        let Some(relative) = path.trim_start_matches("./").strip_prefix(&prefix) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let relative = relative.to_string();

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(archive_error)?;
        write_entry(&mut out, &relative, &data)?;
        written += 1;
    }

    if written == 0 {
        return Err(StoreError::TargetMissing {
            target: target.to_string(),
        });
    }

    let encoder = out.into_inner().map_err(archive_error)?;
    encoder.finish().map_err(archive_error)
}

/// Paths of every regular file in the package, in archive order.
pub fn list_files(package: &[u8]) -> StoreResult<Vec<String>> {
    let mut archive = Archive::new(GzDecoder::new(package));
    let mut files = Vec::new();
    for entry in archive.entries().map_err(archive_error)? {
        let entry = entry.map_err(archive_error)?;
        if entry.header().entry_type().is_file() {
            let path = entry.path().map_err(archive_error)?;
            files.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}

fn write_entry<W: Write>(tar: &mut Builder<W>, path: &str, data: &[u8]) -> StoreResult<()> {
    let mut header = Header::new_gnu();
    header.set_path(path).map_err(archive_error)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();

    tar.append(&header, data).map_err(archive_error)
}

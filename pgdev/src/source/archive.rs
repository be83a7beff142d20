use crate::err::ProvisionErr;
use crate::kind::Role;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Unpack the gzip tarball `archive` into `target` and return the source tree, which is
/// the first top level directory the archive produced.
pub fn extract(role: Role, archive: &Path, target: &Path) -> Result<PathBuf, ProvisionErr> {
    if !archive.is_file() {
        return Err(ProvisionErr::source_err(
            role,
            format!("source tarball '{}' not found", archive.display()),
        ));
    }
    info!(
        "Extracting PostgreSQL tarball {} to {}",
        archive.display(),
        target.display()
    );

    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.unpack(target).map_err(|err| {
        ProvisionErr::source_err(
            role,
            format!("cannot extract '{}': {}", archive.display(), err),
        )
    })?;

    let dirs = fs::read_dir(target)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .sorted()
        .collect_vec();

    dirs.into_iter()
        .next()
        .ok_or_else(|| ProvisionErr::extraction_failed(role, archive))
}

/// Write `src` into a gzip tarball at `dest`, stored under the single top level
/// directory `name`.
pub fn pack(src: &Path, name: &str, dest: &Path) -> Result<(), ProvisionErr> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.append_dir_all(name, src)?;
    archive.into_inner()?.finish()?;
    Ok(())
}

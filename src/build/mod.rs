//! Local image tarball
//!
//! Packs every file of a layers directory into `<tag>.tar` inside a scratch
//! directory, reports its size, and removes the scratch directory again. Used to
//! sanity-check an export before anything is pushed.

use crate::error::{ReassemblerError, Result};
use crate::logging::Logger;
use crate::transfer::MANIFEST_FILE_NAME;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "built-image-reassembler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBuild {
    pub tarball_name: String,
    pub size: u64,
    pub files: usize,
}

/// Build the tarball and report it; the scratch directory is gone when this returns
pub async fn build_local(layers_path: &Path, tag: &str, output: &Logger) -> Result<LocalBuild> {
    output.info(&format!(
        "Building local image with files found in {}",
        layers_path.display()
    ));

    let layers_path = layers_path.to_path_buf();
    let tag = tag.to_string();
    let build = tokio::task::spawn_blocking(move || pack(&layers_path, &tag))
        .await
        .map_err(|e| ReassemblerError::Build(format!("build task failed: {}", e)))??;

    output.success(&format!(
        "Container image was built locally ({}, {} files)",
        output.format_size(build.size),
        build.files
    ));
    Ok(build)
}

fn pack(layers_path: &Path, tag: &str) -> Result<LocalBuild> {
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir()
        .map_err(|e| ReassemblerError::Build(format!("error creating scratch directory: {}", e)))?;
    let tarball_name = format!("{}.tar", tag);
    let tarball = scratch.path().join(&tarball_name);

    let files = collect_files(layers_path)?;
    if !files.iter().any(|f| f == Path::new(MANIFEST_FILE_NAME)) {
        return Err(ReassemblerError::Build(format!(
            "no {} in {}",
            MANIFEST_FILE_NAME,
            layers_path.display()
        )));
    }

    write_tarball(&tarball, layers_path, &files)?;
    let size = std::fs::metadata(&tarball)
        .map_err(|e| ReassemblerError::file_system(&tarball, e))?
        .len();

    close_scratch(scratch)?;
    Ok(LocalBuild {
        tarball_name,
        size,
        files: files.len(),
    })
}

/// Regular files under `root`, relative to it, in a stable order
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        let entries = std::fs::read_dir(&dir).map_err(|e| ReassemblerError::file_system(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ReassemblerError::file_system(&dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| ReassemblerError::file_system(entry.path(), e))?;
            let child = relative.join(entry.file_name());
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn write_tarball(tarball: &Path, root: &Path, files: &[PathBuf]) -> Result<()> {
    let file = File::create(tarball).map_err(|e| ReassemblerError::file_system(tarball, e))?;
    let mut builder = tar::Builder::new(file);

    for relative in files {
        builder
            .append_path_with_name(root.join(relative), relative)
            .map_err(|e| {
                ReassemblerError::Build(format!(
                    "could not add {} to the tarball: {}",
                    relative.display(),
                    e
                ))
            })?;
    }

    builder
        .into_inner()
        .map_err(|e| ReassemblerError::Build(format!("could not finish the tarball: {}", e)))?;
    Ok(())
}

fn close_scratch(scratch: TempDir) -> Result<()> {
    let path = scratch.path().to_path_buf();
    scratch
        .close()
        .map_err(|e| ReassemblerError::file_system(path, e))
}

//! Artifact fetching and extraction.
//!
//! A project archive arrives either as a remote URL or as inline
//! bytes, lands as `project.zip` in the staging directory, and is
//! extracted with strict containment checks. An entry resolving
//! outside the staging directory fails the whole extraction.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SandboxError};

const ARCHIVE_NAME: &str = "project.zip";

/// Where the project archive comes from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Remote archive, fetched over HTTP(S).
    Url(String),
    /// Inline upload, bytes taken verbatim.
    Bytes(Vec<u8>),
}

/// Fetches the archive into `dest_dir/project.zip`, overwriting any
/// existing file, and returns its path.
pub async fn fetch(source: &ArtifactSource, dest_dir: &Path) -> Result<PathBuf> {
    let archive_path = dest_dir.join(ARCHIVE_NAME);

    match source {
        ArtifactSource::Url(url) => {
            debug!("Downloading archive from {}", url);
            let response = reqwest::get(url)
                .await
                .map_err(|e| SandboxError::fetch(format!("request to {url} failed: {e}")))?
                .error_for_status()
                .map_err(|e| SandboxError::fetch(format!("request to {url} failed: {e}")))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| SandboxError::fetch(format!("reading body from {url} failed: {e}")))?;
            fs::write(&archive_path, &body)
                .map_err(|e| SandboxError::fetch(format!("writing archive: {e}")))?;
            debug!("Download completed: {} ({} bytes)", archive_path.display(), body.len());
        }
        ArtifactSource::Bytes(bytes) => {
            fs::write(&archive_path, bytes)
                .map_err(|e| SandboxError::fetch(format!("writing archive: {e}")))?;
            debug!("Wrote inline archive: {} ({} bytes)", archive_path.display(), bytes.len());
        }
    }

    Ok(archive_path)
}

/// Extracts `archive` into `dest_dir` and deletes the archive on
/// success. Fail-fast: the first bad entry aborts the operation.
pub fn extract(archive: &Path, dest_dir: &Path) -> Result<()> {
    debug!("Extracting archive: {}", archive.display());
    let file = fs::File::open(archive)
        .map_err(|e| SandboxError::fetch(format!("opening archive: {e}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| SandboxError::fetch(format!("reading archive: {e}")))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| SandboxError::fetch(format!("reading archive entry: {e}")))?;
        let name = entry.name().to_string();

        if is_metadata_entry(&name) {
            continue;
        }

        // Containment is a security invariant: an entry that cannot be
        // resolved strictly inside dest_dir poisons the whole archive.
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| SandboxError::path_traversal(&name))?;
        let dest = dest_dir.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|e| SandboxError::io(format!("creating {}", dest.display()), &e))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SandboxError::io(format!("creating {}", parent.display()), &e))?;
        }

        let mut out = fs::File::create(&dest)
            .map_err(|e| SandboxError::io(format!("creating {}", dest.display()), &e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| SandboxError::io(format!("writing {}", dest.display()), &e))?;

        if is_script_entry(&name) {
            set_executable(&dest)?;
            debug!("Set executable permission for: {}", name);
        }
    }

    fs::remove_file(archive)
        .map_err(|e| SandboxError::io(format!("removing {}", archive.display()), &e))?;
    debug!("Extraction completed");
    Ok(())
}

/// OS metadata entries (macOS resource forks, Finder droppings) are
/// skipped silently.
fn is_metadata_entry(name: &str) -> bool {
    name.contains("__MACOSX")
        || name.contains(".DS_Store")
        || name.contains("/._")
        || name.starts_with("._")
}

fn is_script_entry(name: &str) -> bool {
    name.ends_with("gradlew") || name.ends_with(".sh")
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| SandboxError::io(format!("chmod {}", path.display()), &e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

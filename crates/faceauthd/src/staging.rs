//! Scoped on-disk staging for uploaded images.

use std::io;
use std::path::{Path, PathBuf};

/// An upload written to the staging directory. The file is removed when the
/// guard is dropped, whichever way the owning handler exits.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    /// Write `bytes` to `<dir>/<kind>-<uuid><.ext>`.
    ///
    /// Only the extension of `original_name` is kept, and only if it is short
    /// ASCII alphanumeric; client-supplied names never reach the filesystem.
    pub async fn write(dir: &Path, kind: &str, original_name: Option<&str>, bytes: &[u8]) -> io::Result<Self> {
        let ext = original_name.and_then(safe_extension).unwrap_or_default();
        let path = dir.join(format!("{kind}-{}{ext}", uuid::Uuid::new_v4()));

        // Construct the guard first so a partial write is cleaned up too.
        let staged = Self { path };
        tokio::fs::write(&staged.path, bytes).await?;
        tracing::debug!(path = %staged.path.display(), bytes = bytes.len(), "upload staged");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "staged upload removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged upload")
            }
        }
    }
}

fn safe_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| format!(".{}", ext.to_ascii_lowercase()))
}

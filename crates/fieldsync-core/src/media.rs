//! Local persistence for captured images and video awaiting upload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Error, Result};

/// Device-side storage for media captured while records are unsynced.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist captured bytes and return the local file reference
    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<String>;

    /// Delete a local file after its upload was confirmed
    async fn delete(&self, local_path: &str) -> Result<()>;

    /// Whether the local file is still present
    async fn exists(&self, local_path: &str) -> bool;
}

/// Filesystem-backed media store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let file_name = sanitize_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(format!("{}-{file_name}", Uuid::now_v7()));
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Persisted media");
        Ok(path.to_string_lossy().to_string())
    }

    async fn delete(&self, local_path: &str) -> Result<()> {
        match tokio::fs::remove_file(local_path).await {
            Ok(()) => Ok(()),
            // Already gone is the state we wanted
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, local_path: &str) -> bool {
        tokio::fs::try_exists(local_path).await.unwrap_or(false)
    }
}

/// Keep only characters safe for a file name on every platform.
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let base = Path::new(file_name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let mut out = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    let out = out.trim_matches('.').to_string();
    if out.is_empty() {
        return Err(Error::InvalidInput(
            "Media file name cannot be empty".to_string(),
        ));
    }
    Ok(out)
}

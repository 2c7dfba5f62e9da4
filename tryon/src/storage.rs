//! On-disk storage for uploads and generated outputs.
//!
//! Every stored file gets a fresh UUIDv4 in its name, so concurrent requests never write to the
//! same path and no locking is required. Files are created with `create_new`, which turns an
//! impossible collision into an error instead of a silent overwrite. Nothing here deletes files;
//! retention is left to whatever manages the storage volume.

use crate::config::StorageConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Longest sanitized client file name kept in an upload path.
const MAX_UPLOAD_NAME_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Upload and output directories plus the URL prefix outputs are served under.
#[derive(Debug, Clone)]
pub struct Storage {
    uploads_dir: PathBuf,
    outputs_dir: PathBuf,
    public_prefix: String,
}

impl Storage {
    pub fn new(uploads_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into();
        Self {
            uploads_dir: uploads_dir.into(),
            outputs_dir: outputs_dir.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.base_dir.join(&config.uploads_dir),
            config.base_dir.join(&config.outputs_dir),
            config.public_prefix.clone(),
        )
    }

    /// Create both directories if they do not exist yet.
    pub async fn init(&self) -> Result<(), StorageError> {
        for dir in [&self.uploads_dir, &self.outputs_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|source| StorageError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Persist an uploaded blob as `<uuid>_<sanitized name>` and return its path.
    pub async fn save_upload(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let name = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(original_name));
        let path = self.uploads_dir.join(name);
        write_new(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored upload");
        Ok(path)
    }

    /// Generate a unique output file name of the form `<prefix>_<uuid>.<extension>`.
    pub fn output_name(prefix: &str, extension: &str) -> String {
        format!("{}_{}.{}", prefix, Uuid::new_v4(), extension.trim_start_matches('.'))
    }

    /// Write a generated image into the outputs directory and return its path.
    pub async fn write_output(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.outputs_dir.join(name);
        write_new(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored output");
        Ok(path)
    }

    /// Public URL of an output file, relative to the server root.
    pub fn output_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_prefix, name)
    }

    /// Public URL for a path inside the outputs directory.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        if !path.starts_with(&self.outputs_dir) {
            return None;
        }
        path.file_name().and_then(|n| n.to_str()).map(|n| self.output_url(n))
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let to_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(to_err)?;
    file.write_all(bytes).await.map_err(to_err)?;
    file.flush().await.map_err(to_err)?;
    Ok(())
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped and anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_file_name(name: Option<&str>) -> String {
    let base = name
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .map(str::trim)
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .take(MAX_UPLOAD_NAME_LEN)
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        cleaned
    }
}

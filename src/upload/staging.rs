//! Staging Area
//!
//! Local filesystem layout of uploaded files. Everything is first written
//! under the staging root and handed to clients as an external reference:
//!
//! ```text
//! {class_dir}/{file}?v={version}&where={location}
//! ```
//!
//! A reference with a `where` marker points into the staging root; one
//! without it points at an already relocated file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::types::{ResourceClass, UploadError};

// ============================================================================
// References
// ============================================================================

/// Parsed external reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRef {
    /// Path relative to the staging (or final) root
    pub path: String,
    /// `v` query value
    pub version: Option<String>,
    /// `where` query value; `None` once the file has been relocated
    pub location: Option<String>,
}

/// Split an external reference into its path and query values
pub fn parse_reference(reference: &str) -> StagedRef {
    let (path, query) = match reference.split_once('?') {
        Some((path, query)) => (path, query),
        None => (reference, ""),
    };

    let mut version = None;
    let mut location = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        if value.is_empty() {
            continue;
        }
        match name {
            "v" => version = Some(value),
            "where" => location = Some(value),
            _ => {}
        }
    }

    StagedRef {
        path: urlencoding::decode(path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| path.to_string()),
        version,
        location,
    }
}

/// Build an external reference from a relative path
pub fn format_reference(relative: &str, version: &str, location: Option<&str>) -> String {
    let mut reference = format!("{}?v={}", relative, urlencoding::encode(version));
    if let Some(location) = location {
        reference.push_str("&where=");
        reference.push_str(&urlencoding::encode(location));
    }
    reference
}

// ============================================================================
// Staging Area
// ============================================================================

/// Result of writing a chunk to the staging area
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub relative: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    upload_root: PathBuf,
    final_root: PathBuf,
    download_root: PathBuf,
}

impl StagingArea {
    pub fn new(upload_root: PathBuf, final_root: PathBuf, download_root: PathBuf) -> Self {
        Self {
            upload_root,
            final_root,
            download_root,
        }
    }

    /// `{class_dir}/{stem}{ext}`
    pub fn relative_name(class: ResourceClass, stem: &str, extension: &str) -> String {
        format!("{}/{}{}", class.dir(), stem, extension)
    }

    /// Absolute staging path of a relative name
    pub fn staged_path(&self, relative: &str) -> PathBuf {
        self.upload_root.join(relative.trim_start_matches('/'))
    }

    /// Absolute final path of a relative name
    pub fn final_path(&self, class: ResourceClass, relative: &str) -> PathBuf {
        let root = match class {
            ResourceClass::Document => &self.download_root,
            _ => &self.final_root,
        };
        root.join(relative.trim_start_matches('/'))
    }

    /// Write `data` to a staged file, replacing any previous content
    pub async fn write(&self, relative: &str, data: &[u8]) -> Result<StagedFile, UploadError> {
        let path = self.staged_path(relative);
        let mut file = create_file(&path).await?;

        file.write_all(data).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to write staged file");
            UploadError::Storage(e.to_string())
        })?;
        file.flush().await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to flush staged file");
            UploadError::Storage(e.to_string())
        })?;

        Ok(StagedFile {
            path,
            relative: relative.to_string(),
            size: data.len() as u64,
        })
    }

    /// Create (or truncate) a staged file for appending
    pub async fn create(&self, relative: &str) -> Result<(PathBuf, tokio::fs::File), UploadError> {
        let path = self.staged_path(relative);
        let file = create_file(&path).await?;
        Ok((path, file))
    }

    /// Read a staged file in full
    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, UploadError> {
        check_relative(relative)?;
        let path = self.staged_path(relative);
        tokio::fs::read(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read staged file");
            UploadError::Storage(e.to_string())
        })
    }

    /// Move a staged file into the final root, returns (staged, final) paths
    pub async fn relocate(
        &self,
        class: ResourceClass,
        relative: &str,
    ) -> Result<(PathBuf, PathBuf), UploadError> {
        check_relative(relative)?;
        let staged = self.staged_path(relative);
        if !tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            tracing::warn!(path = %staged.display(), "Staged file not found");
            return Err(UploadError::StagedFileNotFound(relative.to_string()));
        }

        let target = self.final_path(class, relative);
        ensure_parent(&target).await?;

        tracing::debug!(from = %staged.display(), to = %target.display(), "Relocating staged file");

        if tokio::fs::rename(&staged, &target).await.is_err() {
            // Staging and final roots may sit on different filesystems
            tokio::fs::copy(&staged, &target).await.map_err(|e| {
                tracing::error!(from = %staged.display(), to = %target.display(), error = %e, "Failed to copy staged file");
                UploadError::Storage(e.to_string())
            })?;
            if let Err(e) = tokio::fs::remove_file(&staged).await {
                tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged file after copy");
            }
        }

        Ok((staged, target))
    }
}

/// References come from clients, keep them inside the roots
fn check_relative(relative: &str) -> Result<(), UploadError> {
    let escapes = Path::new(relative)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::Prefix(_)));
    if escapes {
        return Err(UploadError::StagedFileNotFound(relative.to_string()));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), UploadError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            tracing::error!(path = %parent.display(), error = %e, "Failed to create directory");
            UploadError::Storage(e.to_string())
        })?;
    }
    Ok(())
}

async fn create_file(path: &Path) -> Result<tokio::fs::File, UploadError> {
    ensure_parent(path).await?;
    tokio::fs::File::create(path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to create file");
        UploadError::Storage(e.to_string())
    })
}

// ============================================================================
// Tests
// ============================================================================

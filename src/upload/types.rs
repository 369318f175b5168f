//! Upload types for the multipart protocol

use serde::{Deserialize, Serialize};

use crate::kv::KvError;

// ============================================================================
// Constants
// ============================================================================

/// `where` marker of a chunk or merged file staged by a multipart upload
pub const LOCATION_MULTIPART: &str = "multi_upload";

/// `where` marker of a file staged by a single-shot upload
pub const LOCATION_UPLOAD: &str = "upload";

// ============================================================================
// Resource Classification
// ============================================================================

/// Caller-supplied tag selecting the directory a file is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Image,
    Icon,
    Document,
    Archive,
    Multipart,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 5] = [
        ResourceClass::Image,
        ResourceClass::Icon,
        ResourceClass::Document,
        ResourceClass::Archive,
        ResourceClass::Multipart,
    ];

    /// Directory under the staging and final roots
    pub fn dir(&self) -> &'static str {
        match self {
            ResourceClass::Image => "image",
            ResourceClass::Icon => "icon",
            ResourceClass::Document => "documents",
            ResourceClass::Archive => "archive",
            ResourceClass::Multipart => "tmp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Image => "image",
            ResourceClass::Icon => "icon",
            ResourceClass::Document => "document",
            ResourceClass::Archive => "archive",
            ResourceClass::Multipart => "multipart",
        }
    }
}

impl std::str::FromStr for ResourceClass {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UploadError::InvalidResourceClass(s.to_string()))
    }
}

// ============================================================================
// Start Types
// ============================================================================

/// Request to open a multipart upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Target file name, its extension names the merged file
    pub filename: String,

    /// Number of chunks the client will send
    pub chunks: u32,

    pub resource_class: ResourceClass,

    /// Expected MD5 over the concatenated chunk checksums
    #[serde(default)]
    pub content_hash: Option<String>,

    /// Client-chosen upload id, generated when absent
    #[serde(default)]
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub upload_id: String,
}

/// Session metadata as stored under the session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub chunks: u32,
    pub resource_class: ResourceClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl UploadSession {
    /// Extension of the target file name, including the dot
    pub fn extension(&self) -> String {
        file_extension(&self.filename)
    }
}

// ============================================================================
// Chunk Types
// ============================================================================

/// Per-chunk parameters sent alongside the chunk bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub chunk: u32,
    /// Hex MD5 of the chunk bytes, empty to skip verification
    #[serde(default)]
    pub checksum: String,
    /// Declared byte size, 0 to skip size verification
    #[serde(default)]
    pub size: u64,
}

/// Metadata of one stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub upload_id: String,
    pub chunk: u32,
    pub checksum: String,
    /// Retention window at the time of writing, e.g. `10m0s`
    pub validity: String,
    /// External reference of the staged chunk file
    pub download_path: String,
}

// ============================================================================
// Done Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneResponse {
    pub upload_id: String,
    /// External reference of the merged file
    pub download_path: String,
    /// How long the merged file survives unless finalized
    pub validity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkList {
    pub data: Vec<ChunkRecord>,
}

// ============================================================================
// Finalize Types
// ============================================================================

/// Request to move a staged file into the final root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub resource_class: ResourceClass,
    pub download_path: String,
}

/// Reference returned by single-shot upload and finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceResponse {
    pub download_path: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload '{0}' not found")]
    SessionNotFound(String),

    #[error("upload '{upload_id}' chunk {chunk} not found")]
    ChunkNotFound { upload_id: String, chunk: u32 },

    #[error("upload '{0}' chunks not found")]
    ChunksNotFound(String),

    #[error("upload '{upload_id}' chunks not enough, current {current}, want {want}")]
    ChunksNotEnough {
        upload_id: String,
        current: usize,
        want: u32,
    },

    #[error("request file too large, max size {max} bytes")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("upload size exceed limit({size}, {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("upload file size not equal input {declared}, want {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("upload file content checksum not equal input '{expected}', want '{actual}'")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported file suffix '{suffix}' on resource_class '{class}', support {accepted:?}")]
    UnsupportedExtension {
        suffix: String,
        class: &'static str,
        accepted: Vec<String>,
    },

    #[error("invalid resource_class '{0}'")]
    InvalidResourceClass(String),

    #[error("file '{path}' is not under resource_class '{class}'")]
    ResourceClassMismatch { path: String, class: &'static str },

    #[error("request body too large, max size {max} bytes")]
    BodyTooLarge { max: u64 },

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("invalid upload id '{0}'")]
    InvalidUploadId(String),

    #[error("file '{0}' not found")]
    StagedFileNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store error: {0}")]
    Kv(#[from] KvError),
}

impl UploadError {
    /// Whether the caller sent an invalid request (as opposed to a server fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Serialization(_) | Self::Storage(_) | Self::Kv(_)
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_)
            | Self::ChunkNotFound { .. }
            | Self::ChunksNotFound(_)
            | Self::StagedFileNotFound(_) => StatusCode::NOT_FOUND,
            Self::ChunkTooLarge { .. } | Self::FileTooLarge { .. } | Self::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::UnsupportedExtension { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ChecksumMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunksNotEnough { .. }
            | Self::SizeMismatch { .. }
            | Self::InvalidResourceClass(_)
            | Self::ResourceClassMismatch { .. }
            | Self::InvalidBody(_)
            | Self::InvalidUploadId(_) => StatusCode::BAD_REQUEST,
            Self::Serialization(_) | Self::Storage(_) | Self::Kv(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Ids become file names, so they must stay a single path segment
pub fn check_upload_id(id: &str) -> Result<(), UploadError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '?', '&', '\0']);
    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidUploadId(id.to_string()))
    }
}

/// Extension of a file name including the leading dot, or an empty string
pub fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.png"), ".png");
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension("README"), "");
    }

    #[test]
    fn test_check_upload_id() {
        assert!(check_upload_id("S1").is_ok());
        assert!(check_upload_id("0b6f_node-1").is_ok());
        assert!(check_upload_id("").is_err());
        assert!(check_upload_id("..").is_err());
        assert!(check_upload_id("../etc").is_err());
        assert!(check_upload_id("a?v=1").is_err());
    }

    #[test]
    fn test_resource_class_parse() {
        assert_eq!("image".parse::<ResourceClass>().unwrap(), ResourceClass::Image);
        assert_eq!(ResourceClass::Multipart.dir(), "tmp");
        assert!(matches!(
            "unknown".parse::<ResourceClass>(),
            Err(UploadError::InvalidResourceClass(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        let not_enough = UploadError::ChunksNotEnough {
            upload_id: "S1".to_string(),
            current: 1,
            want: 2,
        };
        assert!(not_enough.is_client_error());
        assert_eq!(
            not_enough.to_string(),
            "upload 'S1' chunks not enough, current 1, want 2"
        );

        let internal = UploadError::Storage("disk full".to_string());
        assert!(!internal.is_client_error());
        assert_eq!(
            internal.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

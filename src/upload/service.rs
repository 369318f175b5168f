//! Multipart Upload Service
//!
//! Orchestrates a multipart upload across the session store, the chunk store,
//! the staging area and the deletion scheduler:
//!
//! 1. `start` records the session (target name, chunk count, class)
//! 2. `upload_chunk` stages each chunk and records its metadata
//! 3. `done` merges the chunks in index order into one staged file
//!
//! There is no stored status. A session is started while its metadata key
//! exists, and `done` recomputes the merge from scratch on every call.
//! Every staged artifact is registered for deferred deletion until
//! `finalize` moves it out of the staging root.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{Config, UploadConfig};
use crate::kv::KvStore;

use super::chunk_store::ChunkStore;
use super::delay::DelayScheduler;
use super::keys::KeySpace;
use super::session_store::SessionStore;
use super::staging::{format_reference, parse_reference, StagingArea};
use super::types::{
    check_upload_id, file_extension, ChunkRecord, ChunkUpload, DoneResponse, ResourceClass,
    StartRequest, StartResponse, UploadError, UploadSession, LOCATION_MULTIPART, LOCATION_UPLOAD,
};
use super::validation::{
    check_checksum, check_chunk_size, check_extension, check_file_size, content_checksum,
    AggregateChecksum,
};

/// Parameters of a single-shot upload
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SingleUpload {
    pub resource_class: ResourceClass,
    /// Stable resource id, generated when absent
    #[serde(default)]
    pub resource_id: Option<String>,
    pub filename: String,
}

#[derive(Clone)]
pub struct MultipartUploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    sessions: SessionStore,
    chunks: ChunkStore,
    delay: DelayScheduler,
    staging: StagingArea,
    config: UploadConfig,
    node_name: String,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn KvStore>, config: &Config) -> Self {
        let keys = KeySpace::new(&config.keys);
        let retention = config.upload.retention;

        Self {
            inner: Arc::new(UploaderInner {
                sessions: SessionStore::new(store.clone(), keys.clone(), retention),
                chunks: ChunkStore::new(store.clone(), keys.clone(), retention),
                delay: DelayScheduler::new(store, keys.delay_queue(), retention),
                staging: StagingArea::new(
                    config.storage.upload_path.clone(),
                    config.storage.final_path.clone(),
                    config.storage.download_path.clone(),
                ),
                config: config.upload.clone(),
                node_name: config.storage.node_name.clone(),
            }),
        }
    }

    /// Scheduler shared by this uploader, for spawning the sweep task
    pub fn delay_scheduler(&self) -> DelayScheduler {
        self.inner.delay.clone()
    }

    fn generate_id(&self) -> String {
        format!("{}_{}", Uuid::new_v4(), self.inner.node_name)
    }

    fn version() -> String {
        Utc::now().timestamp().to_string()
    }

    // ========================================================================
    // Multipart Lifecycle
    // ========================================================================

    /// Open a multipart upload
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, UploadError> {
        let upload_id = match request.upload_id {
            Some(id) if !id.is_empty() => id,
            _ => self.generate_id(),
        };
        check_upload_id(&upload_id)?;

        let limits = self.inner.config.limits_for(request.resource_class);
        check_extension(request.resource_class, limits, &request.filename)?;

        let session = UploadSession {
            upload_id: upload_id.clone(),
            filename: request.filename,
            chunks: request.chunks,
            resource_class: request.resource_class,
            content_hash: request.content_hash.filter(|h| !h.is_empty()),
        };
        self.inner.sessions.put_start(&session).await?;

        Ok(StartResponse { upload_id })
    }

    /// Stage one chunk and record it
    pub async fn upload_chunk(
        &self,
        request: ChunkUpload,
        data: &[u8],
    ) -> Result<ChunkRecord, UploadError> {
        check_upload_id(&request.upload_id)?;
        let session = self.inner.sessions.get_start(&request.upload_id).await?;

        let config = &self.inner.config;
        if config.check_size {
            let max = config.limits_for(session.resource_class).max_chunk_size;
            check_chunk_size(request.size, data.len() as u64, max)?;
        }
        // Verified before staging so a rejected re-upload keeps the accepted bytes
        if config.check_content {
            check_checksum(&request.checksum, &content_checksum(data))?;
        }

        // One staged file per (upload, chunk) so concurrent chunks never collide
        let relative = StagingArea::relative_name(
            session.resource_class,
            &format!("{}_{}", session.upload_id, request.chunk),
            &session.extension(),
        );

        tracing::debug!(
            upload_id = %session.upload_id,
            chunk = request.chunk,
            size = data.len(),
            relative = %relative,
            "Staging chunk"
        );

        let staged = self.inner.staging.write(&relative, data).await?;
        self.inner.delay.add(&staged.path).await?;

        let record = ChunkRecord {
            upload_id: session.upload_id,
            chunk: request.chunk,
            checksum: request.checksum,
            validity: self.inner.delay.validity(),
            download_path: format_reference(&relative, &Self::version(), Some(LOCATION_MULTIPART)),
        };
        self.inner.chunks.put_chunk(&record).await?;

        Ok(record)
    }

    /// Merge all chunks, in ascending index order, into one staged file
    pub async fn done(&self, upload_id: &str) -> Result<DoneResponse, UploadError> {
        check_upload_id(upload_id)?;
        let session = self.inner.sessions.get_start(upload_id).await?;
        let records = self.inner.chunks.get_all_chunks(upload_id).await?;

        if records.len() != session.chunks as usize {
            return Err(UploadError::ChunksNotEnough {
                upload_id: upload_id.to_string(),
                current: records.len(),
                want: session.chunks,
            });
        }

        let relative =
            StagingArea::relative_name(session.resource_class, upload_id, &session.extension());
        let (path, mut file) = self.inner.staging.create(&relative).await?;
        // Registered before merging so a failed merge is still reclaimed
        self.inner.delay.add(&path).await?;

        tracing::info!(
            upload_id = %upload_id,
            filename = %session.filename,
            chunks = records.len(),
            path = %path.display(),
            "Merging chunks"
        );

        let mut aggregate = AggregateChecksum::new();
        for record in &records {
            let staged = parse_reference(&record.download_path);
            let bytes = self.inner.staging.read(&staged.path).await?;
            file.write_all(&bytes).await.map_err(|e| {
                tracing::error!(path = %path.display(), chunk = record.chunk, error = %e, "Failed to merge chunk");
                UploadError::Storage(e.to_string())
            })?;
            aggregate.update(&record.checksum);
        }
        file.flush().await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to flush merged file");
            UploadError::Storage(e.to_string())
        })?;

        if self.inner.config.check_content {
            if let Some(expected) = session.content_hash.as_deref() {
                check_checksum(expected, &aggregate.finish())?;
            }
        }

        Ok(DoneResponse {
            upload_id: upload_id.to_string(),
            download_path: format_reference(&relative, &Self::version(), Some(LOCATION_MULTIPART)),
            validity: self.inner.delay.validity(),
        })
    }

    /// One chunk record, for resuming clients
    pub async fn get_chunk(&self, upload_id: &str, chunk: u32) -> Result<ChunkRecord, UploadError> {
        self.inner.chunks.get_chunk(upload_id, chunk).await
    }

    /// Every chunk record, ascending by index
    pub async fn get_all_chunks(&self, upload_id: &str) -> Result<Vec<ChunkRecord>, UploadError> {
        self.inner.chunks.get_all_chunks(upload_id).await
    }

    // ========================================================================
    // Single-Shot Upload & Finalize
    // ========================================================================

    /// Stage a whole file in one request
    pub async fn upload(&self, request: SingleUpload, data: &[u8]) -> Result<String, UploadError> {
        let limits = self.inner.config.limits_for(request.resource_class);
        check_file_size(data.len() as u64, limits)?;
        check_extension(request.resource_class, limits, &request.filename)?;

        let resource_id = match request.resource_id {
            Some(id) if !id.is_empty() => id,
            _ => self.generate_id(),
        };
        check_upload_id(&resource_id)?;

        let relative = StagingArea::relative_name(
            request.resource_class,
            &resource_id,
            &file_extension(&request.filename),
        );
        let staged = self.inner.staging.write(&relative, data).await?;
        self.inner.delay.add(&staged.path).await?;

        tracing::debug!(
            resource_id = %resource_id,
            path = %staged.path.display(),
            size = staged.size,
            "Staged upload"
        );

        Ok(format_reference(&relative, &Self::version(), Some(LOCATION_UPLOAD)))
    }

    /// Move a staged file into the final root and cancel its deletion.
    ///
    /// A reference without a `where` marker is already final and is
    /// returned unchanged.
    pub async fn finalize(
        &self,
        resource_class: ResourceClass,
        reference: &str,
    ) -> Result<String, UploadError> {
        let staged = parse_reference(reference);
        if staged.location.is_none() {
            return Ok(reference.to_string());
        }

        let class_dir = staged.path.trim_start_matches('/').split('/').next();
        if class_dir != Some(resource_class.dir()) {
            return Err(UploadError::ResourceClassMismatch {
                path: staged.path,
                class: resource_class.as_str(),
            });
        }

        let (from, to) = self.inner.staging.relocate(resource_class, &staged.path).await?;
        self.inner.delay.remove(&from).await;

        tracing::info!(from = %from.display(), to = %to.display(), "Finalized staged file");

        let version = staged.version.unwrap_or_else(Self::version);
        Ok(format_reference(&staged.path, &version, None))
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Upload Routes
//!
//! HTTP endpoints for multipart and single-shot uploads.
//!
//! Endpoints:
//! - POST /api/v1/multipart/start - Open a multipart upload
//! - POST /api/v1/multipart/:upload_id/chunks/:chunk - Upload a chunk (raw body)
//! - POST /api/v1/multipart/:upload_id/done - Merge the chunks
//! - GET /api/v1/multipart/:upload_id/chunks - List chunk records
//! - GET /api/v1/multipart/:upload_id/chunks/:chunk - Get one chunk record
//! - POST /api/v1/upload - Single-shot upload (raw body)
//! - POST /api/v1/upload/finalize - Move a staged file into the final root

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::upload::{
    ChunkList, ChunkRecord, ChunkUpload, DoneResponse, FinalizeRequest, ReferenceResponse,
    SingleUpload, StartRequest, StartResponse, UploadError,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = match &self {
            UploadError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            UploadError::ChunkNotFound { .. } => "CHUNK_NOT_FOUND",
            UploadError::ChunksNotFound(_) => "CHUNKS_NOT_FOUND",
            UploadError::ChunksNotEnough { .. } => "CHUNKS_NOT_ENOUGH",
            UploadError::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
            UploadError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            UploadError::SizeMismatch { .. } => "SIZE_MISMATCH",
            UploadError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            UploadError::UnsupportedExtension { .. } => "UNSUPPORTED_EXTENSION",
            UploadError::InvalidResourceClass(_) => "INVALID_RESOURCE_CLASS",
            UploadError::ResourceClassMismatch { .. } => "RESOURCE_CLASS_MISMATCH",
            UploadError::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            UploadError::InvalidBody(_) => "INVALID_BODY",
            UploadError::InvalidUploadId(_) => "INVALID_UPLOAD_ID",
            UploadError::StagedFileNotFound(_) => "FILE_NOT_FOUND",
            UploadError::Serialization(_) | UploadError::Storage(_) | UploadError::Kv(_) => {
                "INTERNAL_ERROR"
            }
        };

        let error = if self.is_client_error() {
            self.to_string()
        } else {
            tracing::error!(error = %self, "Upload request failed");
            "internal server error".to_string()
        };

        let body = Json(ErrorResponse {
            error,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Routers
// ============================================================================

/// Create the multipart router
pub fn multipart_router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start))
        .route("/:upload_id/chunks", get(list_chunks))
        .route("/:upload_id/chunks/:chunk", post(upload_chunk).get(get_chunk))
        .route("/:upload_id/done", post(done))
}

/// Create the single-shot upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload))
        .route("/finalize", post(finalize))
}

// ============================================================================
// Handlers
// ============================================================================

/// Query parameters of a chunk upload
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub size: u64,
}

/// Raw request body, with buffering failures in the `{error, code}` shape.
///
/// The router's `DefaultBodyLimit` rejects a body over the largest class
/// limit before any per-class check runs.
fn request_body(
    state: &AppState,
    body: Result<Bytes, BytesRejection>,
) -> Result<Bytes, UploadError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::BodyTooLarge {
                max: state.config().upload.max_body_size(),
            }
        } else {
            UploadError::InvalidBody(rejection.body_text())
        }
    })
}

/// POST /api/v1/multipart/start
async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, UploadError> {
    let response = state.uploader().start(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/multipart/:upload_id/chunks/:chunk
///
/// The chunk bytes are the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk)): Path<(String, u32)>,
    Query(query): Query<ChunkQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChunkRecord>, UploadError> {
    let body = request_body(&state, body)?;
    let request = ChunkUpload {
        upload_id,
        chunk,
        checksum: query.checksum,
        size: query.size,
    };
    let record = state.uploader().upload_chunk(request, &body).await?;
    Ok(Json(record))
}

/// POST /api/v1/multipart/:upload_id/done
async fn done(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<DoneResponse>, UploadError> {
    let response = state.uploader().done(&upload_id).await?;
    Ok(Json(response))
}

/// GET /api/v1/multipart/:upload_id/chunks
async fn list_chunks(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<ChunkList>, UploadError> {
    let data = state.uploader().get_all_chunks(&upload_id).await?;
    Ok(Json(ChunkList { data }))
}

/// GET /api/v1/multipart/:upload_id/chunks/:chunk
async fn get_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk)): Path<(String, u32)>,
) -> Result<Json<ChunkRecord>, UploadError> {
    let record = state.uploader().get_chunk(&upload_id, chunk).await?;
    Ok(Json(record))
}

/// POST /api/v1/upload
async fn upload(
    State(state): State<AppState>,
    Query(request): Query<SingleUpload>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ReferenceResponse>, UploadError> {
    let body = request_body(&state, body)?;
    let download_path = state.uploader().upload(request, &body).await?;
    Ok(Json(ReferenceResponse { download_path }))
}

/// POST /api/v1/upload/finalize
async fn finalize(
    State(state): State<AppState>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<ReferenceResponse>, UploadError> {
    let download_path = state
        .uploader()
        .finalize(request.resource_class, &request.download_path)
        .await?;
    Ok(Json(ReferenceResponse { download_path }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::kv::MemoryKvStore;
    use crate::routes::app;
    use crate::state::AppState;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.upload_path = dir.path().join("upload");
        config.storage.final_path = dir.path().join("cdn");
        config.storage.download_path = dir.path().join("download");
        config
    }

    fn test_app(dir: &TempDir) -> axum::Router {
        app(AppState::new(test_config(dir), Arc::new(MemoryKvStore::new())))
    }

    async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_bytes(uri: &str, body: &'static [u8]) -> Request<Body> {
        Request::post(uri).body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_multipart_over_http() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/multipart/start",
                serde_json::json!({
                    "filename": "a.png",
                    "chunks": 2,
                    "resource_class": "image",
                    "upload_id": "S1"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["upload_id"], "S1");

        let (status, body) = send(&app, post_bytes("/api/v1/multipart/S1/chunks/1?size=4", b"tail")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunk"], 1);

        // Not all chunks yet
        let (status, body) = send(&app, post_bytes("/api/v1/multipart/S1/done", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CHUNKS_NOT_ENOUGH");

        send(&app, post_bytes("/api/v1/multipart/S1/chunks/0", b"head")).await;

        let (status, body) = send(
            &app,
            Request::get("/api/v1/multipart/S1/chunks").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["chunk"], 0);
        assert_eq!(body["data"][1]["chunk"], 1);

        let (status, body) = send(&app, post_bytes("/api/v1/multipart/S1/done", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["validity"], "10m0s");
        let download_path = body["download_path"].as_str().unwrap().to_string();

        let merged = dir.path().join("upload/image/S1.png");
        assert_eq!(tokio::fs::read(&merged).await.unwrap(), b"headtail");

        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/upload/finalize",
                serde_json::json!({"resource_class": "image", "download_path": download_path}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["download_path"].as_str().unwrap().contains("where="));
        assert!(dir.path().join("cdn/image/S1.png").exists());
    }

    #[tokio::test]
    async fn test_unknown_upload_is_not_found() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let (status, body) = send(&app, post_bytes("/api/v1/multipart/nope/chunks/0", b"x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SESSION_NOT_FOUND");

        let (status, _) = send(
            &app,
            Request::get("/api/v1/multipart/nope/chunks/0").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_single_upload_over_http() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let (status, body) = send(
            &app,
            post_bytes(
                "/api/v1/upload?resource_class=icon&resource_id=logo&filename=logo.png",
                b"icon",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reference = body["download_path"].as_str().unwrap();
        assert!(reference.starts_with("icon/logo.png?v="));
        assert!(reference.ends_with("&where=upload"));

        let (status, body) = send(
            &app,
            post_bytes(
                "/api/v1/upload?resource_class=icon&filename=run.exe",
                b"MZ",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["code"], "UNSUPPORTED_EXTENSION");
    }

    #[tokio::test]
    async fn test_oversized_body_is_json_error() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.upload.default_limits.max_file_size = 8;
        config.upload.default_limits.max_chunk_size = 8;
        let app = app(AppState::new(config, Arc::new(MemoryKvStore::new())));

        send(
            &app,
            post_json(
                "/api/v1/multipart/start",
                serde_json::json!({
                    "filename": "a.png",
                    "chunks": 1,
                    "resource_class": "image",
                    "upload_id": "S1"
                }),
            ),
        )
        .await;

        let (status, body) = send(
            &app,
            post_bytes("/api/v1/multipart/S1/chunks/0", b"sixteen bytes!!!"),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "BODY_TOO_LARGE");
        assert_eq!(body["error"], "request body too large, max size 8 bytes");

        let (status, body) = send(
            &app,
            post_bytes(
                "/api/v1/upload?resource_class=icon&filename=logo.png",
                b"sixteen bytes!!!",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "BODY_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}

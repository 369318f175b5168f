//! Session Store
//!
//! Start metadata of every multipart upload, kept as JSON under a
//! per-upload key that expires with the retention window.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

use super::keys::KeySpace;
use super::types::{UploadError, UploadSession};

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    retention: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, retention: Duration) -> Self {
        Self {
            store,
            keys,
            retention,
        }
    }

    /// Persist start metadata, replacing any previous value for the same id
    pub async fn put_start(&self, session: &UploadSession) -> Result<(), UploadError> {
        let json = serde_json::to_string(session).map_err(|e| {
            tracing::error!(upload_id = %session.upload_id, error = %e, "Failed to serialize upload session");
            UploadError::Serialization(e.to_string())
        })?;

        self.store
            .set_ex(&self.keys.session(&session.upload_id), &json, self.retention)
            .await
            .map_err(|e| {
                tracing::error!(upload_id = %session.upload_id, error = %e, "Failed to store upload session");
                UploadError::from(e)
            })?;

        tracing::info!(
            upload_id = %session.upload_id,
            filename = %session.filename,
            chunks = session.chunks,
            ttl_secs = self.retention.as_secs(),
            "Stored upload session"
        );

        Ok(())
    }

    /// Load start metadata; absent, expired or empty is `SessionNotFound`
    pub async fn get_start(&self, upload_id: &str) -> Result<UploadSession, UploadError> {
        let raw = match self.store.get(&self.keys.session(upload_id)).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return Err(UploadError::SessionNotFound(upload_id.to_string())),
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to read upload session");
                return Err(UploadError::SessionNotFound(upload_id.to_string()));
            }
        };

        serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(upload_id = %upload_id, raw = %raw, error = %e, "Failed to deserialize upload session");
            UploadError::Serialization(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyConfig;
    use crate::kv::MemoryKvStore;
    use crate::upload::ResourceClass;

    fn keys() -> KeySpace {
        KeySpace::new(&KeyConfig {
            platform: "test".to_string(),
            service_name: "upload".to_string(),
            tenant_name: "platform".to_string(),
        })
    }

    fn session() -> UploadSession {
        UploadSession {
            upload_id: "S1".to_string(),
            filename: "a.png".to_string(),
            chunks: 2,
            resource_class: ResourceClass::Image,
            content_hash: None,
        }
    }

    #[tokio::test]
    async fn test_put_and_get_start() {
        let store = SessionStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(600));

        store.put_start(&session()).await.unwrap();
        let loaded = store.get_start("S1").await.unwrap();
        assert_eq!(loaded, session());
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = SessionStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(600));

        let result = store.get_start("nope").await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_session_expires_with_retention() {
        tokio::time::pause();
        let store = SessionStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(60));

        store.put_start(&session()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let result = store.get_start("S1").await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupt_session_is_internal() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set_ex(&keys().session("S1"), "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let store = SessionStore::new(kv, keys(), Duration::from_secs(60));

        let err = store.get_start("S1").await.unwrap_err();
        assert!(matches!(err, UploadError::Serialization(_)));
        assert!(!err.is_client_error());
    }
}

//! Chunk Store
//!
//! Chunk records of a multipart upload, one hash per upload and one field
//! per chunk index. Writing the same index again replaces the record.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::{KeyTtl, KvStore};

use super::keys::KeySpace;
use super::types::{ChunkRecord, UploadError};

#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    retention: Duration,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, retention: Duration) -> Self {
        Self {
            store,
            keys,
            retention,
        }
    }

    /// Store a chunk record at its index.
    ///
    /// The hash gets an expiry only while it has none, so later chunks never
    /// push the deadline set when the first chunk arrived.
    pub async fn put_chunk(&self, record: &ChunkRecord) -> Result<(), UploadError> {
        let key = self.keys.chunks(&record.upload_id);

        let json = serde_json::to_string(record).map_err(|e| {
            tracing::error!(upload_id = %record.upload_id, chunk = record.chunk, error = %e, "Failed to serialize chunk record");
            UploadError::Serialization(e.to_string())
        })?;

        self.store
            .hset(&key, &record.chunk.to_string(), &json)
            .await
            .map_err(|e| {
                tracing::error!(upload_id = %record.upload_id, chunk = record.chunk, error = %e, "Failed to store chunk record");
                UploadError::from(e)
            })?;

        tracing::debug!(
            upload_id = %record.upload_id,
            chunk = record.chunk,
            key = %key,
            "Stored chunk record"
        );

        match self.store.ttl(&key).await {
            Ok(KeyTtl::Persistent) => {
                if let Err(e) = self.store.expire(&key, self.retention).await {
                    tracing::error!(key = %key, ttl_secs = self.retention.as_secs(), error = %e, "Failed to set chunk hash expiry");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read chunk hash expiry");
            }
        }

        Ok(())
    }

    /// Every chunk record of an upload, ascending by chunk index
    pub async fn get_all_chunks(&self, upload_id: &str) -> Result<Vec<ChunkRecord>, UploadError> {
        let key = self.keys.chunks(upload_id);

        let entries = match self.store.hgetall(&key).await {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => return Err(UploadError::ChunksNotFound(upload_id.to_string())),
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to read chunk records");
                return Err(UploadError::ChunksNotFound(upload_id.to_string()));
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            match decode_record(&raw) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    tracing::warn!(key = %key, field = %field, "Skipping empty chunk record");
                }
                Err(e) => {
                    tracing::error!(key = %key, field = %field, raw = %raw, error = %e, "Failed to deserialize chunk record");
                    return Err(UploadError::Serialization(e.to_string()));
                }
            }
        }

        records.sort_by_key(|r| r.chunk);
        Ok(records)
    }

    /// One chunk record
    pub async fn get_chunk(&self, upload_id: &str, chunk: u32) -> Result<ChunkRecord, UploadError> {
        let not_found = || UploadError::ChunkNotFound {
            upload_id: upload_id.to_string(),
            chunk,
        };

        let raw = match self
            .store
            .hget(&self.keys.chunks(upload_id), &chunk.to_string())
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(not_found()),
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, chunk = chunk, error = %e, "Failed to read chunk record");
                return Err(not_found());
            }
        };

        match decode_record(&raw) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(not_found()),
            Err(e) => {
                tracing::error!(upload_id = %upload_id, chunk = chunk, raw = %raw, error = %e, "Failed to deserialize chunk record");
                Err(UploadError::Serialization(e.to_string()))
            }
        }
    }
}

/// Decode a stored record; blank or `null` values decode to `None`
fn decode_record(raw: &str) -> Result<Option<ChunkRecord>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyConfig;
    use crate::kv::MemoryKvStore;

    fn keys() -> KeySpace {
        KeySpace::new(&KeyConfig {
            platform: "test".to_string(),
            service_name: "upload".to_string(),
            tenant_name: "platform".to_string(),
        })
    }

    fn record(chunk: u32, checksum: &str) -> ChunkRecord {
        ChunkRecord {
            upload_id: "S1".to_string(),
            chunk,
            checksum: checksum.to_string(),
            validity: "10m0s".to_string(),
            download_path: format!("image/S1_{}.png?v=1&where=multi_upload", chunk),
        }
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_index() {
        let store = ChunkStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(600));

        // Numeric order, not lexical ("10" < "2" as strings)
        for chunk in [10, 2, 0, 1] {
            store.put_chunk(&record(chunk, "h")).await.unwrap();
        }

        let chunks: Vec<u32> = store
            .get_all_chunks("S1")
            .await
            .unwrap()
            .iter()
            .map(|r| r.chunk)
            .collect();
        assert_eq!(chunks, vec![0, 1, 2, 10]);
    }

    #[tokio::test]
    async fn test_overwrite_same_index() {
        let store = ChunkStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(600));

        store.put_chunk(&record(0, "first")).await.unwrap();
        store.put_chunk(&record(0, "second")).await.unwrap();

        let all = store.get_all_chunks("S1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].checksum, "second");
        assert_eq!(store.get_chunk("S1", 0).await.unwrap().checksum, "second");
    }

    #[tokio::test]
    async fn test_ttl_set_only_once() {
        tokio::time::pause();
        let kv = Arc::new(MemoryKvStore::new());
        let store = ChunkStore::new(kv.clone(), keys(), Duration::from_secs(100));
        let key = keys().chunks("S1");

        store.put_chunk(&record(0, "a")).await.unwrap();
        assert_eq!(
            kv.ttl(&key).await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(100))
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        store.put_chunk(&record(1, "b")).await.unwrap();
        // Deadline still counts from the first chunk
        assert_eq!(
            kv.ttl(&key).await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(40))
        );

        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(matches!(
            store.get_all_chunks("S1").await,
            Err(UploadError::ChunksNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_chunks() {
        let store = ChunkStore::new(Arc::new(MemoryKvStore::new()), keys(), Duration::from_secs(600));

        assert!(matches!(
            store.get_all_chunks("S1").await,
            Err(UploadError::ChunksNotFound(_))
        ));
        assert!(matches!(
            store.get_chunk("S1", 3).await,
            Err(UploadError::ChunkNotFound { chunk: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_record_skipped() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = ChunkStore::new(kv.clone(), keys(), Duration::from_secs(600));

        store.put_chunk(&record(0, "a")).await.unwrap();
        kv.hset(&keys().chunks("S1"), "1", "").await.unwrap();
        kv.hset(&keys().chunks("S1"), "2", "null").await.unwrap();

        let all = store.get_all_chunks("S1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].chunk, 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_internal() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = ChunkStore::new(kv.clone(), keys(), Duration::from_secs(600));

        kv.hset(&keys().chunks("S1"), "0", "{broken").await.unwrap();

        let err = store.get_all_chunks("S1").await.unwrap_err();
        assert!(matches!(err, UploadError::Serialization(_)));
        let err = store.get_chunk("S1", 0).await.unwrap_err();
        assert!(!err.is_client_error());
    }
}

//! In-memory reference store (§4.4).
//!
//! Grounded on the teacher's `StreamStore` (`crates/stream/src/store.rs`):
//! a `parking_lot::RwLock<HashMap<String, Arc<...>>>` registry keyed by URL
//! path, one entry per stream instance, lazy expiry on access plus a
//! background sweeper. The teacher kept append-order via one lock around
//! the whole map entry; here each instance owns its own
//! `parking_lot::RwLock<CodecState>` so unrelated streams never contend,
//! matching §5's "per-stream append lock ... duration bounded by payload
//! size, not by unrelated streams".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use durable_streams_types::{Offset, StreamConfig, StreamMetadata};
use parking_lot::RwLock;
use tracing::debug;

use crate::waitset::{WaitOutcome, WaitSet};

use super::codec::{CodecKind, CodecState};
use super::{CreateOutcome, ReadResult, Store, StoreError, StoreOptions};

struct StreamInstance {
    stream_id: String,
    config: StreamConfig,
    created_at: DateTime<Utc>,
    last_seq: RwLock<Option<String>>,
    data: RwLock<CodecState>,
    waitset: WaitSet,
}

impl StreamInstance {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.config
            .effective_expires_at(self.created_at)
            .is_some_and(|deadline| now >= deadline)
    }

    fn metadata(&self) -> StreamMetadata {
        let next_offset = Offset::from_parts(0, self.data.read().size());
        StreamMetadata {
            stream_id: self.stream_id.clone(),
            config: self.config.clone(),
            next_offset: next_offset.as_str().to_string(),
            expires_at: self.config.effective_expires_at(self.created_at),
            last_seq: self.last_seq.read().clone(),
        }
    }
}

/// Process-lifetime, non-persistent stream store.
pub struct MemoryStore {
    streams: RwLock<HashMap<String, Arc<StreamInstance>>>,
    options: StoreOptions,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(StoreOptions::default())
    }
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        MemoryStore {
            streams: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Fetch a live (non-expired) instance, evicting it in place if it has
    /// just expired (§4.4 "lazy eviction after expiresAt").
    fn get_live(&self, path: &str) -> Option<Arc<StreamInstance>> {
        let now = Utc::now();
        let found = self.streams.read().get(path).cloned();
        match found {
            Some(instance) if instance.is_expired(now) => {
                self.evict(path, &instance);
                None
            }
            other => other,
        }
    }

    fn evict(&self, path: &str, instance: &Arc<StreamInstance>) {
        self.streams.write().remove(path);
        instance.waitset.tombstone();
    }

    /// Sweep every stream for expiry once. Intended to be driven by a
    /// periodic `tokio::spawn` loop owned by the binary (§4.4's
    /// "background sweeper").
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .streams
            .read()
            .iter()
            .filter(|(_, instance)| instance.is_expired(now))
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            if let Some(instance) = self.streams.write().remove(&path) {
                debug!(path, "evicting expired stream");
                instance.waitset.tombstone();
            }
        }
    }

    /// Run [`MemoryStore::sweep_expired`] on `interval` until the store is
    /// dropped. Spawned once by the CLI at startup.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_expired();
        }
    }
}

impl Store for MemoryStore {
    async fn create(
        &self,
        path: &str,
        config: StreamConfig,
        initial_body: &[u8],
    ) -> Result<CreateOutcome, StoreError> {
        if !config.is_valid() {
            return Err(StoreError::BadRequest(
                "Stream-TTL and Stream-Expires-At are mutually exclusive".into(),
            ));
        }

        if let Some(existing) = self.get_live(path) {
            return if existing.config.matches(&config) {
                Ok(CreateOutcome::MatchedExisting(existing.metadata()))
            } else {
                Err(StoreError::Conflict(
                    "stream already exists with a different config".into(),
                ))
            };
        }

        let kind = CodecKind::for_content_type(&config.content_type);
        let mut data = CodecState::new(kind);
        data.apply_initial(initial_body)?;

        let instance = Arc::new(StreamInstance {
            stream_id: durable_streams_types::stream::derive_stream_id(path),
            config,
            created_at: Utc::now(),
            last_seq: RwLock::new(None),
            data: RwLock::new(data),
            waitset: WaitSet::new(),
        });
        let metadata = instance.metadata();

        let mut streams = self.streams.write();
        // Re-check under the write lock: another task may have created the
        // same path between our read above and taking this lock.
        if let Some(existing) = streams.get(path) {
            return if existing.config.matches(&instance.config) {
                Ok(CreateOutcome::MatchedExisting(existing.metadata()))
            } else {
                Err(StoreError::Conflict(
                    "stream already exists with a different config".into(),
                ))
            };
        }
        streams.insert(path.to_string(), instance);
        Ok(CreateOutcome::Created(metadata))
    }

    async fn append(
        &self,
        path: &str,
        content_type: &str,
        stream_seq: Option<&str>,
        body: &[u8],
    ) -> Result<Offset, StoreError> {
        let instance = self.get_live(path).ok_or(StoreError::NotFound)?;

        if durable_streams_types::content_type::normalize(content_type)
            != durable_streams_types::content_type::normalize(&instance.config.content_type)
        {
            return Err(StoreError::Conflict(
                "Content-Type does not match the stream's content-type".into(),
            ));
        }

        // Exclusive per-stream section: hold both locks only for the
        // duration of this block, never across an await.
        let next_offset = {
            let mut last_seq = instance.last_seq.write();
            if let (Some(seq), Some(last)) = (stream_seq, last_seq.as_deref()) {
                if seq <= last {
                    return Err(StoreError::Conflict("Stream-Seq must be increasing".into()));
                }
            }

            let mut data = instance.data.write();
            data.append(body)?;
            let size = data.size();
            drop(data);

            if let Some(seq) = stream_seq {
                *last_seq = Some(seq.to_string());
            }
            Offset::from_parts(0, size)
        };

        instance.waitset.wake_all();
        Ok(next_offset)
    }

    async fn read(&self, path: &str, start_offset: &Offset) -> Result<ReadResult, StoreError> {
        let instance = self.get_live(path).ok_or(StoreError::NotFound)?;
        let data = instance.data.read();

        let start = if start_offset.is_beginning() {
            0
        } else {
            let (_, position) = start_offset
                .parts()
                .ok_or_else(|| StoreError::BadRequest("malformed offset".into()))?;
            if position > data.size() {
                return Err(StoreError::BadRequest("offset beyond stream tail".into()));
            }
            position
        };

        let limit = self.options.limit_for(data.kind());
        let (body, next, up_to_date) = data.read(start, limit);

        Ok(ReadResult {
            stream_id: instance.stream_id.clone(),
            content_type: instance.config.content_type.clone(),
            body,
            next_offset: Offset::from_parts(0, next),
            up_to_date,
        })
    }

    async fn head(&self, path: &str) -> Result<StreamMetadata, StoreError> {
        self.get_live(path)
            .map(|instance| instance.metadata())
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let removed = self.streams.write().remove(path);
        match removed {
            Some(instance) => {
                instance.waitset.tombstone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn await_data(&self, path: &str, start_offset: &Offset, timeout: Duration) -> WaitOutcome {
        let instance = match self.get_live(path) {
            Some(instance) => instance,
            None => return WaitOutcome::Gone,
        };

        let start = match start_offset.parts() {
            Some((_, position)) => position,
            None => 0,
        };

        instance
            .waitset
            .wait_until(timeout, || instance.data.read().size() > start)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durable_streams_types::StreamConfig;

    fn config(content_type: &str) -> StreamConfig {
        StreamConfig {
            content_type: content_type.to_string(),
            ttl_seconds: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_then_append_then_read_roundtrips() {
        let store = MemoryStore::default();
        store.create("/s", config("text/plain"), b"").await.unwrap();
        let next = store.append("/s", "text/plain", None, b"hello").await.unwrap();
        assert_eq!(next, Offset::from_parts(0, 5));

        let result = store.read("/s", &Offset::beginning()).await.unwrap();
        assert_eq!(result.body, b"hello");
        assert!(result.up_to_date);
    }

    #[tokio::test]
    async fn create_is_idempotent_for_matching_config() {
        let store = MemoryStore::default();
        store.create("/s", config("text/plain"), b"").await.unwrap();
        let outcome = store.create("/s", config("text/plain"), b"").await.unwrap();
        assert!(matches!(outcome, CreateOutcome::MatchedExisting(_)));
    }

    #[tokio::test]
    async fn create_conflicts_on_mismatched_config() {
        let store = MemoryStore::default();
        store.create("/s", config("text/plain"), b"").await.unwrap();
        let err = store.create("/s", config("application/json"), b"").await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn append_rejects_content_type_mismatch() {
        let store = MemoryStore::default();
        store.create("/s", config("text/plain"), b"").await.unwrap();
        let err = store.append("/s", "application/json", None, b"1").await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn append_rejects_sequence_regression() {
        let store = MemoryStore::default();
        store.create("/s", config("text/plain"), b"").await.unwrap();
        store.append("/s", "text/plain", Some("10"), b"a").await.unwrap();
        let err = store.append("/s", "text/plain", Some("9"), b"b").await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn read_unknown_stream_is_not_found() {
        let store = MemoryStore::default();
        let err = store.read("/missing", &Offset::beginning()).await;
        assert!(matches!(err, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn delete_releases_waiters() {
        let store = Arc::new(MemoryStore::default());
        store.create("/s", config("text/plain"), b"").await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            waiter_store
                .await_data("/s", &Offset::beginning(), Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.delete("/s").await.unwrap();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Gone);
    }

    #[tokio::test]
    async fn await_data_wakes_on_append() {
        let store = Arc::new(MemoryStore::default());
        store.create("/s", config("text/plain"), b"").await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            waiter_store
                .await_data("/s", &Offset::beginning(), Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.append("/s", "text/plain", None, b"hi").await.unwrap();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::DataAvailable);
    }
}

//! File-backed reference store (§4.4 expansion), behind the `file-storage`
//! feature.
//!
//! Grounded on the teacher's declared-but-unused `heed` dependency in
//! `crates/stream/Cargo.toml` (an LMDB wrapper, never wired to an
//! implementation there) and the blocking-I/O-via-`spawn_blocking` pattern
//! used throughout the teacher's async code wherever it touches the
//! filesystem. Metadata lives in an LMDB environment keyed by URL path;
//! payload bytes live in one `data.bin` per stream, written by sequential,
//! append-only `std::fs::File` writes. On restart, `nextOffset` is
//! reconciled to `size(data.bin)` (§6 "Crash safety").

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use durable_streams_types::{Offset, StreamConfig, StreamMetadata};
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::waitset::{WaitOutcome, WaitSet};

use super::codec::{CodecKind, CodecState};
use super::{CreateOutcome, ReadResult, Store, StoreError, StoreOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamMetadataRecord {
    stream_id: String,
    config: StreamConfig,
    created_at: DateTime<Utc>,
    last_seq: Option<String>,
}

struct FileStreamInstance {
    path: String,
    stream_id: String,
    config: StreamConfig,
    created_at: DateTime<Utc>,
    last_seq: RwLock<Option<String>>,
    data: RwLock<CodecState>,
    data_file: PathBuf,
    waitset: WaitSet,
}

impl FileStreamInstance {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.config
            .effective_expires_at(self.created_at)
            .is_some_and(|deadline| now >= deadline)
    }

    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            stream_id: self.stream_id.clone(),
            config: self.config.clone(),
            next_offset: Offset::from_parts(0, self.data.read().size()).as_str().to_string(),
            expires_at: self.config.effective_expires_at(self.created_at),
            last_seq: self.last_seq.read().clone(),
        }
    }

    fn record(&self) -> StreamMetadataRecord {
        StreamMetadataRecord {
            stream_id: self.stream_id.clone(),
            config: self.config.clone(),
            created_at: self.created_at,
            last_seq: self.last_seq.read().clone(),
        }
    }
}

/// Reference store backed by an LMDB metadata index plus one append-only
/// file per stream.
pub struct FileStore {
    base_dir: PathBuf,
    env: Env,
    metadata_db: Database<Str, SerdeJson<StreamMetadataRecord>>,
    streams: RwLock<HashMap<String, Arc<FileStreamInstance>>>,
    options: StoreOptions,
}

impl FileStore {
    /// Open (creating if absent) the LMDB environment rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>, options: StoreOptions) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StoreError::Internal(format!("create data dir: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 30)
                .max_dbs(1)
                .open(&base_dir)
        }
        .map_err(|e| StoreError::Internal(format!("open LMDB environment: {e}")))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| StoreError::Internal(format!("begin LMDB transaction: {e}")))?;
        let metadata_db = env
            .create_database(&mut wtxn, Some("stream-metadata"))
            .map_err(|e| StoreError::Internal(format!("open metadata database: {e}")))?;
        wtxn.commit()
            .map_err(|e| StoreError::Internal(format!("commit LMDB transaction: {e}")))?;

        Ok(FileStore {
            base_dir,
            env,
            metadata_db,
            streams: RwLock::new(HashMap::new()),
            options,
        })
    }

    fn data_file_for(&self, stream_id: &str) -> PathBuf {
        self.base_dir.join(stream_id).join("data.bin")
    }

    /// Remove a stream's on-disk directory (its `data.bin`) after its
    /// metadata record is gone. `derive_stream_id` is deterministic on the
    /// path alone, so a stream recreated at the same path after delete
    /// would otherwise rehydrate the previous incarnation's bytes.
    fn remove_data_dir(&self, stream_id: &str) -> Result<(), StoreError> {
        let dir = self.base_dir.join(stream_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Internal(format!(
                "remove data dir {}: {e}",
                dir.display()
            ))),
        }
    }

    /// Load a stream instance from disk into the in-process registry, if
    /// its metadata record exists and it isn't already resident.
    fn hydrate(&self, path: &str) -> Result<Option<Arc<FileStreamInstance>>, StoreError> {
        if let Some(instance) = self.streams.read().get(path).cloned() {
            return Ok(Some(instance));
        }

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| StoreError::Internal(format!("begin LMDB read: {e}")))?;
        let record = self
            .metadata_db
            .get(&rtxn, path)
            .map_err(|e| StoreError::Internal(format!("read metadata: {e}")))?;
        let Some(record) = record else {
            return Ok(None);
        };
        drop(rtxn);

        let data_file = self.data_file_for(&record.stream_id);
        let kind = CodecKind::for_content_type(&record.config.content_type);
        let mut data = CodecState::new(kind);
        rehydrate_from_disk(&data_file, &mut data)?;

        let instance = Arc::new(FileStreamInstance {
            path: path.to_string(),
            stream_id: record.stream_id,
            config: record.config,
            created_at: record.created_at,
            last_seq: RwLock::new(record.last_seq),
            data: RwLock::new(data),
            data_file,
            waitset: WaitSet::new(),
        });

        self.streams
            .write()
            .insert(path.to_string(), instance.clone());
        Ok(Some(instance))
    }

    fn get_live(&self, path: &str) -> Result<Option<Arc<FileStreamInstance>>, StoreError> {
        let now = Utc::now();
        match self.hydrate(path)? {
            Some(instance) if instance.is_expired(now) => {
                self.evict(path, &instance)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn evict(&self, path: &str, instance: &Arc<FileStreamInstance>) -> Result<(), StoreError> {
        self.streams.write().remove(path);
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| StoreError::Internal(format!("begin LMDB write: {e}")))?;
        self.metadata_db
            .delete(&mut wtxn, path)
            .map_err(|e| StoreError::Internal(format!("delete metadata: {e}")))?;
        wtxn.commit()
            .map_err(|e| StoreError::Internal(format!("commit LMDB write: {e}")))?;
        self.remove_data_dir(&instance.stream_id)?;
        instance.waitset.tombstone();
        Ok(())
    }

    fn persist_metadata(&self, instance: &FileStreamInstance) -> Result<(), StoreError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| StoreError::Internal(format!("begin LMDB write: {e}")))?;
        self.metadata_db
            .put(&mut wtxn, &instance.path, &instance.record())
            .map_err(|e| StoreError::Internal(format!("write metadata: {e}")))?;
        wtxn.commit()
            .map_err(|e| StoreError::Internal(format!("commit LMDB write: {e}")))?;
        Ok(())
    }
}

/// Read `data.bin` in full to rebuild the in-memory codec mirror. For byte
/// streams the file contents are the buffer directly; for JSON streams
/// each line is one serialized entry.
fn rehydrate_from_disk(data_file: &Path, data: &mut CodecState) -> Result<(), StoreError> {
    if !data_file.exists() {
        return Ok(());
    }
    let mut buf = Vec::new();
    std::fs::File::open(data_file)
        .and_then(|mut f| f.read_to_end(&mut buf))
        .map_err(|e| StoreError::Internal(format!("read data file: {e}")))?;

    match data {
        CodecState::Bytes(_) => {
            data.apply_initial(&buf)?;
        }
        CodecState::Json(_) => {
            for line in buf.split(|&b| b == b'\n') {
                if line.is_empty() {
                    continue;
                }
                data.apply_initial(format!("[{}]", String::from_utf8_lossy(line)).as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Append `payload` to `data_file` on the blocking I/O pool, one call per
/// append, matching §4.4's "blocking sequential writes on a dedicated
/// worker pool". For JSON mode, `payload` is the single-line serialized
/// form of the newly appended entries.
async fn append_to_disk(data_file: PathBuf, payload: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
        if let Some(parent) = data_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&data_file)?;
        file.write_all(&payload)?;
        file.flush()
    })
    .await
    .map_err(|e| StoreError::Internal(format!("blocking task panicked: {e}")))?
    .map_err(|e| StoreError::Internal(format!("write data file: {e}")))
}

impl Store for FileStore {
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

        if let Some(existing) = self.get_live(path)? {
            return if existing.config.matches(&config) {
                Ok(CreateOutcome::MatchedExisting(existing.metadata()))
            } else {
                Err(StoreError::Conflict(
                    "stream already exists with a different config".into(),
                ))
            };
        }

        let stream_id = durable_streams_types::stream::derive_stream_id(path);
        let kind = CodecKind::for_content_type(&config.content_type);
        let mut data = CodecState::new(kind);
        data.apply_initial(initial_body)?;

        if !initial_body.is_empty() {
            append_to_disk(self.data_file_for(&stream_id), disk_payload(kind, initial_body)?).await?;
        } else {
            // Still create an empty file so a restart sees the stream exists.
            append_to_disk(self.data_file_for(&stream_id), Vec::new()).await?;
        }

        let instance = Arc::new(FileStreamInstance {
            path: path.to_string(),
            stream_id: stream_id.clone(),
            config,
            created_at: Utc::now(),
            last_seq: RwLock::new(None),
            data: RwLock::new(data),
            data_file: self.data_file_for(&stream_id),
            waitset: WaitSet::new(),
        });

        self.persist_metadata(&instance)?;
        let metadata = instance.metadata();
        self.streams.write().insert(path.to_string(), instance);
        Ok(CreateOutcome::Created(metadata))
    }

    async fn append(
        &self,
        path: &str,
        content_type: &str,
        stream_seq: Option<&str>,
        body: &[u8],
    ) -> Result<Offset, StoreError> {
        let instance = self.get_live(path)?.ok_or(StoreError::NotFound)?;

        if durable_streams_types::content_type::normalize(content_type)
            != durable_streams_types::content_type::normalize(&instance.config.content_type)
        {
            return Err(StoreError::Conflict(
                "Content-Type does not match the stream's content-type".into(),
            ));
        }

        {
            let last_seq = instance.last_seq.read();
            if let (Some(seq), Some(last)) = (stream_seq, last_seq.as_deref()) {
                if seq <= last {
                    return Err(StoreError::Conflict("Stream-Seq must be increasing".into()));
                }
            }
        }

        let kind = instance.data.read().kind();
        append_to_disk(instance.data_file.clone(), disk_payload(kind, body)?).await?;

        let next_offset = {
            let mut data = instance.data.write();
            data.append(body)?;
            Offset::from_parts(0, data.size())
        };
        if let Some(seq) = stream_seq {
            *instance.last_seq.write() = Some(seq.to_string());
        }
        self.persist_metadata(&instance)?;

        instance.waitset.wake_all();
        Ok(next_offset)
    }

    async fn read(&self, path: &str, start_offset: &Offset) -> Result<ReadResult, StoreError> {
        let instance = self.get_live(path)?.ok_or(StoreError::NotFound)?;
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
        self.get_live(path)?
            .map(|instance| instance.metadata())
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        match self.streams.write().remove(path) {
            Some(instance) => {
                let mut wtxn = self
                    .env
                    .write_txn()
                    .map_err(|e| StoreError::Internal(format!("begin LMDB write: {e}")))?;
                self.metadata_db
                    .delete(&mut wtxn, path)
                    .map_err(|e| StoreError::Internal(format!("delete metadata: {e}")))?;
                wtxn.commit()
                    .map_err(|e| StoreError::Internal(format!("commit LMDB write: {e}")))?;
                self.remove_data_dir(&instance.stream_id)?;
                debug!(path, "deleted stream");
                instance.waitset.tombstone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn await_data(&self, path: &str, start_offset: &Offset, timeout: Duration) -> WaitOutcome {
        let instance = match self.get_live(path) {
            Ok(Some(instance)) => instance,
            _ => return WaitOutcome::Gone,
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

/// Serialize `body` as the bytes that should be appended to disk: raw
/// bytes for byte streams, or one JSON-lines record per top-level entry
/// for JSON streams, so `rehydrate_from_disk` can recover the exact entry
/// boundaries after a restart.
fn disk_payload(kind: CodecKind, body: &[u8]) -> Result<Vec<u8>, StoreError> {
    match kind {
        CodecKind::Bytes => Ok(body.to_vec()),
        CodecKind::Json => {
            let value: serde_json::Value = serde_json::from_slice(body)
                .map_err(|e| StoreError::BadRequest(format!("invalid JSON body: {e}")))?;
            let entries: Vec<serde_json::Value> = match value {
                serde_json::Value::Array(items) => items,
                other => vec![other],
            };
            let mut out = Vec::new();
            for entry in entries {
                serde_json::to_writer(&mut out, &entry)
                    .map_err(|e| StoreError::Internal(format!("serialize entry: {e}")))?;
                out.push(b'\n');
            }
            Ok(out)
        }
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
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();

        store.create("/s", config("text/plain"), b"").await.unwrap();
        let next = store.append("/s", "text/plain", None, b"hello").await.unwrap();
        assert_eq!(next, Offset::from_parts(0, 5));

        let result = store.read("/s", &Offset::beginning()).await.unwrap();
        assert_eq!(result.body, b"hello");
        assert!(result.up_to_date);
    }

    #[tokio::test]
    async fn data_survives_reopening_the_store() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();
            store.create("/s", config("text/plain"), b"").await.unwrap();
            store.append("/s", "text/plain", None, b"hello").await.unwrap();
        }

        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();
        let result = store.read("/s", &Offset::beginning()).await.unwrap();
        assert_eq!(result.body, b"hello");
    }

    #[tokio::test]
    async fn delete_removes_the_on_disk_data_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();

        store.create("/s", config("text/plain"), b"").await.unwrap();
        store.append("/s", "text/plain", None, b"hello").await.unwrap();
        let stream_id = durable_streams_types::stream::derive_stream_id("/s");
        let data_file = dir.path().join(&stream_id).join("data.bin");
        assert!(data_file.exists());

        assert!(store.delete("/s").await.unwrap());
        assert!(!data_file.exists());
    }

    #[tokio::test]
    async fn recreating_a_deleted_stream_does_not_resurrect_old_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();

        store.create("/s", config("text/plain"), b"").await.unwrap();
        store.append("/s", "text/plain", None, b"stale").await.unwrap();
        store.delete("/s").await.unwrap();

        store.create("/s", config("text/plain"), b"").await.unwrap();
        let result = store.read("/s", &Offset::beginning()).await.unwrap();
        assert!(result.body.is_empty());
    }

    #[tokio::test]
    async fn read_unknown_stream_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();
        let err = store.read("/missing", &Offset::beginning()).await;
        assert!(matches!(err, Err(StoreError::NotFound)));
    }
}

//! Stream store SPI (component D, §4.4).
//!
//! Grounded on the teacher's `StreamStore` in `crates/stream/src/store.rs`:
//! same five operations (create/append/read/head/delete), same per-stream
//! exclusive-append discipline, same "publish `nextOffset` before waking
//! waiters" ordering. The teacher exposed one concrete struct; here the
//! operations are pulled out into a [`Store`] trait so the in-memory and
//! file-backed implementations share one contract and the pipeline (B) is
//! written against the trait, not a specific backend.

pub mod codec;
pub mod memory;

#[cfg(feature = "file-storage")]
pub mod file;

use std::time::Duration;

use durable_streams_types::{EngineError, ErrorKind, Offset, StreamConfig, StreamMetadata};

pub use memory::MemoryStore;

#[cfg(feature = "file-storage")]
pub use file::FileStore;

use crate::waitset::WaitOutcome;

/// Store-level failure taxonomy (§4.4 "Failure semantics"). Distinct from
/// [`EngineError`] so the store stays framework- and protocol-agnostic;
/// the pipeline is the only place these are translated.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stream not found")]
    NotFound,
    #[error("config conflict: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    /// Read at an offset below the retention floor. The reference stores
    /// never truncate, so this variant is never constructed by
    /// [`MemoryStore`] or [`FileStore`]; it exists because §4.4 names it
    /// as part of the failure taxonomy and a retention-truncating store
    /// would need it.
    #[error("offset below retention floor")]
    Gone,
    #[error("internal store error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => EngineError::new(ErrorKind::NotFound, "stream not found"),
            StoreError::Conflict(msg) => EngineError::new(ErrorKind::Conflict, msg),
            StoreError::BadRequest(msg) => EngineError::new(ErrorKind::BadRequest, msg),
            StoreError::Gone => EngineError::new(ErrorKind::Gone, "offset below retention floor"),
            StoreError::Internal(msg) => EngineError::new(ErrorKind::Internal, msg),
        }
    }
}

/// Chunk-size limits for catch-up/long-poll reads (§4.4 expansion:
/// `maxChunkSize` defaults to 1 MiB for byte streams and 1,000 entries for
/// JSON-mode streams). Not overridable per-request; it bounds a single
/// response's memory footprint. `max_chunk_bytes` doubles as the request
/// body size limiter on the write path (§7 `PayloadTooLarge`): the pipeline
/// rejects any `PUT`/`POST` body past that many bytes before it reaches the
/// store.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub max_chunk_bytes: usize,
    pub max_chunk_entries: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            max_chunk_bytes: 1 << 20,
            max_chunk_entries: 1000,
        }
    }
}

impl StoreOptions {
    pub fn limit_for(&self, kind: codec::CodecKind) -> usize {
        match kind {
            codec::CodecKind::Bytes => self.max_chunk_bytes,
            codec::CodecKind::Json => self.max_chunk_entries,
        }
    }
}

/// Outcome of [`Store::create`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// No stream existed at this URL; it was created fresh.
    Created(StreamMetadata),
    /// A stream already existed with a matching config (§4.2 idempotent create).
    MatchedExisting(StreamMetadata),
}

/// Outcome of [`Store::read`].
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub stream_id: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub next_offset: Offset,
    pub up_to_date: bool,
}

/// The store SPI named in §4.4. One implementation owns every stream
/// instance for a process; `durable-streams-http` is generic over this
/// trait so it can run against [`MemoryStore`] or [`FileStore`] unchanged.
pub trait Store: Send + Sync + 'static {
    /// Create or idempotently match a stream (§4.2 PUT contract).
    fn create(
        &self,
        path: &str,
        config: StreamConfig,
        initial_body: &[u8],
    ) -> impl std::future::Future<Output = Result<CreateOutcome, StoreError>> + Send;

    /// Append a payload (§4.2 POST contract). `stream_seq` is the raw
    /// `Stream-Seq` header value, if present.
    fn append(
        &self,
        path: &str,
        content_type: &str,
        stream_seq: Option<&str>,
        body: &[u8],
    ) -> impl std::future::Future<Output = Result<Offset, StoreError>> + Send;

    /// Catch-up read starting at `start_offset`, bounded by the codec's
    /// chunk limit (§4.4 byte/JSON-mode semantics).
    fn read(
        &self,
        path: &str,
        start_offset: &Offset,
    ) -> impl std::future::Future<Output = Result<ReadResult, StoreError>> + Send;

    /// Metadata lookup (§4.2 HEAD contract).
    fn head(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<StreamMetadata, StoreError>> + Send;

    /// Tear down a stream. Returns whether it was present.
    fn delete(&self, path: &str) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Block until `nextOffset` advances past `start_offset`, the stream is
    /// gone, or `timeout` elapses (§4.5).
    fn await_data(
        &self,
        path: &str,
        start_offset: &Offset,
        timeout: Duration,
    ) -> impl std::future::Future<Output = WaitOutcome> + Send;
}

//! Request pipeline (component B, §4.2).
//!
//! Grounded on the teacher's `handle_create`/`handle_append`/`handle_head`/
//! `handle_read`/`handle_delete`/`handle_long_poll`/`handle_sse` in
//! `crates/stream/src/server.rs`. The teacher wrote those directly against
//! `axum::extract`; here the same method-by-method contracts are
//! implemented against a framework-neutral [`ServerRequest`]/
//! [`ServerResponse`] pair (§9 "Pluggable transport adapters") so
//! `durable-streams-http` only has to translate headers in and out, never
//! re-implement protocol logic.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use durable_streams_types::{
    headers, query as query_names, validate::Query, EngineError, Offset, StreamConfig,
};
use futures::Stream;

use crate::cache;
use crate::cursor::CursorPolicy;
use crate::live::{self, Frame, LongPollOutcome};
use crate::ratelimit::{RateLimitDecision, RateLimiter, Unlimited};
use crate::store::{CreateOutcome, Store, StoreOptions};

/// HTTP method, restricted to the verbs this protocol dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Put,
    Post,
    Head,
    Get,
    Delete,
}

/// A framework-neutral inbound request. `headers` keys are compared
/// case-insensitively by [`ServerRequest::header`]; adapters may pass them
/// through verbatim.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub method: Method,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ServerRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response body shapes a handler can produce. Most responses are
/// [`ResponseBody::Empty`] or [`ResponseBody::Bytes`]; SSE responses carry
/// a lazy, possibly-unbounded [`Frame`] sequence instead.
pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    EventStream(Pin<Box<dyn Stream<Item = Frame> + Send>>),
}

pub struct ServerResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ServerResponse {
    pub fn empty(status: u16) -> Self {
        ServerResponse {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_bytes(status: u16, bytes: Vec<u8>) -> Self {
        ServerResponse {
            status,
            headers: Vec::new(),
            body: ResponseBody::Bytes(bytes),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the canonical error response: status from the kind, an
    /// `X-Error` diagnostic, `Cache-Control: no-store`, and `Retry-After`
    /// when present (§7 propagation policy).
    pub fn from_error(err: EngineError) -> Self {
        let mut resp = ServerResponse::empty(err.status_code())
            .header(headers::X_ERROR, err.message.clone())
            .header(headers::CACHE_CONTROL, cache::NO_STORE);
        if let Some(retry_after) = err.retry_after_secs {
            resp = resp.header(headers::RETRY_AFTER, retry_after.to_string());
        }
        resp
    }
}

/// Tunables that cut across components B, C, D, and F, normally sourced
/// from CLI flags/config file (§9 expansion "configuration loading").
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub long_poll_timeout: Duration,
    pub sse_lifetime: Duration,
    pub store: StoreOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            long_poll_timeout: Duration::from_secs(25),
            sse_lifetime: Duration::from_secs(60),
            store: StoreOptions::default(),
        }
    }
}

/// The request pipeline: owns the store, cursor policy, and rate limiter,
/// and is the single place store errors become [`EngineError`]s (§4.4
/// "Failure semantics", §9 "Exceptions as control flow").
pub struct Pipeline<S: Store> {
    store: Arc<S>,
    cursor_policy: Arc<CursorPolicy>,
    rate_limiter: Arc<dyn RateLimiter>,
    options: ServerOptions,
}

impl<S: Store> Pipeline<S> {
    pub fn new(store: Arc<S>, cursor_policy: Arc<CursorPolicy>, options: ServerOptions) -> Self {
        Pipeline {
            store,
            cursor_policy,
            rate_limiter: Arc::new(Unlimited),
            options,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub async fn handle(&self, req: ServerRequest) -> ServerResponse {
        if let RateLimitDecision::Reject { retry_after_secs } = self.rate_limiter.check(&req.path) {
            return ServerResponse::from_error(EngineError::too_many_requests(
                "rate limit exceeded",
                retry_after_secs,
            ));
        }

        let query = match Query::parse(&req.query) {
            Ok(q) => q,
            Err(err) => return ServerResponse::from_error(err),
        };

        match req.method {
            Method::Put => self.handle_create(&req).await,
            Method::Post => self.handle_append(&req).await,
            Method::Head => self.handle_head(&req).await,
            Method::Delete => self.handle_delete(&req).await,
            Method::Get => match query.get(query_names::LIVE) {
                None => self.handle_catch_up_read(&req, &query).await,
                Some(mode) if mode == query_names::LIVE_LONG_POLL => {
                    self.handle_long_poll(&req, &query).await
                }
                Some(mode) if mode == query_names::LIVE_SSE => self.handle_sse(&req, &query).await,
                Some(_) => ServerResponse::from_error(EngineError::bad_request(
                    "unknown 'live' query value",
                )),
            },
        }
    }

    async fn handle_create(&self, req: &ServerRequest) -> ServerResponse {
        if req.body.len() > self.options.store.max_chunk_bytes {
            return ServerResponse::from_error(EngineError::payload_too_large(format!(
                "request body of {} bytes exceeds the {}-byte limit",
                req.body.len(),
                self.options.store.max_chunk_bytes
            )));
        }
        let Some(content_type) = req.header(headers::CONTENT_TYPE) else {
            return ServerResponse::from_error(EngineError::bad_request("Content-Type is required"));
        };

        let ttl_seconds = match req.header(headers::STREAM_TTL) {
            Some(raw) => match durable_streams_types::validate::parse_ttl(raw) {
                Ok(v) => Some(v),
                Err(err) => return ServerResponse::from_error(err),
            },
            None => None,
        };
        let expires_at = match req.header(headers::STREAM_EXPIRES_AT) {
            Some(raw) => match durable_streams_types::validate::parse_expires_at(raw) {
                Ok(v) => Some(v),
                Err(err) => return ServerResponse::from_error(err),
            },
            None => None,
        };
        if ttl_seconds.is_some() && expires_at.is_some() {
            return ServerResponse::from_error(EngineError::bad_request(
                "Stream-TTL and Stream-Expires-At are mutually exclusive",
            ));
        }

        let config = StreamConfig {
            content_type: content_type.to_string(),
            ttl_seconds,
            expires_at,
        };

        match self.store.create(&req.path, config, &req.body).await {
            Ok(CreateOutcome::Created(metadata)) => ServerResponse::empty(201)
                .header(headers::LOCATION, req.path.clone())
                .header(headers::CONTENT_TYPE, metadata.config.content_type.clone())
                .header(headers::STREAM_NEXT_OFFSET, metadata.next_offset),
            Ok(CreateOutcome::MatchedExisting(metadata)) => ServerResponse::empty(200)
                .header(headers::CONTENT_TYPE, metadata.config.content_type.clone())
                .header(headers::STREAM_NEXT_OFFSET, metadata.next_offset),
            Err(err) => ServerResponse::from_error(err.into()),
        }
    }

    async fn handle_append(&self, req: &ServerRequest) -> ServerResponse {
        if req.body.is_empty() {
            return ServerResponse::from_error(EngineError::bad_request(
                "append body must not be empty",
            ));
        }
        if req.body.len() > self.options.store.max_chunk_bytes {
            return ServerResponse::from_error(EngineError::payload_too_large(format!(
                "request body of {} bytes exceeds the {}-byte limit",
                req.body.len(),
                self.options.store.max_chunk_bytes
            )));
        }
        let Some(content_type) = req.header(headers::CONTENT_TYPE) else {
            return ServerResponse::from_error(EngineError::bad_request("Content-Type is required"));
        };
        let stream_seq = match req.header(headers::STREAM_SEQ) {
            Some(raw) => match durable_streams_types::validate::parse_seq(raw) {
                Ok(v) => Some(v),
                Err(err) => return ServerResponse::from_error(err),
            },
            None => None,
        };

        match self
            .store
            .append(&req.path, content_type, stream_seq, &req.body)
            .await
        {
            Ok(next_offset) => {
                ServerResponse::empty(204).header(headers::STREAM_NEXT_OFFSET, next_offset.to_string())
            }
            Err(err) => ServerResponse::from_error(err.into()),
        }
    }

    async fn handle_head(&self, req: &ServerRequest) -> ServerResponse {
        match self.store.head(&req.path).await {
            Ok(metadata) => {
                let mut resp = ServerResponse::empty(200)
                    .header(headers::CONTENT_TYPE, metadata.config.content_type.clone())
                    .header(headers::STREAM_NEXT_OFFSET, metadata.next_offset);
                if let Some(ttl) = metadata.config.ttl_seconds {
                    resp = resp.header(headers::STREAM_TTL, ttl.to_string());
                }
                if let Some(expires_at) = metadata.expires_at {
                    resp = resp.header(headers::STREAM_EXPIRES_AT, expires_at.to_rfc3339());
                }
                resp
            }
            Err(err) => ServerResponse::from_error(err.into()),
        }
    }

    async fn handle_delete(&self, req: &ServerRequest) -> ServerResponse {
        match self.store.delete(&req.path).await {
            Ok(true) => ServerResponse::empty(204),
            Ok(false) => ServerResponse::from_error(EngineError::not_found("stream not found")),
            Err(err) => ServerResponse::from_error(err.into()),
        }
    }

    async fn handle_catch_up_read(&self, req: &ServerRequest, query: &Query) -> ServerResponse {
        let offset = match parse_offset_param(query) {
            Ok(offset) => offset,
            Err(err) => return ServerResponse::from_error(err),
        };

        let read = match self.store.read(&req.path, &offset).await {
            Ok(read) => read,
            Err(err) => return ServerResponse::from_error(err.into()),
        };

        let start_offset = if offset.is_beginning() {
            Offset::from_parts(0, 0)
        } else {
            offset
        };
        let etag = format!(
            "\"{}:{}:{}\"",
            read.stream_id,
            start_offset.as_str(),
            read.next_offset.as_str()
        );

        if read.up_to_date && req.header(headers::IF_NONE_MATCH) == Some(etag.as_str()) {
            return ServerResponse::empty(304)
                .header(headers::STREAM_UP_TO_DATE, headers::TRUE)
                .header(headers::STREAM_NEXT_OFFSET, read.next_offset.to_string())
                .header(headers::ETAG, etag);
        }

        let mut resp = ServerResponse::with_bytes(200, read.body)
            .header(headers::CONTENT_TYPE, read.content_type)
            .header(headers::STREAM_NEXT_OFFSET, read.next_offset.to_string())
            .header(headers::ETAG, etag)
            .header(headers::CACHE_CONTROL, cache::PRIVATE);
        if read.up_to_date {
            resp = resp.header(headers::STREAM_UP_TO_DATE, headers::TRUE);
        }
        resp
    }

    async fn handle_long_poll(&self, req: &ServerRequest, query: &Query) -> ServerResponse {
        let offset = match parse_live_offset_param(query) {
            Ok(offset) => offset,
            Err(err) => return ServerResponse::from_error(err),
        };
        let client_cursor = CursorPolicy::parse_client_cursor(query.get(query_names::CURSOR));

        let outcome = live::long_poll_step(
            self.store.as_ref(),
            &self.cursor_policy,
            &req.path,
            &offset,
            self.options.long_poll_timeout,
            client_cursor,
        )
        .await;

        match outcome {
            LongPollOutcome::Answered {
                body,
                content_type,
                next_offset,
                up_to_date,
                cursor,
            } => {
                let mut resp = ServerResponse::with_bytes(200, body)
                    .header(headers::CONTENT_TYPE, content_type)
                    .header(headers::STREAM_NEXT_OFFSET, next_offset.to_string())
                    .header(headers::STREAM_CURSOR, cursor);
                if up_to_date {
                    resp = resp.header(headers::STREAM_UP_TO_DATE, headers::TRUE);
                }
                resp
            }
            LongPollOutcome::TimedOut { next_offset, cursor } => ServerResponse::empty(204)
                .header(headers::STREAM_NEXT_OFFSET, next_offset.to_string())
                .header(headers::STREAM_UP_TO_DATE, headers::TRUE)
                .header(headers::STREAM_CURSOR, cursor),
            LongPollOutcome::Gone => ServerResponse::from_error(EngineError::not_found(
                "stream not found",
            )),
        }
    }

    async fn handle_sse(&self, req: &ServerRequest, query: &Query) -> ServerResponse {
        let offset = match parse_live_offset_param(query) {
            Ok(offset) => offset,
            Err(err) => return ServerResponse::from_error(err),
        };

        let metadata = match self.store.head(&req.path).await {
            Ok(metadata) => metadata,
            Err(err) => return ServerResponse::from_error(err.into()),
        };
        if !durable_streams_types::content_type::is_sse_eligible(&metadata.config.content_type) {
            return ServerResponse::from_error(EngineError::bad_request(
                "SSE requires a text/* or application/json stream",
            ));
        }

        let frames = live::sse_frames(
            self.store.clone(),
            req.path.clone(),
            offset,
            self.cursor_policy.clone(),
            self.options.sse_lifetime,
        );

        ServerResponse {
            status: 200,
            headers: vec![
                (headers::CONTENT_TYPE.to_string(), "text/event-stream".to_string()),
                (headers::CACHE_CONTROL.to_string(), cache::NO_STORE.to_string()),
            ],
            body: ResponseBody::EventStream(Box::pin(frames)),
        }
    }
}

/// Parse the `offset` query parameter, defaulting to the beginning
/// sentinel when absent (§4.2 catch-up read contract).
fn parse_offset_param(query: &Query) -> Result<Offset, EngineError> {
    match query.get(query_names::OFFSET) {
        None => Ok(Offset::beginning()),
        Some(raw) => Offset::parse(raw).map_err(|e| EngineError::bad_request(e.to_string())),
    }
}

/// Parse the `offset` query parameter for a live (long-poll/SSE) read,
/// requiring it to be present (§4.6 "Request validation requires `offset`",
/// §7 "missing `offset` on live GET" → 400).
fn parse_live_offset_param(query: &Query) -> Result<Offset, EngineError> {
    match query.get(query_names::OFFSET) {
        None => Err(EngineError::bad_request("offset is required for live reads")),
        Some(raw) => Offset::parse(raw).map_err(|e| EngineError::bad_request(e.to_string())),
    }
}

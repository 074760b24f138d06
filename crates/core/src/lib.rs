//! Framework-neutral engine for Durable Streams: components B through F.
//!
//! `durable-streams-core` has no dependency on any HTTP framework. It
//! consumes and produces the neutral [`pipeline::ServerRequest`]/
//! [`pipeline::ServerResponse`] pair; `durable-streams-http` is the only
//! crate that knows about axum.

pub mod cache;
pub mod cursor;
pub mod live;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
pub mod waitset;

pub use cursor::{CursorConfig, CursorPolicy};
pub use pipeline::{Method, Pipeline, ServerOptions, ServerRequest, ServerResponse};
pub use store::{MemoryStore, Store, StoreError, StoreOptions};

#[cfg(feature = "file-storage")]
pub use store::FileStore;

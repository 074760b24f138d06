//! Canonical header names (§6). Names MUST be preserved bit-exact on the wire.

pub const STREAM_NEXT_OFFSET: &str = "Stream-Next-Offset";
pub const STREAM_UP_TO_DATE: &str = "Stream-Up-To-Date";
pub const STREAM_CURSOR: &str = "Stream-Cursor";
pub const STREAM_TTL: &str = "Stream-TTL";
pub const STREAM_EXPIRES_AT: &str = "Stream-Expires-At";
pub const STREAM_SEQ: &str = "Stream-Seq";
pub const ETAG: &str = "ETag";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const ACCEPT: &str = "Accept";
pub const LOCATION: &str = "Location";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const RETRY_AFTER: &str = "Retry-After";
pub const X_ERROR: &str = "X-Error";

/// Canonical boolean string for `Stream-Up-To-Date: true`.
pub const TRUE: &str = "true";

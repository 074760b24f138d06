//! Canonical query parameter names and live-mode values (§6).

pub const OFFSET: &str = "offset";
pub const LIVE: &str = "live";
pub const CURSOR: &str = "cursor";

pub const LIVE_LONG_POLL: &str = "long-poll";
pub const LIVE_SSE: &str = "sse";

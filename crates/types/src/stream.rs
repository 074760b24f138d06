//! `StreamConfig` and `StreamMetadata` (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration supplied on `PUT` and compared for idempotent-create
/// matching (§4.2's "create" contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub content_type: String,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StreamConfig {
    /// §3 invariant: at most one of `ttl_seconds`/`expires_at` is set.
    pub fn is_valid(&self) -> bool {
        !(self.ttl_seconds.is_some() && self.expires_at.is_some())
    }

    /// Whether `other` describes the same stream for idempotent-create
    /// purposes (§4.2: "same content-type; same TTL or expiry").
    pub fn matches(&self, other: &StreamConfig) -> bool {
        crate::content_type::normalize(&self.content_type)
            == crate::content_type::normalize(&other.content_type)
            && self.ttl_seconds == other.ttl_seconds
            && self.expires_at == other.expires_at
    }

    /// Resolve the effective absolute deadline from `created_at`, if any.
    pub fn effective_expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(expires_at) = self.expires_at {
            return Some(expires_at);
        }
        self.ttl_seconds
            .map(|ttl| created_at + chrono::Duration::seconds(ttl as i64))
    }
}

/// Metadata describing a live stream (§3). Returned by `head` and embedded
/// in `create`/`append`/`read` results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub stream_id: String,
    pub config: StreamConfig,
    pub next_offset: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_seq: Option<String>,
}

/// Derive the stable opaque stream id from a URL path (SPEC_FULL §3
/// expansion): first 16 hex characters of the path's SHA-256 digest.
pub fn derive_stream_id(path: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content_type: &str) -> StreamConfig {
        StreamConfig {
            content_type: content_type.to_string(),
            ttl_seconds: None,
            expires_at: None,
        }
    }

    #[test]
    fn ttl_and_expires_at_are_mutually_exclusive() {
        let mut c = config("text/plain");
        assert!(c.is_valid());
        c.ttl_seconds = Some(60);
        c.expires_at = Some(Utc::now());
        assert!(!c.is_valid());
    }

    #[test]
    fn matches_ignores_content_type_parameters() {
        let a = config("application/json; charset=utf-8");
        let b = config("application/json");
        assert!(a.matches(&b));
    }

    #[test]
    fn stream_id_is_stable_and_distinguishes_paths() {
        let a = derive_stream_id("/events/a");
        let b = derive_stream_id("/events/a");
        let c = derive_stream_id("/events/b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}

//! Header and query validators (§4.1).

use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// Parse a `Stream-TTL` header value: digits only, no leading zeros unless
/// the value is exactly `"0"`.
pub fn parse_ttl(raw: &str) -> Result<u64, EngineError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::bad_request("Stream-TTL must be digits only"));
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(EngineError::bad_request(
            "Stream-TTL must not have leading zeros",
        ));
    }
    raw.parse()
        .map_err(|_| EngineError::bad_request("Stream-TTL is out of range"))
}

/// Parse a `Stream-Expires-At` header value as an RFC 3339 instant.
pub fn parse_expires_at(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::bad_request("Stream-Expires-At must be RFC 3339"))
}

/// Validate a `Stream-Seq` header value: any non-empty opaque string.
pub fn parse_seq(raw: &str) -> Result<&str, EngineError> {
    if raw.is_empty() {
        return Err(EngineError::bad_request("Stream-Seq must not be empty"));
    }
    Ok(raw)
}

/// A single parsed query key/value pair, preserving the raw query string's
/// insertion order so duplicate-key detection can report the offending key.
#[derive(Debug, Default, Clone)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Parse a raw query string (no leading `?`), rejecting any key that
    /// appears more than once (§4.1).
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let mut pairs = Vec::new();
        let mut seen = std::collections::HashSet::new();
        if raw.is_empty() {
            return Ok(Query { pairs });
        }
        for segment in raw.split('&') {
            if segment.is_empty() {
                continue;
            }
            let (key, value) = match segment.split_once('=') {
                Some((k, v)) => (k, v),
                None => (segment, ""),
            };
            let key = percent_decode(key);
            let value = percent_decode(value);
            if !seen.insert(key.clone()) {
                return Err(EngineError::bad_request(format!(
                    "query key '{key}' must not appear twice"
                )));
            }
            pairs.push((key, value));
        }
        Ok(Query { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal percent-decoding sufficient for query keys/values; `+` is left
/// as-is since query parameter names in this protocol never use it.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                16,
            ) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_rejects_leading_zeros_but_allows_bare_zero() {
        assert!(parse_ttl("0").is_ok());
        assert!(parse_ttl("042").is_err());
        assert!(parse_ttl("42").is_ok());
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("4s").is_err());
    }

    #[test]
    fn expires_at_requires_rfc3339() {
        assert!(parse_expires_at("2024-10-09T00:00:00Z").is_ok());
        assert!(parse_expires_at("not a date").is_err());
    }

    #[test]
    fn query_rejects_duplicate_keys() {
        assert!(Query::parse("offset=a&offset=b").is_err());
        assert!(Query::parse("offset=a&live=sse").is_ok());
    }

    #[test]
    fn query_empty_value_is_preserved_not_rejected_by_parser() {
        let q = Query::parse("offset=").unwrap();
        assert_eq!(q.get("offset"), Some(""));
    }
}

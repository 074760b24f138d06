//! Byte/JSON codec plug-in (§4.4 expansion, §9 "pluggable codec").
//!
//! Grounded on the teacher's `Stream::is_json()` dispatch and its
//! `format_response` trailing-comma buffer trick in
//! `crates/stream/src/store.rs`, generalized into a small [`CodecState`]
//! enum selected once at `create` time and fixed for the stream's lifetime
//! (§9: "codec identity is fixed for the stream's lifetime").

use durable_streams_types::content_type;

use super::StoreError;

/// Which codec a stream uses, chosen by its content-type at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Bytes,
    Json,
}

impl CodecKind {
    pub fn for_content_type(ct: &str) -> Self {
        if content_type::is_json(ct) {
            CodecKind::Json
        } else {
            CodecKind::Bytes
        }
    }
}

/// The codec-owned entry buffer for one stream instance.
#[derive(Debug)]
pub enum CodecState {
    Bytes(Vec<u8>),
    Json(Vec<serde_json::Value>),
}

impl CodecState {
    pub fn new(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Bytes => CodecState::Bytes(Vec::new()),
            CodecKind::Json => CodecState::Json(Vec::new()),
        }
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            CodecState::Bytes(_) => CodecKind::Bytes,
            CodecState::Json(_) => CodecKind::Json,
        }
    }

    /// `applyInitial` (§4.4): PUT's initial body. An empty JSON array or
    /// empty byte body produces an empty stream; a bare JSON value becomes
    /// one entry; a JSON array is flattened exactly one level.
    pub fn apply_initial(&mut self, body: &[u8]) -> Result<(), StoreError> {
        match self {
            CodecState::Bytes(buf) => {
                buf.extend_from_slice(body);
                Ok(())
            }
            CodecState::Json(entries) => {
                if body.is_empty() {
                    return Ok(());
                }
                match parse_json_body(body)? {
                    serde_json::Value::Array(items) => entries.extend(items),
                    other => entries.push(other),
                }
                Ok(())
            }
        }
    }

    /// `append` (§4.4): same rules as `apply_initial`, except an empty
    /// body or empty JSON array is rejected rather than accepted.
    pub fn append(&mut self, body: &[u8]) -> Result<(), StoreError> {
        match self {
            CodecState::Bytes(buf) => {
                if body.is_empty() {
                    return Err(StoreError::BadRequest("append body must not be empty".into()));
                }
                buf.extend_from_slice(body);
                Ok(())
            }
            CodecState::Json(entries) => {
                if body.is_empty() {
                    return Err(StoreError::BadRequest("append body must not be empty".into()));
                }
                match parse_json_body(body)? {
                    serde_json::Value::Array(items) => {
                        if items.is_empty() {
                            return Err(StoreError::BadRequest(
                                "append array must not be empty".into(),
                            ));
                        }
                        entries.extend(items);
                    }
                    other => entries.push(other),
                }
                Ok(())
            }
        }
    }

    /// `size` (§4.4/§9): total byte length or entry count.
    pub fn size(&self) -> u64 {
        match self {
            CodecState::Bytes(buf) => buf.len() as u64,
            CodecState::Json(entries) => entries.len() as u64,
        }
    }

    /// `read(start, limit)` (§4.4): the chunk `[start, min(size, start +
    /// limit))`, the position just past it, and whether that position is
    /// the stream tail.
    pub fn read(&self, start: u64, limit: usize) -> (Vec<u8>, u64, bool) {
        match self {
            CodecState::Bytes(buf) => {
                let start = (start as usize).min(buf.len());
                let end = start.saturating_add(limit).min(buf.len());
                (buf[start..end].to_vec(), end as u64, end == buf.len())
            }
            CodecState::Json(entries) => {
                let start = (start as usize).min(entries.len());
                let end = start.saturating_add(limit).min(entries.len());
                let bytes = json_array_wrap(&entries[start..end]);
                (bytes, end as u64, end == entries.len())
            }
        }
    }
}

fn parse_json_body(body: &[u8]) -> Result<serde_json::Value, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Serialize a slice of JSON values as a single JSON array without
/// building an intermediate `Vec<Value>` wrapper: push each element
/// followed by a comma, then replace the trailing comma with the closing
/// bracket. Cheap to build per catch-up read, since most reads touch only
/// a handful of entries.
fn json_array_wrap(values: &[serde_json::Value]) -> Vec<u8> {
    if values.is_empty() {
        return b"[]".to_vec();
    }
    let mut buf = Vec::with_capacity(values.len() * 32 + 2);
    buf.push(b'[');
    for v in values {
        serde_json::to_writer(&mut buf, v).expect("serde_json::Value serialization is infallible");
        buf.push(b',');
    }
    buf.pop();
    buf.push(b']');
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bytes_append_rejects_empty() {
        let mut s = CodecState::new(CodecKind::Bytes);
        assert!(s.append(b"").is_err());
        assert!(s.append(b"hello").is_ok());
        assert_eq!(s.size(), 5);
    }

    #[test]
    fn json_initial_accepts_empty_array() {
        let mut s = CodecState::new(CodecKind::Json);
        s.apply_initial(b"[]").unwrap();
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn json_append_rejects_empty_array() {
        let mut s = CodecState::new(CodecKind::Json);
        assert!(s.append(b"[]").is_err());
    }

    #[test]
    fn json_flattens_array_one_level() {
        let mut s = CodecState::new(CodecKind::Json);
        s.apply_initial(serde_json::to_vec(&json!([1, 2, 3])).unwrap().as_slice())
            .unwrap();
        assert_eq!(s.size(), 3);
    }

    #[test]
    fn json_bare_value_becomes_one_entry() {
        let mut s = CodecState::new(CodecKind::Json);
        s.apply_initial(serde_json::to_vec(&json!({"a": 1})).unwrap().as_slice())
            .unwrap();
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn json_read_produces_array_bytes() {
        let mut s = CodecState::new(CodecKind::Json);
        s.append(serde_json::to_vec(&json!([1, 2, 3])).unwrap().as_slice())
            .unwrap();
        let (bytes, next, up_to_date) = s.read(1, 10);
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!([2, 3]));
        assert_eq!(next, 3);
        assert!(up_to_date);
    }

    #[test]
    fn read_past_tail_is_empty_and_up_to_date() {
        let s = CodecState::new(CodecKind::Bytes);
        let (bytes, next, up_to_date) = s.read(0, 10);
        assert!(bytes.is_empty());
        assert_eq!(next, 0);
        assert!(up_to_date);
    }
}

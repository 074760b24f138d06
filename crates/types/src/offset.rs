//! The opaque, lexicographically sortable offset token (§3).

use std::cmp::Ordering;
use std::fmt;

/// Sentinel offset meaning "from the beginning of the stream".
pub const BEGINNING: &str = "-1";

/// Characters forbidden anywhere in an offset value (§4.1).
const FORBIDDEN: [char; 4] = [',', '&', '=', '?'];

/// A validated, opaque offset.
///
/// Offsets are never constructed from arbitrary client input without going
/// through [`Offset::parse`] (catch-up/long-poll/SSE query parsing) or
/// produced by the store via [`Offset::from_parts`] (append/read results).
/// Clients must treat the string representation as opaque; only the store
/// may rely on its internal structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offset(String);

impl Offset {
    /// The sentinel "beginning of stream" offset.
    pub fn beginning() -> Self {
        Offset(BEGINNING.to_string())
    }

    /// True if this is the beginning-of-stream sentinel.
    pub fn is_beginning(&self) -> bool {
        self.0 == BEGINNING
    }

    /// Build a concrete offset from a read-epoch and byte/entry count.
    ///
    /// Encoded as two 16-digit zero-padded decimal fields joined by `_`, so
    /// string ordering matches numeric ordering (the grounding
    /// implementation's `format_offset`).
    pub fn from_parts(read_epoch: u64, position: u64) -> Self {
        Offset(format!("{read_epoch:016}_{position:016}"))
    }

    /// Split a non-sentinel offset back into `(read_epoch, position)`.
    pub fn parts(&self) -> Option<(u64, u64)> {
        let (epoch, pos) = self.0.split_once('_')?;
        Some((epoch.parse().ok()?, pos.parse().ok()?))
    }

    /// Parse and validate an offset string from client input.
    ///
    /// Accepts the `-1` sentinel or a well-formed `{epoch}_{position}` pair.
    /// Rejects empty strings and any of the forbidden characters from §4.1.
    pub fn parse(raw: &str) -> Result<Self, OffsetError> {
        if raw.is_empty() {
            return Err(OffsetError::Empty);
        }
        if let Some(c) = raw.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(OffsetError::ForbiddenChar(c));
        }
        if raw == BEGINNING {
            return Ok(Offset(raw.to_string()));
        }
        let offset = Offset(raw.to_string());
        if offset.parts().is_none() {
            return Err(OffsetError::Malformed);
        }
        Ok(offset)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Offset> for String {
    fn from(value: Offset) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OffsetError {
    #[error("offset must not be empty")]
    Empty,
    #[error("offset contains forbidden character '{0}'")]
    ForbiddenChar(char),
    #[error("offset is not a recognized format")]
    Malformed,
}

/// Lexicographic comparison, matching numeric comparison for well-formed
/// concrete offsets (the sentinel compares less than every concrete offset).
pub fn compare(a: &str, b: &str) -> Ordering {
    match (a == BEGINNING, b == BEGINNING) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_is_lexicographically_ordered() {
        let a = Offset::from_parts(0, 100);
        let b = Offset::from_parts(0, 200);
        let c = Offset::from_parts(1, 0);
        assert_eq!(compare(a.as_str(), b.as_str()), Ordering::Less);
        assert_eq!(compare(b.as_str(), c.as_str()), Ordering::Less);
    }

    #[test]
    fn parse_accepts_sentinel() {
        let offset = Offset::parse("-1").unwrap();
        assert!(offset.is_beginning());
    }

    #[test]
    fn parse_rejects_empty_and_forbidden_chars() {
        assert_eq!(Offset::parse(""), Err(OffsetError::Empty));
        assert_eq!(
            Offset::parse("abc&def"),
            Err(OffsetError::ForbiddenChar('&'))
        );
    }

    #[test]
    fn parse_rejects_malformed_concrete_offset() {
        assert_eq!(Offset::parse("not-an-offset"), Err(OffsetError::Malformed));
    }

    #[test]
    fn parts_roundtrip() {
        let offset = Offset::from_parts(0, 42);
        assert_eq!(offset.parts(), Some((0, 42)));
    }
}

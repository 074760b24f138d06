//! Content-type normalization shared by store, codec selection, and SSE
//! validation.

/// Strip `;charset=...`-style parameters from a media type.
pub fn normalize(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

/// True if the normalized content type selects the JSON codec (§4.4).
pub fn is_json(content_type: &str) -> bool {
    let ct = normalize(content_type);
    ct == "application/json" || ct.ends_with("+json")
}

/// True if SSE is permitted for this content type (§4.6: `text/*` or
/// `application/json`).
pub fn is_sse_eligible(content_type: &str) -> bool {
    let ct = normalize(content_type);
    ct.starts_with("text/") || ct == "application/json"
}

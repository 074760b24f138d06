//! Cache-Control selection (component C, §4.3).

/// Default policy for mutable/read endpoints: short client-side cache with
/// a stale-while-revalidate window, so CDNs can collapse concurrent
/// catch-up reads without serving truly stale data for long.
pub const PRIVATE: &str = "private, max-age=60, stale-while-revalidate=300";

/// Variant for responses safe to share across clients at an edge cache.
pub const PUBLIC: &str = "public, max-age=60, stale-while-revalidate=300";

/// Error responses and SSE streams must never be cached.
pub const NO_STORE: &str = "no-store";

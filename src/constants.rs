//! Cross-module constants: wire-format literals the qBittorrent shim and
//! Torznab endpoint must return byte-for-byte (§6), plus the small set of
//! values multiple modules need to agree on.

/// Header passthrough allowlist for the STRM proxy's upstream responses (§4.8).
pub const STRM_PASSTHROUGH_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-range",
    "accept-ranges",
    "etag",
    "last-modified",
];

/// Upstream HTTP statuses that mean "this cached mapping is stale", handled
/// identically to a transient error for cache-invalidation purposes (§4.3, §7).
pub const STALE_MAPPING_STATUSES: &[u16] = &[403, 404, 410, 429, 451];

pub mod qbittorrent {
    /// Reported qBittorrent application version (spec §6).
    pub const APP_VERSION: &str = "4.6.0";
    /// Reported qBittorrent WebAPI version (spec §6).
    pub const WEBAPI_VERSION: &str = "2.8.18";
    /// Fixed session cookie value the shim always issues (§4.6, accept-all auth).
    pub const SESSION_COOKIE: &str = "anibridge";
}

pub mod torznab {
    /// Torznab category id/name advertised in `caps` for anime (§8 scenario 1).
    pub const ANIME_CATEGORY_NAME: &str = "TV/Anime";
}

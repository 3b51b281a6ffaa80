/// Identifies one episode of one title on one source site, independent of
/// whether it has been resolved to a playable URL yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeHandle {
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
}

impl EpisodeHandle {
    #[must_use]
    pub fn new(site: impl Into<String>, slug: impl Into<String>, season: i32, episode: i32) -> Self {
        Self {
            site: site.into(),
            slug: slug.into(),
            season,
            episode,
        }
    }
}

/// A candidate direct media URL yielded by one provider in the fallback
/// chain, along with the provider's own identifier for bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub provider: String,
    pub direct_url: String,
    /// Whether the HTTP client that performed the extraction went through
    /// the configured outbound proxy. The subsequent byte download must use
    /// the same path — mixing proxied extraction with a direct download (or
    /// vice versa) against a geo-gated CDN produces 403s (§4.2).
    pub via_proxy: bool,
}

pub mod aniworld;
pub mod megakino;
pub mod sto;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::episode::ResolvedStream;
use crate::specials::SourceSpecial;

/// Per-site slug → title(s) snapshot, atomically swapped on refresh.
#[derive(Debug, Clone, Default)]
pub struct TitleIndexSnapshot {
    pub titles: HashMap<String, String>,
    pub alt_titles: HashMap<String, Vec<String>>,
}

/// The capability surface every catalogue site implements. Instances are
/// singletons held behind [`SiteRegistry`]; the registry is built once at
/// startup and shared with every component that needs site-specific
/// behaviour (Title Index, Resolver, Release Namer's prefix selection).
#[async_trait]
pub trait CatalogSite: Send + Sync {
    /// Stable identifier used as the registry key and in logs (`aniworld`, `sto`, `megakino`).
    fn id(&self) -> &'static str;

    /// The canonical site host used in magnets and naming (`aniworld.to`, `s.to`, ...).
    fn site_host(&self) -> &'static str;

    /// Loads or refreshes the site's title index from its configured source.
    async fn load_index(&self) -> anyhow::Result<TitleIndexSnapshot>;

    /// Resolves a free-text query directly against this site, bypassing the
    /// shared Title Index scorer — used when a site needs custom matching.
    fn resolve_title<'a>(&self, snapshot: &'a TitleIndexSnapshot, query: &str) -> Option<&'a str>;

    /// Resolves a direct media URL for one episode/language/provider.
    /// `use_proxy` selects which of the site's two HTTP clients performs the
    /// extraction; the resolver keeps this consistent with how the Job's
    /// eventual download will fetch bytes, per §4.2's proxy/direct-path
    /// consistency requirement.
    async fn resolve_direct_url(
        &self,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
        preferred_provider: Option<&str>,
        use_proxy: bool,
    ) -> anyhow::Result<ResolvedStream>;

    /// Default language probing order when no availability cache row is fresh.
    fn default_languages(&self) -> &'static [&'static str];

    /// Release-group tag used in built release names for this site.
    fn release_group(&self) -> &'static str;

    /// Regex-ish description of this site's slug shape, surfaced for diagnostics only.
    fn slug_pattern(&self) -> &'static str;

    /// Season-zero "special" catalogue for a title, used by the specials
    /// mapper to cross-reference against external episode metadata. Sites
    /// that don't distinguish specials from regular episodes return empty.
    async fn list_specials(&self, _slug: &str) -> anyhow::Result<Vec<SourceSpecial>> {
        Ok(Vec::new())
    }
}

/// A site's two HTTP clients: `direct` never goes through a configured
/// outbound proxy, `proxied` always does (when one is configured). The
/// resolver's extraction/CDN fallback (§4.2) picks between them per attempt
/// rather than mutating a single client's proxy setting at runtime.
#[derive(Clone)]
pub struct DualClient {
    direct: reqwest::Client,
    proxied: reqwest::Client,
}

impl DualClient {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        let direct = reqwest::Client::new();
        let proxied = proxy_url
            .and_then(|url| reqwest::Proxy::all(url).ok())
            .and_then(|proxy| reqwest::Client::builder().proxy(proxy).build().ok())
            .unwrap_or_else(reqwest::Client::new);
        Self { direct, proxied }
    }

    #[must_use]
    pub fn pick(&self, use_proxy: bool) -> &reqwest::Client {
        if use_proxy { &self.proxied } else { &self.direct }
    }
}

/// Keyed registry of site singletons, built once at startup.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<&'static str, Arc<dyn CatalogSite>>,
}

impl SiteRegistry {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        let mut sites: HashMap<&'static str, Arc<dyn CatalogSite>> = HashMap::new();
        let aniworld: Arc<dyn CatalogSite> = Arc::new(aniworld::AniWorldSite::new(proxy_url));
        let sto: Arc<dyn CatalogSite> = Arc::new(sto::StoSite::new(proxy_url));
        let megakino: Arc<dyn CatalogSite> = Arc::new(megakino::MegakinoSite::new(proxy_url));
        sites.insert(aniworld.id(), aniworld);
        sites.insert(sto.id(), sto);
        sites.insert(megakino.id(), megakino);
        Self { sites }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn CatalogSite>> {
        self.sites.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CatalogSite>> {
        self.sites.values()
    }

    /// Movie-oriented sites are tried first for `movie` category Torznab
    /// requests, falling back to the anime sites when they yield nothing.
    #[must_use]
    pub fn movie_sites(&self) -> Vec<Arc<dyn CatalogSite>> {
        vec![self.sites["megakino"].clone()]
    }

    #[must_use]
    pub fn anime_sites(&self) -> Vec<Arc<dyn CatalogSite>> {
        vec![self.sites["aniworld"].clone(), self.sites["sto"].clone()]
    }
}

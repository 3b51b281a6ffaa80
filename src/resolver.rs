use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::episode::ResolvedStream;
use crate::domain::errors::ResolverError;
use crate::domain::language::normalize_language;
use crate::sites::{CatalogSite, SiteRegistry};

/// Walks `[preferred] ++ (provider_order \ preferred)`, short-circuiting on
/// the first provider that yields a URL. A provider is only ever asked
/// through the site's own `resolve_direct_url`, which folds in whatever
/// hoster-specific extraction that site requires (§4.2).
pub struct ProviderResolver {
    sites: Arc<SiteRegistry>,
    provider_order: Vec<String>,
    proxy_enabled: bool,
}

impl ProviderResolver {
    #[must_use]
    pub fn new(sites: Arc<SiteRegistry>, provider_order: Vec<String>, proxy_enabled: bool) -> Self {
        Self {
            sites,
            provider_order,
            proxy_enabled,
        }
    }

    fn candidate_order(&self, preferred: Option<&str>) -> Vec<String> {
        let mut order = Vec::new();
        if let Some(p) = preferred {
            let p = p.trim();
            if !p.is_empty() {
                order.push(p.to_string());
            }
        }
        for provider in &self.provider_order {
            if !order.iter().any(|o| o.eq_ignore_ascii_case(provider)) {
                order.push(provider.clone());
            }
        }
        order
    }

    /// Resolves a direct URL for one episode, retrying the full candidate
    /// walk once with the proxy disabled if every candidate fails and a
    /// proxy is configured (§4.2's extraction/CDN proxy mismatch rationale).
    pub async fn resolve(
        &self,
        site_id: &str,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
        preferred_provider: Option<&str>,
    ) -> Result<ResolvedStream, ResolverError> {
        let language = normalize_language(Some(language));
        let Some(site) = self.sites.get(site_id) else {
            return Err(ResolverError::NoProviderYieldedUrl { tried: vec![] });
        };

        match self
            .walk(&site, slug, season, episode, &language, preferred_provider, self.proxy_enabled)
            .await
        {
            Ok(stream) => Ok(stream),
            Err(ResolverError::LanguageUnavailable { requested, available }) => {
                Err(ResolverError::LanguageUnavailable { requested, available })
            }
            Err(err) if self.proxy_enabled => {
                warn!(site = site_id, "full provider walk failed with proxy enabled, retrying direct");
                self.walk(&site, slug, season, episode, &language, preferred_provider, false)
                    .await
                    .map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn walk(
        &self,
        site: &Arc<dyn CatalogSite>,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
        preferred_provider: Option<&str>,
        use_proxy: bool,
    ) -> Result<ResolvedStream, ResolverError> {
        let order = self.candidate_order(preferred_provider);
        let mut tried = Vec::new();

        for provider in &order {
            tried.push(provider.clone());
            match site
                .resolve_direct_url(slug, season, episode, language, Some(provider), use_proxy)
                .await
            {
                Ok(stream) => {
                    info!(provider = %stream.provider, "resolved direct url");
                    return Ok(stream);
                }
                Err(err) => {
                    if let Some(available) = language_unavailable_hint(&err) {
                        return Err(ResolverError::LanguageUnavailable {
                            requested: language.to_string(),
                            available,
                        });
                    }
                    warn!(provider = %provider, error = %err, "candidate provider failed");
                }
            }
        }

        Err(ResolverError::NoProviderYieldedUrl { tried })
    }
}

/// The site layer signals language-unavailability by tagging the anyhow
/// error's message with a recognisable marker rather than a bespoke error
/// type crossing the `dyn CatalogSite` boundary, then the resolver turns it
/// into a typed `ResolverError` here, at the one place that needs to branch
/// on it.
fn language_unavailable_hint(err: &anyhow::Error) -> Option<Vec<String>> {
    let msg = err.to_string();
    let marker = "language unavailable:";
    let idx = msg.find(marker)?;
    let list = &msg[idx + marker.len()..];
    Some(
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

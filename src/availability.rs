use std::sync::Arc;

use chrono::Duration;

use crate::db::repositories::availability::AvailabilityRecord;
use crate::db::Store;
use crate::resolver::ProviderResolver;

/// What the Torznab endpoint needs to build a release for one candidate
/// language: whether it's available at all, and the quality metadata to
/// fold into the release name.
#[derive(Debug, Clone)]
pub struct AvailabilityVerdict {
    pub available: bool,
    pub height: Option<i32>,
    pub vcodec: Option<String>,
    pub provider: Option<String>,
}

/// Implements §4.3's decision tree: fresh cache hit wins outright; otherwise
/// probe through the resolver and upsert the (possibly negative) result so
/// the next lookup is free. Never consulted for a real download — downloads
/// always re-resolve through [`ProviderResolver`] directly.
pub struct AvailabilityService {
    store: Store,
    resolver: Arc<ProviderResolver>,
    ttl: Duration,
}

impl AvailabilityService {
    #[must_use]
    pub fn new(store: Store, resolver: Arc<ProviderResolver>, ttl_hours: i64) -> Self {
        Self {
            store,
            resolver,
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub async fn check(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
    ) -> anyhow::Result<AvailabilityVerdict> {
        if let Some(fresh) = self
            .store
            .availability()
            .get_fresh(site, slug, season, episode, language, self.ttl)
            .await?
        {
            return Ok(AvailabilityVerdict {
                available: fresh.available,
                height: fresh.height,
                vcodec: fresh.vcodec,
                provider: fresh.provider,
            });
        }

        let verdict = match self.resolver.resolve(site, slug, season, episode, language, None).await {
            Ok(stream) => AvailabilityVerdict {
                available: true,
                height: None,
                vcodec: None,
                provider: Some(stream.provider),
            },
            Err(_) => AvailabilityVerdict {
                available: false,
                height: None,
                vcodec: None,
                provider: None,
            },
        };

        self.store
            .availability()
            .upsert(AvailabilityRecord {
                site: site.to_string(),
                slug: slug.to_string(),
                season,
                episode,
                language: language.to_string(),
                available: verdict.available,
                height: verdict.height,
                vcodec: verdict.vcodec.clone(),
                provider: verdict.provider.clone(),
                extra: None,
            })
            .await?;

        Ok(verdict)
    }

    /// Episode numbers with a fresh, available cache row anywhere in
    /// `season`, used as season-search discovery tier (b), between the
    /// metadata episode listing and sequential probing (§4.5).
    pub async fn fresh_episodes_in_season(&self, site: &str, slug: &str, season: i32) -> anyhow::Result<Vec<i32>> {
        Ok(self
            .store
            .availability()
            .fresh_available_episodes_in_season(site, slug, season, self.ttl)
            .await?)
    }

    /// Languages known fresh and available for one episode, used to order
    /// candidate-language probing ahead of falling back to a site default.
    pub async fn fresh_languages(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        episode: i32,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self
            .store
            .availability()
            .fresh_available_languages(site, slug, season, episode, self.ttl)
            .await?)
    }
}

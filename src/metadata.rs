use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::specials::MetadataEpisode;

/// External identifiers a Torznab `tvsearch` request may carry instead of a
/// free-text title (§4.5).
#[derive(Debug, Clone, Default)]
pub struct ExternalIds {
    pub tvdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
}

impl ExternalIds {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tvdb_id.is_none() && self.tmdb_id.is_none() && self.imdb_id.is_none()
    }

    fn cache_key(&self) -> String {
        format!(
            "tvdb:{}|tmdb:{}|imdb:{}",
            self.tvdb_id.as_deref().unwrap_or(""),
            self.tmdb_id.as_deref().unwrap_or(""),
            self.imdb_id.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone)]
pub struct SeriesIdentity {
    pub canonical_title: String,
    pub episodes: Vec<MetadataEpisode>,
}

#[derive(Deserialize)]
struct SkyhookEpisode {
    #[serde(rename = "seasonNumber")]
    season_number: i32,
    #[serde(rename = "episodeNumber")]
    episode_number: i32,
    title: Option<String>,
}

#[derive(Deserialize)]
struct SkyhookSeries {
    title: String,
    episodes: Vec<SkyhookEpisode>,
}

struct CacheEntry {
    identity: SeriesIdentity,
    cached_at: Instant,
}

/// Maps external identifiers (tvdb/tmdb/imdb) to a canonical series identity
/// and cached episode listing, analogous to the original's SkyHook-backed
/// lookup, bounded by a request timeout and its own TTL cache so repeated
/// Torznab `tvsearch` calls don't hammer the metadata provider.
pub struct MetadataService {
    client: reqwest::Client,
    enabled: bool,
    timeout: Duration,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl MetadataService {
    #[must_use]
    pub fn new(enabled: bool, timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            enabled,
            timeout,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, ids: &ExternalIds) -> anyhow::Result<Option<SeriesIdentity>> {
        if !self.enabled || ids.is_empty() {
            return Ok(None);
        }

        let key = ids.cache_key();
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed() < self.cache_ttl {
                    return Ok(Some(entry.identity.clone()));
                }
            }
        }

        let identity = self.fetch(ids).await?;
        if let Some(identity) = &identity {
            let mut cache = self.cache.lock().await;
            cache.insert(
                key,
                CacheEntry {
                    identity: identity.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(identity)
    }

    async fn fetch(&self, ids: &ExternalIds) -> anyhow::Result<Option<SeriesIdentity>> {
        let Some(tvdb_id) = ids.tvdb_id.as_deref() else {
            return Ok(None);
        };
        let url = format!("https://skyhook.sonarr.tv/v1/tvdb/series/en/{tvdb_id}");
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let series: SkyhookSeries = resp.json().await?;
        Ok(Some(SeriesIdentity {
            canonical_title: series.title,
            episodes: series
                .episodes
                .into_iter()
                .map(|e| MetadataEpisode {
                    season: e.season_number,
                    episode: e.episode_number,
                    title: e.title.unwrap_or_default(),
                })
                .collect(),
        }))
    }
}

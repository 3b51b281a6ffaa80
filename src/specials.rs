use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// One season-zero "special" as the source site numbers it.
#[derive(Debug, Clone)]
pub struct SourceSpecial {
    pub film_index: i32,
    pub title: String,
}

/// One episode as external metadata numbers it.
#[derive(Debug, Clone)]
pub struct MetadataEpisode {
    pub season: i32,
    pub episode: i32,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct SpecialMapping {
    pub source_film_index: i32,
    pub display_season: i32,
    pub display_episode: i32,
    pub confidence: f64,
}

struct CacheEntry {
    mapping: Vec<SpecialMapping>,
    cached_at: Instant,
}

/// Cross-references a site's season-zero catalogue against a metadata
/// source's episode listing so a special can be requested/displayed with
/// real (season, episode) coordinates while still downloading from its
/// source coordinates (§4.5 "Special-episode alias mapping").
pub struct SpecialsMapper {
    enabled: bool,
    confidence_threshold: f64,
    cache_ttl: Duration,
    cache: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl SpecialsMapper {
    #[must_use]
    pub fn new(enabled: bool, confidence_threshold: f64, cache_ttl: Duration) -> Self {
        Self {
            enabled,
            confidence_threshold,
            cache_ttl,
            cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub async fn map(
        &self,
        series_slug: &str,
        sources: &[SourceSpecial],
        metadata_episodes: &[MetadataEpisode],
    ) -> Vec<SpecialMapping> {
        if !self.enabled {
            return Vec::new();
        }

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(series_slug) {
                if entry.cached_at.elapsed() < self.cache_ttl {
                    return entry.mapping.clone();
                }
            }
        }

        let mut mapping = Vec::new();
        for source in sources {
            let source_tokens = tokenize(&source.title);
            let mut best: Option<(&MetadataEpisode, f64)> = None;
            for candidate in metadata_episodes {
                let candidate_tokens = tokenize(&candidate.title);
                let score = jaccard(&source_tokens, &candidate_tokens);
                if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                    best = Some((candidate, score));
                }
            }
            if let Some((candidate, score)) = best {
                if score >= self.confidence_threshold {
                    mapping.push(SpecialMapping {
                        source_film_index: source.film_index,
                        display_season: candidate.season,
                        display_episode: candidate.episode,
                        confidence: score,
                    });
                }
            }
        }

        let mut cache = self.cache.lock().await;
        cache.insert(
            series_slug.to_string(),
            CacheEntry {
                mapping: mapping.clone(),
                cached_at: Instant::now(),
            },
        );
        mapping
    }
}

fn tokenize(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn maps_above_threshold_only() {
        let mapper = SpecialsMapper::new(true, 0.5, Duration::from_secs(60));
        let sources = vec![SourceSpecial {
            film_index: 3,
            title: "Special Beach Episode".to_string(),
        }];
        let meta = vec![
            MetadataEpisode {
                season: 0,
                episode: 5,
                title: "Special: Beach Episode".to_string(),
            },
            MetadataEpisode {
                season: 1,
                episode: 1,
                title: "Completely Unrelated".to_string(),
            },
        ];
        let mapping = mapper.map("slug", &sources, &meta).await;
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].display_episode, 5);
    }

    #[tokio::test]
    async fn disabled_mapper_returns_nothing() {
        let mapper = SpecialsMapper::new(false, 0.5, Duration::from_secs(60));
        let mapping = mapper.map("slug", &[], &[]).await;
        assert!(mapping.is_empty());
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::sites::{SiteRegistry, TitleIndexSnapshot};

struct SiteEntry {
    snapshot: RwLock<Arc<TitleIndexSnapshot>>,
    loaded_at: Mutex<Option<Instant>>,
    load_lock: Mutex<()>,
}

impl Default for SiteEntry {
    fn default() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(TitleIndexSnapshot::default())),
            loaded_at: Mutex::new(None),
            load_lock: Mutex::new(()),
        }
    }
}

/// Keeps one title snapshot per site fresh, refreshing lazily on lookup.
/// Readers always see the previous snapshot until a refresh publishes a new
/// one — no lookup ever blocks on a concurrent refresh of a different site.
pub struct TitleIndex {
    sites: Arc<SiteRegistry>,
    refresh_interval: Duration,
    per_site: HashMap<&'static str, SiteEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub intersection: f64,
    pub jaccard: f64,
    pub contains_bonus: f64,
    pub min_confidence: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            intersection: 1.0,
            jaccard: 2.0,
            contains_bonus: 1.5,
            min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TitleMatch {
    pub site: &'static str,
    pub slug: String,
    pub score: f64,
}

impl TitleIndex {
    #[must_use]
    pub fn new(sites: Arc<SiteRegistry>, refresh_interval: Duration) -> Self {
        let mut per_site = HashMap::new();
        for site in sites.iter() {
            per_site.insert(site.id(), SiteEntry::default());
        }
        Self {
            sites,
            refresh_interval,
            per_site,
        }
    }

    async fn snapshot_for(&self, site_id: &'static str) -> Arc<TitleIndexSnapshot> {
        let Some(entry) = self.per_site.get(site_id) else {
            return Arc::new(TitleIndexSnapshot::default());
        };

        let needs_refresh = {
            let loaded_at = entry.loaded_at.lock().await;
            !self.refresh_interval.is_zero() && is_stale(*loaded_at, self.refresh_interval)
        };

        if needs_refresh {
            let _guard = entry.load_lock.lock().await;
            let still_stale = {
                let loaded_at = entry.loaded_at.lock().await;
                is_stale(*loaded_at, self.refresh_interval)
            };
            if still_stale {
                if let Some(site) = self.sites.get(site_id) {
                    match site.load_index().await {
                        Ok(fresh) => {
                            *entry.snapshot.write().await = Arc::new(fresh);
                            *entry.loaded_at.lock().await = Some(Instant::now());
                            info!(site = site_id, "title index refreshed");
                        }
                        Err(err) => {
                            warn!(site = site_id, error = %err, "title index refresh failed, keeping previous cache");
                            *entry.loaded_at.lock().await = Some(Instant::now());
                        }
                    }
                }
            }
        }

        entry.snapshot.read().await.clone()
    }

    /// Resolves a free-text query against every enabled site's index,
    /// returning the best-scoring match, or `None` when nothing clears the
    /// confidence floor. Never errors — an empty/stale index just degrades
    /// to "no slug resolved".
    pub async fn resolve(&self, query: &str, weights: ScoreWeights) -> Option<TitleMatch> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return None;
        }

        let mut best: Option<TitleMatch> = None;
        for site in self.sites.iter() {
            let snapshot = self.snapshot_for(site.id()).await;
            for (slug, title) in &snapshot.titles {
                let mut candidates = vec![title.clone()];
                if let Some(alts) = snapshot.alt_titles.get(slug) {
                    candidates.extend(alts.iter().cloned());
                }
                let best_for_slug = candidates
                    .iter()
                    .map(|c| score(&query_tokens, &tokenize(c), title, c, weights))
                    .fold(0.0_f64, f64::max);

                if best_for_slug < weights.min_confidence {
                    continue;
                }

                let candidate_match = TitleMatch {
                    site: site.id(),
                    slug: slug.clone(),
                    score: best_for_slug,
                };
                best = Some(match best {
                    None => candidate_match,
                    Some(current) if candidate_match.score > current.score => candidate_match,
                    Some(current) if (candidate_match.score - current.score).abs() < f64::EPSILON => {
                        if candidate_match.slug < current.slug {
                            candidate_match
                        } else {
                            current
                        }
                    }
                    Some(current) => current,
                });
            }
        }
        best
    }

    pub async fn resolve_on_site(&self, site_id: &'static str, slug: &str) -> Option<String> {
        let snapshot = self.snapshot_for(site_id).await;
        snapshot.titles.get(slug).cloned()
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

fn score(
    query_tokens: &[String],
    title_tokens: &[String],
    query_text: &str,
    candidate_text: &str,
    weights: ScoreWeights,
) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
    let b: HashSet<&str> = title_tokens.iter().map(String::as_str).collect();
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    let jaccard = if union > 0.0 { intersection / union } else { 0.0 };

    let q_norm = query_text.to_lowercase();
    let c_norm = candidate_text.to_lowercase();
    let contains_bonus = if c_norm.contains(&q_norm) || q_norm.contains(&c_norm) {
        1.0
    } else {
        0.0
    };

    weights.intersection * intersection + weights.jaccard * jaccard + weights.contains_bonus * contains_bonus
}

fn is_stale(loaded_at: Option<Instant>, refresh_interval: Duration) -> bool {
    match loaded_at {
        None => true,
        Some(t) => t.elapsed() > refresh_interval,
    }
}

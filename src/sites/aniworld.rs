use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::domain::episode::ResolvedStream;
use crate::domain::language::normalize_language;
use crate::specials::SourceSpecial;

use super::{CatalogSite, DualClient, TitleIndexSnapshot};

const DEFAULT_LANGUAGES: &[&str] = &["German Dub", "German Sub", "English Sub"];

/// AniWorld.to: the primary anime catalogue. Episode pages list one
/// `data-lang-key`-tagged redirect link per (provider, language) pair; the
/// redirect resolves to the hoster page that actually serves the stream.
pub struct AniWorldSite {
    client: DualClient,
    alphabet_url: String,
    base_url: String,
}

impl AniWorldSite {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        Self {
            client: DualClient::new(proxy_url),
            alphabet_url: "https://aniworld.to/animes-alphabet".to_string(),
            base_url: "https://aniworld.to".to_string(),
        }
    }

    fn slug_from_href(href: &str) -> Option<String> {
        href.strip_prefix("/anime/stream/")
            .map(|rest| rest.split(['/', '?', '#']).next().unwrap_or(rest).to_string())
    }
}

#[async_trait]
impl CatalogSite for AniWorldSite {
    fn id(&self) -> &'static str {
        "aniworld"
    }

    fn site_host(&self) -> &'static str {
        "aniworld.to"
    }

    async fn load_index(&self) -> anyhow::Result<TitleIndexSnapshot> {
        let body = self
            .client
            .pick(false)
            .get(&self.alphabet_url)
            .send()
            .await?
            .text()
            .await?;
        Ok(parse_index(&body, Self::slug_from_href))
    }

    fn resolve_title<'a>(&self, snapshot: &'a TitleIndexSnapshot, query: &str) -> Option<&'a str> {
        snapshot.titles.get(query).map(String::as_str)
    }

    async fn resolve_direct_url(
        &self,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
        preferred_provider: Option<&str>,
        use_proxy: bool,
    ) -> anyhow::Result<ResolvedStream> {
        let language = normalize_language(Some(language));
        let page_url = format!(
            "{}/anime/stream/{slug}/staffel-{season}/episode-{episode}",
            self.base_url
        );
        resolve_via_episode_page(self.client.pick(use_proxy), &page_url, &language, preferred_provider, use_proxy).await
    }

    fn default_languages(&self) -> &'static [&'static str] {
        DEFAULT_LANGUAGES
    }

    fn release_group(&self) -> &'static str {
        "anibridge"
    }

    fn slug_pattern(&self) -> &'static str {
        r"/anime/stream/([^/?#]+)"
    }

    async fn list_specials(&self, slug: &str) -> anyhow::Result<Vec<SourceSpecial>> {
        let overview_url = format!("{}/anime/stream/{slug}", self.base_url);
        let body = self.client.pick(false).get(&overview_url).send().await?.text().await?;
        let prefix = format!("/anime/stream/{slug}/filme/episode-");
        Ok(parse_specials(&body, &prefix))
    }
}

/// Shared structural parse: anchors whose href matches the site's slug
/// pattern yield `(slug, title, alt_titles)`, following §4.1's parsing rule.
pub(super) fn parse_index(html: &str, slug_from_href: impl Fn(&str) -> Option<String>) -> TitleIndexSnapshot {
    let document = Html::parse_document(html);
    let Ok(anchor_selector) = Selector::parse("a") else {
        return TitleIndexSnapshot::default();
    };

    let mut snapshot = TitleIndexSnapshot::default();
    for anchor in document.select(&anchor_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(slug) = slug_from_href(href) else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }

        let mut alts: Vec<String> = anchor
            .value()
            .attr("data-alternative-title")
            .map(|raw| {
                raw.split(',')
                    .map(|piece| piece.trim().trim_matches(['\'', '"']).to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !alts.contains(&title) {
            alts.insert(0, title.clone());
        }

        snapshot.titles.insert(slug.clone(), title);
        snapshot.alt_titles.insert(slug, alts);
    }
    snapshot
}

/// Scans an anime/series overview page for season-zero "Filme" (specials)
/// links, e.g. `/anime/stream/{slug}/filme/episode-3`, keyed by the numeric
/// film index in the href. `specials_path_prefix` is the site- and
/// slug-specific path up to and including `episode-`.
pub(super) fn parse_specials(html: &str, specials_path_prefix: &str) -> Vec<SourceSpecial> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(rest) = href.strip_prefix(specials_path_prefix) else {
            continue;
        };
        let idx_str = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        let Ok(film_index) = idx_str.parse::<i32>() else {
            continue;
        };
        if !seen.insert(film_index) {
            continue;
        }
        let title = anchor.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        out.push(SourceSpecial { film_index, title });
    }
    out.sort_by_key(|s| s.film_index);
    out
}

/// Structural provider-link extraction shared by the HTML-catalogue sites:
/// scans episode-page anchors for a `data-lang-key` matching the requested
/// language and a provider name, walking `[preferred] ++ providers` in order
/// and following each redirect once to obtain the final hoster URL.
pub(super) async fn resolve_via_episode_page(
    client: &reqwest::Client,
    page_url: &str,
    language: &str,
    preferred_provider: Option<&str>,
    via_proxy: bool,
) -> anyhow::Result<ResolvedStream> {
    let body = client.get(page_url).send().await?.text().await?;
    let document = Html::parse_document(&body);
    let Ok(link_selector) = Selector::parse("a[data-link-target]") else {
        anyhow::bail!("failed to build provider-link selector");
    };

    let mut candidates: Vec<(String, String)> = Vec::new();
    let mut advertised_languages: Vec<String> = Vec::new();
    for link in document.select(&link_selector) {
        let provider = link
            .value()
            .attr("data-provider")
            .or_else(|| link.value().attr("title"))
            .unwrap_or("unknown")
            .to_string();
        let lang_key = link.value().attr("data-lang-key");
        if let Some(l) = lang_key {
            if !advertised_languages.iter().any(|a: &String| a.eq_ignore_ascii_case(l)) {
                advertised_languages.push(l.to_string());
            }
        }
        let lang_matches = lang_key.is_none_or(|l| l.eq_ignore_ascii_case(language));
        if !lang_matches {
            continue;
        }
        if let Some(target) = link.value().attr("data-link-target") {
            candidates.push((provider, target.to_string()));
        }
    }

    // The page advertised at least one language, but never the requested
    // one: further providers on this same page can't help either, so signal
    // language-unavailability rather than a generic no-provider failure.
    if candidates.is_empty()
        && !advertised_languages.is_empty()
        && !advertised_languages.iter().any(|a| a.eq_ignore_ascii_case(language))
    {
        anyhow::bail!("language unavailable: {}", advertised_languages.join(", "));
    }

    if let Some(preferred) = preferred_provider {
        if let Some(pos) = candidates.iter().position(|(p, _)| p.eq_ignore_ascii_case(preferred)) {
            let entry = candidates.remove(pos);
            candidates.insert(0, entry);
        }
    }

    for (provider, redirect_path) in candidates {
        let redirect_url = if redirect_path.starts_with("http") {
            redirect_path
        } else {
            format!("https://aniworld.to{redirect_path}")
        };
        if let Ok(resp) = client.get(&redirect_url).send().await {
            let final_url = resp.url().to_string();
            return Ok(ResolvedStream {
                provider,
                direct_url: final_url,
                via_proxy,
            });
        }
    }

    anyhow::bail!("no provider yielded a direct url")
}

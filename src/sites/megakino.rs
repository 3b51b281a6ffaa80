use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::episode::ResolvedStream;
use crate::domain::language::normalize_language;

use super::aniworld::resolve_via_episode_page;
use super::{CatalogSite, DualClient, TitleIndexSnapshot};

const DEFAULT_LANGUAGES: &[&str] = &["Deutsch", "German Dub"];

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:serials|films)/\d+-([^./?#]+)").unwrap());

/// Megakino: a movie/series catalogue indexed from its sitemap rather than
/// an alphabet page, since it has no single browsable title list. There are
/// no alternative titles; the slug is turned into a display title locally.
pub struct MegakinoSite {
    client: DualClient,
    sitemap_url: String,
    base_url: String,
}

impl MegakinoSite {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        Self {
            client: DualClient::new(proxy_url),
            sitemap_url: "https://megakino.tv/sitemap.xml".to_string(),
            base_url: "https://megakino.tv".to_string(),
        }
    }
}

/// Turns `my-great-anime` into `My Great Anime`, mirroring the original's
/// fallback display-title derivation for slugs with no scraped title.
fn slug_to_title(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CatalogSite for MegakinoSite {
    fn id(&self) -> &'static str {
        "megakino"
    }

    fn site_host(&self) -> &'static str {
        "megakino.tv"
    }

    async fn load_index(&self) -> anyhow::Result<TitleIndexSnapshot> {
        let body = self
            .client
            .pick(false)
            .get(&self.sitemap_url)
            .send()
            .await?
            .text()
            .await?;
        let mut snapshot = TitleIndexSnapshot::default();
        for capture in SLUG_PATTERN.captures_iter(&body) {
            let slug = capture[1].to_string();
            let title = slug_to_title(&slug);
            snapshot.titles.insert(slug, title);
        }
        Ok(snapshot)
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
        let page_url = if season > 0 {
            format!("{}/serials/0-{slug}/season-{season}/episode-{episode}", self.base_url)
        } else {
            format!("{}/films/0-{slug}", self.base_url)
        };
        resolve_via_episode_page(self.client.pick(use_proxy), &page_url, &language, preferred_provider, use_proxy).await
    }

    fn default_languages(&self) -> &'static [&'static str] {
        DEFAULT_LANGUAGES
    }

    fn release_group(&self) -> &'static str {
        "megakino"
    }

    fn slug_pattern(&self) -> &'static str {
        r"/(?:serials|films)/\d+-([^./?#]+)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_display_title_from_slug() {
        assert_eq!(slug_to_title("my-great-anime"), "My Great Anime");
    }
}

use async_trait::async_trait;

use crate::domain::episode::ResolvedStream;
use crate::domain::language::normalize_language;
use crate::specials::SourceSpecial;

use super::aniworld::{parse_index, parse_specials, resolve_via_episode_page};
use super::{CatalogSite, DualClient, TitleIndexSnapshot};

const DEFAULT_LANGUAGES: &[&str] = &["German Dub", "English Dub", "German Sub"];

/// S.to: same catalogue/extraction shape as AniWorld, different host and
/// URL segments (`/serie/stream/...` rather than `/anime/stream/...`).
pub struct StoSite {
    client: DualClient,
    alphabet_url: String,
    base_url: String,
}

impl StoSite {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        Self {
            client: DualClient::new(proxy_url),
            alphabet_url: "https://s.to/serien-alphabet".to_string(),
            base_url: "https://s.to".to_string(),
        }
    }

    fn slug_from_href(href: &str) -> Option<String> {
        href.strip_prefix("/serie/stream/")
            .map(|rest| rest.split(['/', '?', '#']).next().unwrap_or(rest).to_string())
    }
}

#[async_trait]
impl CatalogSite for StoSite {
    fn id(&self) -> &'static str {
        "sto"
    }

    fn site_host(&self) -> &'static str {
        "s.to"
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
            "{}/serie/stream/{slug}/staffel-{season}/episode-{episode}",
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
        r"/serie/stream/([^/?#]+)"
    }

    async fn list_specials(&self, slug: &str) -> anyhow::Result<Vec<SourceSpecial>> {
        let overview_url = format!("{}/serie/stream/{slug}", self.base_url);
        let body = self.client.pick(false).get(&overview_url).send().await?.text().await?;
        let prefix = format!("/serie/stream/{slug}/filme/episode-");
        Ok(parse_specials(&body, &prefix))
    }
}

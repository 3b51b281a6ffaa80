use crate::db::Store;

/// Translates Sonarr's absolute-numbering queries into (season, episode)
/// pairs via [`crate::entities::episode_number_mapping`], refreshing a
/// series' mapping table on a cache miss (§4.5 "Absolute-numbering
/// translation"). The actual catalogue scrape that discovers episode titles
/// and running absolute counts is site-specific and supplied by the caller,
/// since it needs the site's own page-listing shape.
pub struct AbsoluteNumberingService {
    store: Store,
}

#[derive(Debug, Clone)]
pub struct SeasonEpisode {
    pub season: i32,
    pub episode: i32,
    pub title: Option<String>,
}

impl AbsoluteNumberingService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn translate(
        &self,
        series_slug: &str,
        absolute_number: i32,
    ) -> anyhow::Result<Option<SeasonEpisode>> {
        let found = self
            .store
            .episode_numbers()
            .find_by_absolute(series_slug, absolute_number)
            .await?;
        Ok(found.map(|row| SeasonEpisode {
            season: row.season_number,
            episode: row.episode_number,
            title: row.episode_title,
        }))
    }

    pub async fn reverse(
        &self,
        series_slug: &str,
        season: i32,
        episode: i32,
    ) -> anyhow::Result<Option<i32>> {
        let found = self
            .store
            .episode_numbers()
            .find_by_season_episode(series_slug, season, episode)
            .await?;
        Ok(found.map(|row| row.absolute_number))
    }

    /// Replaces a series' entire mapping table, e.g. after a fresh scrape of
    /// its catalogue. Rows are `(absolute_number, season, episode, title)`.
    pub async fn replace_mapping(
        &self,
        series_slug: &str,
        rows: Vec<(i32, i32, i32, Option<String>)>,
    ) -> anyhow::Result<()> {
        self.store.episode_numbers().replace_for_series(series_slug, rows).await?;
        Ok(())
    }
}

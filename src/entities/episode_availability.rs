use sea_orm::entity::prelude::*;

/// Cached verdict for whether one (site, slug, season, episode, language)
/// combination is currently watchable, with the stream quality last observed.
/// Negative results are cached too — `available = false` is a result, not an
/// absence of one.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "episode_availability")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub site: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub slug: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub season: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub episode: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub language: String,
    pub available: bool,
    pub height: Option<i32>,
    pub vcodec: Option<String>,
    pub provider: Option<String>,
    #[sea_orm(indexed)]
    pub checked_at: ChronoDateTimeUtc,
    pub extra: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

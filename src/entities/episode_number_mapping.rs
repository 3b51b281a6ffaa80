use sea_orm::entity::prelude::*;

/// Maps a series' absolute episode numbering onto (season, episode) pairs,
/// refreshed periodically from upstream metadata so season-search and
/// special-episode lookups agree with how the provider actually numbers things.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "episode_number_mapping")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub series_slug: String,
    pub absolute_number: i32,
    pub season_number: i32,
    pub episode_number: i32,
    pub episode_title: Option<String>,
    #[sea_orm(indexed)]
    pub last_synced_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

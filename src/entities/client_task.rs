use sea_orm::entity::prelude::*;

/// The qBittorrent-facing view of a download: one row per synthetic torrent
/// hash, independent of the `job` row driving the actual work so the shim can
/// answer `torrents/info` without joining into job internals. `job_id` is a
/// soft reference only, never a foreign key — a job can be cleaned up long
/// after the client has stopped asking about it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "client_task")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hash: String,
    pub name: String,
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
    #[sea_orm(indexed)]
    pub absolute_number: Option<i32>,
    pub language: String,
    #[sea_orm(indexed)]
    pub job_id: Option<String>,
    pub save_path: Option<String>,
    pub category: Option<String>,
    #[sea_orm(indexed)]
    pub added_on: ChronoDateTimeUtc,
    pub completion_on: Option<ChronoDateTimeUtc>,
    #[sea_orm(indexed)]
    pub state: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;

/// A unit of work tracked end-to-end: a download in flight, or an STRM
/// resolution kept warm for the proxy. `mode` distinguishes the two so a
/// single table can back both the legacy download API and STRM bookkeeping.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub status: String,
    pub mode: String,
    pub source_site: Option<String>,
    pub progress: f64,
    pub downloaded_bytes: i64,
    pub total_bytes: Option<i64>,
    pub speed: Option<f64>,
    pub eta: Option<i64>,
    pub message: Option<String>,
    pub result_path: Option<String>,
    #[sea_orm(indexed)]
    pub created_at: ChronoDateTimeUtc,
    #[sea_orm(indexed)]
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

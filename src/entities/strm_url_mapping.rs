use sea_orm::entity::prelude::*;

/// Durable backing for the STRM proxy's hot in-memory URL cache. The proxy
/// always consults the in-memory layer first; this table exists so a restart
/// doesn't cold-start every cached resolution at once, per the data model's
/// explicit StrmUrlMapping requirement. `provider` is part of the key because
/// the same episode can resolve to different direct URLs per provider.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "strm_url_mapping")]
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
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider: String,
    pub direct_url: String,
    pub resolved_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

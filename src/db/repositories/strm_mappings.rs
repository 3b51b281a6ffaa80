use chrono::{DateTime, Duration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection};

use crate::entities::strm_url_mapping::{ActiveModel, Column, Entity, Model};

pub struct StrmMappingRepository {
    conn: DatabaseConnection,
}

#[allow(clippy::too_many_arguments)]
pub struct StrmMappingKey<'a> {
    pub site: &'a str,
    pub slug: &'a str,
    pub season: i32,
    pub episode: i32,
    pub language: &'a str,
    pub provider: &'a str,
}

impl StrmMappingRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn upsert(&self, key: StrmMappingKey<'_>, direct_url: String) -> Result<Model, DbErr> {
        let id = (
            key.site.to_string(),
            key.slug.to_string(),
            key.season,
            key.episode,
            key.language.to_string(),
            key.provider.to_string(),
        );
        if let Some(existing) = Entity::find_by_id(id).one(&self.conn).await? {
            let mut am: ActiveModel = existing.into();
            am.direct_url = Set(direct_url);
            am.resolved_at = Set(Utc::now());
            return am.update(&self.conn).await;
        }
        let am = ActiveModel {
            site: Set(key.site.to_string()),
            slug: Set(key.slug.to_string()),
            season: Set(key.season),
            episode: Set(key.episode),
            language: Set(key.language.to_string()),
            provider: Set(key.provider.to_string()),
            direct_url: Set(direct_url),
            resolved_at: Set(Utc::now()),
        };
        am.insert(&self.conn).await
    }

    pub async fn get_fresh(&self, key: StrmMappingKey<'_>, ttl: Duration) -> Result<Option<Model>, DbErr> {
        let id = (
            key.site.to_string(),
            key.slug.to_string(),
            key.season,
            key.episode,
            key.language.to_string(),
            key.provider.to_string(),
        );
        let Some(row) = Entity::find_by_id(id).one(&self.conn).await? else {
            return Ok(None);
        };
        if is_fresh(row.resolved_at, ttl) {
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    /// Drop both the row the caller has in hand and any other cached provider
    /// for the same episode — a refresh-on-stale-status invalidation must not
    /// leave a sibling provider's equally-stale mapping behind to be served
    /// on the very next request.
    pub async fn invalidate_episode(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
    ) -> Result<u64, DbErr> {
        let res = Entity::delete_many()
            .filter(Column::Site.eq(site))
            .filter(Column::Slug.eq(slug))
            .filter(Column::Season.eq(season))
            .filter(Column::Episode.eq(episode))
            .filter(Column::Language.eq(language))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let res = Entity::delete_many()
            .filter(Column::ResolvedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

fn is_fresh(resolved_at: DateTime<Utc>, ttl: Duration) -> bool {
    if ttl <= Duration::zero() {
        return true;
    }
    Utc::now() - resolved_at <= ttl
}

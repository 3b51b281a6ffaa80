use chrono::{DateTime, Duration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection};

use crate::entities::episode_availability::{ActiveModel, Column, Entity, Model};

pub struct AvailabilityRepository {
    conn: DatabaseConnection,
}

#[allow(clippy::too_many_arguments)]
pub struct AvailabilityRecord {
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
    pub language: String,
    pub available: bool,
    pub height: Option<i32>,
    pub vcodec: Option<String>,
    pub provider: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl AvailabilityRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn upsert(&self, record: AvailabilityRecord) -> Result<Model, DbErr> {
        let key = (
            record.site.clone(),
            record.slug.clone(),
            record.season,
            record.episode,
            record.language.clone(),
        );
        if let Some(existing) = Entity::find_by_id(key).one(&self.conn).await? {
            let mut am: ActiveModel = existing.into();
            am.available = Set(record.available);
            am.height = Set(record.height);
            am.vcodec = Set(record.vcodec);
            am.provider = Set(record.provider);
            am.checked_at = Set(Utc::now());
            am.extra = Set(record.extra);
            return am.update(&self.conn).await;
        }
        let am = ActiveModel {
            site: Set(record.site),
            slug: Set(record.slug),
            season: Set(record.season),
            episode: Set(record.episode),
            language: Set(record.language),
            available: Set(record.available),
            height: Set(record.height),
            vcodec: Set(record.vcodec),
            provider: Set(record.provider),
            checked_at: Set(Utc::now()),
            extra: Set(record.extra),
        };
        am.insert(&self.conn).await
    }

    /// Returns the cached verdict only if it was checked within `ttl`.
    /// A stale row is left in place for the caller to overwrite on refresh,
    /// never deleted just for aging out.
    pub async fn get_fresh(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        episode: i32,
        language: &str,
        ttl: Duration,
    ) -> Result<Option<Model>, DbErr> {
        let key = (
            site.to_string(),
            slug.to_string(),
            season,
            episode,
            language.to_string(),
        );
        let Some(row) = Entity::find_by_id(key).one(&self.conn).await? else {
            return Ok(None);
        };
        if is_fresh(row.checked_at, ttl) {
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    /// Languages with a fresh, *available* row for one episode, in no
    /// particular order. Empty means "nothing fresh" — the caller falls
    /// back to the site's default language ordering (§4.5).
    pub async fn fresh_available_languages(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        episode: i32,
        ttl: Duration,
    ) -> Result<Vec<String>, DbErr> {
        let rows = Entity::find()
            .filter(Column::Site.eq(site))
            .filter(Column::Slug.eq(slug))
            .filter(Column::Season.eq(season))
            .filter(Column::Episode.eq(episode))
            .filter(Column::Available.eq(true))
            .all(&self.conn)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| is_fresh(row.checked_at, ttl))
            .map(|row| row.language)
            .collect())
    }

    /// Distinct episode numbers with at least one fresh, *available* row
    /// anywhere in the given season, regardless of language. Backs
    /// season-search discovery tier (b): "availability cache for that
    /// season" (§4.5), consulted after the metadata episode listing and
    /// before falling back to sequential probing.
    pub async fn fresh_available_episodes_in_season(
        &self,
        site: &str,
        slug: &str,
        season: i32,
        ttl: Duration,
    ) -> Result<Vec<i32>, DbErr> {
        let rows = Entity::find()
            .filter(Column::Site.eq(site))
            .filter(Column::Slug.eq(slug))
            .filter(Column::Season.eq(season))
            .filter(Column::Available.eq(true))
            .all(&self.conn)
            .await?;
        let mut episodes: Vec<i32> = rows
            .into_iter()
            .filter(|row| is_fresh(row.checked_at, ttl))
            .map(|row| row.episode)
            .collect();
        episodes.sort_unstable();
        episodes.dedup();
        Ok(episodes)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let res = Entity::delete_many()
            .filter(Column::CheckedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

fn is_fresh(checked_at: DateTime<Utc>, ttl: Duration) -> bool {
    if ttl <= Duration::zero() {
        return true;
    }
    Utc::now() - checked_at <= ttl
}

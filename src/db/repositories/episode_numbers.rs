use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, TransactionTrait};

use crate::entities::episode_number_mapping::{ActiveModel, Column, Entity, Model};

pub struct EpisodeNumberRepository {
    conn: DatabaseConnection,
}

impl EpisodeNumberRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn find_by_absolute(
        &self,
        series_slug: &str,
        absolute_number: i32,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::SeriesSlug.eq(series_slug))
            .filter(Column::AbsoluteNumber.eq(absolute_number))
            .one(&self.conn)
            .await
    }

    pub async fn find_by_season_episode(
        &self,
        series_slug: &str,
        season_number: i32,
        episode_number: i32,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::SeriesSlug.eq(series_slug))
            .filter(Column::SeasonNumber.eq(season_number))
            .filter(Column::EpisodeNumber.eq(episode_number))
            .one(&self.conn)
            .await
    }

    pub async fn list_for_series(&self, series_slug: &str) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::SeriesSlug.eq(series_slug))
            .all(&self.conn)
            .await
    }

    /// Replace a series' entire absolute-numbering table atomically: upstream
    /// metadata sources renumber specials/movies between refreshes, so a
    /// stale row left over from a previous mapping would silently resurface.
    pub async fn replace_for_series(
        &self,
        series_slug: &str,
        rows: Vec<(i32, i32, i32, Option<String>)>,
    ) -> Result<(), DbErr> {
        let txn = self.conn.begin().await?;

        Entity::delete_many()
            .filter(Column::SeriesSlug.eq(series_slug))
            .exec(&txn)
            .await?;

        let now = Utc::now();
        for (absolute_number, season_number, episode_number, episode_title) in rows {
            let am = ActiveModel {
                id: sea_orm::ActiveValue::NotSet,
                series_slug: Set(series_slug.to_string()),
                absolute_number: Set(absolute_number),
                season_number: Set(season_number),
                episode_number: Set(episode_number),
                episode_title: Set(episode_title),
                last_synced_at: Set(now),
            };
            am.insert(&txn).await?;
        }

        txn.commit().await
    }
}

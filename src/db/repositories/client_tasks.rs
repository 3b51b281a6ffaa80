use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, QueryOrder};

use crate::entities::client_task::{ActiveModel, Column, Entity, Model};

pub struct ClientTaskRepository {
    conn: DatabaseConnection,
}

#[allow(clippy::too_many_arguments)]
pub struct NewClientTask {
    pub hash: String,
    pub name: String,
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
    pub absolute_number: Option<i32>,
    pub language: String,
    pub job_id: Option<String>,
    pub save_path: Option<String>,
    pub category: Option<String>,
    pub state: String,
}

impl ClientTaskRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Insert or replace by hash. A second `GET /query/...` for an already
    /// known magnet must not duplicate the row it created the first time.
    pub async fn upsert(&self, task: NewClientTask) -> Result<Model, DbErr> {
        if let Some(existing) = Entity::find_by_id(task.hash.clone()).one(&self.conn).await? {
            let mut am: ActiveModel = existing.into();
            am.name = Set(task.name);
            am.site = Set(task.site);
            am.slug = Set(task.slug);
            am.season = Set(task.season);
            am.episode = Set(task.episode);
            am.absolute_number = Set(task.absolute_number);
            am.language = Set(task.language);
            am.job_id = Set(task.job_id);
            am.save_path = Set(task.save_path);
            am.category = Set(task.category);
            am.state = Set(task.state);
            return am.update(&self.conn).await;
        }
        let am = ActiveModel {
            hash: Set(task.hash),
            name: Set(task.name),
            site: Set(task.site),
            slug: Set(task.slug),
            season: Set(task.season),
            episode: Set(task.episode),
            absolute_number: Set(task.absolute_number),
            language: Set(task.language),
            job_id: Set(task.job_id),
            save_path: Set(task.save_path),
            category: Set(task.category),
            added_on: Set(Utc::now()),
            completion_on: Set(None),
            state: Set(task.state),
        };
        am.insert(&self.conn).await
    }

    pub async fn get(&self, hash: &str) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(hash.to_string()).one(&self.conn).await
    }

    pub async fn list(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find().order_by_desc(Column::AddedOn).all(&self.conn).await
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Category.eq(category))
            .order_by_desc(Column::AddedOn)
            .all(&self.conn)
            .await
    }

    pub async fn set_state(&self, hash: &str, state: &str) -> Result<(), DbErr> {
        let Some(existing) = self.get(hash).await? else {
            return Ok(());
        };
        let mut am: ActiveModel = existing.into();
        am.state = Set(state.to_string());
        if state == "completed" {
            am.completion_on = Set(Some(Utc::now()));
        }
        am.update(&self.conn).await?;
        Ok(())
    }

    pub async fn link_job(&self, hash: &str, job_id: &str) -> Result<(), DbErr> {
        let Some(existing) = self.get(hash).await? else {
            return Ok(());
        };
        let mut am: ActiveModel = existing.into();
        am.job_id = Set(Some(job_id.to_string()));
        am.update(&self.conn).await?;
        Ok(())
    }

    pub async fn delete(&self, hashes: &[String]) -> Result<u64, DbErr> {
        let res = Entity::delete_many()
            .filter(Column::Hash.is_in(hashes.to_vec()))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, QueryOrder};

use crate::entities::job::{ActiveModel, Column, Entity, Model};

/// Terminal states a job cannot leave once reached (§3 job lifecycle).
pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_DOWNLOADING: &str = "downloading";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

pub struct JobRepository {
    conn: DatabaseConnection,
}

impl JobRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, id: &str, mode: &str, source_site: Option<String>) -> Result<Model, DbErr> {
        let now = Utc::now();
        let am = ActiveModel {
            id: Set(id.to_string()),
            status: Set(STATUS_QUEUED.to_string()),
            mode: Set(mode.to_string()),
            source_site: Set(source_site),
            progress: Set(0.0),
            downloaded_bytes: Set(0),
            total_bytes: Set(None),
            speed: Set(None),
            eta: Set(None),
            message: Set(None),
            result_path: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        am.insert(&self.conn).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id.to_string()).one(&self.conn).await
    }

    pub async fn list(&self, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await
    }

    pub async fn list_active(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.is_in([STATUS_QUEUED, STATUS_DOWNLOADING]))
            .all(&self.conn)
            .await
    }

    /// Transition to `downloading`, refreshing progress fields. No-op if the
    /// job has already left the queued/downloading states — progress reports
    /// racing a cancellation must never resurrect a terminal job.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_progress(
        &self,
        id: &str,
        progress: f64,
        downloaded_bytes: i64,
        total_bytes: Option<i64>,
        speed: Option<f64>,
        eta: Option<i64>,
        message: Option<String>,
    ) -> Result<(), DbErr> {
        let Some(existing) = self.get(id).await? else {
            return Ok(());
        };
        if existing.status != STATUS_QUEUED && existing.status != STATUS_DOWNLOADING {
            return Ok(());
        }
        let mut am: ActiveModel = existing.into();
        am.status = Set(STATUS_DOWNLOADING.to_string());
        am.progress = Set(progress);
        am.downloaded_bytes = Set(downloaded_bytes);
        am.total_bytes = Set(total_bytes);
        am.speed = Set(speed);
        am.eta = Set(eta);
        am.message = Set(message);
        am.updated_at = Set(Utc::now());
        am.update(&self.conn).await?;
        Ok(())
    }

    pub async fn complete(&self, id: &str, result_path: String) -> Result<(), DbErr> {
        self.finish(id, STATUS_COMPLETED, None, Some(result_path)).await
    }

    pub async fn fail(&self, id: &str, message: String) -> Result<(), DbErr> {
        self.finish(id, STATUS_FAILED, Some(message), None).await
    }

    pub async fn cancel(&self, id: &str, message: String) -> Result<(), DbErr> {
        self.finish(id, STATUS_CANCELLED, Some(message), None).await
    }

    async fn finish(
        &self,
        id: &str,
        status: &str,
        message: Option<String>,
        result_path: Option<String>,
    ) -> Result<(), DbErr> {
        let Some(existing) = self.get(id).await? else {
            return Ok(());
        };
        if matches!(
            existing.status.as_str(),
            STATUS_COMPLETED | STATUS_FAILED | STATUS_CANCELLED
        ) {
            return Ok(());
        }
        let mut am: ActiveModel = existing.into();
        am.status = Set(status.to_string());
        if message.is_some() {
            am.message = Set(message);
        }
        if result_path.is_some() {
            am.result_path = Set(result_path);
            am.progress = Set(100.0);
        }
        am.updated_at = Set(Utc::now());
        am.update(&self.conn).await?;
        Ok(())
    }

    /// Startup recovery sweep: any job still `queued`/`downloading` when the
    /// process starts was orphaned by a restart, since the in-memory worker
    /// registry driving it no longer exists.
    pub async fn recover_interrupted(&self) -> Result<u64, DbErr> {
        let stale = self.list_active().await?;
        let count = stale.len() as u64;
        for job in stale {
            self.fail(&job.id, "Interrupted by application restart".to_string())
                .await?;
        }
        Ok(count)
    }

    pub async fn delete_older_than(&self, cutoff: DateTimeUtc) -> Result<u64, DbErr> {
        let res = Entity::delete_many()
            .filter(Column::UpdatedAt.lt(cutoff))
            .filter(Column::Status.is_in([STATUS_COMPLETED, STATUS_FAILED, STATUS_CANCELLED]))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

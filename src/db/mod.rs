use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::availability::AvailabilityRepository;
pub use repositories::client_tasks::ClientTaskRepository;
pub use repositories::episode_numbers::EpisodeNumberRepository;
pub use repositories::jobs::JobRepository;
pub use repositories::strm_mappings::StrmMappingRepository;

/// Single connection pool backing every repository. Each repository call is a
/// short-lived scoped session: no transaction spans an `.await` that isn't
/// itself a DB operation (§3, §5).
#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "database connected and migrations applied (pool {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    #[must_use]
    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn client_tasks(&self) -> ClientTaskRepository {
        ClientTaskRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn availability(&self) -> AvailabilityRepository {
        AvailabilityRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn strm_mappings(&self) -> StrmMappingRepository {
        StrmMappingRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn episode_numbers(&self) -> EpisodeNumberRepository {
        EpisodeNumberRepository::new(self.conn.clone())
    }
}

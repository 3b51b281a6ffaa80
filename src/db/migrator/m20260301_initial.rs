use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(schema.create_table_from_entity(Job).if_not_exists().to_owned())
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(EpisodeAvailability)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(EpisodeNumberMapping)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(ClientTask)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(StrmUrlMapping)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_episode_number_mapping_unique_absolute")
                    .table(EpisodeNumberMapping)
                    .col(crate::entities::episode_number_mapping::Column::SeriesSlug)
                    .col(crate::entities::episode_number_mapping::Column::AbsoluteNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_episode_number_mapping_unique_season_episode")
                    .table(EpisodeNumberMapping)
                    .col(crate::entities::episode_number_mapping::Column::SeriesSlug)
                    .col(crate::entities::episode_number_mapping::Column::SeasonNumber)
                    .col(crate::entities::episode_number_mapping::Column::EpisodeNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StrmUrlMapping).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClientTask).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EpisodeNumberMapping).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EpisodeAvailability).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Job).to_owned())
            .await?;

        Ok(())
    }
}

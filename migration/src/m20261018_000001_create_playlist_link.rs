use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PlaylistLink::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlaylistLink::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PlaylistLink::CollectionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlaylistLink::ExternalPlaylistId)
                            .string()
                            .not_null(),
                    )
                    // Cached from the source, refreshed on every successful sync
                    .col(
                        ColumnDef::new(PlaylistLink::Name)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(PlaylistLink::Owner)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(PlaylistLink::TrackCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PlaylistLink::ArtUrl).string())
                    .col(
                        ColumnDef::new(PlaylistLink::OrderIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PlaylistLink::LastSyncedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(PlaylistLink::SyncStatus)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(PlaylistLink::LastError).text())
                    .col(
                        ColumnDef::new(PlaylistLink::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlaylistLink::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_playlist_link_collection_playlist")
                    .table(PlaylistLink::Table)
                    .col(PlaylistLink::CollectionId)
                    .col(PlaylistLink::ExternalPlaylistId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PlaylistLink::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum PlaylistLink {
    Table,
    Id,
    CollectionId,
    ExternalPlaylistId,
    Name,
    Owner,
    TrackCount,
    ArtUrl,
    OrderIndex,
    LastSyncedAt,
    SyncStatus,
    LastError,
    CreatedAt,
    UpdatedAt,
}

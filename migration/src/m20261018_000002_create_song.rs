use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Song::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Song::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Song::CollectionId).big_integer().not_null())
                    .col(ColumnDef::new(Song::ExternalTrackId).string().not_null())
                    // Source metadata, overwritten on every sync
                    .col(ColumnDef::new(Song::Title).string().not_null())
                    .col(ColumnDef::new(Song::Artist).string().not_null())
                    .col(ColumnDef::new(Song::Album).string().not_null())
                    .col(ColumnDef::new(Song::ArtUrl).string())
                    .col(ColumnDef::new(Song::ExternalUri).string().not_null())
                    .col(ColumnDef::new(Song::DurationMs).big_integer().not_null())
                    // JSON object: external playlist id -> position
                    .col(
                        ColumnDef::new(Song::Membership)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    // User customization. Sync never writes notes, customized lyrics or a
                    // manual bpm, and clears the others when title or artist change
                    .col(
                        ColumnDef::new(Song::LyricsText)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Song::LyricsFetched)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Song::LyricsCustomized)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Song::Notes).text().not_null().default(""))
                    .col(ColumnDef::new(Song::Bpm).double())
                    .col(
                        ColumnDef::new(Song::BpmManual)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    // Lifecycle
                    .col(
                        ColumnDef::new(Song::Removed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Song::RemovedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Song::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Song::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Song::UpdatedAt)
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
                    .name("idx_song_collection_track")
                    .table(Song::Table)
                    .col(Song::CollectionId)
                    .col(Song::ExternalTrackId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_song_collection_removed")
                    .table(Song::Table)
                    .col(Song::CollectionId)
                    .col(Song::Removed)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Song::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Song {
    Table,
    Id,
    CollectionId,
    ExternalTrackId,
    Title,
    Artist,
    Album,
    ArtUrl,
    ExternalUri,
    DurationMs,
    Membership,
    LyricsText,
    LyricsFetched,
    LyricsCustomized,
    Notes,
    Bpm,
    BpmManual,
    Removed,
    RemovedAt,
    Version,
    CreatedAt,
    UpdatedAt,
}

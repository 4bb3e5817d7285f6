use std::collections::HashSet;
use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::entities::{playlist_link, song};
use crate::error::EngineError;
use crate::services::catalog::{self, SongCatalog, SongSort};

/// Songs whose removal flag changed during one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Songs that still listed a playlist no longer linked to the collection.
    pub detached: Vec<i64>,
    pub flagged: Vec<i64>,
    pub restored: Vec<i64>,
}

/// Active/flagged lifecycle of songs. Deleting is only allowed from flagged.
#[derive(Clone)]
pub struct RemovalTracker {
    db: Arc<Database>,
    catalog: SongCatalog,
}

impl RemovalTracker {
    pub fn new(db: Arc<Database>, catalog: SongCatalog) -> Self {
        Self { db, catalog }
    }

    /// Flags a song that is in no playlist. Returns `false` if it already was
    /// flagged, or if it is listed in a playlist again at write time.
    pub async fn flag_removed(&self, song_id: i64) -> Result<bool, EngineError> {
        let write = self
            .catalog
            .modify_song(song_id, catalog::flag_if_orphaned)
            .await?;

        if write.changed() {
            tracing::info!(song_id, "Flagged song as removed");
        }
        Ok(write.changed())
    }

    /// Clears the removal flag. Returns `false` if the song was not flagged.
    pub async fn restore(&self, song_id: i64) -> Result<bool, EngineError> {
        let write = self.catalog.modify_song(song_id, catalog::unflag).await?;

        if write.changed() {
            tracing::info!(song_id, "Restored song");
        }
        Ok(write.changed())
    }

    /// Deletes a flagged song for good. The flag check is part of the delete
    /// itself, so a song restored concurrently is never deleted.
    #[instrument(skip(self))]
    pub async fn permanently_delete(&self, song_id: i64) -> Result<(), EngineError> {
        let result = song::Entity::delete_many()
            .filter(song::Column::Id.eq(song_id))
            .filter(song::Column::Removed.eq(true))
            .exec(&self.db.conn)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish a missing song from an active one.
            self.catalog.find_row(song_id).await?;
            return Err(EngineError::NotRemoved(song_id));
        }

        tracing::info!(song_id, "Deleted song");
        Ok(())
    }

    /// Drops entries of unlinked playlists, flags every song that lost all of
    /// its playlists and restores every flagged song that is back in one.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, collection_id: i64) -> Result<ReconcileOutcome, EngineError> {
        let mut outcome = ReconcileOutcome {
            detached: self.drop_unlinked_membership(collection_id).await?,
            ..ReconcileOutcome::default()
        };

        for orphan in self
            .catalog
            .list_songs_with_empty_membership(collection_id)
            .await?
            .into_iter()
            .filter(|s| !s.removed)
        {
            match self.flag_removed(orphan.id).await {
                Ok(true) => outcome.flagged.push(orphan.id),
                Ok(false) => {}
                Err(EngineError::FinalConflict { song }) => {
                    tracing::warn!(%song, "Could not flag song, will retry next sync");
                }
                Err(e) => return Err(e),
            }
        }

        for flagged in self
            .catalog
            .list_flagged_songs(collection_id)
            .await?
            .into_iter()
            .filter(|s| !s.membership.is_empty())
        {
            let restored = self
                .catalog
                .modify_song(flagged.id, catalog::unflag_if_reappeared)
                .await;
            match restored {
                Ok(write) if write.changed() => {
                    tracing::info!(song_id = flagged.id, "Song is back in a playlist, restored");
                    outcome.restored.push(flagged.id);
                }
                Ok(_) => {}
                Err(EngineError::FinalConflict { song }) => {
                    tracing::warn!(%song, "Could not restore song, will retry next sync");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Removes membership entries left behind for playlists that are no
    /// longer linked, e.g. by an unlink that gave up on a song.
    async fn drop_unlinked_membership(&self, collection_id: i64) -> Result<Vec<i64>, EngineError> {
        // Songs are read before links, so an entry of a playlist linked in
        // between is never mistaken for a stale one.
        let songs = self
            .catalog
            .list_songs(collection_id, SongSort::default(), true)
            .await?;
        let linked: HashSet<String> = playlist_link::Entity::find()
            .filter(playlist_link::Column::CollectionId.eq(collection_id))
            .all(&self.db.conn)
            .await?
            .into_iter()
            .map(|link| link.external_playlist_id)
            .collect();

        let mut detached = Vec::new();
        for song in songs {
            let stale: Vec<&str> = song
                .membership
                .0
                .keys()
                .map(String::as_str)
                .filter(|p| !linked.contains(*p))
                .collect();
            if stale.is_empty() {
                continue;
            }

            let write = self
                .catalog
                .modify_song(song.id, |current| catalog::drop_playlists(current, &stale))
                .await;
            match write {
                Ok(write) if write.changed() => {
                    tracing::info!(song_id = song.id, playlists = ?stale, "Dropped unlinked playlists from song");
                    detached.push(song.id);
                }
                Ok(_) | Err(EngineError::SongNotFound(_)) => {}
                Err(EngineError::FinalConflict { song }) => {
                    tracing::warn!(%song, "Could not drop unlinked playlists, will retry next sync");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(detached)
    }
}

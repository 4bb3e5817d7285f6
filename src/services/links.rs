use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::entities::playlist_link::{self, SyncStatus};
use crate::error::EngineError;
use crate::ports::playlist_source::PlaylistMetadata;
use crate::services::catalog::SongCatalog;
use crate::services::removal::RemovalTracker;

/// Songs touched by unlinking a playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnlinkOutcome {
    pub affected: Vec<i64>,
    /// Subset of `affected` left in no playlist and flagged as removed.
    pub flagged: Vec<i64>,
    /// Songs whose write kept losing races. The next sync finishes them.
    pub conflicts: Vec<i64>,
}

#[derive(Clone)]
pub struct PlaylistLinkRegistry {
    db: Arc<Database>,
    catalog: SongCatalog,
    removal: RemovalTracker,
}

impl PlaylistLinkRegistry {
    pub fn new(db: Arc<Database>, catalog: SongCatalog, removal: RemovalTracker) -> Self {
        Self {
            db,
            catalog,
            removal,
        }
    }

    #[instrument(skip(self))]
    pub async fn link(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<playlist_link::Model, EngineError> {
        if self.find_link(collection_id, playlist_id).await?.is_some() {
            return Err(already_linked(collection_id, playlist_id));
        }

        let order_index = playlist_link::Entity::find()
            .filter(playlist_link::Column::CollectionId.eq(collection_id))
            .order_by_desc(playlist_link::Column::OrderIndex)
            .one(&self.db.conn)
            .await?
            .map(|last| last.order_index + 1)
            .unwrap_or(0);

        let link = playlist_link::ActiveModel {
            collection_id: Set(collection_id),
            external_playlist_id: Set(playlist_id.to_string()),
            order_index: Set(order_index),
            ..playlist_link::ActiveModel::new()
        };

        match link.insert(&self.db.conn).await {
            Ok(model) => {
                tracing::info!(order_index, "Linked playlist");
                Ok(model)
            }
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(already_linked(collection_id, playlist_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the link, then drops the playlist from every song and flags
    /// the songs it leaves in no playlist right away.
    #[instrument(skip(self))]
    pub async fn unlink(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<UnlinkOutcome, EngineError> {
        let link = self.get_link(collection_id, playlist_id).await?;

        // The link goes first: a sync still merging this playlist then fails
        // to record its result and detaches what it wrote itself.
        let deleted = playlist_link::Entity::delete_by_id(link.id)
            .exec(&self.db.conn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(not_linked(collection_id, playlist_id));
        }

        let outcome = self.detach_playlist(collection_id, playlist_id).await?;

        tracing::info!(
            affected = outcome.affected.len(),
            flagged = outcome.flagged.len(),
            conflicts = outcome.conflicts.len(),
            "Unlinked playlist"
        );

        Ok(outcome)
    }

    /// Drops a playlist that is no longer linked from every song and flags
    /// the songs left in no playlist.
    pub(crate) async fn detach_playlist(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<UnlinkOutcome, EngineError> {
        let removal = self
            .catalog
            .remove_playlist_membership(collection_id, playlist_id)
            .await?;

        let mut outcome = UnlinkOutcome {
            affected: removal.removed,
            flagged: Vec::new(),
            conflicts: removal.conflicts,
        };
        for &song_id in &outcome.affected {
            match self.removal.flag_removed(song_id).await {
                Ok(true) => outcome.flagged.push(song_id),
                Ok(false) => {}
                Err(EngineError::FinalConflict { song }) => {
                    tracing::warn!(%song, "Could not flag song, the next sync will");
                    outcome.conflicts.push(song_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Rewrites `order_index` of every link in one transaction. `ordered_ids`
    /// must name each linked playlist exactly once.
    #[instrument(skip(self))]
    pub async fn reorder(
        &self,
        collection_id: i64,
        ordered_ids: &[String],
    ) -> Result<Vec<playlist_link::Model>, EngineError> {
        let links = self.list_links(collection_id).await?;
        let invalid = |reason: String| EngineError::InvalidOrder {
            collection_id,
            reason,
        };

        let mut seen = HashSet::new();
        if let Some(dup) = ordered_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(invalid(format!("playlist {dup} listed more than once")));
        }
        if let Some(unknown) = ordered_ids
            .iter()
            .find(|id| !links.iter().any(|l| &l.external_playlist_id == *id))
        {
            return Err(invalid(format!("playlist {unknown} is not linked")));
        }
        if let Some(missing) = links
            .iter()
            .find(|l| !seen.contains(l.external_playlist_id.as_str()))
        {
            return Err(invalid(format!(
                "playlist {} is missing from the new order",
                missing.external_playlist_id
            )));
        }

        let txn = self.db.conn.begin().await?;
        for link in links {
            let Some(index) = ordered_ids
                .iter()
                .position(|id| *id == link.external_playlist_id)
            else {
                continue;
            };
            let index = i32::try_from(index).unwrap_or(i32::MAX);
            if link.order_index == index {
                continue;
            }

            let mut active: playlist_link::ActiveModel = link.into();
            active.order_index = Set(index);
            active.update(&txn).await?;
        }
        txn.commit().await?;

        self.list_links(collection_id).await
    }

    /// Links of a collection in display order.
    pub async fn list_links(
        &self,
        collection_id: i64,
    ) -> Result<Vec<playlist_link::Model>, EngineError> {
        Ok(playlist_link::Entity::find()
            .filter(playlist_link::Column::CollectionId.eq(collection_id))
            .order_by_asc(playlist_link::Column::OrderIndex)
            .order_by_asc(playlist_link::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    pub async fn get_link(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<playlist_link::Model, EngineError> {
        self.find_link(collection_id, playlist_id)
            .await?
            .ok_or_else(|| not_linked(collection_id, playlist_id))
    }

    /// Stores the refreshed playlist metadata. Fails with
    /// [`EngineError::NotLinked`] if the link was deleted meanwhile.
    pub async fn record_sync_success(
        &self,
        link: &playlist_link::Model,
        metadata: &PlaylistMetadata,
        track_count: usize,
    ) -> Result<playlist_link::Model, EngineError> {
        let mut active: playlist_link::ActiveModel = link.clone().into();
        active.name = Set(metadata.name.clone());
        active.owner = Set(metadata.owner.clone());
        active.art_url = Set(metadata.art_url.clone());
        active.track_count = Set(i32::try_from(track_count).unwrap_or(i32::MAX));
        active.last_synced_at = Set(Some(Utc::now()));
        active.sync_status = Set(SyncStatus::Synced);
        active.last_error = Set(None);

        self.update_link(link, active).await
    }

    /// Marks the link as failed. Song membership is left as it was.
    pub async fn record_sync_failure(
        &self,
        link: &playlist_link::Model,
        error: &str,
    ) -> Result<playlist_link::Model, EngineError> {
        let mut active: playlist_link::ActiveModel = link.clone().into();
        active.sync_status = Set(SyncStatus::Error);
        active.last_error = Set(Some(error.to_string()));

        self.update_link(link, active).await
    }

    async fn update_link(
        &self,
        link: &playlist_link::Model,
        active: playlist_link::ActiveModel,
    ) -> Result<playlist_link::Model, EngineError> {
        match active.update(&self.db.conn).await {
            Ok(model) => Ok(model),
            Err(DbErr::RecordNotUpdated) => {
                Err(not_linked(link.collection_id, &link.external_playlist_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_link(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<Option<playlist_link::Model>, EngineError> {
        Ok(playlist_link::Entity::find()
            .filter(playlist_link::Column::CollectionId.eq(collection_id))
            .filter(playlist_link::Column::ExternalPlaylistId.eq(playlist_id))
            .one(&self.db.conn)
            .await?)
    }
}

fn not_linked(collection_id: i64, playlist_id: &str) -> EngineError {
    EngineError::NotLinked {
        collection_id,
        playlist_id: playlist_id.to_string(),
    }
}

fn already_linked(collection_id: i64, playlist_id: &str) -> EngineError {
    EngineError::AlreadyLinked {
        collection_id,
        playlist_id: playlist_id.to_string(),
    }
}

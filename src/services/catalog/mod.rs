//! Per-collection song store.
//!
//! Every write to a song row goes through [`SongCatalog::modify_song`] or the
//! track merge path, both of which read the row, plan a patch and write it
//! back only if the row's `version` is still the one that was read. A lost
//! race is retried with backoff, so concurrent playlist merges touching the
//! same song never drop each other's membership entries.

mod merge;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;

use backon::Retryable;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use tracing::instrument;

use crate::database::Database;
use crate::entities;
use crate::entities::song;
use crate::error::EngineError;
use crate::ports::playlist_source::TrackRef;
use crate::services::retry::RetryPolicy;

pub use types::{
    MembershipDiff, MembershipRemoval, Song, SongSort, SongWrite, TrackChange, TrackOutcome,
};

pub(crate) use merge::{drop_playlists, flag_if_orphaned, unflag, unflag_if_reappeared};

#[derive(Clone)]
pub struct SongCatalog {
    db: Arc<Database>,
    retry: RetryPolicy,
}

impl SongCatalog {
    pub fn new(db: Arc<Database>, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Merges one playlist's fetched, ordered tracks into the collection.
    ///
    /// Positions are the 0-based fetch order. A track listed twice keeps its
    /// first position and tracks without an id are skipped. A song whose
    /// write keeps losing races is reported as [`TrackChange::Conflict`]
    /// without failing the remaining tracks.
    #[instrument(skip(self, tracks), fields(tracks = tracks.len()))]
    pub async fn upsert_membership(
        &self,
        collection_id: i64,
        playlist_id: &str,
        tracks: &[TrackRef],
    ) -> Result<MembershipDiff, EngineError> {
        let mut seen = HashSet::new();
        let mut diff = MembershipDiff::default();

        for (index, track) in tracks.iter().enumerate() {
            if track.external_track_id.is_empty() {
                tracing::warn!(index, "Skipping track without an external id");
                continue;
            }
            if !seen.insert(track.external_track_id.as_str()) {
                tracing::debug!(
                    track = %track.external_track_id,
                    "Track listed more than once, keeping first position"
                );
                continue;
            }

            let position = i32::try_from(index).unwrap_or(i32::MAX);
            let change = match self
                .merge_track(collection_id, playlist_id, position, track)
                .await
            {
                Ok(change) => change,
                Err(EngineError::FinalConflict { song }) => {
                    tracing::warn!(%song, "Giving up on song after repeated write conflicts");
                    TrackChange::Conflict
                }
                Err(e) => return Err(e),
            };

            diff.outcomes.push(TrackOutcome {
                external_track_id: track.external_track_id.clone(),
                change,
            });
        }

        tracing::debug!(
            added = diff.count(TrackChange::Added),
            updated = diff.count(TrackChange::Updated),
            unchanged = diff.count(TrackChange::Unchanged),
            "Merged playlist tracks"
        );

        Ok(diff)
    }

    /// Drops `playlist_id` from songs whose track is no longer in the
    /// playlist's freshly fetched list.
    #[instrument(skip(self, present_track_ids))]
    pub async fn prune_playlist_membership(
        &self,
        collection_id: i64,
        playlist_id: &str,
        present_track_ids: &HashSet<&str>,
    ) -> Result<MembershipRemoval, EngineError> {
        let stale = self
            .songs_in_playlist(collection_id, playlist_id)
            .await?
            .into_iter()
            .filter(|s| !present_track_ids.contains(s.external_track_id.as_str()));

        let pruned = self.drop_membership_from(stale, playlist_id).await?;
        if !pruned.removed.is_empty() {
            tracing::info!(count = pruned.removed.len(), "Pruned songs no longer in playlist");
        }

        Ok(pruned)
    }

    /// Removes `playlist_id` from every song of the collection.
    #[instrument(skip(self))]
    pub async fn remove_playlist_membership(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<MembershipRemoval, EngineError> {
        let songs = self.songs_in_playlist(collection_id, playlist_id).await?;
        self.drop_membership_from(songs, playlist_id).await
    }

    pub async fn list_songs_with_empty_membership(
        &self,
        collection_id: i64,
    ) -> Result<Vec<song::Model>, EngineError> {
        Ok(self
            .collection_rows(collection_id)
            .await?
            .into_iter()
            .filter(|s| s.membership.is_empty())
            .collect())
    }

    pub(crate) async fn list_flagged_songs(
        &self,
        collection_id: i64,
    ) -> Result<Vec<song::Model>, EngineError> {
        Ok(song::Entity::find()
            .filter(song::Column::CollectionId.eq(collection_id))
            .filter(song::Column::Removed.eq(true))
            .order_by_asc(song::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    pub async fn get_song(&self, song_id: i64) -> Result<Song, EngineError> {
        self.find_row(song_id).await.map(Song::from)
    }

    pub async fn list_songs(
        &self,
        collection_id: i64,
        sort: SongSort,
        include_removed: bool,
    ) -> Result<Vec<Song>, EngineError> {
        let mut query =
            song::Entity::find().filter(song::Column::CollectionId.eq(collection_id));

        if !include_removed {
            query = query.filter(song::Column::Removed.eq(false));
        }

        query = match sort {
            SongSort::Title => query
                .order_by_asc(song::Column::Title)
                .order_by_asc(song::Column::Artist),
            SongSort::Artist => query
                .order_by_asc(song::Column::Artist)
                .order_by_asc(song::Column::Title),
        };

        let rows = query.order_by_asc(song::Column::Id).all(&self.db.conn).await?;
        Ok(rows.into_iter().map(Song::from).collect())
    }

    /// Songs currently listed in `playlist_id`, ordered by their position in it.
    pub async fn songs_in_playlist_order(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<Vec<Song>, EngineError> {
        let mut rows = self.songs_in_playlist(collection_id, playlist_id).await?;
        rows.sort_by_key(|s| (s.membership.position(playlist_id), s.id));
        Ok(rows.into_iter().map(Song::from).collect())
    }

    pub async fn update_notes(&self, song_id: i64, notes: String) -> Result<Song, EngineError> {
        let write = self
            .modify_song(song_id, |current| {
                (current.notes != notes).then(|| {
                    let mut patch: song::ActiveModel = current.clone().into();
                    patch.notes = Set(notes.clone());
                    patch
                })
            })
            .await?;
        Ok(write.into_model().into())
    }

    /// Stores user-edited lyrics. Later syncs and lyric lookups leave them alone.
    pub async fn set_custom_lyrics(&self, song_id: i64, text: String) -> Result<Song, EngineError> {
        let write = self
            .modify_song(song_id, |current| {
                let current_text = current.lyrics_customized && current.lyrics_text == text;
                (!current_text).then(|| {
                    let mut patch: song::ActiveModel = current.clone().into();
                    patch.lyrics_text = Set(text.clone());
                    patch.lyrics_fetched = Set(true);
                    patch.lyrics_customized = Set(true);
                    patch
                })
            })
            .await?;
        Ok(write.into_model().into())
    }

    /// Write-back from the lyric lookup. Ignored for customized lyrics.
    pub async fn store_fetched_lyrics(
        &self,
        song_id: i64,
        text: String,
    ) -> Result<SongWrite, EngineError> {
        self.modify_song(song_id, |current| {
            let current_text = current.lyrics_fetched && current.lyrics_text == text;
            (!current.lyrics_customized && !current_text).then(|| {
                let mut patch: song::ActiveModel = current.clone().into();
                patch.lyrics_text = Set(text.clone());
                patch.lyrics_fetched = Set(true);
                patch
            })
        })
        .await
    }

    pub async fn set_manual_bpm(&self, song_id: i64, bpm: f64) -> Result<Song, EngineError> {
        let write = self
            .modify_song(song_id, |current| {
                (!(current.bpm_manual && current.bpm == Some(bpm))).then(|| {
                    let mut patch: song::ActiveModel = current.clone().into();
                    patch.bpm = Set(Some(bpm));
                    patch.bpm_manual = Set(true);
                    patch
                })
            })
            .await?;
        Ok(write.into_model().into())
    }

    /// Drops a manual bpm so the tempo lookup may fill it in again.
    pub async fn clear_manual_bpm(&self, song_id: i64) -> Result<Song, EngineError> {
        let write = self
            .modify_song(song_id, |current| {
                current.bpm_manual.then(|| {
                    let mut patch: song::ActiveModel = current.clone().into();
                    patch.bpm = Set(None);
                    patch.bpm_manual = Set(false);
                    patch
                })
            })
            .await?;
        Ok(write.into_model().into())
    }

    /// Write-back from the tempo lookup. Ignored when the bpm was set by hand.
    pub async fn store_looked_up_bpm(
        &self,
        song_id: i64,
        bpm: f64,
    ) -> Result<SongWrite, EngineError> {
        self.modify_song(song_id, |current| {
            (!current.bpm_manual && current.bpm != Some(bpm)).then(|| {
                let mut patch: song::ActiveModel = current.clone().into();
                patch.bpm = Set(Some(bpm));
                patch
            })
        })
        .await
    }

    /// Read-plan-write of a single song, retried on version conflicts.
    ///
    /// `plan` sees the freshly read row on every attempt and returns `None`
    /// when nothing needs to be written.
    pub(crate) async fn modify_song<F>(&self, song_id: i64, plan: F) -> Result<SongWrite, EngineError>
    where
        F: Fn(&song::Model) -> Option<song::ActiveModel> + Sync,
    {
        let plan = &plan;
        (move || self.try_modify_song(song_id, plan))
            .retry(self.retry.backoff())
            .when(EngineError::is_write_conflict)
            .notify(|e, delay| {
                tracing::debug!(song_id, ?delay, "Retrying song write: {}", e);
            })
            .await
            .map_err(EngineError::exhausted)
    }

    pub(crate) async fn find_row(&self, song_id: i64) -> Result<song::Model, EngineError> {
        song::Entity::find_by_id(song_id)
            .one(&self.db.conn)
            .await?
            .ok_or(EngineError::SongNotFound(song_id))
    }

    async fn try_modify_song<F>(&self, song_id: i64, plan: &F) -> Result<SongWrite, EngineError>
    where
        F: Fn(&song::Model) -> Option<song::ActiveModel>,
    {
        let current = self.find_row(song_id).await?;

        match plan(&current) {
            None => Ok(SongWrite::Unchanged(current)),
            Some(patch) => {
                self.write_versioned(&current, patch).await?;
                Ok(SongWrite::Written(self.find_row(song_id).await?))
            }
        }
    }

    async fn merge_track(
        &self,
        collection_id: i64,
        playlist_id: &str,
        position: i32,
        track: &TrackRef,
    ) -> Result<TrackChange, EngineError> {
        (move || self.try_merge_track(collection_id, playlist_id, position, track))
            .retry(self.retry.backoff())
            .when(EngineError::is_write_conflict)
            .notify(|e, delay| {
                tracing::debug!(
                    track = %track.external_track_id,
                    ?delay,
                    "Retrying track merge: {}",
                    e
                );
            })
            .await
            .map_err(EngineError::exhausted)
    }

    async fn try_merge_track(
        &self,
        collection_id: i64,
        playlist_id: &str,
        position: i32,
        track: &TrackRef,
    ) -> Result<TrackChange, EngineError> {
        let existing = song::Entity::find()
            .filter(song::Column::CollectionId.eq(collection_id))
            .filter(song::Column::ExternalTrackId.eq(&track.external_track_id))
            .one(&self.db.conn)
            .await?;

        let Some(current) = existing else {
            let seeded = merge::seed_song(collection_id, playlist_id, position, track);
            return match seeded.insert(&self.db.conn).await {
                Ok(created) => {
                    tracing::debug!(song_id = created.id, track = %created.external_track_id, "Added song");
                    Ok(TrackChange::Added)
                }
                Err(err) if is_unique_violation(&err) => Err(EngineError::WriteConflict {
                    song: format!("{collection_id}/{}", track.external_track_id),
                }),
                Err(err) => Err(err.into()),
            };
        };

        match merge::merge_track(&current, playlist_id, position, track) {
            None => Ok(TrackChange::Unchanged),
            Some(patch) => {
                self.write_versioned(&current, patch).await?;
                Ok(TrackChange::Updated)
            }
        }
    }

    /// Writes `patch` only if the row still carries the version it was read
    /// with, bumping the version. Fails with [`EngineError::WriteConflict`]
    /// otherwise.
    async fn write_versioned(
        &self,
        current: &song::Model,
        mut patch: song::ActiveModel,
    ) -> Result<(), EngineError> {
        patch.version = Set(current.version + 1);
        patch.updated_at = Set(Utc::now());

        let result = song::Entity::update_many()
            .set(patch)
            .filter(song::Column::Id.eq(current.id))
            .filter(song::Column::Version.eq(current.version))
            .exec(&self.db.conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(EngineError::WriteConflict {
                song: current.id.to_string(),
            });
        }

        Ok(())
    }

    /// Drops `playlist_id` from each song. A song that keeps losing write
    /// races is reported as a conflict without stopping the others.
    async fn drop_membership_from(
        &self,
        songs: impl IntoIterator<Item = song::Model>,
        playlist_id: &str,
    ) -> Result<MembershipRemoval, EngineError> {
        let mut removal = MembershipRemoval::default();
        for song in songs {
            let write = self
                .modify_song(song.id, |current| merge::drop_playlists(current, &[playlist_id]))
                .await;
            match write {
                Ok(write) if write.changed() => removal.removed.push(song.id),
                Ok(_) | Err(EngineError::SongNotFound(_)) => {}
                Err(EngineError::FinalConflict { song: key }) => {
                    tracing::warn!(song = %key, "Giving up on song after repeated write conflicts");
                    removal.conflicts.push(song.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removal)
    }

    async fn songs_in_playlist(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<Vec<song::Model>, EngineError> {
        Ok(self
            .collection_rows(collection_id)
            .await?
            .into_iter()
            .filter(|s| s.membership.contains(playlist_id))
            .collect())
    }

    async fn collection_rows(&self, collection_id: i64) -> Result<Vec<song::Model>, EngineError> {
        Ok(entities::song::Entity::find()
            .filter(song::Column::CollectionId.eq(collection_id))
            .order_by_asc(song::Column::Id)
            .all(&self.db.conn)
            .await?)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::types::{Bpm, Lyrics};
    use crate::test_utils::{pin_song, test_db, track};
    use std::time::Duration;

    fn catalog(db: Arc<Database>) -> SongCatalog {
        SongCatalog::new(db, RetryPolicy::new(5, Duration::from_millis(1)))
    }

    async fn row(catalog: &SongCatalog, collection_id: i64, track_id: &str) -> song::Model {
        song::Entity::find()
            .filter(song::Column::CollectionId.eq(collection_id))
            .filter(song::Column::ExternalTrackId.eq(track_id))
            .one(&catalog.db.conn)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_membership_creates_songs_in_fetch_order() {
        let catalog = catalog(test_db().await);
        let tracks = vec![track("a", "A", "X"), track("b", "B", "Y")];

        let diff = catalog.upsert_membership(1, "p1", &tracks).await.unwrap();

        assert_eq!(diff.count(TrackChange::Added), 2);
        let a = row(&catalog, 1, "a").await;
        let b = row(&catalog, 1, "b").await;
        assert_eq!(a.membership.position("p1"), Some(0));
        assert_eq!(b.membership.position("p1"), Some(1));
        assert!(!a.lyrics_fetched);
        assert_eq!(a.bpm, None);
        assert_eq!(a.version, 0);
    }

    #[tokio::test]
    async fn test_upsert_membership_second_run_is_unchanged() {
        let catalog = catalog(test_db().await);
        let tracks = vec![track("a", "A", "X"), track("b", "B", "Y")];
        catalog.upsert_membership(1, "p1", &tracks).await.unwrap();

        let diff = catalog.upsert_membership(1, "p1", &tracks).await.unwrap();

        assert_eq!(diff.count(TrackChange::Unchanged), 2);
        assert_eq!(row(&catalog, 1, "a").await.version, 0);
    }

    #[tokio::test]
    async fn test_upsert_membership_dedups_across_playlists() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("x", "X", "Q"), track("t", "T", "Z")])
            .await
            .unwrap();

        let diff = catalog
            .upsert_membership(1, "p2", &[track("t", "T", "Z")])
            .await
            .unwrap();

        assert_eq!(diff.change_of("t"), Some(TrackChange::Updated));
        let rows = catalog.collection_rows(1).await.unwrap();
        assert_eq!(rows.len(), 2);
        let t = row(&catalog, 1, "t").await;
        assert_eq!(t.membership.position("p1"), Some(1));
        assert_eq!(t.membership.position("p2"), Some(0));
    }

    #[tokio::test]
    async fn test_upsert_membership_skips_duplicates_and_empty_ids() {
        let catalog = catalog(test_db().await);
        let tracks = vec![
            track("a", "A", "X"),
            track("", "Nameless", "X"),
            track("a", "A", "X"),
            track("b", "B", "X"),
        ];

        let diff = catalog.upsert_membership(1, "p1", &tracks).await.unwrap();

        assert_eq!(diff.outcomes.len(), 2);
        assert_eq!(row(&catalog, 1, "a").await.membership.position("p1"), Some(0));
        assert_eq!(row(&catalog, 1, "b").await.membership.position("p1"), Some(3));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        catalog
            .upsert_membership(2, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();

        let first = row(&catalog, 1, "t").await;
        let second = row(&catalog, 2, "t").await;
        assert_ne!(first.id, second.id);

        catalog
            .set_custom_lyrics(first.id, "only in one".into())
            .await
            .unwrap();

        let untouched = catalog.get_song(second.id).await.unwrap();
        assert_eq!(untouched.customization.lyrics, Lyrics::NotFetched);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_both_memberships() {
        let catalog = catalog(test_db().await);
        let shared = vec![track("t", "T", "Z")];

        let (first, second) = tokio::join!(
            catalog.upsert_membership(1, "p1", &shared),
            catalog.upsert_membership(1, "p2", &shared),
        );
        first.unwrap();
        second.unwrap();

        let t = row(&catalog, 1, "t").await;
        assert!(t.membership.contains("p1"));
        assert!(t.membership.contains("p2"));
        assert_eq!(catalog.collection_rows(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_versioned_rejects_stale_version() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        let stale = row(&catalog, 1, "t").await;
        catalog
            .update_notes(stale.id, "fresh".into())
            .await
            .unwrap();

        let mut patch: song::ActiveModel = stale.clone().into();
        patch.notes = Set("stale".into());
        let err = catalog.write_versioned(&stale, patch).await.unwrap_err();

        assert!(err.is_write_conflict());
        assert_eq!(row(&catalog, 1, "t").await.notes, "fresh");
    }

    #[tokio::test]
    async fn test_concurrent_modifications_are_not_lost() {
        let catalog = SongCatalog::new(test_db().await, RetryPolicy::new(10, Duration::from_millis(1)));
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        let id = row(&catalog, 1, "t").await.id;

        let catalog = &catalog;
        let append = move |suffix: &'static str| {
            catalog.modify_song(id, move |current| {
                let mut patch: song::ActiveModel = current.clone().into();
                patch.notes = Set(format!("{}{suffix}", current.notes));
                Some(patch)
            })
        };
        let (a, b, c) = tokio::join!(append("a"), append("b"), append("c"));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let stored = row(&catalog, 1, "t").await;
        assert_eq!(stored.notes.len(), 3);
        assert_eq!(stored.version, 3);
    }

    #[test]
    fn test_exhausted_conflict_becomes_final() {
        let err = EngineError::WriteConflict { song: "7".into() }.exhausted();
        assert!(matches!(err, EngineError::FinalConflict { ref song } if song == "7"));
        assert!(!err.is_write_conflict());
    }

    #[tokio::test]
    async fn test_prune_drops_only_missing_tracks() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("a", "A", "X"), track("b", "B", "Y")])
            .await
            .unwrap();
        catalog
            .upsert_membership(1, "p2", &[track("b", "B", "Y")])
            .await
            .unwrap();

        let present = HashSet::from(["a"]);
        let pruned = catalog
            .prune_playlist_membership(1, "p1", &present)
            .await
            .unwrap();

        let b = row(&catalog, 1, "b").await;
        assert_eq!(pruned.removed, vec![b.id]);
        assert!(pruned.conflicts.is_empty());
        assert!(!b.membership.contains("p1"));
        assert!(b.membership.contains("p2"));
        assert!(row(&catalog, 1, "a").await.membership.contains("p1"));
    }

    #[tokio::test]
    async fn test_prune_continues_past_conflicting_song() {
        let db = test_db().await;
        let catalog = SongCatalog::new(db.clone(), RetryPolicy::new(1, Duration::from_millis(1)));
        let tracks: Vec<TrackRef> = (0..6)
            .map(|i| track(&format!("t{i}"), &format!("T{i}"), "Z"))
            .collect();
        catalog.upsert_membership(1, "p1", &tracks).await.unwrap();
        let stuck = row(&catalog, 1, "t0").await.id;
        pin_song(&db, stuck).await;

        let pruned = catalog
            .prune_playlist_membership(1, "p1", &HashSet::new())
            .await
            .unwrap();

        assert_eq!(pruned.conflicts, vec![stuck]);
        assert_eq!(pruned.removed.len(), 5);
        let still_listed: Vec<String> = catalog
            .collection_rows(1)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.membership.contains("p1"))
            .map(|s| s.external_track_id)
            .collect();
        assert_eq!(still_listed, vec!["t0".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_playlist_membership_and_empty_listing() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("a", "A", "X"), track("b", "B", "Y")])
            .await
            .unwrap();
        catalog
            .upsert_membership(1, "p2", &[track("b", "B", "Y")])
            .await
            .unwrap();

        let affected = catalog.remove_playlist_membership(1, "p1").await.unwrap();
        assert_eq!(affected.removed.len(), 2);

        let orphans = catalog.list_songs_with_empty_membership(1).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].external_track_id, "a");
    }

    #[tokio::test]
    async fn test_customization_survives_identity_change() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        let id = row(&catalog, 1, "t").await.id;
        catalog.set_custom_lyrics(id, "my words".into()).await.unwrap();
        catalog.set_manual_bpm(id, 92.0).await.unwrap();
        catalog.update_notes(id, "drop D".into()).await.unwrap();

        catalog
            .upsert_membership(1, "p1", &[track("t", "T (Remaster)", "Z & Co")])
            .await
            .unwrap();

        let song = catalog.get_song(id).await.unwrap();
        assert_eq!(song.metadata.title, "T (Remaster)");
        assert_eq!(song.metadata.artist, "Z & Co");
        assert_eq!(song.customization.lyrics, Lyrics::Customized("my words".into()));
        assert_eq!(song.customization.bpm, Bpm::Manual(92.0));
        assert_eq!(song.customization.notes, "drop D");
    }

    #[tokio::test]
    async fn test_identity_change_resets_looked_up_content() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        let id = row(&catalog, 1, "t").await.id;
        catalog.store_fetched_lyrics(id, "old words".into()).await.unwrap();
        catalog.store_looked_up_bpm(id, 128.0).await.unwrap();

        catalog
            .upsert_membership(1, "p1", &[track("t", "Other Song", "Z")])
            .await
            .unwrap();

        let song = catalog.get_song(id).await.unwrap();
        assert_eq!(song.customization.lyrics, Lyrics::NotFetched);
        assert_eq!(song.customization.bpm, Bpm::Unset);
    }

    #[tokio::test]
    async fn test_write_backs_never_override_user_values() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(1, "p1", &[track("t", "T", "Z")])
            .await
            .unwrap();
        let id = row(&catalog, 1, "t").await.id;
        catalog.set_custom_lyrics(id, "mine".into()).await.unwrap();
        catalog.set_manual_bpm(id, 100.0).await.unwrap();

        let lyrics = catalog.store_fetched_lyrics(id, "scraped".into()).await.unwrap();
        let bpm = catalog.store_looked_up_bpm(id, 140.0).await.unwrap();

        assert!(!lyrics.changed());
        assert!(!bpm.changed());

        let song = catalog.clear_manual_bpm(id).await.unwrap();
        assert_eq!(song.customization.bpm, Bpm::Unset);
        assert!(catalog.store_looked_up_bpm(id, 140.0).await.unwrap().changed());
    }

    #[tokio::test]
    async fn test_list_songs_sorting_and_removed_filter() {
        let catalog = catalog(test_db().await);
        catalog
            .upsert_membership(
                1,
                "p1",
                &[track("a", "Zebra", "Abba"), track("b", "Apple", "Queen")],
            )
            .await
            .unwrap();
        let b = row(&catalog, 1, "b").await;
        catalog
            .modify_song(b.id, |c| {
                let mut patch: song::ActiveModel = c.clone().into();
                patch.removed = Set(true);
                Some(patch)
            })
            .await
            .unwrap();

        let by_title = catalog.list_songs(1, SongSort::Title, true).await.unwrap();
        assert_eq!(by_title[0].metadata.title, "Apple");

        let by_artist = catalog.list_songs(1, SongSort::Artist, true).await.unwrap();
        assert_eq!(by_artist[0].metadata.artist, "Abba");

        let active = catalog.list_songs(1, SongSort::Title, false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_track_id, "a");
    }

    #[tokio::test]
    async fn test_get_song_not_found() {
        let catalog = catalog(test_db().await);
        let err = catalog.get_song(42).await.unwrap_err();
        assert!(matches!(err, EngineError::SongNotFound(42)));
    }
}

//! Application-facing entry point tying the catalog, link registry, removal
//! tracker and sync engine together for one playlist source.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::database::Database;
use crate::entities::playlist_link;
use crate::error::EngineError;
use crate::ports::playlist_source::{PlaylistSource, parse_playlist_id};
use crate::services::catalog::{Song, SongCatalog, SongSort, SongWrite};
use crate::services::links::{PlaylistLinkRegistry, UnlinkOutcome};
use crate::services::removal::RemovalTracker;
use crate::services::retry::RetryPolicy;
use crate::services::sync::{SyncEngine, SyncEvent, SyncReport, SyncSettings};

/// Songs of one linked playlist in that playlist's order.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistSongs {
    pub link: playlist_link::Model,
    pub songs: Vec<Song>,
}

pub struct CollectionEngine<S: PlaylistSource> {
    catalog: SongCatalog,
    registry: PlaylistLinkRegistry,
    removal: RemovalTracker,
    sync: SyncEngine<S>,
}

impl<S: PlaylistSource> CollectionEngine<S> {
    pub fn new(db: Arc<Database>, source: Arc<S>, config: &SyncConfig) -> Self {
        let write_retry =
            RetryPolicy::new(config.write_retry_attempts, config.write_retry_base_delay());
        let catalog = SongCatalog::new(db.clone(), write_retry);
        let removal = RemovalTracker::new(db.clone(), catalog.clone());
        let registry = PlaylistLinkRegistry::new(db, catalog.clone(), removal.clone());
        let sync = SyncEngine::new(
            source,
            registry.clone(),
            catalog.clone(),
            removal.clone(),
            SyncSettings::from(config),
        );

        Self {
            catalog,
            registry,
            removal,
            sync,
        }
    }

    /// Links a playlist given as a bare id, share link or URI.
    pub async fn link_playlist(
        &self,
        collection_id: i64,
        playlist: &str,
    ) -> Result<playlist_link::Model, EngineError> {
        let playlist_id = parse_playlist_id(playlist)?;
        self.registry.link(collection_id, &playlist_id).await
    }

    pub async fn unlink_playlist(
        &self,
        collection_id: i64,
        playlist: &str,
    ) -> Result<UnlinkOutcome, EngineError> {
        let playlist_id = parse_playlist_id(playlist)?;
        self.registry.unlink(collection_id, &playlist_id).await
    }

    pub async fn reorder_playlists(
        &self,
        collection_id: i64,
        ordered: &[String],
    ) -> Result<Vec<playlist_link::Model>, EngineError> {
        let ordered_ids = ordered
            .iter()
            .map(|p| parse_playlist_id(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.registry.reorder(collection_id, &ordered_ids).await
    }

    pub async fn sync_collection(
        &self,
        collection_id: i64,
        cancel: &CancellationToken,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncReport, EngineError> {
        self.sync
            .sync_collection(collection_id, cancel, events)
            .await
    }

    /// Re-syncs one link, e.g. after it failed, and reconciles removal flags.
    pub async fn sync_playlist(
        &self,
        collection_id: i64,
        playlist: &str,
    ) -> Result<SyncReport, EngineError> {
        let playlist_id = parse_playlist_id(playlist)?;
        let report = self
            .sync
            .sync_single_playlist(collection_id, &playlist_id)
            .await?;
        let reconciled = self.removal.reconcile(collection_id).await?;
        Ok(SyncReport::new(collection_id, vec![report], reconciled, false))
    }

    pub async fn restore_song(&self, song_id: i64) -> Result<bool, EngineError> {
        self.removal.restore(song_id).await
    }

    pub async fn delete_song(&self, song_id: i64) -> Result<(), EngineError> {
        self.removal.permanently_delete(song_id).await
    }

    pub async fn list_links(
        &self,
        collection_id: i64,
    ) -> Result<Vec<playlist_link::Model>, EngineError> {
        self.registry.list_links(collection_id).await
    }

    pub async fn list_songs(
        &self,
        collection_id: i64,
        sort: SongSort,
        include_removed: bool,
    ) -> Result<Vec<Song>, EngineError> {
        self.catalog
            .list_songs(collection_id, sort, include_removed)
            .await
    }

    /// Songs grouped by link in display order, each group in playlist order.
    pub async fn songs_in_playlist_order(
        &self,
        collection_id: i64,
    ) -> Result<Vec<PlaylistSongs>, EngineError> {
        let mut groups = Vec::new();
        for link in self.registry.list_links(collection_id).await? {
            let songs = self
                .catalog
                .songs_in_playlist_order(collection_id, &link.external_playlist_id)
                .await?;
            groups.push(PlaylistSongs { link, songs });
        }
        Ok(groups)
    }

    pub async fn get_song(&self, song_id: i64) -> Result<Song, EngineError> {
        self.catalog.get_song(song_id).await
    }

    pub async fn update_notes(&self, song_id: i64, notes: String) -> Result<Song, EngineError> {
        self.catalog.update_notes(song_id, notes).await
    }

    pub async fn set_custom_lyrics(&self, song_id: i64, text: String) -> Result<Song, EngineError> {
        self.catalog.set_custom_lyrics(song_id, text).await
    }

    pub async fn set_manual_bpm(&self, song_id: i64, bpm: f64) -> Result<Song, EngineError> {
        self.catalog.set_manual_bpm(song_id, bpm).await
    }

    pub async fn clear_manual_bpm(&self, song_id: i64) -> Result<Song, EngineError> {
        self.catalog.clear_manual_bpm(song_id).await
    }

    pub async fn store_fetched_lyrics(
        &self,
        song_id: i64,
        text: String,
    ) -> Result<SongWrite, EngineError> {
        self.catalog.store_fetched_lyrics(song_id, text).await
    }

    pub async fn store_looked_up_bpm(
        &self,
        song_id: i64,
        bpm: f64,
    ) -> Result<SongWrite, EngineError> {
        self.catalog.store_looked_up_bpm(song_id, bpm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeSource, test_db, track};

    async fn engine(source: Arc<FakeSource>) -> CollectionEngine<FakeSource> {
        let config = SyncConfig {
            write_retry_base_delay_ms: 1,
            fetch_retry_base_delay_ms: 1,
            ..SyncConfig::default()
        };
        CollectionEngine::new(test_db().await, source, &config)
    }

    #[tokio::test]
    async fn test_link_accepts_share_url() {
        let engine = engine(Arc::new(FakeSource::new())).await;

        let link = engine
            .link_playlist(1, "https://open.spotify.com/playlist/37i9dQZF1?si=abc")
            .await
            .unwrap();

        assert_eq!(link.external_playlist_id, "37i9dQZF1");
        let err = engine.link_playlist(1, "spotify:playlist:37i9dQZF1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyLinked { .. }));
    }

    #[tokio::test]
    async fn test_link_rejects_garbage() {
        let engine = engine(Arc::new(FakeSource::new())).await;
        let err = engine.link_playlist(1, "not a playlist!").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlaylistRef(_)));
    }

    #[tokio::test]
    async fn test_songs_in_playlist_order_groups_by_link() {
        let source = Arc::new(FakeSource::new());
        source.set_tracks("p1", vec![track("a", "A", "X"), track("b", "B", "Y")]);
        source.set_tracks("p2", vec![track("b", "B", "Y"), track("c", "C", "Z"), track("a", "A", "X")]);
        let engine = engine(source).await;
        engine.link_playlist(1, "p1").await.unwrap();
        engine.link_playlist(1, "p2").await.unwrap();
        engine
            .reorder_playlists(1, &["p2".to_string(), "p1".to_string()])
            .await
            .unwrap();
        engine
            .sync_collection(1, &CancellationToken::new(), None)
            .await
            .unwrap();

        let groups = engine.songs_in_playlist_order(1).await.unwrap();

        let layout: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|g| {
                (
                    g.link.external_playlist_id.as_str(),
                    g.songs.iter().map(|s| s.external_track_id.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            layout,
            vec![("p2", vec!["b", "c", "a"]), ("p1", vec!["a", "b"])]
        );
    }

    #[tokio::test]
    async fn test_sync_playlist_reconciles_and_delete_flow() {
        let source = Arc::new(FakeSource::new());
        source.set_tracks("p1", vec![track("a", "A", "X"), track("b", "B", "Y")]);
        let engine = engine(source.clone()).await;
        engine.link_playlist(1, "p1").await.unwrap();
        engine.sync_playlist(1, "p1").await.unwrap();

        source.set_tracks("p1", vec![track("a", "A", "X")]);
        let report = engine.sync_playlist(1, "p1").await.unwrap();
        assert_eq!(report.flagged.len(), 1);
        let b = report.flagged[0];

        assert!(engine.restore_song(b).await.unwrap());
        assert!(matches!(
            engine.delete_song(b).await.unwrap_err(),
            EngineError::NotRemoved(_)
        ));

        engine.unlink_playlist(1, "p1").await.unwrap();
        let flagged: Vec<i64> = engine
            .list_songs(1, SongSort::Title, true)
            .await
            .unwrap()
            .into_iter()
            .filter(Song::is_flagged)
            .map(|s| s.id)
            .collect();
        assert_eq!(flagged.len(), 1);

        engine.delete_song(flagged[0]).await.unwrap();
        assert!(engine.list_links(1).await.unwrap().is_empty());
    }
}

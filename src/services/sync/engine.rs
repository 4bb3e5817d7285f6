use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::future::join_all;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::SyncConfig;
use crate::entities::playlist_link;
use crate::error::{EngineError, SourceError};
use crate::ports::playlist_source::{PlaylistMetadata, PlaylistSource, TrackRef};
use crate::services::catalog::{MembershipDiff, SongCatalog};
use crate::services::links::PlaylistLinkRegistry;
use crate::services::removal::RemovalTracker;
use crate::services::retry::RetryPolicy;

use super::report::{PlaylistReport, SyncEvent, SyncReport};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_concurrent_fetches: usize,
    pub fetch_retry: RetryPolicy,
    /// Longest `retry_after` a rate-limited fetch will wait for.
    pub max_rate_limit_wait: Duration,
    pub fetches_per_second: Option<NonZeroU32>,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            fetch_retry: RetryPolicy::new(
                config.fetch_retry_attempts,
                config.fetch_retry_base_delay(),
            ),
            max_rate_limit_wait: config.max_rate_limit_wait(),
            fetches_per_second: config.fetches_per_second.and_then(NonZeroU32::new),
        }
    }
}

type Fetched = (PlaylistMetadata, Vec<TrackRef>);

/// Fetches linked playlists and merges them into the catalog.
pub struct SyncEngine<S: PlaylistSource> {
    source: Arc<S>,
    registry: PlaylistLinkRegistry,
    catalog: SongCatalog,
    removal: RemovalTracker,
    settings: SyncSettings,
    rate_limiter: Option<DirectRateLimiter>,
}

impl<S: PlaylistSource> SyncEngine<S> {
    pub fn new(
        source: Arc<S>,
        registry: PlaylistLinkRegistry,
        catalog: SongCatalog,
        removal: RemovalTracker,
        settings: SyncSettings,
    ) -> Self {
        let rate_limiter = settings
            .fetches_per_second
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            source,
            registry,
            catalog,
            removal,
            settings,
            rate_limiter,
        }
    }

    /// Syncs every linked playlist of the collection, then reconciles removal
    /// flags. Progress is reported on `events` when given.
    ///
    /// A failing playlist is recorded in the report and does not stop the
    /// others. After cancellation no further playlist starts and pending
    /// fetches are abandoned, but a playlist that already started merging is
    /// completed.
    #[instrument(skip(self, cancel, events))]
    pub async fn sync_collection(
        &self,
        collection_id: i64,
        cancel: &CancellationToken,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncReport, EngineError> {
        let links = self.registry.list_links(collection_id).await?;
        tracing::info!(playlists = links.len(), "Syncing collection");
        emit(
            &events,
            SyncEvent::Started {
                collection_id,
                playlists: links.len(),
            },
        )
        .await;

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_fetches.max(1)));

        let tasks: Vec<_> = links
            .iter()
            .map(|link| {
                let semaphore = semaphore.clone();
                let events = events.clone();
                async move {
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        permit = semaphore.acquire() => permit.ok()?,
                    };

                    let report = self.run_playlist(link, cancel).await?;
                    emit(&events, SyncEvent::PlaylistFinished(report.clone())).await;
                    Some(report)
                }
            })
            .collect();

        let playlists: Vec<PlaylistReport> = join_all(tasks).await.into_iter().flatten().collect();

        let reconciled = self.removal.reconcile(collection_id).await?;
        let report = SyncReport::new(collection_id, playlists, reconciled, cancel.is_cancelled());

        if report.cancelled {
            tracing::warn!(
                completed = report.playlists.len(),
                "Sync cancelled before all playlists finished"
            );
        }
        tracing::info!(totals = ?report.totals, "Synced collection");
        emit(&events, SyncEvent::Completed(report.totals)).await;

        Ok(report)
    }

    /// Syncs one linked playlist without reconciling removal flags.
    #[instrument(skip(self))]
    pub async fn sync_single_playlist(
        &self,
        collection_id: i64,
        playlist_id: &str,
    ) -> Result<PlaylistReport, EngineError> {
        let link = self.registry.get_link(collection_id, playlist_id).await?;
        let fetched = self.fetch_playlist(playlist_id).await;
        Ok(self.apply(&link, fetched).await)
    }

    async fn run_playlist(
        &self,
        link: &playlist_link::Model,
        cancel: &CancellationToken,
    ) -> Option<PlaylistReport> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(playlist = %link.external_playlist_id, "Abandoning fetch");
                return None;
            }
            fetched = self.fetch_playlist(&link.external_playlist_id) => fetched,
        };

        Some(self.apply(link, fetched).await)
    }

    /// Merges a fetch result, or records the failure and leaves membership
    /// untouched.
    async fn apply(
        &self,
        link: &playlist_link::Model,
        fetched: Result<Fetched, SourceError>,
    ) -> PlaylistReport {
        let playlist_id = link.external_playlist_id.as_str();

        let result = match fetched {
            Ok((metadata, tracks)) => self.merge_playlist(link, &metadata, &tracks).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(diff) => PlaylistReport::synced(playlist_id, &diff),
            Err(e) => {
                tracing::warn!(playlist = playlist_id, "Playlist sync failed: {}", e);
                match self.registry.record_sync_failure(link, &e.to_string()).await {
                    Ok(_) | Err(EngineError::NotLinked { .. }) => {}
                    Err(db_err) => {
                        tracing::error!(playlist = playlist_id, "Failed to record sync failure: {}", db_err);
                    }
                }
                PlaylistReport::failed(playlist_id, e.to_string())
            }
        }
    }

    /// Merges fetched tracks, prunes the ones the playlist dropped and records
    /// the sync on the link. If the playlist was unlinked while this ran, the
    /// merged entries are dropped again and the sync fails with
    /// [`EngineError::NotLinked`].
    async fn merge_playlist(
        &self,
        link: &playlist_link::Model,
        metadata: &PlaylistMetadata,
        tracks: &[TrackRef],
    ) -> Result<MembershipDiff, EngineError> {
        let playlist_id = link.external_playlist_id.as_str();

        let mut diff = self
            .catalog
            .upsert_membership(link.collection_id, playlist_id, tracks)
            .await?;

        let present: HashSet<&str> = tracks
            .iter()
            .map(|t| t.external_track_id.as_str())
            .collect();
        diff.pruned = self
            .catalog
            .prune_playlist_membership(link.collection_id, playlist_id, &present)
            .await?;

        match self
            .registry
            .record_sync_success(link, metadata, tracks.len())
            .await
        {
            Ok(_) => {}
            Err(e @ EngineError::NotLinked { .. }) => {
                let detached = self
                    .registry
                    .detach_playlist(link.collection_id, playlist_id)
                    .await?;
                tracing::warn!(
                    playlist = playlist_id,
                    dropped = detached.affected.len(),
                    flagged = detached.flagged.len(),
                    "Playlist was unlinked during sync, dropped its merged tracks"
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            playlist = playlist_id,
            tracks = tracks.len(),
            pruned = diff.pruned.removed.len(),
            "Synced playlist"
        );
        Ok(diff)
    }

    async fn fetch_playlist(&self, playlist_id: &str) -> Result<Fetched, SourceError> {
        let metadata = self
            .fetch_with_retry(playlist_id, move || self.source.fetch_metadata(playlist_id))
            .await?;
        let tracks = self
            .fetch_with_retry(playlist_id, move || self.source.fetch_tracks(playlist_id))
            .await?;
        Ok((metadata, tracks))
    }

    /// Runs `fetch` under the rate limiter, retrying transient failures.
    /// A rate-limited response waits out its `retry_after` before the retry.
    async fn fetch_with_retry<T, F, Fut>(&self, playlist_id: &str, fetch: F) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_wait = self.settings.max_rate_limit_wait;
        let fetch = &fetch;
        let rate_limiter = self.rate_limiter.as_ref();

        let attempt = move || {
            let request = fetch();
            async move {
                if let Some(limiter) = rate_limiter {
                    limiter.until_ready().await;
                }
                let result = request.await;
                if let Err(SourceError::RateLimited { retry_after }) = &result
                    && *retry_after <= max_wait
                {
                    tokio::time::sleep(*retry_after).await;
                }
                result
            }
        };

        attempt
            .retry(self.settings.fetch_retry.backoff())
            .when(|e: &SourceError| match e {
                SourceError::RateLimited { retry_after } => *retry_after <= max_wait,
                other => other.is_transient(),
            })
            .notify(|e, delay| {
                tracing::debug!(playlist = playlist_id, ?delay, "Retrying fetch: {}", e);
            })
            .await
    }
}

async fn emit(events: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(sender) = events {
        // A dropped receiver only means nobody is watching.
        let _ = sender.send(event).await;
    }
}

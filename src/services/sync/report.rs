use serde::Serialize;

use crate::services::catalog::{MembershipDiff, TrackChange};
use crate::services::removal::ReconcileOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaylistStatus {
    Synced,
    Failed { error: String },
}

/// Outcome of syncing one linked playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistReport {
    pub playlist_id: String,
    #[serde(flatten)]
    pub status: PlaylistStatus,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub conflicts: usize,
}

impl PlaylistReport {
    pub fn synced(playlist_id: &str, diff: &MembershipDiff) -> Self {
        Self {
            playlist_id: playlist_id.to_string(),
            status: PlaylistStatus::Synced,
            added: diff.count(TrackChange::Added),
            updated: diff.count(TrackChange::Updated),
            unchanged: diff.count(TrackChange::Unchanged),
            pruned: diff.pruned.removed.len(),
            conflicts: diff.count(TrackChange::Conflict) + diff.pruned.conflicts.len(),
        }
    }

    pub fn failed(playlist_id: &str, error: String) -> Self {
        Self {
            playlist_id: playlist_id.to_string(),
            status: PlaylistStatus::Failed { error },
            added: 0,
            updated: 0,
            unchanged: 0,
            pruned: 0,
            conflicts: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PlaylistStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub conflicts: usize,
    pub detached: usize,
    pub flagged: usize,
    pub restored: usize,
    pub errors: usize,
}

impl SyncTotals {
    /// True when the sync wrote nothing at all.
    pub fn is_quiet(&self) -> bool {
        self.added == 0
            && self.updated == 0
            && self.pruned == 0
            && self.detached == 0
            && self.flagged == 0
            && self.restored == 0
    }
}

/// Result of syncing a collection. Playlists abandoned by cancellation are
/// left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub collection_id: i64,
    pub playlists: Vec<PlaylistReport>,
    /// Songs that still listed a playlist that is no longer linked.
    pub detached: Vec<i64>,
    pub flagged: Vec<i64>,
    pub restored: Vec<i64>,
    pub totals: SyncTotals,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(
        collection_id: i64,
        playlists: Vec<PlaylistReport>,
        reconciled: ReconcileOutcome,
        cancelled: bool,
    ) -> Self {
        let mut totals = playlists
            .iter()
            .fold(SyncTotals::default(), |mut totals, playlist| {
                totals.added += playlist.added;
                totals.updated += playlist.updated;
                totals.unchanged += playlist.unchanged;
                totals.pruned += playlist.pruned;
                totals.conflicts += playlist.conflicts;
                totals.errors += usize::from(playlist.is_failed());
                totals
            });
        totals.detached = reconciled.detached.len();
        totals.flagged = reconciled.flagged.len();
        totals.restored = reconciled.restored.len();

        Self {
            collection_id,
            playlists,
            detached: reconciled.detached,
            flagged: reconciled.flagged,
            restored: reconciled.restored,
            totals,
            cancelled,
        }
    }

    #[cfg(test)]
    pub fn playlist(&self, playlist_id: &str) -> Option<&PlaylistReport> {
        self.playlists.iter().find(|p| p.playlist_id == playlist_id)
    }
}

/// Progress notifications emitted while a collection syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started { collection_id: i64, playlists: usize },
    PlaylistFinished(PlaylistReport),
    Completed(SyncTotals),
}

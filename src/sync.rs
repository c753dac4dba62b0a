//! Sync engine (C4): PlaylistSync, TrackSync, AssociationSync.
//!
//! Each operation exposes a pure `analyze` (reads remote + store, makes no
//! writes) and an `execute` (applies a previously computed plan inside one
//! [`crate::db::UnitOfWork`]). Grounded on
//! `original_source/helpers/sync_helper.py` for the three-way diff shape
//! and on `original_source/api/services/sync_service.py` for the
//! "all" pipeline ordering. Modeled as the design note prescribes: a single
//! sum type over the three operations (plus `All`), not an inheritance
//! tree, preferring enums over trait objects for a closed operation set.

use crate::api::{FilterConfig, RemoteCatalog};
use crate::db::UnitOfWork;
use crate::error::{CoreError, Result};
use crate::models::{Playlist, Track};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Added/updated/deleted/unchanged counts surfaced in the response envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

// ---------------------------------------------------------------------
// PlaylistSync
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaylistRename {
    pub id: String,
    pub new_name: String,
    pub old_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaylistSyncPlan {
    pub to_add: Vec<crate::api::RemotePlaylistSummary>,
    pub to_update: Vec<PlaylistRename>,
    pub to_delete: Vec<String>,
    pub unchanged: Vec<String>,
}

impl PlaylistSyncPlan {
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            added: self.to_add.len(),
            updated: self.to_update.len(),
            deleted: self.to_delete.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

pub struct PlaylistSync;

impl PlaylistSync {
    pub async fn analyze(
        remote: &dyn RemoteCatalog,
        uow: &UnitOfWork,
        reference_playlist_id: &str,
        filter: &FilterConfig,
    ) -> Result<PlaylistSyncPlan> {
        let remote_playlists: Vec<_> = remote
            .list_user_playlists(filter)
            .await?
            .into_iter()
            .filter(|p| p.id != reference_playlist_id)
            .collect();

        let store_playlists = uow.playlists().get_all()?;
        let store_by_id: HashMap<&str, &Playlist> =
            store_playlists.iter().map(|p| (p.id.as_str(), p)).collect();
        let remote_ids: HashSet<&str> = remote_playlists.iter().map(|p| p.id.as_str()).collect();

        let mut plan = PlaylistSyncPlan::default();
        for rp in &remote_playlists {
            match store_by_id.get(rp.id.as_str()) {
                None => plan.to_add.push(rp.clone()),
                Some(sp) => {
                    let trimmed_remote = rp.name.trim().to_string();
                    if sp.trimmed_name() != trimmed_remote {
                        plan.to_update.push(PlaylistRename {
                            id: rp.id.clone(),
                            new_name: trimmed_remote,
                            old_name: sp.name.clone(),
                        });
                    } else {
                        plan.unchanged.push(rp.id.clone());
                    }
                }
            }
        }
        for sp in &store_playlists {
            if sp.id != reference_playlist_id && !remote_ids.contains(sp.id.as_str()) {
                plan.to_delete.push(sp.id.clone());
            }
        }

        info!(
            added = plan.to_add.len(),
            updated = plan.to_update.len(),
            deleted = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "playlist sync analyzed"
        );
        Ok(plan)
    }

    /// Idempotent: re-applying the same plan against an already-advanced
    /// store is a no-op per row (inserts upsert, renames overwrite with the
    /// same value, deletes are tolerant of an already-absent row).
    pub fn execute(uow: &UnitOfWork, plan: &PlaylistSyncPlan) -> Result<SyncStats> {
        for rp in &plan.to_add {
            if uow.playlists().get_by_id(&rp.id)?.is_none() {
                uow.playlists().insert(&Playlist {
                    id: rp.id.clone(),
                    name: rp.name.trim().to_string(),
                    master_sync_token: None,
                    associations_token: None,
                })?;
            }
        }
        for rename in &plan.to_update {
            uow.playlists().update_name(&rename.id, &rename.new_name)?;
        }
        for id in &plan.to_delete {
            uow.track_playlists().delete_all_for_playlist(id)?;
            uow.playlists().delete(id)?;
        }
        Ok(plan.stats())
    }
}

// ---------------------------------------------------------------------
// TrackSync
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackUpdate {
    pub uri: String,
    pub new: Track,
    pub old: Track,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TrackSyncPlan {
    pub to_add: Vec<Track>,
    pub to_update: Vec<TrackUpdate>,
    pub to_delete: Vec<String>,
    pub unchanged: Vec<String>,
    /// The reference playlist's remote version token observed at the start
    /// of this analysis; applied to `master_sync_token` on execute.
    pub observed_master_token: Option<String>,
}

impl TrackSyncPlan {
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            added: self.to_add.len(),
            updated: self.to_update.len(),
            deleted: self.to_delete.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

/// Builds a domain [`Track`] from a remote reference-playlist item, deriving
/// a surrogate local URI for items the service marks as local files.
fn track_from_item(item: &crate::api::RemotePlaylistItem) -> Track {
    let uri = if item.is_local {
        Track::local_uri(&item.artists, &item.album, &item.title, item.duration_ms)
    } else {
        item.uri.clone()
    };
    Track {
        uri,
        title: item.title.clone(),
        artists: item.artists.clone(),
        album: item.album.clone(),
        duration_ms: item.duration_ms,
        added_to_reference_at: item.added_at,
        is_local: item.is_local,
    }
}

/// Finds the reference playlist's current snapshot token by scanning an
/// unfiltered listing — the six-operation C2 contract has no dedicated
/// get-by-id call.
async fn fetch_reference_snapshot(
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
) -> Result<Option<String>> {
    let all = remote.list_user_playlists(&FilterConfig::default()).await?;
    Ok(all
        .into_iter()
        .find(|p| p.id == reference_playlist_id)
        .map(|p| p.snapshot_id))
}

pub struct TrackSync;

impl TrackSync {
    pub async fn analyze(
        remote: &dyn RemoteCatalog,
        uow: &UnitOfWork,
        reference_playlist_id: &str,
    ) -> Result<TrackSyncPlan> {
        let observed_master_token = fetch_reference_snapshot(remote, reference_playlist_id).await?;
        let items = remote.list_playlist_items(reference_playlist_id).await?;
        let remote_tracks: HashMap<String, Track> = items
            .iter()
            .map(track_from_item)
            .map(|t| (t.uri.clone(), t))
            .collect();

        let store_tracks = uow.tracks().get_all()?;
        let store_by_uri: HashMap<&str, &Track> =
            store_tracks.iter().map(|t| (t.uri.as_str(), t)).collect();

        let mut plan = TrackSyncPlan {
            observed_master_token,
            ..Default::default()
        };
        for (uri, rt) in &remote_tracks {
            match store_by_uri.get(uri.as_str()) {
                None => plan.to_add.push(rt.clone()),
                Some(st) => {
                    if st.title != rt.title || st.artists != rt.artists || st.album != rt.album {
                        plan.to_update.push(TrackUpdate {
                            uri: uri.clone(),
                            new: rt.clone(),
                            old: (*st).clone(),
                        });
                    } else {
                        plan.unchanged.push(uri.clone());
                    }
                }
            }
        }
        for st in &store_tracks {
            if !remote_tracks.contains_key(&st.uri) {
                plan.to_delete.push(st.uri.clone());
            }
        }

        info!(
            added = plan.to_add.len(),
            updated = plan.to_update.len(),
            deleted = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "track sync analyzed"
        );
        Ok(plan)
    }

    pub fn execute(
        uow: &UnitOfWork,
        reference_playlist_id: &str,
        plan: &TrackSyncPlan,
    ) -> Result<SyncStats> {
        for t in &plan.to_add {
            uow.tracks().upsert(t)?;
        }
        for u in &plan.to_update {
            uow.tracks().upsert(&u.new)?;
        }
        for uri in &plan.to_delete {
            uow.tracks().delete_by_uri(uri)?;
        }
        if let Some(token) = &plan.observed_master_token {
            if uow.playlists().get_by_id(reference_playlist_id)?.is_some() {
                uow.playlists()
                    .update_master_sync_token(reference_playlist_id, token)?;
            }
        }
        Ok(plan.stats())
    }
}

// ---------------------------------------------------------------------
// AssociationSync
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackAssociationDelta {
    pub track_uri: String,
    pub add_to: Vec<String>,
    pub remove_from: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AssociationSyncPlan {
    pub deltas: Vec<TrackAssociationDelta>,
    pub dirty_playlist_new_tokens: HashMap<String, String>,
    pub warnings: Vec<String>,
}

impl AssociationSyncPlan {
    pub fn stats(&self) -> SyncStats {
        let added = self.deltas.iter().map(|d| d.add_to.len()).sum();
        let removed = self.deltas.iter().map(|d| d.remove_from.len()).sum();
        SyncStats {
            added,
            updated: 0,
            deleted: removed,
            unchanged: 0,
        }
    }
}

pub struct AssociationSync;

impl AssociationSync {
    pub async fn analyze(
        remote: &dyn RemoteCatalog,
        uow: &UnitOfWork,
        reference_playlist_id: &str,
    ) -> Result<AssociationSyncPlan> {
        let store_playlists: Vec<Playlist> = uow
            .playlists()
            .get_all()?
            .into_iter()
            .filter(|p| p.id != reference_playlist_id)
            .collect();
        if store_playlists.is_empty() {
            return Ok(AssociationSyncPlan::default());
        }

        let remote_current = remote.list_user_playlists(&FilterConfig::default()).await?;
        let remote_snapshot_by_id: HashMap<&str, &str> = remote_current
            .iter()
            .map(|p| (p.id.as_str(), p.snapshot_id.as_str()))
            .collect();

        let dirty: Vec<&Playlist> = store_playlists
            .iter()
            .filter(|p| {
                remote_snapshot_by_id
                    .get(p.id.as_str())
                    .map(|snap| Some(*snap) != p.associations_token.as_deref())
                    .unwrap_or(false)
            })
            .collect();

        // Early exit: no dirty playlists means no remote reads and
        // an empty plan.
        if dirty.is_empty() {
            return Ok(AssociationSyncPlan::default());
        }

        let known_tracks: HashSet<String> = uow
            .tracks()
            .get_all()?
            .into_iter()
            .map(|t| t.uri)
            .collect();

        let playlist_ids: Vec<String> = store_playlists.iter().map(|p| p.id.clone()).collect();
        let stored_memberships = uow.track_playlists().playlist_track_uris_batch(&playlist_ids)?;

        // Dirty playlists' fresh membership is fetched concurrently — all
        // are independent remote reads with no shared mutable state.
        let fetches = dirty
            .iter()
            .map(|p| {
                let id = p.id.clone();
                async move { (id.clone(), remote.list_playlist_item_uris(&id).await) }
            })
            .collect::<Vec<_>>();
        let fetch_results = join_all(fetches).await;

        let mut warnings = Vec::new();
        let mut fresh_by_playlist: HashMap<String, HashSet<String>> = HashMap::new();
        let mut dirty_new_tokens: HashMap<String, String> = HashMap::new();
        for (id, result) in fetch_results {
            match result {
                Ok(uris) => {
                    let filtered: HashSet<String> =
                        uris.into_iter().filter(|u| known_tracks.contains(u)).collect();
                    fresh_by_playlist.insert(id.clone(), filtered);
                    if let Some(snap) = remote_snapshot_by_id.get(id.as_str()) {
                        dirty_new_tokens.insert(id.clone(), snap.to_string());
                    }
                }
                Err(e) => {
                    let msg = format!("playlist {id} disappeared before analysis completed: {e}");
                    warn!("{msg}");
                    warnings.push(msg);
                }
            }
        }

        // desired(t): union across all non-reference playlists, trusting
        // stored membership for non-dirty playlists and the fresh fetch for
        // dirty ones that didn't disappear.
        // A dirty playlist that disappeared before its fetch completed falls
        // back to its last-known stored membership below — skip and
        // continue means "leave it alone", not
        // "treat as empty".
        let mut desired: HashMap<String, HashSet<String>> = HashMap::new();
        for pid in &playlist_ids {
            let members: Vec<&String> = if let Some(fresh) = fresh_by_playlist.get(pid) {
                fresh.iter().collect()
            } else {
                stored_memberships
                    .get(pid)
                    .map(|v| v.iter().collect())
                    .unwrap_or_default()
            };
            for uri in members {
                desired.entry(uri.clone()).or_default().insert(pid.clone());
            }
        }

        let mut current: HashMap<String, HashSet<String>> = HashMap::new();
        for (pid, uris) in &stored_memberships {
            for uri in uris {
                current.entry(uri.clone()).or_default().insert(pid.clone());
            }
        }

        let mut all_tracks: HashSet<String> = HashSet::new();
        all_tracks.extend(desired.keys().cloned());
        all_tracks.extend(current.keys().cloned());

        let mut deltas = Vec::new();
        for uri in all_tracks {
            let want = desired.get(&uri).cloned().unwrap_or_default();
            let have = current.get(&uri).cloned().unwrap_or_default();
            let add_to: Vec<String> = want.difference(&have).cloned().collect();
            let remove_from: Vec<String> = have.difference(&want).cloned().collect();
            if !add_to.is_empty() || !remove_from.is_empty() {
                deltas.push(TrackAssociationDelta {
                    track_uri: uri,
                    add_to,
                    remove_from,
                });
            }
        }

        Ok(AssociationSyncPlan {
            deltas,
            dirty_playlist_new_tokens: dirty_new_tokens,
            warnings,
        })
    }

    pub fn execute(uow: &UnitOfWork, plan: &AssociationSyncPlan) -> Result<SyncStats> {
        for delta in &plan.deltas {
            for pid in &delta.add_to {
                uow.track_playlists().insert(pid, &delta.track_uri)?;
            }
            for pid in &delta.remove_from {
                uow.track_playlists().delete(pid, &delta.track_uri)?;
            }
        }
        for (pid, token) in &plan.dirty_playlist_new_tokens {
            if uow.playlists().get_by_id(pid)?.is_some() {
                uow.playlists().update_associations_token(pid, token)?;
            }
        }
        Ok(plan.stats())
    }
}

// ---------------------------------------------------------------------
// The "All" pipeline and the sum-type dispatch surface
// ---------------------------------------------------------------------

/// A closed set of sync operations, modeled as a sum type rather than an
/// inheritance tree: the orchestrator matches on this instead of
/// dispatching through a trait object per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Playlists,
    Tracks,
    Associations,
    All,
}

/// The deterministic stage order for the `All` pipeline.
pub const ALL_PIPELINE_ORDER: [SyncAction; 3] =
    [SyncAction::Playlists, SyncAction::Tracks, SyncAction::Associations];

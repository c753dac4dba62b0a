//! Orchestrator (C8): a stateless request/response coupling layer mapping
//! external "sync action" calls onto (component, phase) pairs and threading
//! a confirmed analysis plan from the client back to the execute step of
//! the same stage.
//!
//! Grounded on `original_source/api/services/sync_service.py`'s
//! `orchestrate_db_sync` for the request/stage shape and on
//! `original_source/api/models/sync_responses.py` for the response
//! envelope fields.

use crate::api::{FilterConfig, RemoteCatalog};
use crate::db::{run_in_unit_of_work, Pool};
use crate::error::{CoreError, Result};
use crate::sync::{AssociationSync, PlaylistSync, SyncAction, SyncStats, TrackSync, ALL_PIPELINE_ORDER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSettings {
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
    #[serde(default)]
    pub excluded_playlist_ids: Vec<String>,
    #[serde(default)]
    pub exclude_by_description: Vec<String>,
}

impl From<PlaylistSettings> for FilterConfig {
    fn from(s: PlaylistSettings) -> Self {
        FilterConfig {
            forbidden_name_substrings: s.excluded_keywords,
            forbidden_playlist_ids: s.excluded_playlist_ids,
            description_terms: s.exclude_by_description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Playlists,
    Tracks,
    Associations,
    Complete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub action: SyncAction,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub confirmed: bool,
    pub stage: Stage,
    #[serde(default)]
    pub precomputed_changes_from_analysis: Option<Value>,
    #[serde(default)]
    pub playlist_settings: Option<PlaylistSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStage {
    Analysis,
    SyncComplete,
    Start,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub action: SyncAction,
    pub stage: ResponseStage,
    pub message: String,
    pub stats: SyncStats,
    pub details: Value,
    pub needs_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<Stage>,
}

/// Maps each `CoreError` kind to an envelope with `success=false`:
/// no leakage of internal details beyond what the caller already supplied.
pub fn error_to_response(action: SyncAction, e: &CoreError) -> SyncResponse {
    SyncResponse {
        success: false,
        action,
        stage: ResponseStage::Start,
        message: e.to_string(),
        stats: SyncStats::default(),
        details: Value::Null,
        needs_confirmation: false,
        next_stage: None,
    }
}

/// Runs one stage of a sync action against the given reference playlist,
/// producing either an analysis response (if `confirmed=false`) or an
/// execution response (if `confirmed=true` and a precomputed plan is
/// supplied).
pub async fn handle_sync_request(
    pool: &Pool,
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
    request: SyncRequest,
) -> Result<SyncResponse> {
    let filter: FilterConfig = request.playlist_settings.clone().map(Into::into).unwrap_or_default();

    match request.action {
        SyncAction::Playlists => {
            handle_playlist_stage(pool, remote, reference_playlist_id, &filter, &request).await
        }
        SyncAction::Tracks => handle_track_stage(pool, remote, reference_playlist_id, &request).await,
        SyncAction::Associations => {
            handle_association_stage(pool, remote, reference_playlist_id, &request).await
        }
        SyncAction::All => handle_all_pipeline(pool, remote, reference_playlist_id, &filter, &request).await,
    }
}

async fn handle_playlist_stage(
    pool: &Pool,
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
    filter: &FilterConfig,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    if !request.confirmed {
        let plan = run_in_unit_of_work(pool, |uow| {
            futures::executor::block_on(PlaylistSync::analyze(remote, uow, reference_playlist_id, filter))
        })?;
        let stats = plan.stats();
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Playlists,
            stage: ResponseStage::Analysis,
            message: format!(
                "{} to add, {} to update, {} to delete",
                stats.added, stats.updated, stats.deleted
            ),
            stats,
            details: serde_json::to_value(&plan)?,
            needs_confirmation: stats.added + stats.updated + stats.deleted > 0,
            next_stage: None,
        })
    } else {
        let plan: crate::sync::PlaylistSyncPlan = request
            .precomputed_changes_from_analysis
            .clone()
            .ok_or_else(|| CoreError::InvalidRequest("missing precomputed_changes_from_analysis".into()))
            .and_then(|v| serde_json::from_value(v).map_err(CoreError::from))?;
        let stats = run_in_unit_of_work(pool, |uow| PlaylistSync::execute(uow, &plan))?;
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Playlists,
            stage: ResponseStage::SyncComplete,
            message: "playlist sync complete".into(),
            stats,
            details: Value::Null,
            needs_confirmation: false,
            next_stage: None,
        })
    }
}

async fn handle_track_stage(
    pool: &Pool,
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    if !request.confirmed {
        let plan = run_in_unit_of_work(pool, |uow| {
            futures::executor::block_on(TrackSync::analyze(remote, uow, reference_playlist_id))
        })?;
        let stats = plan.stats();
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Tracks,
            stage: ResponseStage::Analysis,
            message: format!(
                "{} to add, {} to update, {} to delete",
                stats.added, stats.updated, stats.deleted
            ),
            stats,
            details: serde_json::to_value(&plan)?,
            needs_confirmation: stats.added + stats.updated + stats.deleted > 0,
            next_stage: None,
        })
    } else {
        let plan: crate::sync::TrackSyncPlan = request
            .precomputed_changes_from_analysis
            .clone()
            .ok_or_else(|| CoreError::InvalidRequest("missing precomputed_changes_from_analysis".into()))
            .and_then(|v| serde_json::from_value(v).map_err(CoreError::from))?;
        let stats = run_in_unit_of_work(pool, |uow| {
            TrackSync::execute(uow, reference_playlist_id, &plan)
        })?;
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Tracks,
            stage: ResponseStage::SyncComplete,
            message: "track sync complete".into(),
            stats,
            details: Value::Null,
            needs_confirmation: false,
            next_stage: None,
        })
    }
}

async fn handle_association_stage(
    pool: &Pool,
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    if !request.confirmed {
        let plan = run_in_unit_of_work(pool, |uow| {
            futures::executor::block_on(AssociationSync::analyze(remote, uow, reference_playlist_id))
        })?;
        let stats = plan.stats();
        let needs_confirmation = !plan.deltas.is_empty();
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Associations,
            stage: ResponseStage::Analysis,
            message: format!("{} tracks with membership changes", plan.deltas.len()),
            stats,
            details: serde_json::to_value(&plan)?,
            needs_confirmation,
            next_stage: None,
        })
    } else {
        let plan: crate::sync::AssociationSyncPlan = request
            .precomputed_changes_from_analysis
            .clone()
            .ok_or_else(|| CoreError::InvalidRequest("missing precomputed_changes_from_analysis".into()))
            .and_then(|v| serde_json::from_value(v).map_err(CoreError::from))?;
        let stats = run_in_unit_of_work(pool, |uow| AssociationSync::execute(uow, &plan))?;
        Ok(SyncResponse {
            success: true,
            action: SyncAction::Associations,
            stage: ResponseStage::SyncComplete,
            message: "association sync complete".into(),
            stats,
            details: Value::Null,
            needs_confirmation: false,
            next_stage: None,
        })
    }
}

/// The deterministic "All" pipeline: each stage is independently
/// confirmable, driven by `request.stage`.
async fn handle_all_pipeline(
    pool: &Pool,
    remote: &dyn RemoteCatalog,
    reference_playlist_id: &str,
    filter: &FilterConfig,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    let stage_index = match request.stage {
        Stage::Start => 0,
        Stage::Playlists => 0,
        Stage::Tracks => 1,
        Stage::Associations => 2,
        Stage::Complete => {
            return Ok(SyncResponse {
                success: true,
                action: SyncAction::All,
                stage: ResponseStage::Complete,
                message: "all stages complete".into(),
                stats: SyncStats::default(),
                details: Value::Null,
                needs_confirmation: false,
                next_stage: None,
            })
        }
    };

    let current = ALL_PIPELINE_ORDER[stage_index];
    let mut sub_request = request.clone();
    sub_request.action = current;

    let mut response = match current {
        SyncAction::Playlists => {
            handle_playlist_stage(pool, remote, reference_playlist_id, filter, &sub_request).await?
        }
        SyncAction::Tracks => handle_track_stage(pool, remote, reference_playlist_id, &sub_request).await?,
        SyncAction::Associations => {
            handle_association_stage(pool, remote, reference_playlist_id, &sub_request).await?
        }
        SyncAction::All => unreachable!(),
    };

    response.action = SyncAction::All;
    if request.confirmed {
        response.next_stage = ALL_PIPELINE_ORDER
            .get(stage_index + 1)
            .map(|next| match next {
                SyncAction::Playlists => Stage::Playlists,
                SyncAction::Tracks => Stage::Tracks,
                SyncAction::Associations => Stage::Associations,
                SyncAction::All => Stage::Complete,
            })
            .or(Some(Stage::Complete));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RemotePlaylistItem, RemotePlaylistSummary};
    use crate::db::{build_pool, run_migrations};
    use async_trait::async_trait;

    struct EmptyRemote;

    #[async_trait]
    impl RemoteCatalog for EmptyRemote {
        async fn list_user_playlists(&self, _filter: &FilterConfig) -> Result<Vec<RemotePlaylistSummary>> {
            Ok(vec![])
        }
        async fn list_playlist_items(&self, _playlist_id: &str) -> Result<Vec<RemotePlaylistItem>> {
            Ok(vec![])
        }
        async fn list_playlist_item_uris(&self, _playlist_id: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn create_playlist(&self, _name: &str, _description: &str, _public: bool) -> Result<String> {
            unimplemented!()
        }
        async fn add_items(&self, _playlist_id: &str, _uris: &[String]) -> Result<()> {
            Ok(())
        }
        async fn remove_items(&self, _playlist_id: &str, _uris: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn test_pool() -> Pool {
        let pool = build_pool(std::path::Path::new(":memory:"), 1, 5).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        pool
    }

    #[tokio::test]
    async fn empty_reference_playlist_track_sync_is_a_no_op() {
        let pool = test_pool();
        let remote = EmptyRemote;
        let request = SyncRequest {
            action: SyncAction::Tracks,
            force_refresh: false,
            confirmed: false,
            stage: Stage::Start,
            precomputed_changes_from_analysis: None,
            playlist_settings: None,
        };
        let response = handle_sync_request(&pool, &remote, "master", request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.stats, SyncStats::default());
        assert!(!response.needs_confirmation);
    }

    #[tokio::test]
    async fn malformed_precomputed_plan_is_invalid_request() {
        let pool = test_pool();
        let remote = EmptyRemote;
        let request = SyncRequest {
            action: SyncAction::Playlists,
            force_refresh: false,
            confirmed: true,
            stage: Stage::Start,
            precomputed_changes_from_analysis: None,
            playlist_settings: None,
        };
        let result = handle_sync_request(&pool, &remote, "master", request).await;
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn all_pipeline_advances_stage_after_confirmation() {
        let pool = test_pool();
        let remote = EmptyRemote;
        let request = SyncRequest {
            action: SyncAction::All,
            force_refresh: false,
            confirmed: true,
            stage: Stage::Start,
            precomputed_changes_from_analysis: Some(serde_json::to_value(crate::sync::PlaylistSyncPlan::default()).unwrap()),
            playlist_settings: None,
        };
        let response = handle_sync_request(&pool, &remote, "master", request).await.unwrap();
        assert_eq!(response.action, SyncAction::All);
        assert_eq!(response.next_stage, Some(Stage::Tracks));
    }
}

//! Remote client adapter (C2): a thin contract over the streaming SDK.
//!
//! One async trait, one concrete `reqwest`-based implementation, covering
//! the operation set this contract wraps. Authentication and the SDK
//! itself are out of scope: implementations receive a valid bearer token
//! from their caller and never attempt a refresh.

pub mod remote;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A playlist as listed by the remote catalog, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlaylistSummary {
    pub id: String,
    pub name: String,
    pub snapshot_id: String,
    pub description: Option<String>,
}

/// One item of a playlist's contents, before translation into a Track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlaylistItem {
    pub uri: String,
    pub title: String,
    pub artists: String,
    pub album: String,
    pub duration_ms: Option<i64>,
    pub added_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_local: bool,
}

/// Exclusion rules applied while listing the user's playlists. Matching is
/// case-insensitive; description terms match whole words.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub forbidden_name_substrings: Vec<String>,
    #[serde(default)]
    pub forbidden_playlist_ids: Vec<String>,
    #[serde(default)]
    pub description_terms: Vec<String>,
}

impl FilterConfig {
    /// True if `playlist` should be omitted from `list_user_playlists`.
    pub fn excludes(&self, id: &str, name: &str, description: Option<&str>) -> bool {
        if self.forbidden_playlist_ids.iter().any(|fid| fid == id) {
            return true;
        }
        let lower_name = name.to_lowercase();
        if self
            .forbidden_name_substrings
            .iter()
            .any(|s| lower_name.contains(&s.to_lowercase()))
        {
            return true;
        }
        if let Some(desc) = description {
            let lower_desc = desc.to_lowercase();
            let words: Vec<&str> = lower_desc.split_whitespace().collect();
            if self
                .description_terms
                .iter()
                .any(|term| words.contains(&term.to_lowercase().as_str()))
            {
                return true;
            }
        }
        false
    }
}

/// Batch size cap for `add_items`/`remove_items`; batches larger than this
/// are split by the caller (or by a default-method helper below).
pub const MAX_BATCH_SIZE: usize = 100;

/// The remote catalog contract the sync engine (C4) depends on. Returns
/// domain records, never SDK-native types.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    async fn list_user_playlists(
        &self,
        filter: &FilterConfig,
    ) -> Result<Vec<RemotePlaylistSummary>>;

    async fn list_playlist_items(&self, playlist_id: &str) -> Result<Vec<RemotePlaylistItem>>;

    async fn list_playlist_item_uris(&self, playlist_id: &str) -> Result<Vec<String>>;

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String>;

    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> Result<()>;

    async fn remove_items(&self, playlist_id: &str, uris: &[String]) -> Result<()>;

    /// Splits `uris` into batches of at most [`MAX_BATCH_SIZE`] and issues
    /// one `add_items` call per batch, in order.
    async fn add_items_batched(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        for chunk in uris.chunks(MAX_BATCH_SIZE) {
            self.add_items(playlist_id, chunk).await?;
        }
        Ok(())
    }

    async fn remove_items_batched(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        for chunk in uris.chunks(MAX_BATCH_SIZE) {
            self.remove_items(playlist_id, chunk).await?;
        }
        Ok(())
    }
}

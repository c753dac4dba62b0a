//! `reqwest`-based implementation of [`super::RemoteCatalog`].
//!
//! Bearer header, JSON bodies, `next`-cursor pagination, and a
//! retry/backoff shape for transient failures. Authentication is out of
//! scope: the adapter is constructed with a valid bearer token and surfaces
//! [`CoreError::RemoteAuthFailed`] unconditionally on 401 rather than
//! attempting a refresh.

use super::{FilterConfig, RemoteCatalog, RemotePlaylistItem, RemotePlaylistSummary};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct HttpRemoteCatalog {
    client: Client,
    api_base: String,
    bearer_token: String,
    retry: RetryPolicy,
}

impl HttpRemoteCatalog {
    pub fn new(api_base: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            bearer_token: bearer_token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Issues one request with exponential backoff on transient failures.
    /// 401 is terminal (`RemoteAuthFailed`); 429 is terminal after the retry
    /// budget is exhausted (`RemoteRateLimited`, carrying the `Retry-After`
    /// hint); 5xx/network errors retry up to `max_retries` times.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let resp = build()
                .bearer_auth(&self.bearer_token)
                .send()
                .await
                .map_err(|e| CoreError::RemoteUnavailable(e.to_string()));

            match resp {
                Ok(r) if r.status() == StatusCode::UNAUTHORIZED => {
                    return Err(CoreError::RemoteAuthFailed(
                        "remote rejected bearer token".into(),
                    ));
                }
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = r
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok());
                    if attempt >= self.retry.max_retries {
                        return Err(CoreError::RemoteRateLimited {
                            message: "rate limited by remote catalog".into(),
                            retry_after_secs: retry_after,
                        });
                    }
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.base_delay * 2u32.pow(attempt));
                    warn!(attempt, ?delay, "remote rate-limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(r) if r.status().is_server_error() => {
                    if attempt >= self.retry.max_retries {
                        return Err(CoreError::RemoteUnavailable(format!(
                            "remote returned {}",
                            r.status()
                        )));
                    }
                    let delay = self.retry.base_delay * 2u32.pow(attempt);
                    debug!(attempt, ?delay, status = %r.status(), "retrying after server error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    return Err(CoreError::RemoteUnavailable(format!(
                        "remote returned {}",
                        r.status()
                    )));
                }
                Ok(r) => return Ok(r),
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(e);
                    }
                    let delay = self.retry.base_delay * 2u32.pow(attempt);
                    debug!(attempt, ?delay, "retrying after transport error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListPlaylistsResponse {
    items: Vec<RawPlaylist>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    id: String,
    name: String,
    snapshot_id: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItemsResponse {
    items: Vec<RawItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    uri: String,
    title: String,
    #[serde(default)]
    artists: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    duration_ms: Option<i64>,
    #[serde(default)]
    added_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    is_local: bool,
}

#[derive(Deserialize)]
struct CreatePlaylistResponse {
    id: String,
}

#[async_trait]
impl RemoteCatalog for HttpRemoteCatalog {
    async fn list_user_playlists(
        &self,
        filter: &FilterConfig,
    ) -> Result<Vec<RemotePlaylistSummary>> {
        let mut out = Vec::new();
        let mut next: Option<String> = Some(self.url("/me/playlists?limit=50"));
        while let Some(url) = next {
            let resp = self
                .send_with_retry(|| self.client.get(&url))
                .await?
                .json::<ListPlaylistsResponse>()
                .await
                .map_err(|e| CoreError::Unexpected(anyhow::anyhow!(e)))?;
            for p in resp.items {
                if filter.excludes(&p.id, &p.name, p.description.as_deref()) {
                    continue;
                }
                out.push(RemotePlaylistSummary {
                    id: p.id,
                    name: p.name,
                    snapshot_id: p.snapshot_id,
                    description: p.description,
                });
            }
            next = resp.next;
        }
        Ok(out)
    }

    async fn list_playlist_items(&self, playlist_id: &str) -> Result<Vec<RemotePlaylistItem>> {
        let mut out = Vec::new();
        let mut next: Option<String> =
            Some(self.url(&format!("/playlists/{playlist_id}/tracks?limit=100")));
        while let Some(url) = next {
            let resp = self
                .send_with_retry(|| self.client.get(&url))
                .await?
                .json::<ListItemsResponse>()
                .await
                .map_err(|e| CoreError::Unexpected(anyhow::anyhow!(e)))?;
            for it in resp.items {
                out.push(RemotePlaylistItem {
                    uri: it.uri,
                    title: it.title,
                    artists: it.artists,
                    album: it.album,
                    duration_ms: it.duration_ms,
                    added_at: it.added_at,
                    is_local: it.is_local,
                });
            }
            next = resp.next;
        }
        Ok(out)
    }

    async fn list_playlist_item_uris(&self, playlist_id: &str) -> Result<Vec<String>> {
        Ok(self
            .list_playlist_items(playlist_id)
            .await?
            .into_iter()
            .map(|i| i.uri)
            .collect())
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String> {
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "public": public,
        });
        let url = self.url("/me/playlists");
        let resp = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?
            .json::<CreatePlaylistResponse>()
            .await
            .map_err(|e| CoreError::Unexpected(anyhow::anyhow!(e)))?;
        Ok(resp.id)
    }

    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        let body = serde_json::json!({ "uris": uris });
        let url = self.url(&format!("/playlists/{playlist_id}/tracks"));
        self.send_with_retry(|| self.client.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn remove_items(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        let body = serde_json::json!({ "tracks": uris.iter().map(|u| serde_json::json!({"uri": u})).collect::<Vec<_>>() });
        let url = self.url(&format!("/playlists/{playlist_id}/tracks"));
        self.send_with_retry(|| self.client.delete(&url).json(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FilterConfig;

    #[tokio::test]
    async fn terminal_auth_failure_surfaces_remote_auth_failed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        let adapter = HttpRemoteCatalog::new(server.url(), "bad-token");
        let result = adapter.list_user_playlists(&FilterConfig::default()).await;
        assert!(matches!(result, Err(CoreError::RemoteAuthFailed(_))));
    }

    #[tokio::test]
    async fn rate_limit_exhausts_retry_budget_and_surfaces_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "2")
            .expect(4)
            .create_async()
            .await;
        let adapter = HttpRemoteCatalog::new(server.url(), "token").with_retry_policy(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        });
        let result = adapter.list_user_playlists(&FilterConfig::default()).await;
        match result {
            Err(CoreError::RemoteRateLimited { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, Some(2));
            }
            other => panic!("expected RemoteRateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_listing_paginates_via_next_cursor() {
        let mut server = mockito::Server::new_async().await;
        let page2_url = format!("{}/me/playlists?page=2", server.url());
        let _m1 = server
            .mock("GET", "/me/playlists?limit=50")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"items":[{{"id":"p1","name":"One","snapshot_id":"s1"}}],"next":"{page2_url}"}}"#
            ))
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/me/playlists?page=2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"id":"p2","name":"Two","snapshot_id":"s2"}],"next":null}"#)
            .create_async()
            .await;
        let adapter = HttpRemoteCatalog::new(server.url(), "token");
        let playlists = adapter
            .list_user_playlists(&FilterConfig::default())
            .await
            .unwrap();
        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[0].id, "p1");
        assert_eq!(playlists[1].id, "p2");
    }
}

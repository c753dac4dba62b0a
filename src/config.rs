use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub master_tracks_dir: PathBuf,
    pub master_tracks_external_dir: PathBuf,
    pub playlists_dir: PathBuf,
    pub master_playlist_id: String,
    pub unsorted_playlist_id: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // Carried from the original environment surface for forward-compat;
    // not consumed by the core.
    #[serde(default)]
    pub discogs_token: Option<String>,
    #[serde(default)]
    pub db_connection_string: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,

    // Remote catalog endpoint. Authentication itself is out of scope; the
    // CLI wrapper passes whatever bearer token is configured here straight
    // through to `HttpRemoteCatalog` without attempting a refresh.
    #[serde(default)]
    pub remote_api_base: Option<String>,
    #[serde(default)]
    pub remote_bearer_token: Option<String>,

    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries_on_error: u32,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_audio_extensions")]
    pub audio_extensions: Vec<String>,
}

fn default_db_path() -> PathBuf {
    "data/catalog.db".into()
}
fn default_log_dir() -> PathBuf {
    "logs".into()
}
fn default_match_threshold() -> f64 {
    0.75
}
fn default_pool_max_size() -> u32 {
    10
}
fn default_pool_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_batch_size() -> usize {
    100
}
fn default_audio_extensions() -> Vec<String> {
    vec!["mp3", "flac", "wav", "m4a", "aac", "ogg", "wma"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: Config = toml::from_str(&s)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(cfg)
    }
}

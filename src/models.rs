//! Domain entities: Track, Playlist, TrackPlaylist edges, FileMapping.
//!
//! These are plain data carried between the catalog store and the other
//! components; all traversal between them goes through repositories, so
//! there are no owning references between entities here.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const LOCAL_URI_PREFIX: &str = "service:local:";
pub const TRACK_URI_PREFIX: &str = "service:track:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub uri: String,
    pub title: String,
    /// Comma-joined artist names; use [`Track::artist_list`] for the parsed form.
    pub artists: String,
    pub album: String,
    pub duration_ms: Option<i64>,
    pub added_to_reference_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_local: bool,
}

impl Track {
    pub fn is_local_file(&self) -> bool {
        self.is_local || self.uri.starts_with(LOCAL_URI_PREFIX)
    }

    pub fn is_remote_track(&self) -> bool {
        self.uri.starts_with(TRACK_URI_PREFIX)
    }

    pub fn artist_list(&self) -> Vec<String> {
        self.artists
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }

    pub fn primary_artist(&self) -> Option<String> {
        self.artist_list().into_iter().next()
    }

    /// Builds the resource URI for a user-local entry:
    /// `service:local:<artist>:<album>:<title>:<duration-seconds>`.
    pub fn local_uri(artist: &str, album: &str, title: &str, duration_ms: Option<i64>) -> String {
        let duration_secs = duration_ms.map(|ms| ms / 1000).unwrap_or(0);
        format!("{LOCAL_URI_PREFIX}{artist}:{album}:{title}:{duration_secs}")
    }

    /// Deterministic surrogate key for a local track, derived from normalized
    /// artist+title. Used for backward-compatible identification when the
    /// URI itself cannot be parsed back into clean components.
    pub fn surrogate_key(artist: &str, title: &str) -> String {
        let normalize = |s: &str| -> String {
            s.chars()
                .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '&' || *c == '-' || *c == '_')
                .collect::<String>()
        };
        let id_string = format!("{}_{}", normalize(artist), normalize(title)).to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(id_string.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        format!("local_{}", &hex[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub master_sync_token: Option<String>,
    pub associations_token: Option<String>,
}

impl Playlist {
    pub fn trimmed_name(&self) -> String {
        self.name.trim().to_string()
    }
}

/// A single (playlist, track) membership edge. Membership is a set: no
/// duplicate edges for the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackPlaylist {
    pub playlist_id: String,
    pub track_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMapping {
    pub id: i64,
    pub file_path: String,
    pub track_uri: String,
    pub file_hash: Option<String>,
    pub file_size: Option<i64>,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub is_active: bool,
}

impl FileMapping {
    pub fn file_name(&self) -> String {
        std::path::Path::new(&self.file_path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string()
    }
}


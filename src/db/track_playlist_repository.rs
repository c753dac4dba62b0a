use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

pub struct TrackPlaylistRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TrackPlaylistRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, playlist_id: &str, track_uri: &str) -> Result<()> {
        if self.exists(playlist_id, track_uri)? {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO track_playlists (playlist_id, track_uri) VALUES (?1, ?2)",
            params![playlist_id, track_uri],
        )?;
        Ok(())
    }

    pub fn delete(&self, playlist_id: &str, track_uri: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM track_playlists WHERE playlist_id = ?1 AND track_uri = ?2",
            params![playlist_id, track_uri],
        )?;
        Ok(n > 0)
    }

    pub fn exists(&self, playlist_id: &str, track_uri: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM track_playlists WHERE playlist_id = ?1 AND track_uri = ?2",
                params![playlist_id, track_uri],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_playlist_ids_for_uri(&self, track_uri: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT playlist_id FROM track_playlists WHERE track_uri = ?1")?;
        let rows = stmt.query_map(params![track_uri], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_uris_for_playlist(&self, playlist_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_uri FROM track_playlists WHERE playlist_id = ?1")?;
        let rows = stmt.query_map(params![playlist_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Batch lookup of track URIs per playlist, used by C6 and C7 to avoid
    /// an N+1 query pattern over many playlists.
    pub fn playlist_track_uris_batch(&self, playlist_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> = playlist_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        if playlist_ids.is_empty() {
            return Ok(out);
        }
        let placeholders = playlist_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT playlist_id, track_uri FROM track_playlists WHERE playlist_id IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            playlist_ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        for r in rows {
            let (playlist_id, uri) = r?;
            out.entry(playlist_id).or_default().push(uri);
        }
        Ok(out)
    }

    /// All playlist-to-track-URI mappings in a single query, used by the
    /// duplicate engine to compute `playlists_to_merge` without per-track
    /// lookups.
    pub fn all_playlist_track_mappings(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT playlist_id, track_uri FROM track_playlists ORDER BY playlist_id")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for r in rows {
            let (playlist_id, uri) = r?;
            out.entry(playlist_id).or_default().push(uri);
        }
        Ok(out)
    }

    pub fn delete_all_for_playlist(&self, playlist_id: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM track_playlists WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        Ok(n)
    }
}

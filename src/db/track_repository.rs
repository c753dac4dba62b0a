use crate::error::Result;
use crate::models::Track;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

pub struct TrackRepository<'a> {
    conn: &'a Connection,
}

fn map_row(row: &Row) -> rusqlite::Result<Track> {
    let added_raw: Option<String> = row.get("added_to_reference_at")?;
    Ok(Track {
        uri: row.get("uri")?,
        title: row.get("title")?,
        artists: row.get("artists")?,
        album: row.get("album")?,
        duration_ms: row.get("duration_ms")?,
        added_to_reference_at: added_raw.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|d| d.with_timezone(&chrono::Utc))
        }),
        is_local: row.get::<_, i64>("is_local")? != 0,
    })
}

impl<'a> TrackRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, track: &Track) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tracks (uri, title, artists, album, duration_ms, added_to_reference_at, is_local)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                track.uri,
                track.title,
                track.artists,
                track.album,
                track.duration_ms,
                track.added_to_reference_at.map(|d| d.to_rfc3339()),
                track.is_local as i64,
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, track: &Track) -> Result<()> {
        self.conn.execute(
            "UPDATE tracks SET title = ?2, artists = ?3, album = ?4, duration_ms = ?5,
                added_to_reference_at = ?6, is_local = ?7
             WHERE uri = ?1",
            params![
                track.uri,
                track.title,
                track.artists,
                track.album,
                track.duration_ms,
                track.added_to_reference_at.map(|d| d.to_rfc3339()),
                track.is_local as i64,
            ],
        )?;
        Ok(())
    }

    pub fn upsert(&self, track: &Track) -> Result<()> {
        if self.get_by_uri(&track.uri)?.is_some() {
            self.update(track)
        } else {
            self.insert(track)
        }
    }

    /// Deletes a track and cascades its TrackPlaylist edges and FileMappings
    /// (enforced by `ON DELETE CASCADE`, active because `PRAGMA foreign_keys`
    /// is enabled on connection init).
    pub fn delete_by_uri(&self, uri: &str) -> Result<()> {
        self.conn.execute("DELETE FROM tracks WHERE uri = ?1", params![uri])?;
        Ok(())
    }

    pub fn get_by_uri(&self, uri: &str) -> Result<Option<Track>> {
        let track = self
            .conn
            .query_row("SELECT * FROM tracks WHERE uri = ?1", params![uri], map_row)
            .optional()?;
        Ok(track)
    }

    pub fn get_all(&self) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare("SELECT * FROM tracks")?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Batch lookup avoiding an N+1 query pattern for callers (C6, C7) that
    /// need many tracks at once.
    pub fn tracks_by_uris(&self, uris: &[String]) -> Result<HashMap<String, Track>> {
        if uris.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = uris.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM tracks WHERE uri IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            uris.iter().map(|u| u as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), map_row)?;
        let mut out = HashMap::new();
        for r in rows {
            let t = r?;
            out.insert(t.uri.clone(), t);
        }
        Ok(out)
    }

    pub fn get_track_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))?;
        Ok(count)
    }
}

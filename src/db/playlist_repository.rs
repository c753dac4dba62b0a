use crate::error::Result;
use crate::models::Playlist;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

pub struct PlaylistRepository<'a> {
    conn: &'a Connection,
}

fn map_row(row: &Row) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get("id")?,
        name: row.get("name")?,
        master_sync_token: row.get("master_sync_token")?,
        associations_token: row.get("associations_token")?,
    })
}

impl<'a> PlaylistRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, playlist: &Playlist) -> Result<()> {
        self.conn.execute(
            "INSERT INTO playlists (id, name, master_sync_token, associations_token)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                playlist.id,
                playlist.name,
                playlist.master_sync_token,
                playlist.associations_token
            ],
        )?;
        Ok(())
    }

    pub fn update_name(&self, id: &str, name: &str) -> Result<()> {
        self.conn
            .execute("UPDATE playlists SET name = ?2 WHERE id = ?1", params![id, name])?;
        Ok(())
    }

    /// Deletes the playlist row. Callers must remove its TrackPlaylist rows
    /// first via [`crate::db::track_playlist_repository::TrackPlaylistRepository::delete_all_for_playlist`]
    /// since the playlist side of that relation does not cascade implicitly
    /// in the sync engine's two-step delete (see PlaylistSync execute).
    pub fn delete(&self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Playlist>> {
        let p = self
            .conn
            .query_row("SELECT * FROM playlists WHERE id = ?1", params![id], map_row)
            .optional()?;
        Ok(p)
    }

    pub fn get_all(&self) -> Result<Vec<Playlist>> {
        let mut stmt = self.conn.prepare("SELECT * FROM playlists")?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn playlists_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Playlist>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM playlists WHERE id IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), map_row)?;
        let mut out = HashMap::new();
        for r in rows {
            let p = r?;
            out.insert(p.id.clone(), p);
        }
        Ok(out)
    }

    pub fn update_master_sync_token(&self, id: &str, token: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE playlists SET master_sync_token = ?2 WHERE id = ?1",
            params![id, token],
        )?;
        Ok(())
    }

    pub fn update_associations_token(&self, id: &str, token: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE playlists SET associations_token = ?2 WHERE id = ?1",
            params![id, token],
        )?;
        Ok(())
    }
}

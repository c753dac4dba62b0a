use crate::error::Result;
use crate::models::FileMapping;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

pub struct FileMappingRepository<'a> {
    conn: &'a Connection,
}

fn map_row(row: &Row) -> rusqlite::Result<FileMapping> {
    let last_modified_raw: Option<String> = row.get("last_modified")?;
    let created_raw: String = row.get("created_at")?;
    Ok(FileMapping {
        id: row.get("id")?,
        file_path: row.get("file_path")?,
        track_uri: row.get("track_uri")?,
        file_hash: row.get("file_hash")?,
        file_size: row.get("file_size")?,
        last_modified: last_modified_raw.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|d| d.with_timezone(&chrono::Utc))
        }),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_raw)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

impl<'a> FileMappingRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts a new active mapping. Any previously active mapping for the
    /// same path must already have been deactivated by the caller — the
    /// unique partial index on `(file_path) WHERE is_active=1` enforces
    /// "at most one active mapping per file path" at the storage layer.
    pub fn insert(&self, mapping: &FileMapping) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO file_mappings (file_path, track_uri, file_hash, file_size, last_modified, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                mapping.file_path,
                mapping.track_uri,
                mapping.file_hash,
                mapping.file_size,
                mapping.last_modified.map(|d| d.to_rfc3339()),
                mapping.created_at.to_rfc3339(),
                mapping.is_active as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn soft_delete(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE file_mappings SET is_active = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_active_by_path(&self, file_path: &str) -> Result<Option<FileMapping>> {
        let m = self
            .conn
            .query_row(
                "SELECT * FROM file_mappings WHERE file_path = ?1 AND is_active = 1",
                params![file_path],
                map_row,
            )
            .optional()?;
        Ok(m)
    }

    pub fn get_all_active_mappings(&self) -> Result<Vec<FileMapping>> {
        let mut stmt = self.conn.prepare("SELECT * FROM file_mappings WHERE is_active = 1")?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_active_by_uri(&self, track_uri: &str) -> Result<Vec<FileMapping>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM file_mappings WHERE track_uri = ?1 AND is_active = 1")?;
        let rows = stmt.query_map(params![track_uri], map_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// `file_path -> track_uri` index over all active mappings, built with a
    /// single query (used by the binding engine to skip already-bound files
    /// and by the exporter to resolve URIs to paths).
    pub fn active_path_to_uri_index(&self) -> Result<HashMap<String, String>> {
        self.get_all_active_mappings()
            .map(|v| v.into_iter().map(|m| (m.file_path, m.track_uri)).collect())
    }

    pub fn active_uri_to_paths_index(&self) -> Result<HashMap<String, Vec<String>>> {
        let mappings = self.get_all_active_mappings()?;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for m in mappings {
            out.entry(m.track_uri).or_default().push(m.file_path);
        }
        Ok(out)
    }
}

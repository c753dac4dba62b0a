//! Catalog store (C1): persistent entities plus a transactional unit-of-work
//! over a bounded connection pool.
//!
//! Raw-SQL rusqlite style, with pool sizing and commit/rollback contract:
//! max 10 connections, 30s acquisition timeout, validate-before-return, one
//! connection per unit-of-work.

pub mod file_mapping_repository;
pub mod playlist_repository;
pub mod track_playlist_repository;
pub mod track_repository;

use crate::error::{CoreError, Result};
use file_mapping_repository::FileMappingRepository;
use playlist_repository::PlaylistRepository;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use track_playlist_repository::TrackPlaylistRepository;
use track_repository::TrackRepository;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Builds the process-wide connection pool. Constructed once at startup and
/// never rebuilt per request — the only piece of global mutable state the
/// core owns.
pub fn build_pool(db_path: &Path, max_size: u32, timeout_secs: u64) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
    });
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(timeout_secs))
        // Runs `SqliteConnectionManager::is_valid` (a trivial query) before
        // handing a pooled connection back out; a connection that fails
        // validation is discarded rather than reused.
        .test_on_check_out(true)
        .build(manager)
        .map_err(|e| CoreError::Unexpected(anyhow::anyhow!("building connection pool: {e}")))?;
    Ok(pool)
}

/// Applies the embedded schema. Idempotent (`CREATE TABLE IF NOT EXISTS`).
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Scoped acquisition of one pooled connection with guaranteed commit on
/// normal return and rollback on error. All repositories obtained from the
/// unit-of-work share this single connection and participate in one
/// transaction, mirroring the Python `UnitOfWork` context manager.
pub struct UnitOfWork {
    conn: PooledConnection,
}

impl UnitOfWork {
    fn begin(pool: &Pool) -> Result<Self> {
        let conn = pool.get()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self { conn })
    }

    fn commit(self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn tracks(&self) -> TrackRepository<'_> {
        TrackRepository::new(&self.conn)
    }

    pub fn playlists(&self) -> PlaylistRepository<'_> {
        PlaylistRepository::new(&self.conn)
    }

    pub fn track_playlists(&self) -> TrackPlaylistRepository<'_> {
        TrackPlaylistRepository::new(&self.conn)
    }

    pub fn file_mappings(&self) -> FileMappingRepository<'_> {
        FileMappingRepository::new(&self.conn)
    }
}

/// Runs `f` inside one unit-of-work: begins a transaction, commits if `f`
/// returns `Ok`, rolls back otherwise. This is the sole entry point for
/// catalog writes; no other code may hold the underlying connection.
pub fn run_in_unit_of_work<F, T>(pool: &Pool, f: F) -> Result<T>
where
    F: FnOnce(&UnitOfWork) -> Result<T>,
{
    let uow = UnitOfWork::begin(pool)?;
    match f(&uow) {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(e) => {
            let _ = uow.rollback();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Playlist, Track};

    fn test_pool() -> Pool {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            run_migrations(&conn).unwrap();
        }
        pool
    }

    #[test]
    fn migrations_create_expected_tables() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        for expected in ["tracks", "playlists", "track_playlists", "file_mappings"] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[test]
    fn commit_persists_and_rollback_discards() {
        let pool = test_pool();

        run_in_unit_of_work(&pool, |uow| {
            uow.playlists().insert(&Playlist {
                id: "p1".into(),
                name: "Committed".into(),
                master_sync_token: None,
                associations_token: None,
            })
        })
        .unwrap();

        let result: Result<()> = run_in_unit_of_work(&pool, |uow| {
            uow.playlists().insert(&Playlist {
                id: "p2".into(),
                name: "RolledBack".into(),
                master_sync_token: None,
                associations_token: None,
            })?;
            Err(CoreError::Unexpected(anyhow::anyhow!("force rollback")))
        });
        assert!(result.is_err());

        let conn = pool.get().unwrap();
        let repo = PlaylistRepository::new(&conn);
        assert!(repo.get_by_id("p1").unwrap().is_some());
        assert!(repo.get_by_id("p2").unwrap().is_none());
    }

    #[test]
    fn deleting_track_cascades_edges_and_mappings() {
        let pool = test_pool();
        run_in_unit_of_work(&pool, |uow| {
            uow.playlists().insert(&Playlist {
                id: "p1".into(),
                name: "P".into(),
                master_sync_token: None,
                associations_token: None,
            })?;
            uow.tracks().insert(&Track {
                uri: "service:track:1".into(),
                title: "T".into(),
                artists: "A".into(),
                album: "".into(),
                duration_ms: Some(1000),
                added_to_reference_at: None,
                is_local: false,
            })?;
            uow.track_playlists().insert("p1", "service:track:1")?;
            Ok(())
        })
        .unwrap();

        run_in_unit_of_work(&pool, |uow| uow.tracks().delete_by_uri("service:track:1")).unwrap();

        let conn = pool.get().unwrap();
        let tp = TrackPlaylistRepository::new(&conn);
        assert!(tp.get_uris_for_playlist("p1").unwrap().is_empty());
    }
}

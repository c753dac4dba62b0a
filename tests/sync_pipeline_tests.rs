//! Cross-module integration tests for the three-stage sync pipeline against
//! a real on-disk SQLite database, covering scenarios that span more than
//! one module.

use async_trait::async_trait;
use catalog_sync_core::api::{FilterConfig, RemoteCatalog, RemotePlaylistItem, RemotePlaylistSummary};
use catalog_sync_core::db::{build_pool, run_in_unit_of_work, run_migrations, Pool};
use catalog_sync_core::error::Result;
use catalog_sync_core::sync::{AssociationSync, PlaylistSync, TrackSync};
use std::collections::HashMap;
use std::sync::Mutex;
use tempfile::tempdir;

struct StubRemote {
    playlists: Vec<RemotePlaylistSummary>,
    items: Mutex<HashMap<String, Vec<RemotePlaylistItem>>>,
}

#[async_trait]
impl RemoteCatalog for StubRemote {
    async fn list_user_playlists(&self, _filter: &FilterConfig) -> Result<Vec<RemotePlaylistSummary>> {
        Ok(self.playlists.clone())
    }

    async fn list_playlist_items(&self, playlist_id: &str) -> Result<Vec<RemotePlaylistItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(playlist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_playlist_item_uris(&self, playlist_id: &str) -> Result<Vec<String>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(playlist_id)
            .map(|items| items.iter().map(|i| i.uri.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_playlist(&self, _name: &str, _description: &str, _public: bool) -> Result<String> {
        unimplemented!("not exercised by this pipeline")
    }

    async fn add_items(&self, _playlist_id: &str, _uris: &[String]) -> Result<()> {
        Ok(())
    }

    async fn remove_items(&self, _playlist_id: &str, _uris: &[String]) -> Result<()> {
        Ok(())
    }
}

fn fresh_pool() -> (Pool, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");
    let pool = build_pool(&db_path, 5, 5).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();
    (pool, dir)
}

fn item(uri: &str, title: &str, artists: &str) -> RemotePlaylistItem {
    RemotePlaylistItem {
        uri: uri.to_string(),
        title: title.to_string(),
        artists: artists.to_string(),
        album: "Album".to_string(),
        duration_ms: Some(200_000),
        added_at: None,
        is_local: false,
    }
}

/// A master-playlist fetch, a dependent playlist's fetch, and the
/// association pass all run against one store: playlist rows, track rows,
/// and membership edges should all land consistently in a single pass
/// over `PlaylistSync` -> `TrackSync` -> `AssociationSync`.
#[tokio::test]
async fn full_pipeline_populates_playlists_tracks_and_associations() {
    let (pool, _dir) = fresh_pool();

    let remote = StubRemote {
        playlists: vec![
            RemotePlaylistSummary {
                id: "master".into(),
                name: "Reference".into(),
                snapshot_id: "snap-1".into(),
                description: None,
            },
            RemotePlaylistSummary {
                id: "house".into(),
                name: "House".into(),
                snapshot_id: "snap-house-1".into(),
                description: None,
            },
        ],
        items: Mutex::new(HashMap::from([
            (
                "master".to_string(),
                vec![item("svc:t1", "Track One", "Artist A"), item("svc:t2", "Track Two", "Artist B")],
            ),
            ("house".to_string(), vec![item("svc:t1", "Track One", "Artist A")]),
        ])),
    };

    run_in_unit_of_work(&pool, |uow| {
        let plan = futures::executor::block_on(PlaylistSync::analyze(&remote, uow, "master", &FilterConfig::default()))?;
        assert_eq!(plan.to_add.len(), 1);
        PlaylistSync::execute(uow, &plan)
    })
    .unwrap();

    run_in_unit_of_work(&pool, |uow| {
        let plan = futures::executor::block_on(TrackSync::analyze(&remote, uow, "master"))?;
        assert_eq!(plan.to_add.len(), 2);
        TrackSync::execute(uow, "master", &plan)
    })
    .unwrap();

    run_in_unit_of_work(&pool, |uow| {
        let plan = futures::executor::block_on(AssociationSync::analyze(&remote, uow, "master"))?;
        AssociationSync::execute(uow, &plan)
    })
    .unwrap();

    let conn = pool.get().unwrap();
    let mut stmt = conn
        .prepare("SELECT track_uri FROM track_playlists WHERE playlist_id = 'house' ORDER BY track_uri")
        .unwrap();
    let uris: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .filter_map(|r| r.ok())
        .collect();
    assert_eq!(uris, vec!["svc:t1".to_string()]);
}

/// Re-running the same analyzed plan against a store that has already
/// advanced past it must not error and must not duplicate rows.
#[tokio::test]
async fn replaying_a_playlist_plan_is_idempotent() {
    let (pool, _dir) = fresh_pool();
    let remote = StubRemote {
        playlists: vec![RemotePlaylistSummary {
            id: "pl1".into(),
            name: "Keepers".into(),
            snapshot_id: "s1".into(),
            description: None,
        }],
        items: Mutex::new(HashMap::new()),
    };

    let plan = run_in_unit_of_work(&pool, |uow| {
        futures::executor::block_on(PlaylistSync::analyze(&remote, uow, "master", &FilterConfig::default()))
    })
    .unwrap();

    run_in_unit_of_work(&pool, |uow| PlaylistSync::execute(uow, &plan)).unwrap();
    // Replaying the exact same plan must not fail or duplicate the row.
    run_in_unit_of_work(&pool, |uow| PlaylistSync::execute(uow, &plan)).unwrap();

    let conn = pool.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM playlists WHERE id = 'pl1'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

//! Playlist exporter (C7): materializes catalog playlists to on-disk
//! `.m3u` files, preserving a persisted folder structure across
//! regenerations.
//!
//! Grounded on `original_source/helpers/m3u_helper.py` for the extended
//! M3U format and on `original_source/helpers/organization_helper.py` for
//! the structure-preserving regeneration and reorganization shapes.

use crate::db::UnitOfWork;
use crate::error::{CoreError, Result};
use crate::models::{Playlist, Track};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const STRUCTURE_FILE_NAME: &str = ".playlist_structure.json";
const STRUCTURE_VERSION: u32 = 1;
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FolderEntry {
    pub playlists: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaylistStructure {
    pub root_playlists: Vec<String>,
    pub folders: HashMap<String, FolderEntry>,
    pub structure_version: u32,
    pub last_updated: String,
}

impl PlaylistStructure {
    fn load(playlists_dir: &Path) -> Result<Option<Self>> {
        let path = playlists_dir.join(STRUCTURE_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let structure: PlaylistStructure = serde_json::from_str(&raw)?;
        Ok(Some(structure))
    }

    fn save(&self, playlists_dir: &Path) -> Result<()> {
        let path = playlists_dir.join(STRUCTURE_FILE_NAME);
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Folder path (relative to the playlists root) that contains `name`,
    /// if the structure places it anywhere.
    fn locate(&self, name: &str) -> Option<PathBuf> {
        if self.root_playlists.iter().any(|p| p == name) {
            return Some(PathBuf::new());
        }
        self.folders
            .iter()
            .find(|(_, entry)| entry.playlists.iter().any(|p| p == name))
            .map(|(folder, _)| PathBuf::from(folder))
    }
}

pub fn sanitize_playlist_name(name: &str) -> String {
    name.chars().filter(|c| !FORBIDDEN_NAME_CHARS.contains(c)).collect()
}

/// Case-insensitive scan of `playlists_dir` (and subdirectories) for an
/// existing `.m3u` file whose stem matches `name` — the fallback used when
/// the structure file doesn't place the playlist anywhere.
fn fallback_locate_by_scan(playlists_dir: &Path, name: &str) -> Option<PathBuf> {
    let target = name.to_lowercase();
    for entry in walkdir::WalkDir::new(playlists_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("m3u") {
            continue;
        }
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            if stem.to_lowercase() == target {
                let parent = entry.path().parent().unwrap_or(playlists_dir);
                return parent.strip_prefix(playlists_dir).ok().map(|p| p.to_path_buf());
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub playlist_id: String,
    pub tracks_found: usize,
    pub tracks_written: usize,
    pub path: PathBuf,
}

pub struct PlaylistExporter;

impl PlaylistExporter {
    /// Regenerates a single playlist file, preserving its location per the
    /// structure file (or the filesystem-scan fallback).
    pub fn regenerate_one(
        uow: &UnitOfWork,
        playlist_id: &str,
        playlists_dir: &Path,
        extended: bool,
    ) -> Result<ExportResult> {
        let playlist = uow
            .playlists()
            .get_by_id(playlist_id)?
            .ok_or_else(|| CoreError::NotFound(format!("playlist {playlist_id}")))?;
        let structure = PlaylistStructure::load(playlists_dir)?;
        let path_index = uow.file_mappings().active_path_to_uri_index()?;
        let uri_to_path: HashMap<String, String> =
            path_index.into_iter().map(|(path, uri)| (uri, path)).collect();
        let uris = uow.track_playlists().get_uris_for_playlist(playlist_id)?;
        let tracks_by_uri = uow.tracks().tracks_by_uris(&uris)?;

        Self::materialize(
            &playlist,
            playlists_dir,
            extended,
            structure.as_ref(),
            &uri_to_path,
            &tracks_by_uri,
            &uris,
        )
    }

    /// Batch regeneration: preloads the playlists, the URI→file-path index,
    /// the structure file, and every referenced track's metadata with one
    /// query each, then materializes every playlist from that shared state
    /// instead of re-querying per playlist.
    pub fn regenerate_batch(
        uow: &UnitOfWork,
        playlist_ids: &[String],
        playlists_dir: &Path,
        extended: bool,
    ) -> Result<(Vec<ExportResult>, Vec<(String, CoreError)>)> {
        let playlists = uow.playlists().playlists_by_ids(playlist_ids)?;
        let structure = PlaylistStructure::load(playlists_dir)?;
        let path_index = uow.file_mappings().active_path_to_uri_index()?;
        let uri_to_path: HashMap<String, String> =
            path_index.into_iter().map(|(path, uri)| (uri, path)).collect();
        let uris_by_playlist = uow.track_playlists().playlist_track_uris_batch(playlist_ids)?;
        let all_uris: Vec<String> = uris_by_playlist.values().flatten().cloned().collect();
        let tracks_by_uri = uow.tracks().tracks_by_uris(&all_uris)?;

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for id in playlist_ids {
            let Some(playlist) = playlists.get(id) else {
                failures.push((id.clone(), CoreError::NotFound(format!("playlist {id}"))));
                continue;
            };
            let uris = uris_by_playlist.get(id).cloned().unwrap_or_default();
            match Self::materialize(
                playlist,
                playlists_dir,
                extended,
                structure.as_ref(),
                &uri_to_path,
                &tracks_by_uri,
                &uris,
            ) {
                Ok(r) => successes.push(r),
                Err(e) => failures.push((id.clone(), e)),
            }
        }
        Ok((successes, failures))
    }

    /// Writes one playlist's `.m3u` file from already-loaded state, shared
    /// by [`Self::regenerate_one`] (which loads it itself) and
    /// [`Self::regenerate_batch`] (which loads it once for every playlist).
    fn materialize(
        playlist: &Playlist,
        playlists_dir: &Path,
        extended: bool,
        structure: Option<&PlaylistStructure>,
        uri_to_path: &HashMap<String, String>,
        tracks_by_uri: &HashMap<String, Track>,
        uris: &[String],
    ) -> Result<ExportResult> {
        let sanitized = sanitize_playlist_name(&playlist.trimmed_name());

        let target_dir = structure
            .and_then(|s| s.locate(&sanitized))
            .or_else(|| fallback_locate_by_scan(playlists_dir, &sanitized))
            .map(|rel| playlists_dir.join(rel))
            .unwrap_or_else(|| playlists_dir.to_path_buf());
        std::fs::create_dir_all(&target_dir)?;

        let mut lines: Vec<(String, String)> = Vec::new();
        for uri in uris {
            let Some(path) = uri_to_path.get(uri) else { continue };
            if !Path::new(path).exists() {
                continue;
            }
            let Some(track) = tracks_by_uri.get(uri) else { continue };
            lines.push((path.clone(), track_extinf(track)));
        }

        let target_path = target_dir.join(format!("{sanitized}.m3u"));
        write_m3u(&target_path, &lines, extended)?;

        // A prior regeneration may have left the playlist's file at a
        // different location; remove it now that the new copy exists.
        if let Some(old_dir) = structure.and_then(|s| s.locate(&sanitized)) {
            let old_path = playlists_dir.join(old_dir).join(format!("{sanitized}.m3u"));
            if old_path != target_path && old_path.exists() {
                std::fs::remove_file(&old_path)?;
            }
        }

        let size = std::fs::metadata(&target_path)?.len();
        info!(playlist_id = %playlist.id, tracks_written = lines.len(), size, "playlist regenerated");

        Ok(ExportResult {
            playlist_id: playlist.id.clone(),
            tracks_found: uris.len(),
            tracks_written: lines.len(),
            path: target_path,
        })
    }

    /// Applies a desired structure: creates missing folders, moves/writes
    /// playlist files to match, removes files for playlists the desired
    /// structure no longer mentions, then persists the structure file.
    pub fn reorganize(
        uow: &UnitOfWork,
        playlists_dir: &Path,
        desired: &PlaylistStructure,
        backup_existing: bool,
        extended: bool,
    ) -> Result<Vec<ExportResult>> {
        if backup_existing && playlists_dir.exists() {
            let backup_dir = playlists_dir.with_extension(format!("backup-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
            copy_dir_recursive(playlists_dir, &backup_dir)?;
        }

        for folder in desired.folders.keys() {
            std::fs::create_dir_all(playlists_dir.join(folder))?;
        }

        let mut desired_names: Vec<String> = desired.root_playlists.clone();
        for entry in desired.folders.values() {
            desired_names.extend(entry.playlists.iter().cloned());
        }

        // Persist the desired layout before regenerating so each
        // `regenerate_one` call resolves its target directory from it.
        desired.save(playlists_dir)?;

        let catalog_playlists = uow.playlists().get_all()?;
        let mut results = Vec::new();
        for name in &desired_names {
            if let Some((id, _)) = catalog_playlists
                .iter()
                .map(|p| (p.id.clone(), p.trimmed_name()))
                .find(|(_, n)| sanitize_playlist_name(n) == sanitize_playlist_name(name))
            {
                results.push(Self::regenerate_one(uow, &id, playlists_dir, extended)?);
            }
        }

        // Delete any playlist file not named by the desired structure.
        let desired_sanitized: std::collections::HashSet<String> =
            desired_names.iter().map(|n| sanitize_playlist_name(n)).collect();
        for entry in walkdir::WalkDir::new(playlists_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("m3u") {
                continue;
            }
            let stem = entry.path().file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !desired_sanitized.contains(stem) {
                std::fs::remove_file(entry.path())?;
            }
        }

        desired.save(playlists_dir)?;
        Ok(results)
    }

    /// Lists `.m3u` stems under `playlists_dir` with no matching catalog
    /// playlist name. `dry_run=true` only reports; otherwise deletes the
    /// orphan files and prunes them from the structure file.
    pub fn cleanup_orphans(uow: &UnitOfWork, playlists_dir: &Path, dry_run: bool) -> Result<Vec<String>> {
        let catalog_names: std::collections::HashSet<String> = uow
            .playlists()
            .get_all()?
            .into_iter()
            .map(|p| sanitize_playlist_name(&p.trimmed_name()))
            .collect();

        let mut orphans = Vec::new();
        for entry in walkdir::WalkDir::new(playlists_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("m3u") {
                continue;
            }
            let stem = entry.path().file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
            if !catalog_names.contains(&stem) {
                orphans.push(stem.clone());
                if !dry_run {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }

        if !dry_run {
            if let Some(mut structure) = PlaylistStructure::load(playlists_dir)? {
                structure.root_playlists.retain(|p| !orphans.contains(p));
                for entry in structure.folders.values_mut() {
                    entry.playlists.retain(|p| !orphans.contains(p));
                }
                structure.save(playlists_dir)?;
            }
        }

        Ok(orphans)
    }
}

fn track_extinf(track: &Track) -> String {
    let duration_secs = track.duration_ms.map(|ms| ms / 1000).unwrap_or(0);
    format!("#EXTINF:{duration_secs},{} - {}", track.artists, track.title)
}

fn write_m3u(path: &Path, lines: &[(String, String)], extended: bool) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    if extended {
        writeln!(file, "#EXTM3U")?;
    }
    for (file_path, extinf) in lines {
        if extended {
            writeln!(file, "{extinf}")?;
        }
        writeln!(file, "{file_path}")?;
    }
    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| CoreError::Unexpected(anyhow::anyhow!(e)))?;
        let rel = entry.path().strip_prefix(from).unwrap();
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{build_pool, run_in_unit_of_work, run_migrations};
    use crate::models::{FileMapping, Playlist, Track};

    fn test_pool() -> crate::db::Pool {
        let pool = build_pool(std::path::Path::new(":memory:"), 1, 5).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        pool
    }

    #[test]
    fn regenerates_extended_m3u_with_existing_files_only() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("song.mp3");
        std::fs::write(&audio_path, b"x").unwrap();

        run_in_unit_of_work(&pool, |uow| {
            uow.playlists().insert(&Playlist {
                id: "p1".into(),
                name: "Deep".into(),
                master_sync_token: None,
                associations_token: None,
            })?;
            uow.tracks().insert(&Track {
                uri: "service:track:1".into(),
                title: "Song".into(),
                artists: "Artist".into(),
                album: "".into(),
                duration_ms: Some(180_000),
                added_to_reference_at: None,
                is_local: false,
            })?;
            uow.track_playlists().insert("p1", "service:track:1")?;
            uow.file_mappings().insert(&FileMapping {
                id: 0,
                file_path: audio_path.to_string_lossy().to_string(),
                track_uri: "service:track:1".into(),
                file_hash: None,
                file_size: None,
                last_modified: None,
                created_at: chrono::Utc::now(),
                is_active: true,
            })
            .map(|_| ())
        })
        .unwrap();

        let result = run_in_unit_of_work(&pool, |uow| {
            PlaylistExporter::regenerate_one(uow, "p1", dir.path(), true)
        })
        .unwrap();
        assert_eq!(result.tracks_written, 1);

        let contents = std::fs::read_to_string(&result.path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("#EXTM3U"));
        assert_eq!(lines.next(), Some("#EXTINF:180,Artist - Song"));
        assert_eq!(lines.next(), Some(audio_path.to_string_lossy().as_ref()));
    }

    #[test]
    fn regeneration_preserves_structure_file_folder_placement() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Electronic/House")).unwrap();

        let structure = PlaylistStructure {
            root_playlists: vec![],
            folders: HashMap::from([(
                "Electronic/House".to_string(),
                FolderEntry { playlists: vec!["Deep".to_string()] },
            )]),
            structure_version: STRUCTURE_VERSION,
            last_updated: "2026-01-01T00:00:00Z".into(),
        };
        structure.save(dir.path()).unwrap();

        run_in_unit_of_work(&pool, |uow| {
            uow.playlists().insert(&Playlist {
                id: "p1".into(),
                name: "Deep".into(),
                master_sync_token: None,
                associations_token: None,
            })
        })
        .unwrap();

        let result = run_in_unit_of_work(&pool, |uow| {
            PlaylistExporter::regenerate_one(uow, "p1", dir.path(), true)
        })
        .unwrap();

        assert_eq!(
            result.path,
            dir.path().join("Electronic").join("House").join("Deep.m3u")
        );
        assert!(!dir.path().join("Deep.m3u").exists());
    }

    #[test]
    fn batch_regenerates_every_playlist_from_preloaded_state() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.mp3");
        let path_b = dir.path().join("b.mp3");
        std::fs::write(&path_a, b"x").unwrap();
        std::fs::write(&path_b, b"x").unwrap();

        run_in_unit_of_work(&pool, |uow| {
            for (id, name, uri, path) in [
                ("p1", "One", "service:track:1", &path_a),
                ("p2", "Two", "service:track:2", &path_b),
            ] {
                uow.playlists().insert(&Playlist {
                    id: id.into(),
                    name: name.into(),
                    master_sync_token: None,
                    associations_token: None,
                })?;
                uow.tracks().insert(&Track {
                    uri: uri.into(),
                    title: name.into(),
                    artists: "Artist".into(),
                    album: "".into(),
                    duration_ms: Some(100_000),
                    added_to_reference_at: None,
                    is_local: false,
                })?;
                uow.track_playlists().insert(id, uri)?;
                uow.file_mappings()
                    .insert(&FileMapping {
                        id: 0,
                        file_path: path.to_string_lossy().to_string(),
                        track_uri: uri.into(),
                        file_hash: None,
                        file_size: None,
                        last_modified: None,
                        created_at: chrono::Utc::now(),
                        is_active: true,
                    })
                    .map(|_| ())?;
            }
            Ok(())
        })
        .unwrap();

        let (successes, failures) = run_in_unit_of_work(&pool, |uow| {
            PlaylistExporter::regenerate_batch(
                uow,
                &["p1".to_string(), "p2".to_string(), "missing".to_string()],
                dir.path(),
                true,
            )
        })
        .unwrap();

        assert_eq!(successes.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "missing");
        for result in &successes {
            assert_eq!(result.tracks_written, 1);
        }
    }

    #[test]
    fn orphan_cleanup_dry_run_reports_without_deleting() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Ghost.m3u"), "#EXTM3U\n").unwrap();

        let orphans = run_in_unit_of_work(&pool, |uow| PlaylistExporter::cleanup_orphans(uow, dir.path(), true)).unwrap();
        assert_eq!(orphans, vec!["Ghost".to_string()]);
        assert!(dir.path().join("Ghost.m3u").exists());
    }
}

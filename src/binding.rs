//! File ↔ catalog binding engine (C5).
//!
//! Scans a filesystem root with `walkdir`,
//! uses the fuzzy matcher (C3) to propose bindings, and persists them via
//! the catalog store (C1). Grounded on
//! `original_source/scripts/sync_local_tracks.py` for the scan/propose/bind
//! shape and on `original_source/helpers/file_helper.py` for the audio
//! extension set.

use crate::db::UnitOfWork;
use crate::error::{CoreError, Result};
use crate::matcher::{FuzzyMatcher, MatchResult};
use crate::models::FileMapping;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "aac", "ogg", "wma"];

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;
const CANDIDATE_SEARCH_THRESHOLD: f64 = 0.4;
const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct AutoMatch {
    pub file_path: PathBuf,
    pub track_uri: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeedsSelection {
    pub file_path: PathBuf,
    pub candidates: Vec<MatchResult>,
}

#[derive(Debug, Clone, Default)]
pub struct BindingAnalysisPlan {
    pub auto_matches: Vec<AutoMatch>,
    pub needs_selection: Vec<NeedsSelection>,
    pub files_scanned: usize,
    pub files_already_bound: usize,
}

impl BindingAnalysisPlan {
    pub fn needs_confirmation(&self) -> bool {
        !self.needs_selection.is_empty()
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Best-effort duration extraction from audio tags via `lofty`. Returns
/// `None` for unreadable or tagless files rather than failing analysis.
pub fn extract_duration_ms(path: &Path) -> Option<i64> {
    use lofty::file::AudioFile;
    use lofty::probe::Probe;
    let tagged = Probe::open(path).ok()?.read().ok()?;
    Some(tagged.properties().duration().as_millis() as i64)
}

pub struct BindingEngine;

impl BindingEngine {
    /// Scans `root`, skipping files already bound, and classifies each
    /// remaining audio file as auto-match (score ≥ `threshold`) or
    /// needs-user-selection (candidates below it).
    pub fn analyze(uow: &UnitOfWork, root: &Path, threshold: f64) -> Result<BindingAnalysisPlan> {
        let tracks = uow.tracks().get_all()?;
        let active_mappings = uow.file_mappings().get_all_active_mappings()?;
        let bound_paths: HashMap<String, String> = active_mappings
            .iter()
            .map(|m| (m.file_path.clone(), m.track_uri.clone()))
            .collect();

        let matcher = FuzzyMatcher::new(tracks, &active_mappings);

        let mut plan = BindingAnalysisPlan::default();
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                continue;
            }
            plan.files_scanned += 1;
            let path_str = entry.path().to_string_lossy().to_string();
            if bound_paths.contains_key(&path_str) {
                plan.files_already_bound += 1;
                continue;
            }

            let duration_ms = extract_duration_ms(entry.path());
            let file_name = entry.file_name().to_string_lossy().to_string();
            let matches = matcher.find_matches(&file_name, CANDIDATE_SEARCH_THRESHOLD, MAX_CANDIDATES, None, duration_ms);

            match matches.first() {
                Some(top) if top.score >= threshold => {
                    plan.auto_matches.push(AutoMatch {
                        file_path: entry.path().to_path_buf(),
                        track_uri: top.track.uri.clone(),
                        score: top.score,
                    });
                }
                _ => {
                    plan.needs_selection.push(NeedsSelection {
                        file_path: entry.path().to_path_buf(),
                        candidates: matches,
                    });
                }
            }
        }

        info!(
            scanned = plan.files_scanned,
            already_bound = plan.files_already_bound,
            auto = plan.auto_matches.len(),
            needs_selection = plan.needs_selection.len(),
            "binding analysis complete"
        );
        Ok(plan)
    }
}

/// A single intended binding, whether from an auto-match or a resolved
/// user selection.
#[derive(Debug, Clone, PartialEq)]
pub struct IntendedBinding {
    pub file_path: PathBuf,
    pub track_uri: String,
}

#[derive(Debug, Clone, Default)]
pub struct BindingExecutionResult {
    pub created: Vec<IntendedBinding>,
    pub conflicts: Vec<IntendedBinding>,
    pub no_ops: Vec<IntendedBinding>,
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

impl BindingAnalysisPlan {
    /// Flattens auto-matches and resolved user selections into the list of
    /// bindings `execute` should attempt, in a stable order.
    pub fn intended_bindings(&self, user_selections: &HashMap<PathBuf, String>) -> Vec<IntendedBinding> {
        let mut out: Vec<IntendedBinding> = self
            .auto_matches
            .iter()
            .map(|m| IntendedBinding {
                file_path: m.file_path.clone(),
                track_uri: m.track_uri.clone(),
            })
            .collect();
        for needs in &self.needs_selection {
            if let Some(uri) = user_selections.get(&needs.file_path) {
                out.push(IntendedBinding {
                    file_path: needs.file_path.clone(),
                    track_uri: uri.clone(),
                });
            }
        }
        out
    }
}

impl BindingEngine {
    /// Validates and applies each intended binding inside one unit-of-work,
    /// then resolves any resulting duplicate bindings per `resolutions`
    /// (track URI → the file path to keep).
    pub fn execute(
        uow: &UnitOfWork,
        bindings: &[IntendedBinding],
        resolutions: &HashMap<String, PathBuf>,
    ) -> Result<BindingExecutionResult> {
        let mut result = BindingExecutionResult::default();

        for binding in bindings {
            if !binding.file_path.exists() {
                return Err(CoreError::NotFound(format!(
                    "file {} no longer exists",
                    binding.file_path.display()
                )));
            }
            if uow.tracks().get_by_uri(&binding.track_uri)?.is_none() {
                return Err(CoreError::NotFound(format!(
                    "track {} does not exist",
                    binding.track_uri
                )));
            }

            let path_str = binding.file_path.to_string_lossy().to_string();
            if let Some(existing) = uow.file_mappings().get_active_by_path(&path_str)? {
                if existing.track_uri == binding.track_uri {
                    result.no_ops.push(binding.clone());
                } else {
                    result.conflicts.push(binding.clone());
                }
                continue;
            }

            let hash = sha256_file(&binding.file_path)?;
            let meta = std::fs::metadata(&binding.file_path)?;
            let last_modified = meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);

            uow.file_mappings().insert(&FileMapping {
                id: 0,
                file_path: path_str,
                track_uri: binding.track_uri.clone(),
                file_hash: Some(hash),
                file_size: Some(meta.len() as i64),
                last_modified,
                created_at: chrono::Utc::now(),
                is_active: true,
            })?;
            result.created.push(binding.clone());
        }

        if !resolutions.is_empty() {
            BindingEngine::resolve_existing_duplicate_mappings(uow, resolutions)?;
        }

        Ok(result)
    }

    /// URIs with more than one active mapping, each carrying its duplicate
    /// file paths — candidates for `resolve_existing_duplicate_mappings`.
    pub fn get_existing_duplicate_mappings(uow: &UnitOfWork) -> Result<HashMap<String, Vec<FileMapping>>> {
        let mappings = uow.file_mappings().get_all_active_mappings()?;
        let mut by_uri: HashMap<String, Vec<FileMapping>> = HashMap::new();
        for m in mappings {
            by_uri.entry(m.track_uri.clone()).or_default().push(m);
        }
        by_uri.retain(|_, v| v.len() > 1);
        Ok(by_uri)
    }

    /// For each URI in `resolutions`, keeps the mapping to the chosen path
    /// and soft-deletes the others.
    pub fn resolve_existing_duplicate_mappings(
        uow: &UnitOfWork,
        resolutions: &HashMap<String, PathBuf>,
    ) -> Result<usize> {
        let mut removed = 0;
        for (uri, keep_path) in resolutions {
            let keep_str = keep_path.to_string_lossy().to_string();
            for mapping in uow.file_mappings().get_active_by_uri(uri)? {
                if mapping.file_path != keep_str {
                    uow.file_mappings().soft_delete(mapping.id)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Soft-deletes active mappings whose backing file has disappeared.
    pub fn cleanup_stale_mappings(uow: &UnitOfWork) -> Result<usize> {
        let mut removed = 0;
        for mapping in uow.file_mappings().get_all_active_mappings()? {
            if !Path::new(&mapping.file_path).exists() {
                uow.file_mappings().soft_delete(mapping.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{build_pool, run_in_unit_of_work, run_migrations};
    use crate::models::Track;
    use std::io::Write;

    fn test_pool() -> crate::db::Pool {
        let pool = build_pool(Path::new(":memory:"), 1, 5).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        pool
    }

    #[test]
    fn analyze_on_empty_directory_yields_zero_files_and_no_confirmation() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        let plan = run_in_unit_of_work(&pool, |uow| BindingEngine::analyze(uow, dir.path(), 0.75)).unwrap();
        assert_eq!(plan.files_scanned, 0);
        assert!(!plan.needs_confirmation());
    }

    #[test]
    fn execute_creates_mapping_with_sha256_hash() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("Artist - Song.mp3");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(b"fake audio bytes").unwrap();

        run_in_unit_of_work(&pool, |uow| {
            uow.tracks().insert(&Track {
                uri: "service:track:abc".into(),
                title: "Song".into(),
                artists: "Artist".into(),
                album: "".into(),
                duration_ms: None,
                added_to_reference_at: None,
                is_local: false,
            })
        })
        .unwrap();

        let binding = IntendedBinding {
            file_path: file_path.clone(),
            track_uri: "service:track:abc".into(),
        };
        let result = run_in_unit_of_work(&pool, |uow| {
            BindingEngine::execute(uow, &[binding.clone()], &HashMap::new())
        })
        .unwrap();
        assert_eq!(result.created.len(), 1);

        let conn = pool.get().unwrap();
        let mapping = crate::db::file_mapping_repository::FileMappingRepository::new(&conn)
            .get_active_by_path(&file_path.to_string_lossy())
            .unwrap()
            .unwrap();
        let expected_hash = sha256_file(&file_path).unwrap();
        assert_eq!(mapping.file_hash.as_deref(), Some(expected_hash.as_str()));
    }

    #[test]
    fn execute_reports_conflict_for_file_bound_to_different_uri() {
        let pool = test_pool();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("song.mp3");
        std::fs::write(&file_path, b"data").unwrap();

        run_in_unit_of_work(&pool, |uow| {
            uow.tracks().insert(&Track {
                uri: "service:track:a".into(),
                title: "A".into(),
                artists: "X".into(),
                album: "".into(),
                duration_ms: None,
                added_to_reference_at: None,
                is_local: false,
            })?;
            uow.tracks().insert(&Track {
                uri: "service:track:b".into(),
                title: "B".into(),
                artists: "X".into(),
                album: "".into(),
                duration_ms: None,
                added_to_reference_at: None,
                is_local: false,
            })?;
            uow.file_mappings().insert(&FileMapping {
                id: 0,
                file_path: file_path.to_string_lossy().to_string(),
                track_uri: "service:track:a".into(),
                file_hash: None,
                file_size: None,
                last_modified: None,
                created_at: chrono::Utc::now(),
                is_active: true,
            })
            .map(|_| ())
        })
        .unwrap();

        let binding = IntendedBinding {
            file_path: file_path.clone(),
            track_uri: "service:track:b".into(),
        };
        let result = run_in_unit_of_work(&pool, |uow| {
            BindingEngine::execute(uow, &[binding.clone()], &HashMap::new())
        })
        .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.created.is_empty());
    }

    #[test]
    fn cleanup_stale_mappings_removes_entries_for_deleted_files() {
        let pool = test_pool();
        run_in_unit_of_work(&pool, |uow| {
            uow.tracks().insert(&Track {
                uri: "service:track:a".into(),
                title: "A".into(),
                artists: "X".into(),
                album: "".into(),
                duration_ms: None,
                added_to_reference_at: None,
                is_local: false,
            })?;
            uow.file_mappings().insert(&FileMapping {
                id: 0,
                file_path: "/nonexistent/path/song.mp3".into(),
                track_uri: "service:track:a".into(),
                file_hash: None,
                file_size: None,
                last_modified: None,
                created_at: chrono::Utc::now(),
                is_active: true,
            })
            .map(|_| ())
        })
        .unwrap();

        let removed = run_in_unit_of_work(&pool, |uow| BindingEngine::cleanup_stale_mappings(uow)).unwrap();
        assert_eq!(removed, 1);
    }
}

//! Duplicate engine (C6): fingerprint-bucketed near-duplicate discovery,
//! primary selection, and playlist-membership merging.
//!
//! Grounded on `original_source/helpers/deduplication_helper.py` (the
//! normalization markers and edit-ratio verification pass) and on
//! `original_source/api/services/duplicate_track_service.py` (the
//! group/primary/merge shape). Edit-ratio uses `strsim`, shared with C3.

use crate::db::UnitOfWork;
use crate::error::Result;
use crate::models::Track;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::info;

const VERSION_MARKERS: &[&str] = &[
    "explicit",
    "clean",
    "radio edit",
    "album version",
    "remastered",
    "remaster",
];

const VERIFY_THRESHOLD: f64 = 0.95;

fn strip_bracketed(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = (depth - 1).max(0),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn normalize_title_for_fingerprint(title: &str) -> String {
    let mut normalized = strip_bracketed(&title.to_lowercase());
    for marker in VERSION_MARKERS {
        normalized = normalized.replace(marker, "");
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_artists_for_fingerprint(artists: &str) -> String {
    let mut words: Vec<String> = artists
        .split(',')
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    words.sort();
    words.join(",")
}

/// First 8 hex characters of SHA-256 over the normalized title+artists —
/// the coarse bucket key grouping likely duplicates before the pairwise
/// verification pass.
fn fingerprint_bucket(track: &Track) -> String {
    let payload = format!(
        "{}|{}",
        normalize_title_for_fingerprint(&track.title),
        normalize_artists_for_fingerprint(&track.artists)
    );
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

fn edit_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

fn pairwise_duplicate(a: &Track, b: &Track) -> bool {
    let title_sim = edit_ratio(
        &normalize_title_for_fingerprint(&a.title),
        &normalize_title_for_fingerprint(&b.title),
    );
    let artist_sim = edit_ratio(
        &normalize_artists_for_fingerprint(&a.artists),
        &normalize_artists_for_fingerprint(&b.artists),
    );
    title_sim >= VERIFY_THRESHOLD && artist_sim >= VERIFY_THRESHOLD
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub primary: Track,
    pub duplicates: Vec<Track>,
    pub playlists_to_merge: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateDetectionPlan {
    pub groups: Vec<DuplicateGroup>,
}

/// Primary-selection sort key: duration desc, non-local first,
/// has-surrogate-key first, album name length desc.
fn primary_sort_key(t: &Track) -> (std::cmp::Reverse<i64>, bool, bool, std::cmp::Reverse<usize>) {
    let has_surrogate = t.uri.starts_with(crate::models::LOCAL_URI_PREFIX);
    (
        std::cmp::Reverse(t.duration_ms.unwrap_or(0)),
        t.is_local,
        !has_surrogate,
        std::cmp::Reverse(t.album.len()),
    )
}

pub struct DuplicateEngine;

impl DuplicateEngine {
    /// Detects duplicate groups without writing anything.
    pub fn detect(uow: &UnitOfWork) -> Result<DuplicateDetectionPlan> {
        let tracks: Vec<Track> = uow
            .tracks()
            .get_all()?
            .into_iter()
            .filter(|t| !t.title.trim().is_empty() && !t.artists.trim().is_empty())
            .collect();

        let mut buckets: HashMap<String, Vec<Track>> = HashMap::new();
        for t in tracks {
            buckets.entry(fingerprint_bucket(&t)).or_default().push(t);
        }

        let all_memberships = uow.track_playlists().all_playlist_track_mappings()?;
        let mut uri_playlists: HashMap<&str, Vec<&str>> = HashMap::new();
        for (playlist_id, uris) in &all_memberships {
            for uri in uris {
                uri_playlists.entry(uri.as_str()).or_default().push(playlist_id.as_str());
            }
        }

        let mut groups = Vec::new();
        for (_, bucket) in buckets {
            if bucket.len() < 2 {
                continue;
            }
            for equivalence_class in group_equivalent(&bucket) {
                if equivalence_class.len() < 2 {
                    continue;
                }
                let mut sorted = equivalence_class;
                sorted.sort_by_key(primary_sort_key);
                let primary = sorted[0].clone();
                let duplicates = sorted[1..].to_vec();

                let mut playlists_to_merge: Vec<String> = duplicates
                    .iter()
                    .flat_map(|d| uri_playlists.get(d.uri.as_str()).cloned().unwrap_or_default())
                    .map(String::from)
                    .collect();
                playlists_to_merge.sort();
                playlists_to_merge.dedup();

                groups.push(DuplicateGroup {
                    primary,
                    duplicates,
                    playlists_to_merge,
                });
            }
        }

        info!(groups = groups.len(), "duplicate detection complete");
        Ok(DuplicateDetectionPlan { groups })
    }

    /// Applies the detection plan transactionally: merges membership into
    /// each group's primary, then removes every duplicate's edges and row
    /// (file mappings cascade via C1). Dry-run callers should use
    /// [`DuplicateEngine::detect`] alone and skip this call.
    pub fn cleanup(uow: &UnitOfWork, plan: &DuplicateDetectionPlan) -> Result<usize> {
        let mut removed = 0;
        for group in &plan.groups {
            let primary_playlists: std::collections::HashSet<String> =
                uow.track_playlists().get_playlist_ids_for_uri(&group.primary.uri)?.into_iter().collect();
            for pid in &group.playlists_to_merge {
                if !primary_playlists.contains(pid) {
                    uow.track_playlists().insert(pid, &group.primary.uri)?;
                }
            }
            for dup in &group.duplicates {
                for pid in uow.track_playlists().get_playlist_ids_for_uri(&dup.uri)? {
                    uow.track_playlists().delete(&pid, &dup.uri)?;
                }
                uow.tracks().delete_by_uri(&dup.uri)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Pairwise-verifies members of a fingerprint bucket and partitions them
/// into equivalence groups via union-find.
fn group_equivalent(bucket: &[Track]) -> Vec<Vec<Track>> {
    let n = bucket.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if pairwise_duplicate(&bucket[i], &bucket[j]) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }
    let mut groups: HashMap<usize, Vec<Track>> = HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(bucket[i].clone());
    }
    groups.into_values().collect()
}

//! Fuzzy matcher (C3): scores local filenames against catalog tracks.
//!
//! Grounded on `original_source/helpers/fuzzy_match_helper.py` for every
//! constant below (mapping penalties, duration-proximity boosts, the
//! artist/title weight blends, and the remix-keyword list); that module is
//! the canonical source for these numbers.

use crate::models::{FileMapping, Track};
use std::collections::{HashMap, HashSet};

const REMIX_KEYWORDS: &[&str] = &[
    "remix", "edit", "mix", "version", "vip", "bootleg", "rework", "flip", "refix", "redo",
    "extended", "radio", "club", "dub",
];

#[derive(Debug, Clone)]
pub struct PreprocessedTrack {
    pub track: Track,
    normalized_title: String,
    normalized_artist: String,
    artist_words: HashSet<String>,
    base_title: String,
    remix_info: Option<String>,
    mapping_penalty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub track: Track,
    pub score: f64,
    pub reason: String,
}

pub struct FuzzyMatcher {
    indexed: Vec<PreprocessedTrack>,
}

fn normalize(s: &str) -> String {
    let replaced = s.replace('&', "and");
    let no_accents: String = replaced
        .chars()
        .map(strip_accent)
        .collect::<String>()
        .to_lowercase();
    let mut out = String::with_capacity(no_accents.len());
    let mut last_was_space = false;
    for c in no_accents.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

fn strip_accent(c: char) -> char {
    // Minimal diacritic stripping for the common Latin-1 accented ranges;
    // avoids pulling in a full Unicode normalization crate for this one
    // narrow concern.
    const ACCENTED: &str = "àáâãäåèéêëìíîïòóôõöùúûüýñç";
    const PLAIN: &str = "aaaaaaeeeeiiiiooooouuuuync";
    if let Some(idx) = ACCENTED.chars().position(|a| a == c.to_ascii_lowercase()) {
        let plain = PLAIN.chars().nth(idx).unwrap();
        if c.is_uppercase() {
            plain.to_ascii_uppercase()
        } else {
            plain
        }
    } else {
        c
    }
}

fn artist_words(s: &str) -> HashSet<String> {
    s.split(|c| c == ',' || c == ';' || c == '&')
        .map(|w| normalize(w.trim()))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Splits a normalized title into `(base_title, remix_info)`. Remix
/// information is pulled from a trailing parenthesized/bracketed group, or
/// from a trailing `-`-separated group containing a remix keyword.
fn split_remix(title: &str) -> (String, Option<String>) {
    if let Some(open) = title.rfind(['(', '[']) {
        let close = if title[open..].starts_with('(') { ')' } else { ']' };
        if let Some(close_rel) = title[open..].find(close) {
            let close_idx = open + close_rel;
            if close_idx == title.len() - 1 {
                let inner = title[open + 1..close_idx].trim().to_string();
                let base = title[..open].trim().to_string();
                if !inner.is_empty() {
                    return (base, Some(inner));
                }
            }
        }
    }
    if let Some(dash_idx) = title.rfind(" - ") {
        let tail = title[dash_idx + 3..].trim();
        if REMIX_KEYWORDS.iter().any(|kw| tail.contains(kw)) {
            let base = title[..dash_idx].trim().to_string();
            return (base, Some(tail.to_string()));
        }
    }
    (title.to_string(), None)
}

fn remix_keyword_set(remix_info: &str) -> HashSet<&'static str> {
    REMIX_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| remix_info.contains(kw))
        .collect()
}

fn jaccard(a: &HashSet<&'static str>, b: &HashSet<&'static str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn edit_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Parses `"Artist - Title"`-shaped filename stems using, in order of
/// preference, the separators `" - "`, `" – "`, `" — "`, `" by "`.
fn split_artist_title(stem: &str) -> (String, String) {
    for sep in [" - ", " – ", " — ", " by "] {
        if let Some(idx) = stem.find(sep) {
            let artist = stem[..idx].trim().to_string();
            let title = stem[idx + sep.len()..].trim().to_string();
            return (artist, title);
        }
    }
    (String::new(), stem.trim().to_string())
}

fn duration_boost(file_duration_ms: Option<i64>, candidate_duration_ms: Option<i64>) -> f64 {
    match (file_duration_ms, candidate_duration_ms) {
        (Some(a), Some(b)) => {
            let diff_secs = ((a - b).abs() as f64) / 1000.0;
            if diff_secs <= 1.0 {
                1.25
            } else if diff_secs <= 3.0 {
                1.20
            } else if diff_secs <= 10.0 {
                1.15
            } else if diff_secs <= 30.0 {
                1.10
            } else {
                1.0
            }
        }
        _ => 1.0,
    }
}

impl FuzzyMatcher {
    /// Builds the matcher over a snapshot of all tracks and active file
    /// mappings. Constructed per-request from a database snapshot; never
    /// shared across requests.
    pub fn new(tracks: Vec<Track>, active_mappings: &[FileMapping]) -> Self {
        let mut uri_to_paths: HashMap<&str, Vec<&str>> = HashMap::new();
        for m in active_mappings {
            uri_to_paths.entry(m.track_uri.as_str()).or_default().push(m.file_path.as_str());
        }

        let indexed = tracks
            .into_iter()
            .map(|track| {
                let normalized_title = normalize(&track.title);
                let normalized_artist = normalize(&track.artists);
                let (base_title, remix_info) = split_remix(&normalized_title);
                let paths = uri_to_paths.get(track.uri.as_str());
                let mapping_penalty = match paths {
                    None | Some([]) => 1.0,
                    Some(p) if p.iter().any(|path| std::path::Path::new(path).exists()) => 0.3,
                    Some(_) => 0.8,
                };
                PreprocessedTrack {
                    artist_words: artist_words(&track.artists),
                    normalized_title,
                    normalized_artist,
                    base_title,
                    remix_info,
                    mapping_penalty,
                    track,
                }
            })
            .collect();

        Self { indexed }
    }

    fn score_one(&self, query_artist: &str, query_title_norm: &str, file_duration_ms: Option<i64>, candidate: &PreprocessedTrack) -> f64 {
        let (base_query, query_remix) = split_remix(query_title_norm);

        let artist_score = if query_artist.is_empty() {
            0.0
        } else if candidate.normalized_artist.contains(query_artist) {
            1.0
        } else {
            candidate
                .track
                .artist_list()
                .iter()
                .map(|a| edit_ratio(query_artist, &normalize(a)))
                .fold(0.0_f64, f64::max)
        };

        let base_title_score = edit_ratio(&base_query, &candidate.base_title);
        let title_score = match (&query_remix, &candidate.remix_info) {
            (Some(q), Some(c)) => {
                let remix_sim = edit_ratio(q, c).max(jaccard(&remix_keyword_set(q), &remix_keyword_set(c)));
                0.7 * base_title_score + 0.3 * remix_sim
            }
            (Some(_), None) | (None, Some(_)) => base_title_score * 0.6,
            (None, None) => base_title_score,
        };

        let combined = if !query_artist.is_empty() {
            0.6 * artist_score + 0.4 * title_score
        } else {
            0.9 * title_score
        };

        let penalized = combined * candidate.mapping_penalty;
        let boost = duration_boost(file_duration_ms, candidate.track.duration_ms);
        (penalized * boost).min(1.0)
    }

    /// Scores every admissible candidate against `filename` (and optional
    /// file duration), returning matches at or above `threshold`, ranked
    /// descending, truncated to `max_matches`. `exclude_uri`, when set, is
    /// never returned (used to keep a track from matching the file it is
    /// already bound to).
    pub fn find_matches(
        &self,
        filename: &str,
        threshold: f64,
        max_matches: usize,
        exclude_uri: Option<&str>,
        file_duration_ms: Option<i64>,
    ) -> Vec<MatchResult> {
        let stem = std::path::Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        let (raw_artist, raw_title) = split_artist_title(stem);
        let query_artist = normalize(&raw_artist);
        let query_title = normalize(&raw_title);
        let query_words = artist_words(&raw_artist);

        let mut results: Vec<MatchResult> = self
            .indexed
            .iter()
            .filter(|c| exclude_uri.map(|u| u != c.track.uri).unwrap_or(true))
            .filter(|c| {
                query_words.is_empty() || c.artist_words.iter().any(|w| query_words.contains(w))
            })
            .map(|c| {
                let score = self.score_one(&query_artist, &query_title, file_duration_ms, c);
                MatchResult {
                    track: c.track.clone(),
                    score,
                    reason: format!(
                        "artist={:.2} penalty={:.2}",
                        if query_artist.is_empty() { 0.0 } else { 1.0 },
                        c.mapping_penalty
                    ),
                }
            })
            .filter(|m| m.score >= threshold)
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(max_matches);
        results
    }

    pub fn find_best_match(
        &self,
        filename: &str,
        threshold: f64,
        exclude_uri: Option<&str>,
        file_duration_ms: Option<i64>,
    ) -> Option<MatchResult> {
        self.find_matches(filename, threshold, 1, exclude_uri, file_duration_ms)
            .into_iter()
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(uri: &str, title: &str, artists: &str, duration_ms: Option<i64>) -> Track {
        Track {
            uri: uri.into(),
            title: title.into(),
            artists: artists.into(),
            album: String::new(),
            duration_ms,
            added_to_reference_at: None,
            is_local: false,
        }
    }

    fn mapping(track_uri: &str, file_path: &str) -> FileMapping {
        FileMapping {
            id: 1,
            file_path: file_path.into(),
            track_uri: track_uri.into(),
            file_hash: None,
            file_size: None,
            last_modified: None,
            created_at: chrono::Utc::now(),
            is_active: true,
        }
    }

    #[test]
    fn exact_name_and_duration_match_clamps_to_one() {
        let tracks = vec![track("service:track:abc", "Song", "Artist", Some(361_000))];
        let matcher = FuzzyMatcher::new(tracks, &[]);
        let best = matcher
            .find_best_match("Artist - Song.mp3", 0.4, None, Some(360_000))
            .expect("expected a match");
        assert_eq!(best.track.uri, "service:track:abc");
        assert!((best.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_artist_is_excluded_by_word_set_prefilter() {
        let tracks = vec![track("service:track:xyz", "Song", "Someone Else", Some(200_000))];
        let matcher = FuzzyMatcher::new(tracks, &[]);
        let matches = matcher.find_matches("Artist - Song.mp3", 0.1, 10, None, None);
        assert!(matches.is_empty());
    }

    #[test]
    fn exclude_uri_omits_the_excluded_track_from_results() {
        let tracks = vec![
            track("service:track:a", "Song", "Artist", None),
            track("service:track:b", "Song", "Artist", None),
        ];
        let matcher = FuzzyMatcher::new(tracks, &[]);
        let matches = matcher.find_matches("Artist - Song.mp3", 0.1, 10, Some("service:track:a"), None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].track.uri, "service:track:b");
    }

    #[test]
    fn track_bound_to_an_existing_file_takes_the_harsh_conflict_penalty() {
        let tracks = vec![
            track("service:track:a", "Song", "Artist", None),
            track("service:track:b", "Song", "Artist", None),
        ];
        let dir = tempfile::tempdir().unwrap();
        let bound_path = dir.path().join("other.mp3");
        std::fs::write(&bound_path, b"x").unwrap();
        let mappings = vec![mapping("service:track:a", bound_path.to_str().unwrap())];
        let matcher = FuzzyMatcher::new(tracks, &mappings);
        let matches = matcher.find_matches("Artist - Song.mp3", 0.1, 10, None, None);
        assert_eq!(matches[0].track.uri, "service:track:b");
        let conflicted = matches.iter().find(|m| m.track.uri == "service:track:a").unwrap();
        let unmapped = matches.iter().find(|m| m.track.uri == "service:track:b").unwrap();
        assert!(conflicted.score < unmapped.score);
    }

    #[test]
    fn stale_mapping_to_a_missing_file_takes_the_lighter_penalty() {
        let tracks = vec![
            track("service:track:a", "Song", "Artist", None),
            track("service:track:b", "Song", "Artist", None),
        ];
        let mappings = vec![mapping("service:track:a", "/music/gone.mp3")];
        let matcher = FuzzyMatcher::new(tracks, &mappings);
        let matches = matcher.find_matches("Artist - Song.mp3", 0.1, 10, None, None);
        let stale = matches.iter().find(|m| m.track.uri == "service:track:a").unwrap();
        let unmapped = matches.iter().find(|m| m.track.uri == "service:track:b").unwrap();
        assert!(stale.score < unmapped.score);
        assert!((stale.score - 0.8 * unmapped.score).abs() < 1e-9);
    }

    #[test]
    fn remix_aware_title_blend_prefers_matching_remix_tag() {
        let tracks = vec![
            track("service:track:radio", "Song (Radio Edit)", "Artist", None),
            track("service:track:club", "Song (Club Mix)", "Artist", None),
        ];
        let matcher = FuzzyMatcher::new(tracks, &[]);
        let matches = matcher.find_matches("Artist - Song (Club Mix).mp3", 0.1, 10, None, None);
        assert_eq!(matches[0].track.uri, "service:track:club");
    }
}

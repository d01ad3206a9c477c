use chrono::{DateTime, Utc};
use globset::{Glob, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::CoreResult;

const STATE_FILE_NAME: &str = ".memory-exchange-state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(rename = "fileHashes")]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(rename = "lastFullIndexUtc")]
    pub last_full_index_utc: Option<DateTime<Utc>>,
    #[serde(rename = "lastIncrementalIndexUtc")]
    pub last_incremental_index_utc: Option<DateTime<Utc>>,
    #[serde(rename = "indexName")]
    pub index_name: String,
}

pub struct ScanResult {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub all: Vec<String>,
    pub prev_state: IndexState,
    pub new_state: IndexState,
}

fn state_path(root: &Path) -> std::path::PathBuf {
    root.join(STATE_FILE_NAME)
}

/// Loads persisted scan state. Missing or malformed state is non-fatal and
/// treated as an empty state, per the pipeline's IOError/ParseError policy.
fn load_state(root: &Path) -> IndexState {
    let path = state_path(root);
    match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => IndexState::default(),
    }
}

/// Writes `state` to the state file atomically (write to a temp file in the
/// same directory, then rename).
pub fn save_state(root: &Path, state: &IndexState) -> CoreResult<()> {
    let path = state_path(root);
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn normalize_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_always_excluded(normalized: &str) -> bool {
    normalized.starts_with("personal/")
}

fn hash_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// Walks `root` for `*.md` files, hashes each, and diffs against persisted
/// state to produce `{changed, deleted, all}`. Does not persist state —
/// that is the pipeline's responsibility via `save_state`.
pub fn scan(
    root: &Path,
    force_full_rebuild: bool,
    index_name: &str,
    exclude_patterns: &[String],
) -> CoreResult<ScanResult> {
    let prev_state = load_state(root);

    let mut glob_builder = GlobSetBuilder::new();
    for pattern in exclude_patterns {
        if let Ok(glob) = Glob::new(pattern) {
            glob_builder.add(glob);
        }
    }
    let exclude_set = glob_builder.build().ok();

    let mut candidates = Vec::new();
    for entry in ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .build()
        .flatten()
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let normalized = normalize_relative(root, path);
        if is_always_excluded(&normalized) {
            continue;
        }
        if let Some(set) = &exclude_set {
            if set.is_match(&normalized) {
                continue;
            }
        }
        candidates.push((normalized, path.to_path_buf()));
    }

    let hashes: Vec<(String, Option<String>)> = candidates
        .par_iter()
        .map(|(normalized, path)| (normalized.clone(), hash_file(path)))
        .collect();

    let mut new_file_hashes = BTreeMap::new();
    let mut all = Vec::new();
    for (normalized, hash) in hashes {
        if let Some(hash) = hash {
            all.push(normalized.clone());
            new_file_hashes.insert(normalized, hash);
        }
    }
    all.sort();

    let now = Utc::now();
    let mut new_state = IndexState {
        file_hashes: new_file_hashes.clone(),
        last_full_index_utc: prev_state.last_full_index_utc,
        last_incremental_index_utc: prev_state.last_incremental_index_utc,
        index_name: index_name.to_string(),
    };

    let (changed, deleted) = if force_full_rebuild || prev_state.file_hashes.is_empty() {
        new_state.last_full_index_utc = Some(now);
        (all.clone(), Vec::new())
    } else {
        let mut changed = Vec::new();
        for (path, hash) in &new_file_hashes {
            match prev_state.file_hashes.get(path) {
                Some(prev_hash) if prev_hash == hash => {}
                _ => changed.push(path.clone()),
            }
        }
        let current: HashSet<&String> = new_file_hashes.keys().collect();
        let deleted: Vec<String> = prev_state
            .file_hashes
            .keys()
            .filter(|k| !current.contains(k))
            .cloned()
            .collect();
        new_state.last_incremental_index_utc = Some(now);
        (changed, deleted)
    };

    Ok(ScanResult {
        changed,
        deleted,
        all,
        prev_state,
        new_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn force_full_marks_everything_changed() {
        let dir = tempdir();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        let result = scan(dir.path(), true, "memex", &[]).unwrap();
        assert_eq!(result.changed, vec!["a.md".to_string()]);
        assert!(result.deleted.is_empty());
    }

    #[test]
    fn unchanged_tree_produces_no_diff_on_second_scan() {
        let dir = tempdir();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        let first = scan(dir.path(), true, "memex", &[]).unwrap();
        save_state(dir.path(), &first.new_state).unwrap();

        let second = scan(dir.path(), false, "memex", &[]).unwrap();
        assert!(second.changed.is_empty());
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn modified_file_is_detected_as_changed() {
        let dir = tempdir();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        let first = scan(dir.path(), true, "memex", &[]).unwrap();
        save_state(dir.path(), &first.new_state).unwrap();

        fs::write(dir.path().join("a.md"), "hello world").unwrap();
        let second = scan(dir.path(), false, "memex", &[]).unwrap();
        assert_eq!(second.changed, vec!["a.md".to_string()]);
    }

    #[test]
    fn deleted_file_is_reported() {
        let dir = tempdir();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        let first = scan(dir.path(), true, "memex", &[]).unwrap();
        save_state(dir.path(), &first.new_state).unwrap();

        fs::remove_file(dir.path().join("a.md")).unwrap();
        let second = scan(dir.path(), false, "memex", &[]).unwrap();
        assert_eq!(second.deleted, vec!["a.md".to_string()]);
    }

    #[test]
    fn personal_prefix_is_always_excluded() {
        let dir = tempdir();
        fs::create_dir_all(dir.path().join("personal")).unwrap();
        fs::write(dir.path().join("personal/secret.md"), "hush").unwrap();
        let result = scan(dir.path(), true, "memex", &[]).unwrap();
        assert!(result.all.is_empty());
    }

    struct TempDir(std::path::PathBuf);
    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "memex-scanner-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::AppError;
use crate::models::text_index::TextIndex;

pub const CHUNK_PREFIX: &str = "chunk_file";
pub const CHUNK_EXTENSION: &str = "json";

// breaks timestamp ties between chunks written in the same microsecond
static CHUNK_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunks: usize,
    pub records: usize,
    pub null_records: usize,
    pub corpus_size: usize,
}

fn is_chunk_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(CHUNK_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(CHUNK_EXTENSION)
}

fn chunk_name(at: chrono::DateTime<chrono::Utc>, seq: u64) -> String {
    format!(
        "{CHUNK_PREFIX}_{}_{seq:010}_{}.{CHUNK_EXTENSION}",
        at.format("%Y%m%dT%H%M%S%6fZ"),
        uuid::Uuid::new_v4().simple()
    )
}

fn new_chunk_name() -> String {
    let seq = CHUNK_SEQ.fetch_add(1, Ordering::Relaxed);
    chunk_name(chrono::Utc::now(), seq)
}

/// Chunk files in write order. The timestamped names sort chronologically.
pub fn chunk_files(storage_dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !storage_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(storage_dir)
        .map_err(|e| {
            AppError::Storage(format!("cannot list {}: {e}", storage_dir.display()))
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_chunk_file(path))
        .collect();
    files.sort();
    Ok(files)
}

pub fn load_chunk(path: &Path) -> Result<TextIndex, AppError> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Merges every chunk left to right. A missing directory is an empty index.
pub fn load_all(storage_dir: &Path) -> Result<TextIndex, AppError> {
    let mut index = TextIndex::new();
    for path in chunk_files(storage_dir)? {
        match load_chunk(&path) {
            Ok(chunk) => {
                index.merge(&chunk);
            }
            Err(err) => {
                tracing::warn!(chunk = %path.display(), error = %err, "skipping unreadable chunk");
            }
        }
    }
    tracing::debug!(records = index.len(), "index loaded");
    Ok(index)
}

/// Writes `chunk` as a new file and returns its file name.
pub fn persist_chunk(storage_dir: &Path, chunk: &TextIndex) -> Result<String, AppError> {
    let storage_err =
        |what: &str, e: &dyn std::fmt::Display| AppError::Storage(format!("{what}: {e}"));

    fs::create_dir_all(storage_dir)
        .map_err(|e| storage_err(&format!("cannot create {}", storage_dir.display()), &e))?;

    let tmp = tempfile::NamedTempFile::new_in(storage_dir)
        .map_err(|e| storage_err("cannot create temporary chunk", &e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, chunk)
            .map_err(|e| storage_err("cannot serialize chunk", &e))?;
        writer
            .flush()
            .map_err(|e| storage_err("cannot write chunk", &e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| storage_err("cannot sync chunk", &e))?;

    let name = new_chunk_name();
    tmp.persist_noclobber(storage_dir.join(&name))
        .map_err(|e| storage_err("cannot publish chunk", &e.error))?;
    Ok(name)
}

pub fn stats(storage_dir: &Path) -> Result<StoreStats, AppError> {
    let chunks = chunk_files(storage_dir)?.len();
    let index = load_all(storage_dir)?;
    Ok(StoreStats {
        chunks,
        records: index.len(),
        null_records: index.null_count(),
        corpus_size: index.corpus().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(pairs: &[(&str, Option<&str>)]) -> TextIndex {
        let mut idx = TextIndex::new();
        for (path, text) in pairs {
            idx.set(*path, text.map(str::to_string));
        }
        idx
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_all(&dir.path().join("never_created")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("image_text");
        let chunk = index(&[("/a.png", Some("alpha")), ("/b.png", None)]);

        let name = persist_chunk(&store, &chunk).unwrap();
        assert!(name.starts_with(CHUNK_PREFIX));
        assert!(name.ends_with(".json"));

        assert_eq!(load_all(&store).unwrap(), chunk);
    }

    #[test]
    fn test_persist_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let first = persist_chunk(dir.path(), &index(&[("/a.png", Some("one"))])).unwrap();
        let before = fs::read(dir.path().join(&first)).unwrap();

        let second = persist_chunk(dir.path(), &index(&[("/a.png", Some("two"))])).unwrap();
        assert_ne!(first, second);

        let files = chunk_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(dir.path().join(&first)).unwrap(), before);
    }

    #[test]
    fn test_later_null_never_overturns_text() {
        let dir = tempfile::tempdir().unwrap();
        persist_chunk(dir.path(), &index(&[("/a.png", Some("kept")), ("/b.png", None)])).unwrap();
        persist_chunk(
            dir.path(),
            &index(&[("/a.png", None), ("/b.png", Some("filled")), ("/c.png", None)]),
        )
        .unwrap();

        let merged = load_all(dir.path()).unwrap();
        assert_eq!(merged.get("/a.png"), Some(Some("kept")));
        assert_eq!(merged.get("/b.png"), Some(Some("filled")));
        assert_eq!(merged.get("/c.png"), Some(None));
    }

    #[test]
    fn test_ignores_foreign_and_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        persist_chunk(dir.path(), &index(&[("/a.png", Some("ok"))])).unwrap();
        fs::write(dir.path().join("notes.json"), r#"{"/x.png":"foreign"}"#).unwrap();
        fs::write(dir.path().join("chunk_file_zzz_corrupt.json"), "{not json").unwrap();

        assert_eq!(chunk_files(dir.path()).unwrap().len(), 2);
        let merged = load_all(dir.path()).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("/x.png"), None);
    }

    #[test]
    fn test_chunk_names_sort_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut names = Vec::new();
        for i in 0..5 {
            let text = format!("v{i}");
            names.push(persist_chunk(dir.path(), &index(&[("/a.png", Some(text.as_str()))])).unwrap());
        }
        let listed: Vec<String> = chunk_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(listed, names);
    }

    #[test]
    fn test_names_from_the_same_instant_keep_creation_order() {
        let at = chrono::Utc::now();
        let names: Vec<String> = [8, 9, 10, 11, 100].iter().map(|&seq| chunk_name(at, seq)).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
    }

    #[test]
    fn test_rapid_names_sort_in_creation_order() {
        let names: Vec<String> = (0..500).map(|_| new_chunk_name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        persist_chunk(
            dir.path(),
            &index(&[("/a.png", Some("text")), ("/b.png", None), ("/c.png", Some(""))]),
        )
        .unwrap();
        persist_chunk(dir.path(), &index(&[("/d.png", Some("more"))])).unwrap();

        let stats = stats(dir.path()).unwrap();
        assert_eq!(
            stats,
            StoreStats {
                chunks: 2,
                records: 4,
                null_records: 1,
                corpus_size: 2,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_persist_into_readonly_dir_fails_without_touching_chunks() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        persist_chunk(dir.path(), &index(&[("/a.png", Some("safe"))])).unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();

        let canary = dir.path().join("canary");
        let writable_anyway = fs::write(&canary, b"x").is_ok();
        let result = persist_chunk(dir.path(), &index(&[("/b.png", None)]));
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

        if writable_anyway {
            // running as root; permissions are not enforced
            return;
        }
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert_eq!(load_all(dir.path()).unwrap().get("/a.png"), Some(Some("safe")));
    }
}

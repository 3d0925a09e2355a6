//! Response cache integration tests
//!
//! Durable behavior across process boundaries: index persistence, eviction
//! ordering, and blob cleanup on a real temp directory.

use std::time::Duration;

use resona::{CacheConfig, ResponseCache};

fn config(dir: &std::path::Path, budget: u64) -> CacheConfig {
    CacheConfig {
        dir: dir.to_path_buf(),
        max_total_bytes: budget,
        max_entry_age: Duration::from_secs(3600),
    }
}

#[test]
fn entries_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let audio = vec![42u8; 64];

    {
        let mut cache = ResponseCache::open(config(dir.path(), 1024)).unwrap();
        cache
            .put("hello world", "voice-a", &audio, serde_json::json!({}))
            .unwrap();
    }

    let mut reopened = ResponseCache::open(config(dir.path(), 1024)).unwrap();
    let (bytes, entry) = reopened.get("hello world", "voice-a").unwrap().unwrap();

    assert_eq!(bytes, audio);
    assert_eq!(entry.access_count, 1);
}

#[test]
fn key_normalization_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut cache = ResponseCache::open(config(dir.path(), 1024)).unwrap();
        cache
            .put("  Hello   World ", "voice-a", &[1, 2, 3], serde_json::json!({}))
            .unwrap();
    }

    let mut reopened = ResponseCache::open(config(dir.path(), 1024)).unwrap();
    // Same text modulo case and whitespace resolves to the same entry
    assert!(reopened.get("hello world", "voice-a").unwrap().is_some());
    // A different voice does not
    assert!(reopened.get("hello world", "voice-b").unwrap().is_none());
}

#[test]
fn eviction_keeps_frequently_accessed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let blob = vec![0u8; 40];

    let mut cache = ResponseCache::open(config(dir.path(), 100)).unwrap();
    cache.put("popular", "v", &blob, serde_json::json!({})).unwrap();
    cache.put("ignored", "v", &blob, serde_json::json!({})).unwrap();

    // Raise the access count on one entry
    cache.get("popular", "v").unwrap().unwrap();
    cache.get("popular", "v").unwrap().unwrap();

    // A third blob pushes the total over the 100-byte budget
    cache.put("newcomer", "v", &blob, serde_json::json!({})).unwrap();

    assert!(cache.get("popular", "v").unwrap().is_some());
    assert!(cache.get("newcomer", "v").unwrap().is_some());
    assert!(cache.get("ignored", "v").unwrap().is_none());
}

#[test]
fn clear_removes_blob_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = ResponseCache::open(config(dir.path(), 1024)).unwrap();
    cache.put("a", "v", &[1u8; 16], serde_json::json!({})).unwrap();
    cache.put("b", "v", &[2u8; 16], serde_json::json!({})).unwrap();
    cache.clear().unwrap();

    assert!(cache.is_empty());
    let audio_files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "audio"))
        .count();
    assert_eq!(audio_files, 0);
}

#[test]
fn corrupt_index_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.json"), b"{ not json").unwrap();

    let cache = ResponseCache::open(config(dir.path(), 1024)).unwrap();
    assert!(cache.is_empty());
}

//! Response cache for synthesized audio
//!
//! Content-addressed store mapping (text, voice) to previously synthesized
//! audio. Blobs live as immutable files in the cache directory next to one
//! JSON metadata index; the index is reloaded at startup and rewritten after
//! every mutating operation.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::{Error, Result};

/// Index file name within the cache directory
const INDEX_FILE: &str = "index.json";

/// Metadata for one cached synthesis result
///
/// Audio bytes are immutable after insertion; only the access bookkeeping
/// fields (`last_access`, `access_count`) are ever mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-derived key, also the blob file stem
    pub key: String,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the entry was last read
    pub last_access: DateTime<Utc>,

    /// Number of reads since insertion
    pub access_count: u64,

    /// Size of the audio blob in bytes
    pub size_bytes: u64,

    /// Free-form caller metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Aggregate cache statistics, for observability only
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Total bytes across all blobs
    pub total_bytes: u64,

    /// Number of entries
    pub entry_count: usize,

    /// Entry counts bucketed by age: under an hour, under a day,
    /// under a week, older
    pub age_histogram: [usize; 4],

    /// Lowest access count across entries
    pub min_access_count: u64,

    /// Highest access count across entries
    pub max_access_count: u64,

    /// Mean access count across entries
    pub mean_access_count: f64,
}

/// Durable cache of synthesized audio keyed by (text, voice)
pub struct ResponseCache {
    config: CacheConfig,
    index: HashMap<String, CacheEntry>,
}

impl ResponseCache {
    /// Open (or create) a cache rooted at the configured directory
    ///
    /// Reloads the metadata index if one exists; a corrupt index is
    /// discarded and rebuilt empty rather than failing startup.
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created
    pub fn open(config: CacheConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)
            .map_err(|e| Error::Cache(format!("create cache dir: {e}")))?;

        let index_path = config.dir.join(INDEX_FILE);
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, CacheEntry>>(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(error = %e, "cache index corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        tracing::debug!(
            dir = %config.dir.display(),
            entries = index.len(),
            "response cache opened"
        );

        Ok(Self { config, index })
    }

    /// Derive the deterministic key for a (text, voice) pair
    ///
    /// Text is normalized (trimmed, lowercased, internal whitespace
    /// collapsed) before hashing so trivially different requests share an
    /// entry.
    #[must_use]
    pub fn cache_key(text: &str, voice_id: &str) -> String {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0x1f]);
        hasher.update(voice_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Store synthesized audio, evicting first if over budget
    ///
    /// Returns the entry key. The caller must not assume the entry
    /// persisted when this returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the blob alone exceeds the configured
    /// byte budget, or if the blob or index cannot be written
    pub fn put(
        &mut self,
        text: &str,
        voice_id: &str,
        audio: &[u8],
        metadata: serde_json::Value,
    ) -> Result<String> {
        let key = Self::cache_key(text, voice_id);
        let incoming_size = audio.len() as u64;

        // No amount of eviction makes room for a blob over the budget
        if incoming_size > self.config.max_total_bytes {
            return Err(Error::Cache(format!(
                "blob of {incoming_size} bytes exceeds the {} byte budget",
                self.config.max_total_bytes
            )));
        }

        self.evict_for(incoming_size, Some(&key));

        let blob_path = self.blob_path(&key);
        std::fs::write(&blob_path, audio)
            .map_err(|e| Error::Cache(format!("write blob: {e}")))?;

        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            created_at: now,
            last_access: now,
            access_count: 0,
            size_bytes: incoming_size,
            metadata,
        };
        self.index.insert(key.clone(), entry);
        self.write_index()?;

        tracing::debug!(key = %key, bytes = incoming_size, "cached synthesis result");
        Ok(key)
    }

    /// Look up cached audio for a (text, voice) pair
    ///
    /// A hit bumps the access count and refreshes the last-access time.
    /// A miss returns `Ok(None)`; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns error only if index persistence fails after a hit
    pub fn get(&mut self, text: &str, voice_id: &str) -> Result<Option<(Vec<u8>, CacheEntry)>> {
        let key = Self::cache_key(text, voice_id);

        if !self.index.contains_key(&key) {
            return Ok(None);
        }

        let blob_path = self.blob_path(&key);
        let Ok(bytes) = std::fs::read(&blob_path) else {
            // Backing blob vanished; drop the stale index entry
            tracing::warn!(key = %key, "cache blob missing, dropping entry");
            self.index.remove(&key);
            self.write_index()?;
            return Ok(None);
        };

        let entry = self
            .index
            .get_mut(&key)
            .ok_or_else(|| Error::Cache("entry vanished during get".to_string()))?;
        entry.access_count += 1;
        entry.last_access = Utc::now();
        let snapshot = entry.clone();
        self.write_index()?;

        Ok(Some((bytes, snapshot)))
    }

    /// Remove every entry and blob
    ///
    /// # Errors
    ///
    /// Returns error if the emptied index cannot be persisted
    pub fn clear(&mut self) -> Result<()> {
        for key in self.index.keys() {
            let _ = std::fs::remove_file(self.blob_path(key));
        }
        self.index.clear();
        self.write_index()?;
        tracing::debug!("response cache cleared");
        Ok(())
    }

    /// Aggregate statistics over the current index
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut age_histogram = [0usize; 4];
        let mut min_access = u64::MAX;
        let mut max_access = 0u64;
        let mut sum_access = 0u64;

        for entry in self.index.values() {
            let age = now.signed_duration_since(entry.created_at);
            let bucket = if age < ChronoDuration::hours(1) {
                0
            } else if age < ChronoDuration::days(1) {
                1
            } else if age < ChronoDuration::weeks(1) {
                2
            } else {
                3
            };
            age_histogram[bucket] += 1;

            min_access = min_access.min(entry.access_count);
            max_access = max_access.max(entry.access_count);
            sum_access += entry.access_count;
        }

        let entry_count = self.index.len();
        CacheStats {
            total_bytes: self.total_bytes(),
            entry_count,
            age_histogram,
            min_access_count: if entry_count == 0 { 0 } else { min_access },
            max_access_count: max_access,
            mean_access_count: if entry_count == 0 {
                0.0
            } else {
                sum_access as f64 / entry_count as f64
            },
        }
    }

    /// Total bytes across all indexed blobs
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.index.values().map(|e| e.size_bytes).sum()
    }

    /// Number of indexed entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Two-phase eviction run before a write that needs space
    ///
    /// Phase one removes every entry older than the configured max age
    /// regardless of space. Phase two, if the incoming size would still
    /// push the total over budget, deletes entries in ascending
    /// `(access_count, last_access)` order. The incoming key itself is
    /// never a victim.
    fn evict_for(&mut self, incoming_size: u64, protect: Option<&str>) {
        let now = Utc::now();
        let max_age = ChronoDuration::from_std(self.config.max_entry_age)
            .unwrap_or_else(|_| ChronoDuration::weeks(1));

        let expired: Vec<String> = self
            .index
            .values()
            .filter(|e| now.signed_duration_since(e.created_at) > max_age)
            .map(|e| e.key.clone())
            .collect();
        for key in expired {
            tracing::debug!(key = %key, "evicting expired cache entry");
            self.remove_entry(&key);
        }

        let budget = self.config.max_total_bytes;
        if self.total_bytes() + incoming_size <= budget {
            return;
        }

        let mut candidates: Vec<(u64, DateTime<Utc>, String)> = self
            .index
            .values()
            .filter(|e| protect != Some(e.key.as_str()))
            .map(|e| (e.access_count, e.last_access, e.key.clone()))
            .collect();
        candidates.sort();

        for (_, _, key) in candidates {
            if self.total_bytes() + incoming_size <= budget {
                break;
            }
            tracing::debug!(key = %key, "evicting least-used cache entry");
            self.remove_entry(&key);
        }
    }

    fn remove_entry(&mut self, key: &str) {
        let _ = std::fs::remove_file(self.blob_path(key));
        self.index.remove(key);
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{key}.audio"))
    }

    fn write_index(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index)
            .map_err(|e| Error::Cache(format!("serialize index: {e}")))?;
        std::fs::write(self.config.dir.join(INDEX_FILE), bytes)
            .map_err(|e| Error::Cache(format!("write index: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_cache(max_total_bytes: u64) -> (tempfile::TempDir, ResponseCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(CacheConfig {
            dir: dir.path().to_path_buf(),
            max_total_bytes,
            max_entry_age: Duration::from_secs(3600),
        })
        .unwrap();
        (dir, cache)
    }

    #[test]
    fn key_is_deterministic_and_normalized() {
        let a = ResponseCache::cache_key("Hello  World", "voice-1");
        let b = ResponseCache::cache_key("  hello world ", "voice-1");
        let c = ResponseCache::cache_key("hello world", "voice-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn put_then_get_roundtrip() {
        let (_dir, mut cache) = test_cache(1024 * 1024);

        let key = cache
            .put("hello", "v1", b"audio-bytes", serde_json::json!({"fmt": "mp3"}))
            .unwrap();
        let (bytes, entry) = cache.get("hello", "v1").unwrap().unwrap();

        assert_eq!(bytes, b"audio-bytes");
        assert_eq!(entry.key, key);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.size_bytes, 11);
    }

    #[test]
    fn miss_is_not_an_error() {
        let (_dir, mut cache) = test_cache(1024);
        assert!(cache.get("never stored", "v1").unwrap().is_none());
    }

    #[test]
    fn access_bookkeeping_accumulates() {
        let (_dir, mut cache) = test_cache(1024);
        cache.put("hi", "v1", b"abc", serde_json::Value::Null).unwrap();

        for _ in 0..3 {
            cache.get("hi", "v1").unwrap().unwrap();
        }
        let (_, entry) = cache.get("hi", "v1").unwrap().unwrap();
        assert_eq!(entry.access_count, 4);
    }

    #[test]
    fn eviction_respects_budget_and_usage_order() {
        let (_dir, mut cache) = test_cache(100);

        cache.put("popular", "v", &[0u8; 40], serde_json::Value::Null).unwrap();
        cache.put("cold", "v", &[0u8; 40], serde_json::Value::Null).unwrap();

        // Make "popular" clearly more used
        cache.get("popular", "v").unwrap().unwrap();
        cache.get("popular", "v").unwrap().unwrap();

        // Inserting 40 more bytes forces one eviction; "cold" has the
        // lowest (access_count, last_access)
        cache.put("newest", "v", &[0u8; 40], serde_json::Value::Null).unwrap();

        assert!(cache.total_bytes() <= 100);
        assert!(cache.get("cold", "v").unwrap().is_none());
        assert!(cache.get("popular", "v").unwrap().is_some());
        assert!(cache.get("newest", "v").unwrap().is_some());
    }

    #[test]
    fn incoming_entry_is_never_the_victim() {
        let (_dir, mut cache) = test_cache(50);

        cache.put("a", "v", &[0u8; 40], serde_json::Value::Null).unwrap();
        // The incoming entry alone fits the budget only if "a" goes
        cache.put("b", "v", &[0u8; 40], serde_json::Value::Null).unwrap();

        assert!(cache.get("a", "v").unwrap().is_none());
        assert!(cache.get("b", "v").unwrap().is_some());
    }

    #[test]
    fn oversized_blob_is_rejected_without_evicting() {
        let (_dir, mut cache) = test_cache(50);
        cache.put("keep", "v", &[0u8; 40], serde_json::Value::Null).unwrap();

        let result = cache.put("huge", "v", &[0u8; 60], serde_json::Value::Null);
        assert!(matches!(result, Err(Error::Cache(_))));

        // The resident entry was not sacrificed for an impossible fit
        assert!(cache.get("keep", "v").unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_removed_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResponseCache::open(CacheConfig {
            dir: dir.path().to_path_buf(),
            max_total_bytes: 1024,
            max_entry_age: Duration::ZERO,
        })
        .unwrap();

        cache.put("old", "v", b"xxxx", serde_json::Value::Null).unwrap();
        // Next put runs age-based eviction; "old" is already past its TTL
        cache.put("new", "v", b"yyyy", serde_json::Value::Null).unwrap();

        assert!(cache.get("old", "v").unwrap().is_none());
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            dir: dir.path().to_path_buf(),
            max_total_bytes: 1024,
            max_entry_age: Duration::from_secs(3600),
        };

        {
            let mut cache = ResponseCache::open(config.clone()).unwrap();
            cache.put("persisted", "v", b"data", serde_json::Value::Null).unwrap();
        }

        let mut reopened = ResponseCache::open(config).unwrap();
        let (bytes, _) = reopened.get("persisted", "v").unwrap().unwrap();
        assert_eq!(bytes, b"data");
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, mut cache) = test_cache(1024);
        cache.put("a", "v", b"1", serde_json::Value::Null).unwrap();
        cache.put("b", "v", b"2", serde_json::Value::Null).unwrap();

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert!(cache.get("a", "v").unwrap().is_none());
    }

    #[test]
    fn stats_reflect_contents() {
        let (_dir, mut cache) = test_cache(1024);
        cache.put("a", "v", &[0u8; 10], serde_json::Value::Null).unwrap();
        cache.put("b", "v", &[0u8; 20], serde_json::Value::Null).unwrap();
        cache.get("b", "v").unwrap().unwrap();

        let stats = cache.stats();
        assert_eq!(stats.total_bytes, 30);
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.age_histogram[0], 2);
        assert_eq!(stats.min_access_count, 0);
        assert_eq!(stats.max_access_count, 1);
        assert!((stats.mean_access_count - 0.5).abs() < f64::EPSILON);
    }
}

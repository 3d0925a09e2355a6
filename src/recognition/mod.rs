//! Speech recognition
//!
//! The adapter serializes possibly-concurrent audio buffers through one
//! external transcription engine and deduplicates identical inputs via a
//! bounded content-hash cache.

mod whisper;

pub use whisper::WhisperEngine;

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Default bound on the in-memory dedup cache
const DEFAULT_DEDUP_ENTRIES: usize = 64;

/// One transcribed segment with timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment text
    pub text: String,

    /// Segment start, seconds from utterance start
    pub start: f64,

    /// Segment end, seconds from utterance start
    pub end: f64,

    /// Per-word timing when the engine provides it
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

/// Timing for a single recognized word
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    /// The word
    pub word: String,

    /// Word start, seconds from utterance start
    pub start: f64,

    /// Word end, seconds from utterance start
    pub end: f64,
}

/// Full transcription result from an engine
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Concatenated text across all segments
    pub text: String,

    /// Per-segment breakdown, present when timestamps were requested
    pub segments: Vec<TranscriptSegment>,
}

/// An external transcription capability
///
/// Accepts a finite block of WAV-encoded audio plus a language hint and
/// returns transcribed text, optionally with per-segment timing.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if the engine faults or produces no usable output
    async fn transcribe(&self, wav: &[u8], language: Option<&str>) -> Result<Transcript>;

    /// Transcribe with per-segment and per-word timing
    ///
    /// # Errors
    ///
    /// Returns error if the engine faults or produces no usable output
    async fn transcribe_with_timestamps(
        &self,
        wav: &[u8],
        language: Option<&str>,
    ) -> Result<Transcript>;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}

/// Serializes concurrent transcription requests through one engine
///
/// Only one transcription runs against the external engine at a time; the
/// exclusive section also preserves FIFO delivery of utterance results
/// within a listening session. Identical byte-for-byte inputs are answered
/// from a bounded in-memory cache without an engine call.
pub struct RecognitionAdapter {
    engine: Arc<dyn RecognitionEngine>,
    // Guards the engine call and the dedup cache together
    inner: Mutex<LruCache<String, String>>,
}

impl RecognitionAdapter {
    /// Wrap an engine with the default dedup bound
    #[must_use]
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self::with_dedup_entries(engine, DEFAULT_DEDUP_ENTRIES)
    }

    /// Wrap an engine with an explicit dedup cache bound
    ///
    /// A zero bound is treated as one entry.
    #[must_use]
    pub fn with_dedup_entries(engine: Arc<dyn RecognitionEngine>, entries: usize) -> Self {
        let capacity = NonZeroUsize::new(entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Transcribe audio, deduplicating identical inputs
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stt`] if the engine errors or returns only
    /// whitespace
    pub async fn transcribe(&self, wav: &[u8], language: Option<&str>) -> Result<String> {
        let content_key = hash_content(wav);

        let mut cache = self.inner.lock().await;
        if let Some(text) = cache.get(&content_key) {
            tracing::debug!(key = %content_key, "transcription dedup hit");
            return Ok(text.clone());
        }

        // Holding the lock across the call is deliberate: it is the
        // exclusive section protecting the single external engine
        let transcript = self.engine.transcribe(wav, language).await?;
        let text = transcript.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Stt("engine returned no usable output".to_string()));
        }

        cache.put(content_key, text.clone());
        Ok(text)
    }

    /// Transcribe with per-segment timing
    ///
    /// Timestamped results are not served from the dedup cache; timing
    /// queries are rare and a structured result is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stt`] if the engine errors or returns no segments
    pub async fn transcribe_with_timestamps(
        &self,
        wav: &[u8],
        language: Option<&str>,
    ) -> Result<Vec<TranscriptSegment>> {
        let _guard = self.inner.lock().await;

        let transcript = self.engine.transcribe_with_timestamps(wav, language).await?;
        if transcript.segments.is_empty() && transcript.text.trim().is_empty() {
            return Err(Error::Stt("engine returned no usable output".to_string()));
        }

        Ok(transcript.segments)
    }

    /// Name of the wrapped engine
    #[must_use]
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }
}

/// Content hash of raw audio bytes for deduplication
fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        calls: AtomicUsize,
        output: String,
    }

    impl CountingEngine {
        fn new(output: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                output: output.to_string(),
            }
        }
    }

    #[async_trait]
    impl RecognitionEngine for CountingEngine {
        async fn transcribe(&self, _wav: &[u8], _language: Option<&str>) -> Result<Transcript> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Transcript {
                text: self.output.clone(),
                segments: Vec::new(),
            })
        }

        async fn transcribe_with_timestamps(
            &self,
            wav: &[u8],
            language: Option<&str>,
        ) -> Result<Transcript> {
            let mut t = self.transcribe(wav, language).await?;
            t.segments = vec![TranscriptSegment {
                text: t.text.clone(),
                start: 0.0,
                end: 1.0,
                words: Vec::new(),
            }];
            Ok(t)
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn identical_input_hits_dedup_cache() {
        let engine = Arc::new(CountingEngine::new("hello"));
        let adapter = RecognitionAdapter::new(Arc::clone(&engine) as Arc<dyn RecognitionEngine>);

        let a = adapter.transcribe(b"same-bytes", None).await.unwrap();
        let b = adapter.transcribe(b"same-bytes", None).await.unwrap();

        assert_eq!(a, "hello");
        assert_eq!(b, "hello");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_input_invokes_engine() {
        let engine = Arc::new(CountingEngine::new("hi"));
        let adapter = RecognitionAdapter::new(Arc::clone(&engine) as Arc<dyn RecognitionEngine>);

        adapter.transcribe(b"first", None).await.unwrap();
        adapter.transcribe(b"second", None).await.unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dedup_cache_is_bounded() {
        let engine = Arc::new(CountingEngine::new("x"));
        let adapter = RecognitionAdapter::with_dedup_entries(
            Arc::clone(&engine) as Arc<dyn RecognitionEngine>,
            2,
        );

        adapter.transcribe(b"a", None).await.unwrap();
        adapter.transcribe(b"b", None).await.unwrap();
        adapter.transcribe(b"c", None).await.unwrap();
        // "a" was evicted as the oldest entry
        adapter.transcribe(b"a", None).await.unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let engine = Arc::new(CountingEngine::new("   "));
        let adapter = RecognitionAdapter::new(engine as Arc<dyn RecognitionEngine>);

        let result = adapter.transcribe(b"audio", None).await;
        assert!(matches!(result, Err(Error::Stt(_))));
    }

    #[tokio::test]
    async fn timestamps_return_segments() {
        let engine = Arc::new(CountingEngine::new("timed"));
        let adapter = RecognitionAdapter::new(engine as Arc<dyn RecognitionEngine>);

        let segments = adapter
            .transcribe_with_timestamps(b"audio", Some("en"))
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "timed");
    }
}

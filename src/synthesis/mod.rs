//! Speech synthesis
//!
//! The streamer produces audio for text using the active voice profile,
//! serving repeated requests from the response cache and re-chunking engine
//! output into caller-defined byte windows for incremental delivery.

mod elevenlabs;

pub use elevenlabs::ElevenLabsEngine;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use lru::LruCache;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::cache::ResponseCache;
use crate::config::SynthesisConfig;
use crate::profile::VoiceProfile;
use crate::{Error, Result};

/// Incrementally delivered synthesis output
pub type AudioStream = ReceiverStream<Result<Vec<u8>>>;

/// An external synthesis capability
///
/// Whether an engine can stream is decided at construction and exposed as a
/// flag; callers never probe for a streaming method at call time.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Whether `synthesize_stream` delivers lazily
    fn supports_streaming(&self) -> bool;

    /// Synthesize text to a single audio blob
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>>;

    /// Synthesize text as a lazy sequence of byte chunks
    ///
    /// Engines that do not stream return the blob as one chunk.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize_stream(
        &self,
        text: &str,
        profile: &VoiceProfile,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}

/// Streams synthesized audio with caching and single-flight per key
pub struct SynthesisStreamer {
    engine: Arc<dyn SynthesisEngine>,
    cache: Arc<Mutex<ResponseCache>>,
    config: SynthesisConfig,
    profile: Mutex<VoiceProfile>,
    // Recently produced raw audio, to skip disk reads on immediate re-requests
    pool: Arc<Mutex<LruCache<String, Arc<Vec<u8>>>>>,
    // Per-key guards for the cache-check-then-populate sequence; entries
    // are removed once no caller holds them
    inflight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SynthesisStreamer {
    /// Create a streamer over an engine and a response cache
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid chunking parameters or an
    /// invalid initial profile
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        cache: Arc<Mutex<ResponseCache>>,
        config: SynthesisConfig,
        profile: VoiceProfile,
    ) -> Result<Self> {
        config.validate()?;
        profile.validate()?;

        let pool_capacity =
            NonZeroUsize::new(config.pool_entries).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            engine,
            cache,
            config,
            profile: Mutex::new(profile),
            pool: Arc::new(Mutex::new(LruCache::new(pool_capacity))),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Replace the active voice profile (last-write-wins)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the profile fails validation; the
    /// previous profile stays active
    pub async fn set_profile(&self, profile: VoiceProfile) -> Result<()> {
        profile.validate()?;
        let mut active = self.profile.lock().await;
        tracing::debug!(profile = %profile.id, "voice profile updated");
        *active = profile;
        Ok(())
    }

    /// The active profile
    pub async fn profile(&self) -> VoiceProfile {
        self.profile.lock().await.clone()
    }

    /// Synthesize text, yielding audio in byte windows
    ///
    /// Cache hits stream the stored bytes with no engine call. On a miss
    /// the engine output is re-buffered into `chunk_size` windows (default
    /// from configuration), each yielded as soon as it fills, with the
    /// remainder flushed at stream end; the concatenated audio is then
    /// written to the response cache and the in-memory pool. Concurrent
    /// calls for the same (text, voice) perform exactly one engine
    /// invocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tts`] if the engine fails before any audio is
    /// produced; mid-stream faults surface as an error item on the stream
    pub async fn text_to_speech(
        &self,
        text: &str,
        chunk_size: Option<usize>,
    ) -> Result<AudioStream> {
        let window = chunk_size.unwrap_or(self.config.chunk_size);
        if window == 0 {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }

        let profile = self.profile.lock().await.clone();
        let key = ResponseCache::cache_key(text, &profile.id);

        // Single-flight: serialize check-then-populate per key only
        let key_guard = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };
        let held = key_guard.lock_owned().await;

        match self.lookup_cached(text, &profile.id, &key).await {
            Ok(Some(bytes)) => {
                tracing::debug!(key = %key, "synthesis cache hit");
                drop(held);
                release_guard(&self.inflight, &key).await;
                return Ok(stream_windows(bytes, window));
            }
            Ok(None) => {}
            Err(e) => {
                drop(held);
                release_guard(&self.inflight, &key).await;
                return Err(e);
            }
        }

        tracing::debug!(
            key = %key,
            engine = self.engine.name(),
            streaming = self.engine.supports_streaming(),
            "synthesis cache miss"
        );

        let (tx, rx) = mpsc::channel::<Result<Vec<u8>>>(8);
        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let pool = Arc::clone(&self.pool);
        let inflight = Arc::clone(&self.inflight);
        let text = text.to_string();
        let voice_id = profile.id.clone();

        // Producer holds the per-key guard until the cache is populated so
        // a concurrent same-key caller lands on the cached bytes
        tokio::spawn(async move {
            {
                let _held = held;
                let result = produce(&engine, &text, &profile, window, &tx).await;

                match result {
                    Ok(full_audio) => {
                        {
                            let mut pool = pool.lock().await;
                            pool.put(key.clone(), Arc::new(full_audio.clone()));
                        }
                        let mut cache = cache.lock().await;
                        if let Err(e) = cache.put(
                            &text,
                            &voice_id,
                            &full_audio,
                            serde_json::json!({ "engine": engine.name() }),
                        ) {
                            tracing::warn!(error = %e, "failed to cache synthesis result");
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
            // The guard is released and tx still pins the stream open, so
            // the cleanup lands before any collector observes stream end
            release_guard(&inflight, &key).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Synthesize text and collect the full audio
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails at any point
    pub async fn text_to_speech_bytes(&self, text: &str) -> Result<Vec<u8>> {
        let mut stream = self.text_to_speech(text, None).await?;
        let mut audio = Vec::new();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio)
    }

    #[cfg(test)]
    async fn inflight_len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Check the in-memory pool, then the durable cache
    async fn lookup_cached(
        &self,
        text: &str,
        voice_id: &str,
        key: &str,
    ) -> Result<Option<Arc<Vec<u8>>>> {
        {
            let mut pool = self.pool.lock().await;
            if let Some(bytes) = pool.get(key) {
                tracing::trace!(key = %key, "synthesis pool hit");
                return Ok(Some(Arc::clone(bytes)));
            }
        }

        let mut cache = self.cache.lock().await;
        if let Some((bytes, _entry)) = cache.get(text, voice_id)? {
            let bytes = Arc::new(bytes);
            drop(cache);
            let mut pool = self.pool.lock().await;
            pool.put(key.to_string(), Arc::clone(&bytes));
            return Ok(Some(bytes));
        }

        Ok(None)
    }
}

/// Pull engine output, re-buffer into windows, and emit them as they fill
///
/// Returns the full concatenated audio for cache population.
async fn produce(
    engine: &Arc<dyn SynthesisEngine>,
    text: &str,
    profile: &VoiceProfile,
    window: usize,
    tx: &mpsc::Sender<Result<Vec<u8>>>,
) -> Result<Vec<u8>> {
    let mut full_audio = Vec::new();
    let mut pending: Vec<u8> = Vec::with_capacity(window);

    if engine.supports_streaming() {
        let mut stream = engine.synthesize_stream(text, profile).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            full_audio.extend_from_slice(&chunk);
            pending.extend_from_slice(&chunk);

            while pending.len() >= window {
                let emit: Vec<u8> = pending.drain(..window).collect();
                if tx.send(Ok(emit)).await.is_err() {
                    // Receiver dropped; keep draining so the cache still
                    // gets the full result
                    break;
                }
            }
        }
    } else {
        let blob = engine.synthesize(text, profile).await?;
        full_audio.extend_from_slice(&blob);
        pending = blob;
        while pending.len() >= window {
            let emit: Vec<u8> = pending.drain(..window).collect();
            if tx.send(Ok(emit)).await.is_err() {
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(Ok(pending)).await;
    }

    Ok(full_audio)
}

/// Drop a key's single-flight guard once no caller still holds it
///
/// Called after releasing the lock; a strong count above one means another
/// caller has already cloned the guard and will run this cleanup itself.
async fn release_guard(inflight: &Mutex<HashMap<String, Arc<Mutex<()>>>>, key: &str) {
    let mut inflight = inflight.lock().await;
    let idle = inflight
        .get(key)
        .is_some_and(|guard| Arc::strong_count(guard) == 1);
    if idle {
        inflight.remove(key);
    }
}

/// Stream already-materialized bytes in fixed windows
fn stream_windows(bytes: Arc<Vec<u8>>, window: usize) -> AudioStream {
    let (tx, rx) = mpsc::channel::<Result<Vec<u8>>>(8);
    tokio::spawn(async move {
        for chunk in bytes.chunks(window) {
            if tx.send(Ok(chunk.to_vec())).await.is_err() {
                return;
            }
        }
    });
    ReceiverStream::new(rx)
}

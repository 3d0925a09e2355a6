//! Configuration for the voice pipeline
//!
//! Plain structs with defaults; the caller constructs and owns them.
//! Persistent configuration loading is out of scope for this crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Listening and segmentation configuration
#[derive(Debug, Clone)]
pub struct ListeningConfig {
    /// Duration of one capture frame
    pub frame_duration: Duration,

    /// Trailing silence that terminates an utterance
    pub silence_duration: Duration,

    /// Hard cap on utterance length, with or without silence
    pub max_speech_duration: Duration,

    /// Normalized RMS threshold for the energy VAD fallback
    pub vad_threshold: f32,

    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            frame_duration: Duration::from_millis(30),
            silence_duration: Duration::from_millis(900),
            max_speech_duration: Duration::from_secs(30),
            vad_threshold: 0.015,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl ListeningConfig {
    /// Validate segmentation timing parameters
    ///
    /// The frame-count arithmetic in the segmenter divides both silence and
    /// max-speech durations by the frame duration, which is only defined for
    /// a positive frame duration shorter than both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero frame duration, a silence
    /// duration shorter than one frame, a max speech duration shorter than
    /// one frame, or a non-finite VAD threshold.
    pub fn validate(&self) -> Result<()> {
        if self.frame_duration.is_zero() {
            return Err(Error::Config("frame_duration must be positive".to_string()));
        }
        if self.silence_duration < self.frame_duration {
            return Err(Error::Config(
                "silence_duration must be at least one frame".to_string(),
            ));
        }
        if self.max_speech_duration < self.frame_duration {
            return Err(Error::Config(
                "max_speech_duration must be at least one frame".to_string(),
            ));
        }
        if !self.vad_threshold.is_finite() || self.vad_threshold < 0.0 {
            return Err(Error::Config(
                "vad_threshold must be a non-negative finite number".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of samples in one frame
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn frame_samples(&self) -> usize {
        (f64::from(self.sample_rate) * self.frame_duration.as_secs_f64()) as usize
    }

    /// Consecutive silent frames that terminate an utterance
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn silence_frames(&self) -> usize {
        (self.silence_duration.as_secs_f64() / self.frame_duration.as_secs_f64()) as usize
    }

    /// Maximum buffered frames before an utterance is force-completed
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_speech_frames(&self) -> usize {
        (self.max_speech_duration.as_secs_f64() / self.frame_duration.as_secs_f64()) as usize
    }
}

/// Wake word detector configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Trigger phrases the classifier is built with
    pub phrases: Vec<String>,

    /// Per-phrase sensitivities in [0, 1]; empty means classifier defaults
    pub sensitivities: Vec<f32>,

    /// Hold-off after a detection before re-arming
    pub cooldown: Duration,

    /// Restart budget for frame-loop faults
    pub max_retries: u32,

    /// Delay before each restart attempt
    pub retry_delay: Duration,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: Vec::new(),
            sensitivities: Vec::new(),
            cooldown: Duration::from_secs(2),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl WakeConfig {
    /// Validate phrase and sensitivity definitions
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no phrases are configured, if the
    /// sensitivity list length does not match the phrase list, or if any
    /// sensitivity falls outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.phrases.is_empty() {
            return Err(Error::Config(
                "at least one wake phrase required".to_string(),
            ));
        }
        if !self.sensitivities.is_empty() && self.sensitivities.len() != self.phrases.len() {
            return Err(Error::Config(format!(
                "sensitivities ({}) must match phrases ({})",
                self.sensitivities.len(),
                self.phrases.len()
            )));
        }
        if self
            .sensitivities
            .iter()
            .any(|s| !(0.0..=1.0).contains(s))
        {
            return Err(Error::Config(
                "sensitivities must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding audio blobs and the metadata index
    pub dir: PathBuf,

    /// Byte budget across all cached audio
    pub max_total_bytes: u64,

    /// Entries older than this are removed during eviction
    pub max_entry_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tts-cache"),
            max_total_bytes: 64 * 1024 * 1024,
            max_entry_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Synthesis streaming configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Default byte window for re-chunked synthesis output
    pub chunk_size: usize,

    /// Bound on the in-memory pool of recently produced audio
    pub pool_entries: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            pool_entries: 8,
        }
    }
}

impl SynthesisConfig {
    /// Validate chunking parameters
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero chunk size or pool bound.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.pool_entries == 0 {
            return Err(Error::Config("pool_entries must be positive".to_string()));
        }
        Ok(())
    }
}

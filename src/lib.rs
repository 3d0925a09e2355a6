//! Resona - Realtime voice pipeline
//!
//! This library provides the building blocks for a local voice assistant
//! front end:
//! - Capture and voice-activity segmentation of microphone audio
//! - Wake word detection with supervised fault recovery
//! - Speech recognition with content-hash deduplication
//! - Cached, streamed speech synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Listening Controller                  │
//! │   Manual  │  WakeWord  │  Continuous                │
//! └────────┬──────────────┬─────────────────────────────┘
//!          │              │
//! ┌────────▼─────┐  ┌─────▼────────────────────────────┐
//! │  Wake Word   │  │  Capture │ VAD │ Segmentation    │
//! │  Detector    │  └─────┬────────────────────────────┘
//! └──────────────┘        │
//! ┌───────────────────────▼─────────────────────────────┐
//! │   Recognition Adapter  │  Synthesis Streamer        │
//! │   (dedup, exclusive)   │  (cache, single-flight)    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod profile;
pub mod recognition;
pub mod synthesis;
pub mod vad;
pub mod wake;

pub use audio::{AudioBuffer, FrameSource, MicFrameSource, SourceFactory};
pub use cache::{CacheEntry, CacheStats, ResponseCache};
pub use config::{
    CacheConfig, DEFAULT_SAMPLE_RATE, ListeningConfig, SynthesisConfig, WakeConfig,
};
pub use error::{Error, Result};
pub use listener::{ListeningController, ListeningMode, TextCallback};
pub use profile::VoiceProfile;
pub use recognition::{
    RecognitionAdapter, RecognitionEngine, Transcript, TranscriptSegment, WhisperEngine,
    WordTiming,
};
pub use synthesis::{AudioStream, ElevenLabsEngine, SynthesisEngine, SynthesisStreamer};
pub use vad::{EnergyVad, VoiceActivityDetector};
pub use wake::{
    ClassifierFactory, DetectorState, WakeEvent, WakeWordClassifier, WakeWordDetector,
};

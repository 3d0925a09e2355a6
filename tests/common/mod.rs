//! Shared test utilities
//!
//! Scripted stand-ins for audio hardware and external engines so the
//! pipeline can be exercised without a microphone or network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use resona::recognition::{RecognitionEngine, Transcript};
use resona::{FrameSource, Result, SourceFactory};

/// Install a process-wide test subscriber so failures carry pipeline logs
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Frame source that replays a pre-built script
pub struct ScriptedSource {
    /// Frames modeling audio buffered before the consumer started reading;
    /// served ahead of the script and discarded by `flush`
    backlog: VecDeque<Vec<i16>>,
    frames: VecDeque<Vec<i16>>,
    frame_size: usize,
    sample_rate: u32,
    /// After the script runs out, keep yielding silence instead of `None`
    endless_silence: bool,
    open: bool,
    flushes: Arc<AtomicUsize>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(frames: Vec<Vec<i16>>, frame_size: usize, sample_rate: u32) -> Self {
        Self {
            backlog: VecDeque::new(),
            frames: frames.into(),
            frame_size,
            sample_rate,
            endless_silence: false,
            open: false,
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Keep the source alive with silence after the script is consumed
    #[must_use]
    pub fn with_endless_silence(mut self) -> Self {
        self.endless_silence = true;
        self
    }

    /// Queue frames that model stale pre-read capture
    #[must_use]
    pub fn with_backlog(mut self, frames: Vec<Vec<i16>>) -> Self {
        self.backlog = frames.into();
        self
    }

    /// Shared counter of `flush` calls, for assertions after the source
    /// has moved into a factory
    #[must_use]
    pub fn flush_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.flushes)
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Vec<i16>>> {
        if !self.open {
            return Ok(None);
        }
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(Some(frame));
        }
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Some(frame));
        }
        if self.endless_silence {
            return Ok(Some(vec![0i16; self.frame_size]));
        }
        Ok(None)
    }

    fn flush(&mut self) {
        self.backlog.clear();
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Wrap a single pre-built source in a one-shot factory
#[must_use]
pub fn one_shot_factory(source: ScriptedSource) -> SourceFactory {
    let slot = StdMutex::new(Some(Box::new(source) as Box<dyn FrameSource>));
    Box::new(move || {
        slot.lock()
            .expect("factory poisoned")
            .take()
            .ok_or_else(|| resona::Error::Audio("source already taken".to_string()))
    })
}

/// Recognition engine that numbers its calls and records input sizes
pub struct CountingEngine {
    calls: AtomicUsize,
    /// WAV byte length of each transcription request, in call order
    pub wav_sizes: Arc<StdMutex<Vec<usize>>>,
}

impl CountingEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            wav_sizes: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CountingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecognitionEngine for CountingEngine {
    async fn transcribe(&self, wav: &[u8], _language: Option<&str>) -> Result<Transcript> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.wav_sizes.lock().expect("sizes poisoned").push(wav.len());
        Ok(Transcript {
            text: format!("utterance {n}"),
            segments: Vec::new(),
        })
    }

    async fn transcribe_with_timestamps(
        &self,
        wav: &[u8],
        language: Option<&str>,
    ) -> Result<Transcript> {
        self.transcribe(wav, language).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Loud speech-like frame
#[must_use]
pub fn speech_frame(n: usize, amplitude: i16) -> Vec<i16> {
    vec![amplitude; n]
}

/// Silent frame
#[must_use]
pub fn silent_frame(n: usize) -> Vec<i16> {
    vec![0i16; n]
}

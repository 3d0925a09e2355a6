//! Listening controller
//!
//! Owns the capture device, runs exactly one active capture loop per
//! session, and turns raw audio into discrete utterances handed off for
//! recognition. Completed transcripts reach the caller through a supplied
//! callback; callback panics are isolated and never kill the loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{AudioBuffer, FrameSource, SourceFactory, wav};
use crate::config::ListeningConfig;
use crate::profile::VoiceProfile;
use crate::recognition::RecognitionAdapter;
use crate::vad::{EnergyVad, VoiceActivityDetector};
use crate::wake::{WakeEvent, WakeWordDetector};
use crate::{Error, Result};

/// Callback invoked once per completed utterance with its transcript
pub type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// How a listening session consumes audio
///
/// Selected at start time and immutable for the session's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningMode {
    /// No background loop; the caller pushes audio explicitly
    Manual,
    /// Segmentation begins only after a wake word detection
    WakeWord,
    /// Capture and segment immediately
    Continuous,
}

/// Segments a frame stream into utterances
///
/// Maintains a rolling is-speech flag: the first voiced frame starts
/// buffering; a long enough run of trailing silent frames, or hitting the
/// max-duration frame cap, completes the utterance.
struct UtteranceSegmenter {
    in_speech: bool,
    buffered: Vec<i16>,
    buffered_frames: usize,
    silence_run: usize,
    silence_frames: usize,
    max_speech_frames: usize,
}

impl UtteranceSegmenter {
    fn new(config: &ListeningConfig) -> Self {
        Self {
            in_speech: false,
            buffered: Vec::new(),
            buffered_frames: 0,
            silence_run: 0,
            silence_frames: config.silence_frames(),
            max_speech_frames: config.max_speech_frames(),
        }
    }

    /// Feed one classified frame; returns a completed utterance's samples
    fn push(&mut self, frame: &[i16], is_speech: bool) -> Option<Vec<i16>> {
        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.buffered.clear();
                self.buffered.extend_from_slice(frame);
                self.buffered_frames = 1;
                self.silence_run = 0;
            }
            return None;
        }

        self.buffered.extend_from_slice(frame);
        self.buffered_frames += 1;

        if is_speech {
            self.silence_run = 0;
        } else {
            self.silence_run += 1;
        }

        if self.silence_run > self.silence_frames || self.buffered_frames >= self.max_speech_frames
        {
            return Some(self.take());
        }

        None
    }

    /// Flush whatever is buffered, completed or not
    fn take(&mut self) -> Vec<i16> {
        self.in_speech = false;
        self.buffered_frames = 0;
        self.silence_run = 0;
        std::mem::take(&mut self.buffered)
    }

    fn reset(&mut self) {
        let _ = self.take();
    }
}

/// Resources a background session returns when it exits
struct SessionHandles {
    source: Box<dyn FrameSource>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    wake_events: Option<mpsc::Receiver<WakeEvent>>,
}

/// A running listening session
enum Session {
    /// Caller-driven; segmentation state lives on the controller side
    Manual {
        segmenter: UtteranceSegmenter,
        vad: Option<Box<dyn VoiceActivityDetector>>,
        fallback: EnergyVad,
        callback: TextCallback,
    },
    /// Background capture loop
    Background {
        shutdown_tx: mpsc::Sender<()>,
        task: JoinHandle<SessionHandles>,
    },
}

/// Top-level orchestrator for voice capture and recognition
pub struct ListeningController {
    config: ListeningConfig,
    recognizer: Arc<RecognitionAdapter>,
    source_factory: SourceFactory,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    wake: Option<WakeWordDetector>,
    wake_events: Option<mpsc::Receiver<WakeEvent>>,
    profile: VoiceProfile,
    session: Option<Session>,
    source: Option<Box<dyn FrameSource>>,
}

impl ListeningController {
    /// Create a controller
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the listening configuration is
    /// degenerate (see [`ListeningConfig::validate`])
    pub fn new(
        config: ListeningConfig,
        recognizer: Arc<RecognitionAdapter>,
        source_factory: SourceFactory,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            recognizer,
            source_factory,
            vad: None,
            wake: None,
            wake_events: None,
            profile: VoiceProfile::default(),
            session: None,
            source: None,
        })
    }

    /// Attach a primary voice-activity classifier
    ///
    /// Without one (or when it faults) segmentation falls back to RMS
    /// energy thresholding.
    #[must_use]
    pub fn with_vad(mut self, vad: Box<dyn VoiceActivityDetector>) -> Self {
        self.vad = Some(vad);
        self
    }

    /// Attach a wake word detector for `ListeningMode::WakeWord`
    #[must_use]
    pub fn with_wake_detector(
        mut self,
        detector: WakeWordDetector,
        events: mpsc::Receiver<WakeEvent>,
    ) -> Self {
        self.wake = Some(detector);
        self.wake_events = Some(events);
        self
    }

    /// Replace the active voice profile (last-write-wins)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the profile fails validation; the
    /// previous profile stays active
    pub fn set_profile(&mut self, profile: VoiceProfile) -> Result<()> {
        profile.validate()?;
        tracing::debug!(profile = %profile.id, "listening profile updated");
        self.profile = profile;
        Ok(())
    }

    /// The active voice profile
    #[must_use]
    pub const fn profile(&self) -> &VoiceProfile {
        &self.profile
    }

    /// Whether a session is currently running
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    /// Start a listening session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if a session is already running, if the
    /// capture device cannot be opened, or (WakeWord mode) if no detector
    /// is attached
    pub fn start_listening(
        &mut self,
        mode: ListeningMode,
        on_text: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Audio("a listening session is already running".to_string()));
        }

        let callback: TextCallback = Arc::new(on_text);

        if mode == ListeningMode::Manual {
            tracing::info!(mode = ?mode, "listening session started");
            self.session = Some(Session::Manual {
                segmenter: UtteranceSegmenter::new(&self.config),
                vad: self.vad.take(),
                fallback: EnergyVad::new(self.config.vad_threshold),
                callback,
            });
            return Ok(());
        }

        let mut source = self.source.take().map_or_else(|| (self.source_factory)(), Ok)?;
        source.open()?;

        let wake_events = if mode == ListeningMode::WakeWord {
            let Some(detector) = self.wake.as_mut() else {
                source.close();
                return Err(Error::Audio(
                    "wake word mode requires an attached detector".to_string(),
                ));
            };
            let Some(events) = self.wake_events.take() else {
                source.close();
                return Err(Error::Audio("wake event receiver unavailable".to_string()));
            };
            if let Err(e) = detector.start() {
                self.wake_events = Some(events);
                source.close();
                return Err(e);
            }
            Some(events)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let capture = CaptureLoop {
            config: self.config.clone(),
            recognizer: Arc::clone(&self.recognizer),
            vad: self.vad.take(),
            fallback: EnergyVad::new(self.config.vad_threshold),
            callback,
            language: Some(self.profile.language.clone()),
        };

        let task = tokio::spawn(capture.run(source, wake_events, shutdown_rx));
        self.session = Some(Session::Background { shutdown_tx, task });

        tracing::info!(mode = ?mode, "listening session started");
        Ok(())
    }

    /// Stop the running session
    ///
    /// Cancels the capture loop, waits for its confirmed termination, and
    /// releases the capture device only after the loop has fully exited.
    /// A no-op when not listening.
    pub async fn stop_listening(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match session {
            Session::Manual { vad, .. } => {
                self.vad = vad;
            }
            Session::Background { shutdown_tx, task } => {
                drop(shutdown_tx);
                match task.await {
                    Ok(handles) => {
                        // Loop has exited; the source was closed on its way out
                        self.source = Some(handles.source);
                        self.vad = handles.vad;
                        if handles.wake_events.is_some() {
                            self.wake_events = handles.wake_events;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "capture loop panicked"),
                }
            }
        }

        if let Some(detector) = self.wake.as_mut() {
            detector.stop().await;
        }

        tracing::info!("listening session stopped");
    }

    /// Feed one frame in Manual mode
    ///
    /// Runs segmentation inline; a completed utterance is transcribed and
    /// delivered through the callback before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] when no Manual session is active
    pub async fn push_audio(&mut self, frame: &[i16]) -> Result<()> {
        let sample_rate = self.config.sample_rate;

        let Some(Session::Manual {
            segmenter,
            vad,
            fallback,
            callback,
        }) = self.session.as_mut()
        else {
            return Err(Error::Audio("no manual listening session active".to_string()));
        };

        let is_speech = classify_frame(vad.as_deref_mut(), fallback, frame, sample_rate);
        let completed = segmenter.push(frame, is_speech);
        let callback = Arc::clone(callback);

        if let Some(samples) = completed {
            dispatch_utterance(
                &self.recognizer,
                samples,
                sample_rate,
                Some(&self.profile.language),
                &callback,
            )
            .await;
        }
        Ok(())
    }

    /// Flush the in-progress Manual-mode utterance, if any
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] when no Manual session is active
    pub async fn finish_utterance(&mut self) -> Result<()> {
        let sample_rate = self.config.sample_rate;

        let Some(Session::Manual {
            segmenter, callback, ..
        }) = self.session.as_mut()
        else {
            return Err(Error::Audio("no manual listening session active".to_string()));
        };

        let samples = segmenter.take();
        let callback = Arc::clone(callback);
        if !samples.is_empty() {
            dispatch_utterance(
                &self.recognizer,
                samples,
                sample_rate,
                Some(&self.profile.language),
                &callback,
            )
            .await;
        }
        Ok(())
    }
}

/// Classify one frame, preferring the primary detector
///
/// Falls back to RMS energy when the primary is absent or faults.
fn classify_frame(
    vad: Option<&mut (dyn VoiceActivityDetector + '_)>,
    fallback: &mut EnergyVad,
    frame: &[i16],
    sample_rate: u32,
) -> bool {
    if let Some(primary) = vad {
        match primary.classify(frame, sample_rate) {
            Ok(is_speech) => return is_speech,
            Err(e) => {
                tracing::warn!(error = %e, "primary VAD failed, using energy fallback");
            }
        }
    }
    fallback.classify(frame, sample_rate).unwrap_or(false)
}

/// Transcribe a completed utterance and deliver it to the callback
///
/// Recognition failures are logged and dropped; they never abort the
/// session. Callback panics are isolated.
async fn dispatch_utterance(
    recognizer: &RecognitionAdapter,
    samples: Vec<i16>,
    sample_rate: u32,
    language: Option<&str>,
    callback: &TextCallback,
) {
    let buffer = AudioBuffer::new(samples, sample_rate);
    tracing::debug!(
        samples = buffer.len(),
        duration_ms = buffer.duration().as_millis(),
        "utterance complete"
    );

    let wav_bytes = match wav::encode(&buffer) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "utterance encoding failed");
            return;
        }
    };

    match recognizer.transcribe(&wav_bytes, language).await {
        Ok(text) => {
            if catch_unwind(AssertUnwindSafe(|| callback(&text))).is_err() {
                tracing::error!("utterance callback panicked");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "utterance transcription failed");
        }
    }
}

/// The background capture-and-segment loop
struct CaptureLoop {
    config: ListeningConfig,
    recognizer: Arc<RecognitionAdapter>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    fallback: EnergyVad,
    callback: TextCallback,
    language: Option<String>,
}

impl CaptureLoop {
    /// Run until shutdown; returns the source and VAD for reuse
    async fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        mut wake_events: Option<mpsc::Receiver<WakeEvent>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> SessionHandles {
        let mut segmenter = UtteranceSegmenter::new(&self.config);
        // In WakeWord mode segmentation is armed only after a detection
        let mut armed = wake_events.is_none();

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            if !armed && let Some(events) = wake_events.as_mut() {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => {
                        match event {
                            Some(event) => {
                                tracing::debug!(
                                    keyword_index = event.keyword_index,
                                    "wake word detected, capturing utterance"
                                );
                                // Anything captured while waiting is stale
                                source.flush();
                                armed = true;
                            }
                            None => break,
                        }
                    }
                }
                continue;
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tokio::time::sleep(self.config.frame_duration / 2).await;
                    continue;
                }
                Err(e) => {
                    // Device read faults do not abort the session
                    tracing::warn!(error = %e, "frame read failed");
                    tokio::time::sleep(self.config.frame_duration).await;
                    continue;
                }
            };

            let is_speech = classify_frame(
                self.vad.as_deref_mut(),
                &mut self.fallback,
                &frame,
                self.config.sample_rate,
            );

            if let Some(samples) = segmenter.push(&frame, is_speech) {
                // Awaiting here preserves FIFO delivery: the next
                // utterance cannot start buffering until this one is done
                dispatch_utterance(
                    &self.recognizer,
                    samples,
                    self.config.sample_rate,
                    self.language.as_deref(),
                    &self.callback,
                )
                .await;

                if wake_events.is_some() {
                    // One utterance per detection; wait for the next wake
                    armed = false;
                }
            }

            tokio::task::yield_now().await;
        }

        segmenter.reset();
        source.close();
        SessionHandles {
            source,
            vad: self.vad,
            wake_events,
        }
    }
}

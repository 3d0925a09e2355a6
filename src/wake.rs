//! Wake word detection
//!
//! A state machine wrapping a frame-classifier capability and a microphone
//! frame source. The frame loop runs as a background task and reports
//! detections over a channel; loop faults are retried with a bounded
//! backoff before the detector parks itself in the Error state.

use std::sync::{Arc, Mutex as StdMutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{FrameSource, SourceFactory};
use crate::config::WakeConfig;
use crate::{Error, Result};

/// Classifies one fixed-length audio frame against configured keywords
///
/// Returns the matched keyword index, or `None` for no match.
pub trait WakeWordClassifier: Send {
    /// Classify a frame
    ///
    /// # Errors
    ///
    /// Returns error on a classifier fault; the frame loop treats this as
    /// a loop fault subject to the retry budget
    fn classify(&mut self, frame: &[i16]) -> Result<Option<usize>>;
}

/// Builds a classifier from the configured phrases and sensitivities
pub type ClassifierFactory =
    Box<dyn Fn(&WakeConfig) -> Result<Box<dyn WakeWordClassifier>> + Send + Sync>;

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Not initialized or stopped
    Idle,
    /// Actively pulling frames and classifying
    Listening,
    /// Classifier signaled a match
    Detected,
    /// Cooldown window to avoid immediate re-trigger
    Processing,
    /// Unrecovered fault; retries exhausted or initialization failed
    Error,
}

/// A detected wake word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeEvent {
    /// Index of the matched keyword within the configured phrases
    pub keyword_index: usize,
}

/// Handles owned by the frame loop, returned when it exits
type LoopHandles = (Box<dyn WakeWordClassifier>, Box<dyn FrameSource>);

/// Detects wake words on a background frame loop
pub struct WakeWordDetector {
    config: WakeConfig,
    classifier_factory: ClassifierFactory,
    source_factory: SourceFactory,
    state: Arc<StdMutex<DetectorState>>,
    events_tx: mpsc::Sender<WakeEvent>,
    handles: Option<LoopHandles>,
    task: Option<JoinHandle<LoopHandles>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl WakeWordDetector {
    /// Create a detector and the receiver its detections arrive on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the wake configuration is invalid
    pub fn new(
        config: WakeConfig,
        classifier_factory: ClassifierFactory,
        source_factory: SourceFactory,
    ) -> Result<(Self, mpsc::Receiver<WakeEvent>)> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(16);
        let detector = Self {
            config,
            classifier_factory,
            source_factory,
            state: Arc::new(StdMutex::new(DetectorState::Idle)),
            events_tx,
            handles: None,
            task: None,
            shutdown_tx: None,
        };

        Ok((detector, events_rx))
    }

    /// Construct the classifier and frame source handles
    ///
    /// # Errors
    ///
    /// Returns the construction error and leaves the detector in the
    /// Error state
    pub fn initialize(&mut self) -> Result<()> {
        let classifier = (self.classifier_factory)(&self.config).inspect_err(|e| {
            tracing::error!(error = %e, "wake word classifier construction failed");
            self.set_state(DetectorState::Error);
        })?;
        let source = (self.source_factory)().inspect_err(|e| {
            tracing::error!(error = %e, "wake word frame source construction failed");
            self.set_state(DetectorState::Error);
        })?;

        self.handles = Some((classifier, source));
        self.set_state(DetectorState::Idle);
        tracing::debug!(phrases = ?self.config.phrases, "wake word detector initialized");
        Ok(())
    }

    /// Start the frame loop
    ///
    /// Returns success idempotently if the loop is still running. A loop
    /// that has already exited on its own, such as after exhausting its
    /// retry budget, is replaced by a fresh one. Initializes handles first
    /// if `initialize()` was never called.
    ///
    /// # Errors
    ///
    /// Returns error if handle construction or frame source open fails
    pub fn start(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                self.task = Some(task);
                return Ok(());
            }
            // The loop parked itself; reclaim its handles and fall through
            // to a fresh start
            self.shutdown_tx = None;
            match task.now_or_never() {
                Some(Ok(handles)) => self.handles = Some(handles),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "wake word frame loop panicked");
                }
                None => {}
            }
        }

        if self.handles.is_none() {
            self.initialize()?;
        }
        let (classifier, mut source) = self
            .handles
            .take()
            .ok_or_else(|| Error::WakeWord("detector handles unavailable".to_string()))?;

        if let Err(e) = source.open() {
            self.handles = Some((classifier, source));
            self.set_state(DetectorState::Error);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let supervisor = Supervisor {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            events_tx: self.events_tx.clone(),
        };

        self.set_state(DetectorState::Listening);
        self.task = Some(tokio::spawn(supervisor.run(classifier, source, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!(phrases = ?self.config.phrases, "wake word detector started");
        Ok(())
    }

    /// Stop the frame loop and release the frame source
    ///
    /// Waits for confirmed loop termination before returning; the source
    /// is closed by the loop on every exit path. Safe to call when not
    /// running.
    pub async fn stop(&mut self) {
        self.shutdown_tx.take();

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(handles) => self.handles = Some(handles),
                Err(e) => tracing::error!(error = %e, "wake word frame loop panicked"),
            }
        }

        self.set_state(DetectorState::Idle);
        tracing::debug!("wake word detector stopped");
    }

    /// Current detector state
    ///
    /// After the retry budget is exhausted this reads `Error` and the
    /// detector no longer attempts recovery.
    #[must_use]
    pub fn state(&self) -> DetectorState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Configured wake phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.config.phrases
    }

    fn set_state(&self, state: DetectorState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        // Cannot await in Drop; aborting the task drops its handles, and
        // the frame source releases the device in its own Drop
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the frame loop and its restart policy
struct Supervisor {
    config: WakeConfig,
    state: Arc<StdMutex<DetectorState>>,
    events_tx: mpsc::Sender<WakeEvent>,
}

/// Why one pass of the frame loop ended
enum LoopOutcome {
    Shutdown,
    Fault(Error),
}

impl Supervisor {
    /// Run the frame loop, restarting on faults within the retry budget
    async fn run(
        self,
        mut classifier: Box<dyn WakeWordClassifier>,
        mut source: Box<dyn FrameSource>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> LoopHandles {
        let mut restarts: u32 = 0;

        loop {
            let outcome = self
                .frame_loop(classifier.as_mut(), source.as_mut(), &mut shutdown_rx)
                .await;

            match outcome {
                LoopOutcome::Shutdown => {
                    source.close();
                    break;
                }
                LoopOutcome::Fault(e) => {
                    self.set_state(DetectorState::Error);
                    tracing::error!(error = %e, restarts, "wake word frame loop fault");

                    if restarts >= self.config.max_retries {
                        tracing::error!(
                            max_retries = self.config.max_retries,
                            "wake word retry budget exhausted, staying in error state"
                        );
                        source.close();
                        break;
                    }
                    restarts += 1;

                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            source.close();
                            break;
                        }
                        () = tokio::time::sleep(self.config.retry_delay) => {}
                    }

                    // Full stop/start: release the source and reopen it.
                    // A failed reopen is terminal.
                    source.close();
                    if let Err(e) = source.open() {
                        tracing::error!(error = %e, "wake word frame source reopen failed");
                        self.set_state(DetectorState::Error);
                        break;
                    }
                    self.set_state(DetectorState::Listening);
                }
            }
        }

        (classifier, source)
    }

    /// One pass over frames until shutdown or fault
    async fn frame_loop(
        &self,
        classifier: &mut dyn WakeWordClassifier,
        source: &mut dyn FrameSource,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> LoopOutcome {
        loop {
            // Shutdown wins over the next frame read; recv returns None
            // once the detector dropped its sender
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    return LoopOutcome::Shutdown;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    // No full frame buffered yet; yield and re-poll
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    continue;
                }
                Err(e) => return LoopOutcome::Fault(e),
            };

            match classifier.classify(&frame) {
                Ok(Some(index)) => {
                    self.set_state(DetectorState::Detected);
                    tracing::info!(keyword_index = index, "wake word detected");

                    if self
                        .events_tx
                        .send(WakeEvent {
                            keyword_index: index,
                        })
                        .await
                        .is_err()
                    {
                        tracing::debug!("wake event receiver dropped");
                    }

                    self.set_state(DetectorState::Processing);
                    tokio::select! {
                        _ = shutdown_rx.recv() => return LoopOutcome::Shutdown,
                        () = tokio::time::sleep(self.config.cooldown) => {}
                    }
                    self.set_state(DetectorState::Listening);
                }
                Ok(None) => {}
                Err(e) => return LoopOutcome::Fault(e),
            }

            tokio::task::yield_now().await;
        }
    }

    fn set_state(&self, state: DetectorState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }
}

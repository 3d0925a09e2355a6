//! Voice-activity classification
//!
//! The listening controller prefers an external frame classifier and falls
//! back to a simple RMS energy threshold when the classifier is absent or
//! fails, keeping capture degraded-but-functional.

use crate::Result;
use crate::audio::rms_energy;

/// Classifies one fixed-size frame as speech or silence
pub trait VoiceActivityDetector: Send {
    /// Classify a frame; `true` means speech
    ///
    /// # Errors
    ///
    /// Returns error if the underlying classifier is unavailable or faults;
    /// callers fall back to energy detection in that case
    fn classify(&mut self, frame: &[i16], sample_rate: u32) -> Result<bool>;
}

/// RMS energy threshold detector
///
/// The always-available fallback: compares normalized root-mean-square
/// amplitude of the raw frame against a configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create a detector with the given normalized threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &[i16], _sample_rate: u32) -> Result<bool> {
        Ok(rms_energy(frame) > self.threshold)
    }
}

//! Audio sample buffers

use std::time::Duration;

/// An ordered sequence of signed 16-bit samples paired with its sample rate
///
/// Samples are never interpreted without their rate; conversions and
/// duration math all go through this pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from samples and their rate
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Create an empty buffer at the given rate
    #[must_use]
    pub const fn empty(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    /// Convert f32 capture samples in [-1, 1] to a 16-bit buffer
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let converted = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();
        Self {
            samples: converted,
            sample_rate,
        }
    }

    /// The raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// The sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the buffered audio
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Append another frame of samples
    pub fn extend(&mut self, frame: &[i16]) {
        self.samples.extend_from_slice(frame);
    }

    /// Consume the buffer, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_from_rate() {
        let buffer = AudioBuffer::new(vec![0; 16_000], 16_000);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn f32_conversion_clamps() {
        let buffer = AudioBuffer::from_f32(&[0.0, 1.0, -1.0, 2.0], 16_000);
        assert_eq!(buffer.samples(), &[0, 32767, -32767, 32767]);
    }

    #[test]
    fn extend_appends_frames() {
        let mut buffer = AudioBuffer::empty(16_000);
        buffer.extend(&[1, 2]);
        buffer.extend(&[3]);
        assert_eq!(buffer.samples(), &[1, 2, 3]);
    }
}

//! Audio primitives
//!
//! Buffers, frame sources, and WAV encoding shared by capture,
//! segmentation, and recognition handoff.

mod buffer;
mod capture;
pub mod wav;

pub use buffer::AudioBuffer;
pub use capture::MicFrameSource;

use crate::Result;

/// A device handle providing fixed-size frame reads
///
/// Implementations must support deterministic open/close; the pipeline
/// releases a frame source only after its consuming loop has fully exited.
pub trait FrameSource: Send {
    /// Open the underlying device; idempotent when already open
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&mut self) -> Result<()>;

    /// Read one frame of `frame_size()` samples
    ///
    /// Returns `None` when no full frame has accumulated yet.
    ///
    /// # Errors
    ///
    /// Returns error on a device fault
    fn read_frame(&mut self) -> Result<Option<Vec<i16>>>;

    /// Discard samples buffered since the last read
    ///
    /// Live-capture sources keep accumulating audio while nobody reads,
    /// for example while a consumer waits on a wake word; flushing drops
    /// that backlog so the next frame is current. Sources without an
    /// internal backlog keep the no-op default.
    fn flush(&mut self) {}

    /// Close the underlying device; safe to call when not open
    fn close(&mut self);

    /// Samples per frame
    fn frame_size(&self) -> usize;

    /// Sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Builds a frame source on demand
///
/// Consumers that need exclusive device ownership construct their source
/// through one of these rather than sharing a handle.
pub type SourceFactory = Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Calculate normalized RMS energy of i16 samples
///
/// Samples are scaled to [-1, 1] before squaring so the result is
/// comparable against thresholds in [0, 1].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let normalized = f32::from(s) / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

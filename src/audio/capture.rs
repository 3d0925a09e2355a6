//! Microphone frame source
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated worker
//! thread; the frame source handle itself can move into async tasks.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

use super::FrameSource;

/// Captures fixed-size frames from the default input device
pub struct MicFrameSource {
    config: StreamConfig,
    buffer: Arc<Mutex<VecDeque<i16>>>,
    worker: Option<(std_mpsc::Sender<()>, JoinHandle<()>)>,
    frame_size: usize,
    sample_rate: u32,
}

impl MicFrameSource {
    /// Create a frame source over the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device exists or no mono config at the
    /// requested rate is supported
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            frame_size,
            "microphone frame source initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            worker: None,
            frame_size,
            sample_rate,
        })
    }
}

impl FrameSource for MicFrameSource {
    fn open(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let config = self.config.clone();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err(Error::Audio("no input device".to_string())));
                return;
            };

            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        #[allow(clippy::cast_possible_truncation)]
                        buf.extend(
                            data.iter()
                                .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                        );
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Park until close(); the stream stays alive on this thread
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some((shutdown_tx, handle));
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("capture thread exited during open".to_string()))
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<Vec<i16>>> {
        let mut buf = self
            .buffer
            .lock()
            .map_err(|_| Error::Audio("capture buffer poisoned".to_string()))?;

        if buf.len() < self.frame_size {
            return Ok(None);
        }

        Ok(Some(buf.drain(..self.frame_size).collect()))
    }

    fn flush(&mut self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn close(&mut self) {
        if let Some((shutdown_tx, handle)) = self.worker.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.join();
            tracing::debug!("audio capture stopped");
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

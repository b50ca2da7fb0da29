//! Microphone capture using CPAL.
//!
//! Capture runs on a dedicated thread that owns the cpal stream (the stream
//! is not `Send`). Fixed-size frames cross to the control flow over an
//! unbounded channel, so the audio callback never blocks on the consumer.
//! Echo cancellation and noise suppression are left to the platform input
//! processing.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Audio configuration shared by capture and playback
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (wire format is 24 kHz)
    pub sample_rate: u32,

    /// Number of channels (1 = mono, the only supported layout)
    pub channels: u16,

    /// Samples per emitted chunk (4096 = ~171ms at 24 kHz)
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            frame_size: 4096,
        }
    }
}

/// A fixed-size chunk of captured or decoded audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,

    /// Timestamp when captured or decoded
    pub timestamp: std::time::Instant,
}

/// Shared input-level meter in [0, 1], published from the capture thread.
///
/// Stored as raw f32 bits in an atomic so readers never take a lock.
/// Smoothing is exponential (new = 0.2 * sample + 0.8 * previous) to keep
/// UI meters from jittering.
#[derive(Debug, Clone, Default)]
pub struct AudioLevel {
    bits: Arc<AtomicU32>,
}

impl AudioLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current smoothed level in [0, 1]. Advisory telemetry only.
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Feed one chunk's mean magnitude into the smoothed value.
    pub fn update(&self, sample_level: f32) {
        let prev = self.get();
        let next = (0.2 * sample_level + 0.8 * prev).clamp(0.0, 1.0);
        self.bits.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Reset to silence (capture stopped).
    pub fn reset(&self) {
        self.bits.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

/// Source of captured audio chunks. The microphone is the production
/// implementation; tests inject scripted sources.
pub trait CaptureSource: Send + Sync {
    /// Start producing fixed-size chunks into `chunk_tx` and publishing the
    /// input level into `level`. Returns a handle that stops capture when
    /// dropped or when `stop()` is called.
    fn start(
        &self,
        config: &AudioConfig,
        chunk_tx: mpsc::UnboundedSender<AudioChunk>,
        level: AudioLevel,
    ) -> VoiceResult<CaptureHandle>;
}

/// Handle that keeps capture running. After `stop()` returns, no further
/// chunks are delivered.
pub struct CaptureHandle {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Handle for a thread-backed capture session.
    pub fn from_thread(stop_tx: std::sync::mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }

    /// Handle with nothing to stop (scripted sources that finish on their own).
    pub fn detached() -> Self {
        Self {
            stop_tx: None,
            join: None,
        }
    }

    /// Stop capture and wait for the capture thread to release the device.
    /// Safe to call multiple times; a no-op if not capturing.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone capture via the default CPAL input device
#[derive(Debug, Default)]
pub struct MicCapture;

impl MicCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureSource for MicCapture {
    fn start(
        &self,
        config: &AudioConfig,
        chunk_tx: mpsc::UnboundedSender<AudioChunk>,
        level: AudioLevel,
    ) -> VoiceResult<CaptureHandle> {
        info!(
            "Initializing microphone capture ({}Hz, {} channels, {}-sample frames)",
            config.sample_rate, config.channels, config.frame_size
        );

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::Device("no input device available".to_string()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_size = config.frame_size;
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();

        // The cpal stream is not Send, so it lives and dies on this thread.
        let join = thread::spawn(move || {
            let mut frame = Vec::with_capacity(frame_size);
            let stream = device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        frame.push(sample);
                        if frame.len() >= frame_size {
                            let magnitude =
                                frame.iter().map(|s| s.abs()).sum::<f32>() / frame.len() as f32;
                            level.update(magnitude.min(1.0));

                            let chunk = AudioChunk {
                                samples: std::mem::replace(
                                    &mut frame,
                                    Vec::with_capacity(frame_size),
                                ),
                                timestamp: std::time::Instant::now(),
                            };
                            if chunk_tx.send(chunk).is_err() {
                                warn!("Capture chunk receiver dropped");
                            }
                        }
                    }
                },
                move |err| {
                    warn!("Audio input stream error: {}", err);
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Park until stop; dropping the stream stops the device tracks.
            let _ = stop_rx.recv();
            drop(stream);
            info!("Microphone capture stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                Ok(CaptureHandle::from_thread(stop_tx, join))
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(VoiceError::Capture(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }
}

//! # Microphone Capture
//!
//! Continuously reads the input device and emits fixed-size [`AudioFrame`]
//! blocks in capture order. The cpal stream is `!Send`, so the device is
//! owned by a dedicated thread; frames cross into the session's event loop
//! over an unbounded channel, which preserves FIFO order end-to-end.

use crate::audio::codec::AudioFrame;
use crate::error::AppError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capture seam for the session controller.
///
/// `start` must fail with `AppError::Device` when the input device is
/// unavailable or permission is denied, without leaving anything running.
/// `stop` must be idempotent and safe mid-startup.
pub trait CaptureDevice: Send {
    /// Open the device and begin emitting frames on `frames`.
    fn start(&mut self, frames: mpsc::UnboundedSender<AudioFrame>) -> Result<(), AppError>;

    /// Stop capturing and release the device. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Default-host microphone capture at a fixed sample rate.
///
/// ## Threading:
/// `start` spawns a capture thread that owns the cpal stream. The stream
/// callback accumulates channel-0 samples into `block_size` chunks and sends
/// each full chunk as one frame. Dropping the shutdown sender unparks the
/// thread and drops the stream.
pub struct Microphone {
    sample_rate: u32,
    block_size: usize,
    shutdown: Option<std_mpsc::Sender<()>>,
}

impl Microphone {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            shutdown: None,
        }
    }
}

impl CaptureDevice for Microphone {
    fn start(&mut self, frames: mpsc::UnboundedSender<AudioFrame>) -> Result<(), AppError> {
        if self.shutdown.is_some() {
            return Err(AppError::Device("capture already running".to_string()));
        }

        let sample_rate = self.sample_rate;
        let block_size = self.block_size;
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AppError>>();

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sample_rate, block_size, frames) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(AppError::Device(format!(
                        "failed to start capture stream: {}",
                        err
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                // Park until the session releases the device
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Capture thread exited");
            })
            .map_err(|e| AppError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                info!(sample_rate, block_size, "Microphone capture started");
                self.shutdown = Some(shutdown_tx);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AppError::Device(
                "timed out waiting for capture device to open".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            drop(shutdown);
            info!("Microphone capture stopped");
        }
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the cpal input stream for the default input device.
///
/// The device's channel count is taken as-is and only channel 0 is kept;
/// the requested sample rate must be supported, resampling is not attempted.
fn build_input_stream(
    sample_rate: u32,
    block_size: usize,
    frames: mpsc::UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream, AppError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AppError::Device("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| AppError::Device(format!("cannot query input configs: {}", e)))?
        .find(|cfg| {
            cfg.min_sample_rate().0 <= sample_rate
                && sample_rate <= cfg.max_sample_rate().0
                && cfg.sample_format() == cpal::SampleFormat::F32
        })
        .ok_or_else(|| {
            AppError::Device(format!(
                "input device does not support {} Hz f32 capture",
                sample_rate
            ))
        })?
        .with_sample_rate(cpal::SampleRate(sample_rate));

    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _| {
                // Keep channel 0; interleaved frames step by channel count
                pending.extend(data.iter().step_by(channels));

                while pending.len() >= block_size {
                    let block: Vec<f32> = pending.drain(..block_size).collect();
                    if frames.send(AudioFrame::new(block, sample_rate)).is_err() {
                        // Session event loop is gone; frames are dropped
                        // until stop() releases the device
                        warn!("Dropping capture block, session channel closed");
                        return;
                    }
                }
            },
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| AppError::Device(format!("failed to open capture stream: {}", e)))?;

    Ok(stream)
}

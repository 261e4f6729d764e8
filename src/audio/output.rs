//! # Output Device Sink
//!
//! Real [`PlaybackSink`] implementation that mixes scheduled sources onto the
//! default output device.
//!
//! ## Mixing model:
//! The playback clock is the number of samples the output callback has
//! rendered since the stream opened. Each scheduled source occupies the
//! half-open sample range `[start_sample, start_sample + len)`; the callback
//! sums every overlapping source into each output frame. Sources whose range
//! has fully played are dropped by the callback, which reports the natural
//! completion to the session's event loop over a channel.
//!
//! The cpal stream is `!Send`, so it lives on a dedicated thread; the sink
//! handle only touches the shared mixer state behind a mutex.

use crate::audio::playback::{PlaybackSink, SourceId};
use crate::error::AppError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

struct MixerEntry {
    id: SourceId,
    start_sample: u64,
    samples: Vec<f32>,
}

#[derive(Default)]
struct MixerState {
    /// Samples rendered since the stream opened (the playback clock).
    position: u64,
    entries: Vec<MixerEntry>,
}

/// Handle to the output mixer thread.
pub struct DeviceSink {
    sample_rate: u32,
    shared: Arc<Mutex<MixerState>>,
    shutdown: Option<std_mpsc::Sender<()>>,
}

impl DeviceSink {
    /// Open the default output device at `sample_rate` and start the mixer.
    ///
    /// Natural completions are reported on `ended`. Fails with
    /// `AppError::Device` when no usable output device exists.
    pub fn spawn(
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, AppError> {
        let shared = Arc::new(Mutex::new(MixerState::default()));
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AppError>>();

        let state = shared.clone();
        std::thread::Builder::new()
            .name("playback-mixer".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, state, ended) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(AppError::Device(format!(
                        "failed to start output stream: {}",
                        err
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Playback mixer thread exited");
            })
            .map_err(|e| AppError::Device(format!("failed to spawn playback thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                info!(sample_rate, "Playback mixer started");
                Ok(Self {
                    sample_rate,
                    shared,
                    shutdown: Some(shutdown_tx),
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AppError::Device(
                "timed out waiting for output device to open".to_string(),
            )),
        }
    }
}

impl PlaybackSink for DeviceSink {
    fn now(&self) -> f64 {
        let state = self.shared.lock().unwrap();
        state.position as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64) {
        let start_sample = (start * self.sample_rate as f64).round() as u64;
        let mut state = self.shared.lock().unwrap();
        state.entries.push(MixerEntry {
            id,
            start_sample,
            samples,
        });
    }

    fn stop(&mut self, id: SourceId) {
        // Forced stop: silence immediately, no completion report
        let mut state = self.shared.lock().unwrap();
        state.entries.retain(|entry| entry.id != id);
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            drop(shutdown);
        }
    }
}

/// Build the mixing output stream on the default output device.
///
/// Mono sources are duplicated across however many channels the device
/// exposes. The requested rate must be supported; resampling is not
/// attempted.
fn build_output_stream(
    sample_rate: u32,
    shared: Arc<Mutex<MixerState>>,
    ended: mpsc::UnboundedSender<SourceId>,
) -> Result<cpal::Stream, AppError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AppError::Device("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| AppError::Device(format!("cannot query output configs: {}", e)))?
        .find(|cfg| {
            cfg.min_sample_rate().0 <= sample_rate
                && sample_rate <= cfg.max_sample_rate().0
                && cfg.sample_format() == cpal::SampleFormat::F32
        })
        .ok_or_else(|| {
            AppError::Device(format!(
                "output device does not support {} Hz f32 playback",
                sample_rate
            ))
        })?
        .with_sample_rate(cpal::SampleRate(sample_rate));

    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let mut state = shared.lock().unwrap();
                let frame_count = (data.len() / channels) as u64;

                for frame in 0..frame_count {
                    let t = state.position + frame;
                    let mut mixed = 0.0f32;
                    for entry in &state.entries {
                        if t >= entry.start_sample {
                            let offset = (t - entry.start_sample) as usize;
                            if offset < entry.samples.len() {
                                mixed += entry.samples[offset];
                            }
                        }
                    }
                    for ch in 0..channels {
                        data[frame as usize * channels + ch] = mixed;
                    }
                }

                state.position += frame_count;

                // Report and drop fully played sources
                let position = state.position;
                state.entries.retain(|entry| {
                    let finished = entry.start_sample + entry.samples.len() as u64 <= position;
                    if finished {
                        let _ = ended.send(entry.id);
                    }
                    !finished
                });
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AppError::Device(format!("failed to open output stream: {}", e)))?;

    Ok(stream)
}

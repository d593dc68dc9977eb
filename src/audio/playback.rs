//! Speech playback
//!
//! A single worker thread owns the output device and plays queued
//! utterances strictly one at a time (FIFO), so overlapping speak
//! calls never interleave on the stream. Cancellation is epoch based:
//! `stop()` bumps the epoch, the sink polls it every audio buffer, and
//! queued requests from older epochs are discarded unplayed.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::providers::SpeechProvider;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// How often the play loop polls for completion or cancellation
const PLAY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays one synthesized utterance to an output device
///
/// The seam that keeps the controller testable without audio hardware.
pub trait AudioSink: Send {
    /// Play encoded audio until it finishes or `cancelled` turns true
    ///
    /// Implementations must observe `cancelled` within roughly one
    /// audio buffer of latency.
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails.
    fn play(&self, audio: &[u8], cancelled: &(dyn Fn() -> bool + Send + Sync)) -> Result<()>;
}

/// One queued utterance
struct PlaybackRequest {
    audio: Vec<u8>,
    epoch: u64,
    done: tokio::sync::oneshot::Sender<()>,
}

/// Serializes speech synthesis output to the audio device
pub struct PlaybackController {
    tx: std::sync::mpsc::Sender<PlaybackRequest>,
    speaking: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    provider: Arc<dyn SpeechProvider>,
}

impl PlaybackController {
    /// Start the playback worker
    #[must_use]
    pub fn new(provider: Arc<dyn SpeechProvider>, sink: Box<dyn AudioSink>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<PlaybackRequest>();
        let speaking = Arc::new(AtomicBool::new(false));
        let epoch = Arc::new(AtomicU64::new(0));

        let worker_speaking = Arc::clone(&speaking);
        let worker_epoch = Arc::clone(&epoch);
        std::thread::Builder::new()
            .name("overhear-playback".to_string())
            .spawn(move || {
                playback_worker(&rx, sink.as_ref(), &worker_speaking, &worker_epoch);
            })
            .expect("failed to spawn playback worker");

        Self {
            tx,
            speaking,
            epoch,
            provider,
        }
    }

    /// Synthesize `text` and play it
    ///
    /// Non-blocking calls return once the utterance is queued; blocking
    /// calls return when playback finishes or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SynthesisUnavailable`] when synthesis fails and
    /// [`Error::Audio`] when the playback worker is gone.
    pub async fn speak(&self, text: &str, blocking: bool) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("no text provided".to_string()));
        }

        tracing::debug!(chars = text.len(), blocking, "synthesizing speech");
        let audio = self.provider.synthesize(text).await?;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let request = PlaybackRequest {
            audio,
            epoch: self.epoch.load(Ordering::SeqCst),
            done: done_tx,
        };

        self.tx
            .send(request)
            .map_err(|_| Error::Audio("playback worker stopped".to_string()))?;

        if blocking {
            // Err here means the worker died mid-playback; either way
            // there is nothing left to wait for
            let _ = done_rx.await;
        }

        Ok(())
    }

    /// Immediately halt any playing audio and discard the queue
    ///
    /// No-op when idle.
    pub fn stop(&self) {
        if self.speaking.load(Ordering::SeqCst) {
            tracing::debug!("stopping playback");
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether an utterance is currently playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// Worker loop: one playback at a time, FIFO, epoch-cancelled
fn playback_worker(
    rx: &std::sync::mpsc::Receiver<PlaybackRequest>,
    sink: &dyn AudioSink,
    speaking: &AtomicBool,
    epoch: &AtomicU64,
) {
    while let Ok(request) = rx.recv() {
        if request.epoch < epoch.load(Ordering::SeqCst) {
            tracing::debug!("discarding cancelled queued utterance");
            let _ = request.done.send(());
            continue;
        }

        let request_epoch = request.epoch;
        let cancelled = move || epoch.load(Ordering::SeqCst) > request_epoch;

        speaking.store(true, Ordering::SeqCst);
        if let Err(e) = sink.play(&request.audio, &cancelled) {
            tracing::error!(error = %e, "playback failed");
        }
        speaking.store(false, Ordering::SeqCst);

        let _ = request.done.send(());
    }
}

/// Plays MP3 audio through the default cpal output device
///
/// Only plain stream parameters are kept here; the device itself is
/// re-acquired per utterance so the sink stays `Send` (cpal devices
/// and streams are thread-bound).
pub struct CpalSink {
    config: StreamConfig,
}

impl CpalSink {
    /// Probe the default output device for a usable configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no output device or
    /// suitable configuration exists.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable("no suitable output config found".to_string())
            })?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::info!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }
}

impl CpalSink {
    /// Play raw mono f32 samples until done or cancelled
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the output stream cannot be built.
    pub fn play_samples(
        &self,
        samples: Vec<f32>,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels);

        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(AtomicBool::new(false));

        let cb_samples = Arc::clone(&samples);
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = cb_position.lock().unwrap();

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < cb_samples.len() {
                            let s = cb_samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            cb_finished.store(true, Ordering::Relaxed);
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Poll for natural completion or cancellation; dropping the
        // stream halts output within one device buffer
        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = std::time::Instant::now();

        while !finished.load(Ordering::Relaxed) && !cancelled() {
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(PLAY_POLL_INTERVAL);
        }

        let was_cancelled = cancelled();
        drop(stream);

        if was_cancelled {
            tracing::debug!("playback cancelled");
        } else {
            tracing::debug!(samples = sample_count, "playback complete");
        }

        Ok(())
    }
}

impl AudioSink for CpalSink {
    fn play(&self, audio: &[u8], cancelled: &(dyn Fn() -> bool + Send + Sync)) -> Result<()> {
        let (samples, source_rate) = decode_mp3(audio)?;
        if source_rate != PLAYBACK_SAMPLE_RATE {
            tracing::debug!(source_rate, "TTS sample rate differs from output config");
        }
        self.play_samples(samples, cancelled)
    }
}

/// Decode MP3 bytes to f32 samples, returning the source sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }

                // Convert i16 samples to f32 and downmix stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

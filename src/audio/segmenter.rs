//! Speech segmentation
//!
//! Turns the continuous capture stream into discrete speech segments.
//! Runs on its own thread: pops fixed frames from the capture ring,
//! asks the active VAD strategy about each one, and drives a two-state
//! FSM (idle / speaking) with leading padding, a silence timeout, and
//! an optional hard phrase time limit. Finished segments go into a
//! bounded queue that drops its oldest entry under overflow so memory
//! stays bounded during sustained speech.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ringbuf::traits::Consumer;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::Notify;

use crate::{Error, Result};

use super::capture::PIPELINE_SAMPLE_RATE;
use super::vad::{VAD_FRAME_SAMPLES, VadStrategy};

/// Input frames fed to the resampler per pass
const RESAMPLE_CHUNK: usize = 1024;

/// One speech-delimited chunk of audio
///
/// Owned exclusively by whichever pipeline stage is processing it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Mono samples at [`AudioSegment::sample_rate`]
    pub samples: Vec<f32>,

    /// Always [`PIPELINE_SAMPLE_RATE`] for segments from the segmenter
    pub sample_rate: u32,
}

impl AudioSegment {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Bounded segment queue between the segmenter thread and the
/// transcription loop
///
/// Overflow drops the *oldest* queued segment: under sustained speech
/// the freshest audio is the one worth transcribing.
#[derive(Debug)]
pub struct SegmentQueue {
    inner: Mutex<VecDeque<AudioSegment>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SegmentQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a segment, evicting the oldest one when full
    pub fn push(&self, segment: AudioSegment) {
        {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "segment queue full, dropped oldest segment");
            }
            queue.push_back(segment);
        }
        self.notify.notify_one();
    }

    /// Dequeue without waiting
    pub fn try_recv(&self) -> Option<AudioSegment> {
        self.lock().pop_front()
    }

    /// Wait for the next segment; `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<AudioSegment> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(segment) = self.try_recv() {
                return Some(segment);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Close the queue; pending segments can still be drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Segments dropped to overflow so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AudioSegment>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Segmentation tuning
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence that ends a segment
    pub silence_timeout: Duration,

    /// Leading audio kept from just before speech onset
    pub padding: Duration,

    /// Minimum voiced time for a segment to be worth transcribing
    pub min_speech: Duration,

    /// Force-cut segments longer than this (emitted truncated)
    pub phrase_time_limit: Option<Duration>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_millis(800),
            padding: Duration::from_millis(300),
            min_speech: Duration::from_millis(250),
            phrase_time_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegState {
    Idle,
    Speaking,
}

#[derive(Debug, Default)]
struct SegmenterMetrics {
    frames: u64,
    emitted: u64,
    truncated: u64,
    discarded_short: u64,
}

/// The segmenter thread body
pub struct AudioSegmenter<C> {
    consumer: C,
    vad: Box<dyn VadStrategy>,
    upgrade: Option<Receiver<Box<dyn VadStrategy + Send>>>,
    queue: Arc<SegmentQueue>,
    stop: Arc<AtomicBool>,
    resampler: Option<FastFixedIn<f32>>,
    read_chunk: usize,

    state: SegState,
    padding: VecDeque<Vec<f32>>,
    padding_frames: usize,
    silence_frames_needed: usize,
    min_speech_frames: usize,
    limit_samples: Option<usize>,
    current: Vec<f32>,
    silence_frames: usize,
    speech_frames: usize,
    metrics: SegmenterMetrics,
}

impl<C> AudioSegmenter<C>
where
    C: Consumer<Item = f32> + Send,
{
    /// Build a segmenter reading device-rate samples from `consumer`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the resampler cannot be constructed.
    pub fn new(
        consumer: C,
        input_sample_rate: u32,
        cfg: SegmenterConfig,
        vad: Box<dyn VadStrategy>,
        upgrade: Option<Receiver<Box<dyn VadStrategy + Send>>>,
        queue: Arc<SegmentQueue>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (resampler, read_chunk) = if input_sample_rate == PIPELINE_SAMPLE_RATE {
            (None, VAD_FRAME_SAMPLES)
        } else {
            let ratio = f64::from(PIPELINE_SAMPLE_RATE) / f64::from(input_sample_rate);
            let resampler =
                FastFixedIn::<f32>::new(ratio, 1.1, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
                    .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;
            (Some(resampler), RESAMPLE_CHUNK)
        };

        let padding_frames = duration_to_frames(cfg.padding).max(1);
        let silence_frames_needed = duration_to_frames(cfg.silence_timeout).max(1);
        let min_speech_frames = duration_to_frames(cfg.min_speech);
        let limit_samples = cfg.phrase_time_limit.map(duration_to_samples);

        Ok(Self {
            consumer,
            vad,
            upgrade,
            queue,
            stop,
            resampler,
            read_chunk,
            state: SegState::Idle,
            padding: VecDeque::new(),
            padding_frames,
            silence_frames_needed,
            min_speech_frames,
            limit_samples,
            current: Vec::new(),
            silence_frames: 0,
            speech_frames: 0,
            metrics: SegmenterMetrics::default(),
        })
    }

    /// Run until the stop flag is raised
    pub fn run(mut self) {
        tracing::info!(vad = self.vad.name(), "audio segmenter started");

        let mut raw = vec![0.0f32; self.read_chunk];
        let mut pending: Vec<f32> = Vec::new();

        while !self.stop.load(Ordering::Relaxed) {
            self.maybe_upgrade_vad();

            if self.consumer.occupied_len() < raw.len() {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }

            let n = self.consumer.pop_slice(&mut raw);

            if let Some(resampler) = &mut self.resampler {
                match resampler.process(&[&raw[..n]], None) {
                    Ok(mut out) => pending.append(&mut out.remove(0)),
                    Err(e) => {
                        tracing::warn!(error = %e, "resampler error, dropping chunk");
                        continue;
                    }
                }
            } else {
                pending.extend_from_slice(&raw[..n]);
            }

            while pending.len() >= VAD_FRAME_SAMPLES {
                let frame: Vec<f32> = pending.drain(..VAD_FRAME_SAMPLES).collect();
                self.process_frame(&frame);
            }
        }

        tracing::info!(
            frames = self.metrics.frames,
            segments = self.metrics.emitted,
            truncated = self.metrics.truncated,
            discarded_short = self.metrics.discarded_short,
            queue_dropped = self.queue.dropped(),
            "audio segmenter stopped"
        );
    }

    /// Swap in the enhanced VAD once its model has been acquired
    fn maybe_upgrade_vad(&mut self) {
        if let Some(rx) = &self.upgrade
            && let Ok(upgraded) = rx.try_recv()
        {
            tracing::info!(
                from = self.vad.name(),
                to = upgraded.name(),
                "switching VAD strategy"
            );
            self.vad = upgraded;
        }
    }

    /// Advance the FSM by one frame
    fn process_frame(&mut self, frame: &[f32]) {
        self.metrics.frames += 1;

        let is_speech = match self.vad.is_speech(frame) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "vad error, treating frame as silence");
                false
            }
        };

        match self.state {
            SegState::Idle => {
                self.padding.push_back(frame.to_vec());
                if self.padding.len() > self.padding_frames {
                    self.padding.pop_front();
                }

                if is_speech {
                    tracing::trace!("speech onset");
                    self.state = SegState::Speaking;
                    self.current = self.padding.iter().flatten().copied().collect();
                    self.padding.clear();
                    self.silence_frames = 0;
                    self.speech_frames = 1;
                }
            }
            SegState::Speaking => {
                self.current.extend_from_slice(frame);

                if is_speech {
                    self.silence_frames = 0;
                    self.speech_frames += 1;
                } else {
                    self.silence_frames += 1;
                }

                if self.silence_frames >= self.silence_frames_needed {
                    self.finish_segment(false);
                } else if self
                    .limit_samples
                    .is_some_and(|limit| self.current.len() >= limit)
                {
                    self.finish_segment(true);
                }
            }
        }
    }

    /// Emit the accumulated segment and return to idle
    fn finish_segment(&mut self, truncated: bool) {
        let samples = std::mem::take(&mut self.current);
        let voiced_frames = self.speech_frames;

        self.state = SegState::Idle;
        self.padding.clear();
        self.silence_frames = 0;
        self.speech_frames = 0;
        self.vad.reset();

        if voiced_frames < self.min_speech_frames {
            self.metrics.discarded_short += 1;
            tracing::trace!(voiced_frames, "discarding short segment");
            return;
        }

        let segment = AudioSegment {
            samples,
            sample_rate: PIPELINE_SAMPLE_RATE,
        };

        self.metrics.emitted += 1;
        if truncated {
            self.metrics.truncated += 1;
            tracing::debug!(
                duration = ?segment.duration(),
                "phrase time limit reached, emitting truncated segment"
            );
        } else {
            tracing::debug!(duration = ?segment.duration(), "segment complete");
        }

        self.queue.push(segment);
    }
}

/// Exact integer conversion so frame thresholds never drift on float
/// rounding
#[allow(clippy::cast_possible_truncation)]
fn duration_to_samples(d: Duration) -> usize {
    ((d.as_nanos() * u128::from(PIPELINE_SAMPLE_RATE)) / 1_000_000_000) as usize
}

fn duration_to_frames(d: Duration) -> usize {
    duration_to_samples(d).div_ceil(VAD_FRAME_SAMPLES)
}

#[cfg(test)]
mod tests {
    use ringbuf::HeapRb;
    use ringbuf::traits::Split;

    use super::super::vad::rms;
    use super::*;

    /// Classifies frames by amplitude so tests can script speech/silence
    struct AmplitudeVad;

    impl VadStrategy for AmplitudeVad {
        fn name(&self) -> &'static str {
            "amplitude"
        }

        fn is_speech(&mut self, frame: &[f32]) -> Result<bool> {
            Ok(rms(frame) > 0.1)
        }
    }

    fn loud() -> Vec<f32> {
        vec![0.5; VAD_FRAME_SAMPLES]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; VAD_FRAME_SAMPLES]
    }

    fn test_segmenter(
        cfg: SegmenterConfig,
        queue: Arc<SegmentQueue>,
    ) -> AudioSegmenter<impl Consumer<Item = f32> + Send> {
        let (_prod, cons) = HeapRb::<f32>::new(VAD_FRAME_SAMPLES).split();
        AudioSegmenter::new(
            cons,
            PIPELINE_SAMPLE_RATE,
            cfg,
            Box::new(AmplitudeVad),
            None,
            queue,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
    }

    #[test]
    fn speech_then_silence_emits_one_segment() {
        let queue = Arc::new(SegmentQueue::new(4));
        let mut seg = test_segmenter(SegmenterConfig::default(), Arc::clone(&queue));

        for _ in 0..5 {
            seg.process_frame(&quiet());
        }
        for _ in 0..12 {
            seg.process_frame(&loud());
        }
        // 800 ms silence timeout = 25 frames of 32 ms
        for _ in 0..25 {
            seg.process_frame(&quiet());
        }

        let segment = queue.try_recv().expect("segment emitted");
        assert!(queue.try_recv().is_none());

        // padding (5 quiet + triggering frame) + 11 loud + 25 silence
        assert_eq!(segment.samples.len(), (6 + 11 + 25) * VAD_FRAME_SAMPLES);
        assert_eq!(segment.sample_rate, PIPELINE_SAMPLE_RATE);
    }

    #[test]
    fn short_blip_is_discarded() {
        let queue = Arc::new(SegmentQueue::new(4));
        let mut seg = test_segmenter(SegmenterConfig::default(), Arc::clone(&queue));

        for _ in 0..2 {
            seg.process_frame(&loud());
        }
        for _ in 0..25 {
            seg.process_frame(&quiet());
        }

        assert!(queue.try_recv().is_none());
        assert_eq!(seg.metrics.discarded_short, 1);
    }

    #[test]
    fn phrase_time_limit_truncates_but_emits() {
        let cfg = SegmenterConfig {
            phrase_time_limit: Some(Duration::from_secs(1)),
            ..SegmenterConfig::default()
        };
        let queue = Arc::new(SegmentQueue::new(4));
        let mut seg = test_segmenter(cfg, Arc::clone(&queue));

        // Speak well past the one-second limit without pausing
        for _ in 0..40 {
            seg.process_frame(&loud());
        }

        let segment = queue.try_recv().expect("truncated segment emitted");
        assert!(segment.duration() >= Duration::from_secs(1));
        assert_eq!(seg.metrics.truncated, 1);

        // The overflow speech keeps accumulating as a fresh segment
        assert_eq!(seg.state, SegState::Speaking);
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let queue = SegmentQueue::new(2);
        for len in [1usize, 2, 3] {
            queue.push(AudioSegment {
                samples: vec![0.0; len],
                sample_rate: PIPELINE_SAMPLE_RATE,
            });
        }

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_recv().unwrap().samples.len(), 2);
        assert_eq!(queue.try_recv().unwrap().samples.len(), 3);
        assert!(queue.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let queue = Arc::new(SegmentQueue::new(2));
        queue.push(AudioSegment {
            samples: vec![0.0; 8],
            sample_rate: PIPELINE_SAMPLE_RATE,
        });
        queue.close();

        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }
}

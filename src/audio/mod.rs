//! Audio subsystem
//!
//! Capture and playback use distinct devices and run on their own
//! threads (cpal streams aren't `Send`); everything they share with
//! the async side goes through rings and queues.

mod capture;
mod playback;
mod segmenter;
mod vad;

pub use capture::{AudioCapture, PIPELINE_SAMPLE_RATE, list_capture_devices, samples_to_wav};
pub use playback::{AudioSink, CpalSink, PlaybackController};
pub use segmenter::{AudioSegment, AudioSegmenter, SegmentQueue, SegmenterConfig};
pub use vad::{EnergyVad, SileroVad, VAD_FRAME_SAMPLES, VadStrategy, spawn_model_acquisition};

//! Overhear - always-on voice command pipeline for robot control modules
//!
//! Continuously samples microphone audio, segments speech with a VAD
//! strategy, transcribes segments, matches transcripts against
//! configurable trigger phrases, and dispatches to one of three
//! actions: speak back, complete-and-speak, or buffer the command for
//! later retrieval.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ capture thread: cpal ──▶ ring ──▶ VAD segmenter      │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ bounded segment queue
//! ┌──────────────────────────▼───────────────────────────┐
//! │ dispatch task: STT ──▶ wake word match ──▶ action    │
//! │            Say │ Completion (+cache) │ Command       │
//! └──────┬────────────────────┬──────────────────────────┘
//!        │                    │
//! ┌──────▼────────┐   ┌───────▼────────┐
//! │ playback       │   │ command buffer │
//! │ worker thread  │   │ (bounded FIFO) │
//! └────────────────┘   └────────────────┘
//! ```
//!
//! Capture and playback use distinct devices and never block each
//! other; all trigger state lives behind one mutex in
//! [`listen::SharedListenState`].

pub mod audio;
pub mod completion;
pub mod config;
pub mod error;
pub mod listen;
pub mod providers;
pub mod service;

pub use config::{Config, ListenConfig};
pub use error::{Error, Result};
pub use listen::{CommandBuffer, TriggerKind, WakeWordMatcher};
pub use providers::{Transcript, TranscriptAlternative};
pub use service::SpeechService;

//! Shared test doubles for pipeline tests without audio hardware

#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, atomic::Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use overhear::Result;
use overhear::audio::AudioSink;
use overhear::providers::{CompletionProvider, SpeechProvider};

/// Sink that records play calls and "plays" one millisecond per byte
pub struct RecordingSink {
    pub plays: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let plays = Arc::new(AtomicUsize::new(0));
        (
            Self {
                plays: Arc::clone(&plays),
            },
            plays,
        )
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, audio: &[u8], cancelled: &(dyn Fn() -> bool + Send + Sync)) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_millis(audio.len() as u64);
        while Instant::now() < deadline {
            if cancelled() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

/// TTS double that records every synthesized text
pub struct RecordingTts {
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingTts {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                spoken: Arc::clone(&spoken),
            }),
            spoken,
        )
    }
}

#[async_trait]
impl SpeechProvider for RecordingTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(text.as_bytes().to_vec())
    }
}

/// Completion double that records prompts and echoes them back
pub struct EchoCompletion {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl EchoCompletion {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                prompts: Arc::clone(&prompts),
            }),
            prompts,
        )
    }
}

#[async_trait]
impl CompletionProvider for EchoCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(format!("echo {prompt}"))
    }
}

/// Completion double that always fails
pub struct FailingCompletion;

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(overhear::Error::CompletionUnavailable(
            "scripted failure".to_string(),
        ))
    }
}

/// Poll until `cond` holds or a timeout expires
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

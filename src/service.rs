//! Service wiring and boundary operations
//!
//! [`SpeechService`] owns the whole pipeline: capture thread →
//! segmenter → bounded segment queue → dispatch task → actions. The
//! surrounding API transport calls the public methods here; they are
//! deliberately transport-agnostic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ringbuf::HeapRb;
use ringbuf::traits::Split;

use crate::audio::{
    AudioCapture, AudioSegmenter, AudioSink, CpalSink, EnergyVad, PlaybackController,
    SegmentQueue, SegmenterConfig, list_capture_devices, spawn_model_acquisition,
};
use crate::completion::CompletionEngine;
use crate::config::{AudioConfig, Config, ListenConfig, SttProviderKind, TtsProviderKind, VadKind};
use crate::listen::{CommandBuffer, SharedListenState, TriggerDispatcher, TriggerKind};
use crate::providers::{
    ChatCompletion, CompletionProvider, SpeechProvider, SpeechToText, TextToSpeech,
    TranscriptionClient,
};
use crate::{Error, Result};

/// Capture ring size in samples (~5 s at 48 kHz device rate)
const CAPTURE_RING_SAMPLES: usize = 256 * 1024;

/// Bounded segment backlog between segmentation and transcription
const SEGMENT_QUEUE_CAPACITY: usize = 8;

/// Completion provider used when no credentials are configured
struct UnconfiguredCompletion;

#[async_trait]
impl CompletionProvider for UnconfiguredCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::CompletionUnavailable(
            "no completion provider configured".to_string(),
        ))
    }
}

/// The always-on voice command service
pub struct SpeechService {
    listen_cfg: Mutex<ListenConfig>,
    audio_cfg: AudioConfig,
    state: SharedListenState,
    commands: Arc<CommandBuffer>,
    playback: Option<Arc<PlaybackController>>,
    completion: Arc<CompletionEngine>,
    stt: Option<Arc<dyn TranscriptionClient>>,
    dispatcher: Arc<TriggerDispatcher>,
    queue: Arc<SegmentQueue>,
    listen_stop: Mutex<Option<Arc<AtomicBool>>>,
    listening: AtomicBool,
    started: AtomicBool,
}

impl SpeechService {
    /// Build the service with concrete providers selected by `config`
    ///
    /// A failed provider or output-device setup disables that subsystem
    /// with a warning instead of failing the whole service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] only for invalid listen configuration.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        config.listen.validate()?;

        let stt: Option<Arc<dyn TranscriptionClient>> = match build_stt(&config) {
            Ok(stt) => Some(stt),
            Err(e) => {
                tracing::warn!(error = %e, "STT unavailable, listening disabled");
                None
            }
        };

        let tts: Option<Arc<dyn SpeechProvider>> = match build_tts(&config) {
            Ok(tts) => Some(tts),
            Err(e) => {
                tracing::warn!(error = %e, "TTS unavailable, playback disabled");
                None
            }
        };

        let llm: Arc<dyn CompletionProvider> = match ChatCompletion::new(
            config.providers.openai_api_key.clone().unwrap_or_default(),
            config.providers.completion_model.clone(),
        ) {
            Ok(llm) => Arc::new(llm),
            Err(e) => {
                tracing::warn!(error = %e, "completion provider unconfigured");
                Arc::new(UnconfiguredCompletion)
            }
        };

        let sink: Option<Box<dyn AudioSink>> = if config.audio.disable_audio_out {
            tracing::info!("audio output disabled by configuration");
            None
        } else {
            match CpalSink::new() {
                Ok(sink) => Some(Box::new(sink)),
                Err(e) => {
                    tracing::warn!(error = %e, "audio output unavailable, playback disabled");
                    None
                }
            }
        };

        Ok(Self::new(config, stt, tts, llm, sink))
    }

    /// Build the service from injected collaborators
    #[must_use]
    pub fn new(
        config: Config,
        stt: Option<Arc<dyn TranscriptionClient>>,
        tts: Option<Arc<dyn SpeechProvider>>,
        llm: Arc<dyn CompletionProvider>,
        sink: Option<Box<dyn AudioSink>>,
    ) -> Arc<Self> {
        let listen = config.listen;
        let state = SharedListenState::new(listen.background_enabled, listen.one_shot_timeout);
        let commands = Arc::new(CommandBuffer::new(listen.command_buffer_length));
        let completion = Arc::new(CompletionEngine::new(llm, &listen));

        let playback = match (tts, sink) {
            (Some(tts), Some(sink)) => Some(Arc::new(PlaybackController::new(tts, sink))),
            _ => None,
        };

        let dispatcher = Arc::new(TriggerDispatcher::new(
            state.clone(),
            Arc::clone(&commands),
            playback.clone(),
            Arc::clone(&completion),
            &listen,
        ));

        Arc::new(Self {
            listen_cfg: Mutex::new(listen),
            audio_cfg: config.audio,
            state,
            commands,
            playback,
            completion,
            stt,
            dispatcher,
            queue: Arc::new(SegmentQueue::new(SEGMENT_QUEUE_CAPACITY)),
            listen_stop: Mutex::new(None),
            listening: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    /// Start the dispatch loop and, when possible, the capture pipeline
    ///
    /// Idempotent. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.spawn_dispatch_loop();

        if self.audio_cfg.disable_mic {
            tracing::info!("microphone disabled by configuration, listening unavailable");
            return;
        }
        if self.stt.is_none() {
            tracing::warn!("no transcription provider, listening unavailable");
            return;
        }

        self.start_listening();
    }

    /// (Re)start the capture and segmentation pipeline
    ///
    /// Stops any running pipeline first, so a reconfigured device or
    /// phrase time limit takes effect on a fresh segment sequence.
    pub fn start_listening(&self) {
        self.stop_listening();

        let devices = list_capture_devices();
        tracing::info!(devices = ?devices, "available capture devices");

        let (vad_tx, vad_rx) = std::sync::mpsc::channel();
        if self.audio_cfg.vad.kind == VadKind::Silero {
            spawn_model_acquisition(self.audio_cfg.vad.clone(), vad_tx);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let queue = Arc::clone(&self.queue);
        let thread_stop = Arc::clone(&stop);
        let mic_device = self.audio_cfg.mic_device.clone();
        let seg_cfg = SegmenterConfig {
            phrase_time_limit: self.audio_cfg.phrase_time_limit,
            ..SegmenterConfig::default()
        };

        let spawned = std::thread::Builder::new()
            .name("overhear-listen".to_string())
            .spawn(move || {
                let ring = HeapRb::<f32>::new(CAPTURE_RING_SAMPLES);
                let (producer, consumer) = ring.split();

                let capture = match AudioCapture::open(mic_device.as_deref(), producer) {
                    Ok(capture) => capture,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let segmenter = match AudioSegmenter::new(
                    consumer,
                    capture.sample_rate(),
                    seg_cfg,
                    Box::new(EnergyVad::new()),
                    Some(vad_rx),
                    queue,
                    thread_stop,
                ) {
                    Ok(segmenter) => segmenter,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));
                segmenter.run();
                drop(capture);
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn listen thread");
            return;
        }

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.lock_stop() = Some(stop);
                self.listening.store(true, Ordering::SeqCst);
                tracing::info!("listening started");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "listening unavailable");
                self.listening.store(false, Ordering::SeqCst);
            }
            Err(_) => {
                tracing::warn!("listen thread exited before startup completed");
                self.listening.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop the capture pipeline; playback and the API stay up
    pub fn stop_listening(&self) {
        if let Some(stop) = self.lock_stop().take() {
            stop.store(true, Ordering::SeqCst);
            self.listening.store(false, Ordering::SeqCst);
            tracing::info!("listening stopped");
        }
    }

    /// Stop everything for process shutdown
    pub fn shutdown(&self) {
        self.stop_listening();
        self.queue.close();
        if let Some(playback) = &self.playback {
            playback.stop();
        }
    }

    /// Whether the capture pipeline is running
    #[must_use]
    pub fn listening_available(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Speak `text` on the output device, echoing it back
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] without audio output, or a
    /// provider error when synthesis fails.
    pub async fn say(&self, text: &str, blocking: bool) -> Result<String> {
        self.playback()?.speak(text, blocking).await?;
        Ok(text.to_string())
    }

    /// Request a completion for `text`, speak it, and return it
    ///
    /// # Errors
    ///
    /// Returns [`Error::CompletionUnavailable`] or playback errors.
    pub async fn completion(&self, text: &str, blocking: bool) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("no text provided".to_string()));
        }

        let playback = self.playback()?;
        let reply = self.completion.respond(text).await?;
        playback.speak(&reply, blocking).await?;
        Ok(reply)
    }

    /// Drain up to `n` buffered commands, oldest first
    #[must_use]
    pub fn get_commands(&self, n: usize) -> Vec<String> {
        self.commands.drain(n)
    }

    /// Arm a one-shot trigger for the next spoken phrase
    pub fn listen_trigger(&self, kind: TriggerKind) {
        self.state.arm(kind);
    }

    /// Whether an utterance is currently playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.is_speaking())
    }

    /// Halt any in-progress playback and discard queued utterances
    pub fn stop_playback(&self) {
        if let Some(playback) = &self.playback {
            playback.stop();
        }
    }

    /// Apply a new listen configuration
    ///
    /// Validation failures leave the previous configuration active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the invalid field.
    pub fn reconfigure(&self, cfg: ListenConfig) -> Result<()> {
        cfg.validate()?;

        self.dispatcher.apply_config(&cfg);
        self.completion.apply_config(&cfg);
        self.state
            .reconfigure(cfg.background_enabled, cfg.one_shot_timeout);
        *self.lock_cfg() = cfg;

        tracing::info!("listen configuration updated");
        Ok(())
    }

    fn playback(&self) -> Result<&Arc<PlaybackController>> {
        self.playback
            .as_ref()
            .ok_or_else(|| Error::DeviceUnavailable("audio output unavailable".to_string()))
    }

    /// The transcription/dispatch loop: segments in capture order, one
    /// in-flight transcription at a time
    fn spawn_dispatch_loop(self: &Arc<Self>) {
        let queue = Arc::clone(&self.queue);
        let state = self.state.clone();
        let stt = self.stt.clone();
        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            let Some(stt) = stt else { return };

            while let Some(segment) = queue.recv().await {
                if !state.is_active() {
                    tracing::trace!("listening inactive, discarding segment");
                    continue;
                }

                match stt.transcribe(&segment).await {
                    Ok(transcript) => {
                        if transcript.text.trim().is_empty() {
                            tracing::debug!("empty transcript, discarding");
                        } else {
                            tracing::debug!(heard = %transcript.text, "transcribed");
                            dispatcher.dispatch(&transcript);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "transcription failed"),
                }
            }

            tracing::debug!("dispatch loop ended");
        });
    }

    fn lock_cfg(&self) -> std::sync::MutexGuard<'_, ListenConfig> {
        self.listen_cfg
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_stop(&self) -> std::sync::MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.listen_stop
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn build_stt(config: &Config) -> Result<Arc<dyn TranscriptionClient>> {
    let p = &config.providers;
    let stt: Arc<dyn TranscriptionClient> = match p.stt {
        SttProviderKind::Whisper => Arc::new(SpeechToText::new_whisper(
            p.openai_api_key.clone().unwrap_or_default(),
            p.stt_model.clone(),
        )?),
        SttProviderKind::Deepgram => Arc::new(SpeechToText::new_deepgram(
            p.deepgram_api_key.clone().unwrap_or_default(),
            p.stt_model.clone(),
        )?),
    };
    Ok(stt)
}

fn build_tts(config: &Config) -> Result<Arc<dyn SpeechProvider>> {
    let p = &config.providers;
    let tts: Arc<dyn SpeechProvider> = match p.tts {
        TtsProviderKind::OpenAi => Arc::new(TextToSpeech::new_openai(
            p.openai_api_key.clone().unwrap_or_default(),
            p.tts_voice.clone(),
            p.tts_speed,
            p.tts_model.clone(),
        )?),
        TtsProviderKind::ElevenLabs => Arc::new(TextToSpeech::new_elevenlabs(
            p.elevenlabs_api_key.clone().unwrap_or_default(),
            p.tts_voice.clone(),
            p.tts_model.clone(),
        )?),
    };
    Ok(tts)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::audio::{AudioSegment, PIPELINE_SAMPLE_RATE};
    use crate::config::{ProviderConfig, VadConfig};
    use crate::providers::Transcript;

    use super::*;

    /// STT that replays a scripted transcript per segment
    struct ScriptedStt {
        lines: Vec<&'static str>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl TranscriptionClient for ScriptedStt {
        async fn transcribe(&self, _segment: &AudioSegment) -> Result<Transcript> {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(Transcript::plain(
                self.lines.get(i).copied().unwrap_or_default(),
            ))
        }
    }

    fn test_config(buffer_len: usize) -> Config {
        Config {
            listen: ListenConfig {
                background_enabled: true,
                command_buffer_length: buffer_len,
                ..ListenConfig::default()
            },
            audio: AudioConfig {
                mic_device: None,
                disable_mic: true,
                disable_audio_out: true,
                phrase_time_limit: None,
                vad: VadConfig {
                    kind: VadKind::Energy,
                    model_url: String::new(),
                    model_sha256: None,
                },
            },
            providers: ProviderConfig {
                stt: SttProviderKind::Whisper,
                stt_model: "whisper-1".to_string(),
                tts: TtsProviderKind::OpenAi,
                tts_model: "tts-1".to_string(),
                tts_voice: "alloy".to_string(),
                tts_speed: 1.0,
                completion_model: "gpt-4o".to_string(),
                openai_api_key: None,
                deepgram_api_key: None,
                elevenlabs_api_key: None,
            },
        }
    }

    fn segment() -> AudioSegment {
        AudioSegment {
            samples: vec![0.0; PIPELINE_SAMPLE_RATE as usize],
            sample_rate: PIPELINE_SAMPLE_RATE,
        }
    }

    #[tokio::test]
    async fn pipeline_buffers_commands_in_spoken_order() {
        let stt = Arc::new(ScriptedStt {
            lines: vec![
                "robot can you open the door",
                "robot can you close the door",
                "robot can you water the plants",
            ],
            next: AtomicUsize::new(0),
        });

        let service = SpeechService::new(
            test_config(2),
            Some(Arc::clone(&stt) as Arc<dyn TranscriptionClient>),
            None,
            Arc::new(UnconfiguredCompletion),
            None,
        );
        service.start();

        for _ in 0..3 {
            service.queue.push(segment());
        }

        // Wait for all three segments to flow through dispatch
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if stt.next.load(Ordering::SeqCst) == 3 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Capacity 2: the oldest command was evicted, FIFO retrieval
        assert_eq!(
            service.get_commands(2),
            vec!["close the door", "water the plants"]
        );
        service.shutdown();
    }

    #[tokio::test]
    async fn say_without_output_reports_device_unavailable() {
        let service = SpeechService::new(
            test_config(4),
            None,
            None,
            Arc::new(UnconfiguredCompletion),
            None,
        );

        let err = service.say("hello", false).await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn reconfigure_rejects_invalid_and_keeps_previous() {
        let service = SpeechService::new(
            test_config(4),
            None,
            None,
            Arc::new(UnconfiguredCompletion),
            None,
        );

        let bad = ListenConfig {
            fuzzy_threshold: 9,
            ..ListenConfig::default()
        };
        assert!(service.reconfigure(bad).is_err());

        // Previous configuration still active: background matching works
        assert!(service.state.background_enabled());
    }

    #[tokio::test]
    async fn one_shot_trigger_overrides_background_off() {
        let mut config = test_config(4);
        config.listen.background_enabled = false;

        let stt = Arc::new(ScriptedStt {
            lines: vec!["turn the volume down"],
            next: AtomicUsize::new(0),
        });

        let service = SpeechService::new(
            config,
            Some(stt),
            None,
            Arc::new(UnconfiguredCompletion),
            None,
        );
        service.start();

        service.listen_trigger(TriggerKind::Command);
        service.queue.push(segment());

        let mut commands = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            commands = service.get_commands(1);
            if !commands.is_empty() {
                break;
            }
        }

        assert_eq!(commands, vec!["turn the volume down"]);
        assert!(!service.state.has_pending());
        service.shutdown();
    }
}

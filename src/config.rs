//! Configuration for the overhear pipeline
//!
//! Everything is loaded from environment variables with sensible
//! defaults, so the service can run unconfigured against a default
//! microphone and the stock trigger phrases.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Upper bound for the fuzzy edit-distance threshold
pub const MAX_FUZZY_THRESHOLD: u8 = 5;

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening / trigger configuration
    pub listen: ListenConfig,

    /// Capture-side audio configuration
    pub audio: AudioConfig,

    /// External provider selection and credentials
    pub providers: ProviderConfig,
}

/// Listening and trigger-dispatch configuration
///
/// Mutable at runtime through [`crate::SpeechService::reconfigure`];
/// an invalid replacement is rejected and the previous configuration
/// stays active.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Process transcripts continuously without an explicit trigger call
    pub background_enabled: bool,

    /// Phrase that routes the remainder to direct speech output
    pub trigger_say: String,

    /// Phrase that routes the remainder through the completion provider
    pub trigger_completion: String,

    /// Phrase that stores the remainder in the command buffer
    pub trigger_command: String,

    /// Capacity of the command buffer
    pub command_buffer_length: usize,

    /// Enable word-window edit-distance matching
    pub fuzzy_matching: bool,

    /// Maximum Levenshtein distance for a fuzzy match (0-5)
    pub fuzzy_threshold: u8,

    /// How long an armed one-shot trigger stays pending
    pub one_shot_timeout: Duration,

    /// Persona the completion prompt is wrapped with ("" = none)
    pub persona: String,

    /// Refresh cached completions in the background after each use
    pub cache_ahead_completions: bool,
}

/// Capture-side audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture device name; `None` picks the first available device
    pub mic_device: Option<String>,

    /// Disable the microphone entirely (listening reported unavailable)
    pub disable_mic: bool,

    /// Disable audio output entirely (say/completion fail with DeviceUnavailable)
    pub disable_audio_out: bool,

    /// Force-cut a speech segment after this duration
    pub phrase_time_limit: Option<Duration>,

    /// VAD strategy selection
    pub vad: VadConfig,
}

/// VAD strategy selection and enhanced-model acquisition parameters
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Which strategy to run
    pub kind: VadKind,

    /// Where to fetch the enhanced model from (raw .onnx or a .zip containing one)
    pub model_url: String,

    /// Expected SHA-256 of the model file, hex encoded; skipped when unset
    pub model_sha256: Option<String>,
}

/// Available VAD strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadKind {
    /// RMS energy threshold with ambient calibration
    Energy,
    /// Silero ONNX model; falls back to energy on any acquisition failure
    Silero,
}

/// STT provider backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProviderKind {
    Whisper,
    Deepgram,
}

/// TTS provider backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProviderKind {
    OpenAi,
    ElevenLabs,
}

/// External provider selection and credentials
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub stt: SttProviderKind,
    pub stt_model: String,
    pub tts: TtsProviderKind,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    pub completion_model: String,
    pub openai_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
}

/// Default URL for the Silero VAD model
const DEFAULT_VAD_MODEL_URL: &str =
    "https://github.com/snakers4/silero-vad/raw/v4.0/files/silero_vad.onnx";

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an unparseable value: {raw}"))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a value fails to parse or the
    /// listen configuration fails validation.
    pub fn load() -> Result<Self> {
        let listen = ListenConfig {
            background_enabled: env_bool("OVERHEAR_LISTEN"),
            trigger_say: env_string("OVERHEAR_TRIGGER_SAY", "robot say"),
            trigger_completion: env_string("OVERHEAR_TRIGGER_COMPLETION", "hey robot"),
            trigger_command: env_string("OVERHEAR_TRIGGER_COMMAND", "robot can you"),
            command_buffer_length: env_parse("OVERHEAR_COMMAND_BUFFER_LENGTH")?.unwrap_or(10),
            fuzzy_matching: env_bool("OVERHEAR_FUZZY_MATCHING"),
            fuzzy_threshold: env_parse("OVERHEAR_FUZZY_THRESHOLD")?.unwrap_or(2),
            one_shot_timeout: Duration::from_secs(
                env_parse("OVERHEAR_ONE_SHOT_TIMEOUT")?.unwrap_or(30),
            ),
            persona: env_string("OVERHEAR_PERSONA", ""),
            cache_ahead_completions: env_bool("OVERHEAR_CACHE_AHEAD"),
        };
        listen.validate()?;

        let vad_kind = match env_string("OVERHEAR_VAD", "energy").as_str() {
            "energy" => VadKind::Energy,
            "silero" => VadKind::Silero,
            other => {
                return Err(Error::Config(format!("unknown vad strategy: {other}")));
            }
        };

        let audio = AudioConfig {
            mic_device: std::env::var("OVERHEAR_MIC_DEVICE").ok(),
            disable_mic: env_bool("OVERHEAR_DISABLE_MIC"),
            disable_audio_out: env_bool("OVERHEAR_DISABLE_AUDIO_OUT"),
            phrase_time_limit: env_parse::<u64>("OVERHEAR_PHRASE_TIME_LIMIT")?
                .map(Duration::from_secs),
            vad: VadConfig {
                kind: vad_kind,
                model_url: env_string("OVERHEAR_VAD_MODEL_URL", DEFAULT_VAD_MODEL_URL),
                model_sha256: std::env::var("OVERHEAR_VAD_MODEL_SHA256").ok(),
            },
        };

        let stt = match env_string("OVERHEAR_STT_PROVIDER", "whisper").as_str() {
            "whisper" => SttProviderKind::Whisper,
            "deepgram" => SttProviderKind::Deepgram,
            other => {
                return Err(Error::Config(format!("unknown stt provider: {other}")));
            }
        };
        let tts = match env_string("OVERHEAR_TTS_PROVIDER", "openai").as_str() {
            "openai" => TtsProviderKind::OpenAi,
            "elevenlabs" => TtsProviderKind::ElevenLabs,
            other => {
                return Err(Error::Config(format!("unknown tts provider: {other}")));
            }
        };

        let stt_model_default = match stt {
            SttProviderKind::Whisper => "whisper-1",
            SttProviderKind::Deepgram => "nova-2",
        };
        let tts_model_default = match tts {
            TtsProviderKind::OpenAi => "tts-1",
            TtsProviderKind::ElevenLabs => "eleven_monolingual_v1",
        };

        let providers = ProviderConfig {
            stt,
            stt_model: env_string("OVERHEAR_STT_MODEL", stt_model_default),
            tts,
            tts_model: env_string("OVERHEAR_TTS_MODEL", tts_model_default),
            tts_voice: env_string("OVERHEAR_TTS_VOICE", "alloy"),
            tts_speed: env_parse("OVERHEAR_TTS_SPEED")?.unwrap_or(1.0),
            completion_model: env_string("OVERHEAR_COMPLETION_MODEL", "gpt-4o"),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            deepgram_api_key: std::env::var("DEEPGRAM_API_KEY").ok(),
            elevenlabs_api_key: std::env::var("ELEVENLABS_API_KEY").ok(),
        };

        Ok(Self {
            listen,
            audio,
            providers,
        })
    }
}

impl ListenConfig {
    /// Validate trigger phrases and matcher bounds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        for (name, phrase) in [
            ("trigger_say", &self.trigger_say),
            ("trigger_completion", &self.trigger_completion),
            ("trigger_command", &self.trigger_command),
        ] {
            if phrase.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }

        if self.fuzzy_threshold > MAX_FUZZY_THRESHOLD {
            return Err(Error::Config(format!(
                "fuzzy_threshold {} out of range 0-{MAX_FUZZY_THRESHOLD}",
                self.fuzzy_threshold
            )));
        }

        if self.command_buffer_length == 0 {
            return Err(Error::Config(
                "command_buffer_length must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            background_enabled: false,
            trigger_say: "robot say".to_string(),
            trigger_completion: "hey robot".to_string(),
            trigger_command: "robot can you".to_string(),
            command_buffer_length: 10,
            fuzzy_matching: false,
            fuzzy_threshold: 2,
            one_shot_timeout: Duration::from_secs(30),
            persona: String::new(),
            cache_ahead_completions: false,
        }
    }
}

/// Return the on-disk cache directory for VAD model files, creating it if needed
///
/// Uses `~/.cache/overhear/models/` on Linux
pub fn model_cache_dir() -> PathBuf {
    let cache_dir = directories::ProjectDirs::from("dev", "overhear", "overhear").map_or_else(
        || PathBuf::from(".cache/overhear/models"),
        |d| d.cache_dir().join("models"),
    );

    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        tracing::warn!(
            path = %cache_dir.display(),
            error = %e,
            "failed to create model cache directory"
        );
    }

    cache_dir
}

//! Provider client tests against a mock HTTP server

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use overhear::Error;
use overhear::audio::{AudioSegment, PIPELINE_SAMPLE_RATE};
use overhear::providers::{
    ChatCompletion, CompletionProvider, SpeechProvider, SpeechToText, TextToSpeech,
    TranscriptionClient,
};

fn segment() -> AudioSegment {
    AudioSegment {
        samples: vec![0.0; PIPELINE_SAMPLE_RATE as usize / 10],
        sample_rate: PIPELINE_SAMPLE_RATE,
    }
}

#[tokio::test]
async fn whisper_parses_single_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": " hey robot open the door "
        })))
        .mount(&server)
        .await;

    let stt = SpeechToText::new_whisper("key".to_string(), "whisper-1".to_string())
        .unwrap()
        .with_base_url(server.uri());

    let transcript = stt.transcribe(&segment()).await.unwrap();
    assert_eq!(transcript.text, "hey robot open the door");
    assert!(transcript.alternatives.is_empty());
}

#[tokio::test]
async fn whisper_failure_maps_to_transcription_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let stt = SpeechToText::new_whisper("key".to_string(), "whisper-1".to_string())
        .unwrap()
        .with_base_url(server.uri());

    let err = stt.transcribe(&segment()).await.unwrap_err();
    assert!(matches!(err, Error::TranscriptionUnavailable(_)));
}

#[tokio::test]
async fn deepgram_parses_ranked_alternatives() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/listen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {
                "channels": [{
                    "alternatives": [
                        {"transcript": "hey robot turn left", "confidence": 0.98},
                        {"transcript": "hey robots turn left", "confidence": 0.81},
                        {"transcript": "hay robot turn left", "confidence": 0.64}
                    ]
                }]
            }
        })))
        .mount(&server)
        .await;

    let stt = SpeechToText::new_deepgram("key".to_string(), "nova-2".to_string())
        .unwrap()
        .with_base_url(server.uri());

    let transcript = stt.transcribe(&segment()).await.unwrap();
    assert_eq!(transcript.text, "hey robot turn left");
    assert_eq!(transcript.alternatives.len(), 2);
    assert_eq!(transcript.alternatives[0].text, "hey robots turn left");
    assert!((transcript.alternatives[0].confidence - 0.81).abs() < 1e-6);
}

#[tokio::test]
async fn openai_tts_returns_audio_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .mount(&server)
        .await;

    let tts = TextToSpeech::new_openai(
        "key".to_string(),
        "alloy".to_string(),
        1.0,
        "tts-1".to_string(),
    )
    .unwrap()
    .with_base_url(server.uri());

    assert_eq!(tts.synthesize("hello").await.unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn elevenlabs_tts_uses_voice_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-a"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8, 9]))
        .mount(&server)
        .await;

    let tts = TextToSpeech::new_elevenlabs(
        "key".to_string(),
        "voice-a".to_string(),
        "eleven_monolingual_v1".to_string(),
    )
    .unwrap()
    .with_base_url(server.uri());

    assert_eq!(tts.synthesize("hello").await.unwrap(), vec![9, 9]);
}

#[tokio::test]
async fn tts_failure_maps_to_synthesis_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let tts = TextToSpeech::new_openai(
        "key".to_string(),
        "alloy".to_string(),
        1.0,
        "tts-1".to_string(),
    )
    .unwrap()
    .with_base_url(server.uri());

    let err = tts.synthesize("hello").await.unwrap_err();
    assert!(matches!(err, Error::SynthesisUnavailable(_)));
}

#[tokio::test]
async fn chat_completion_extracts_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "It is five o'clock."}}]
        })))
        .mount(&server)
        .await;

    let llm = ChatCompletion::new("key".to_string(), "gpt-4o".to_string())
        .unwrap()
        .with_base_url(server.uri());

    assert_eq!(
        llm.complete("what time is it").await.unwrap(),
        "It is five o'clock."
    );
}

#[tokio::test]
async fn completion_failure_maps_to_completion_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let llm = ChatCompletion::new("key".to_string(), "gpt-4o".to_string())
        .unwrap()
        .with_base_url(server.uri());

    let err = llm.complete("hello").await.unwrap_err();
    assert!(matches!(err, Error::CompletionUnavailable(_)));
}

#[tokio::test]
async fn missing_api_keys_are_configuration_errors() {
    assert!(matches!(
        ChatCompletion::new(String::new(), "gpt-4o".to_string()),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        TextToSpeech::new_openai(String::new(), "alloy".to_string(), 1.0, "tts-1".to_string()),
        Err(Error::Config(_))
    ));
}

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use overhear::audio::{CpalSink, list_capture_devices};
use overhear::{Config, SpeechService};

/// Overhear - always-on voice command pipeline
#[derive(Parser)]
#[command(name = "overhear", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Synthesize and play a phrase through the configured TTS provider
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List capture devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,overhear=info",
        1 => "info,overhear=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker(),
            Command::Say { text } => say(&text).await,
            Command::Devices => devices(),
        };
    }

    let config = Config::load()?;
    let background = config.listen.background_enabled;
    let trigger = config.listen.trigger_completion.clone();

    let service = SpeechService::from_config(config)?;
    service.start();

    if service.listening_available() {
        if background {
            tracing::info!("overhear ready - say \"{trigger}\"");
        } else {
            tracing::info!("overhear ready (waiting for listen_trigger calls)");
        }
    } else {
        tracing::info!("overhear ready (listening unavailable, playback only)");
    }

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.shutdown();

    Ok(())
}

/// Test microphone input with a live level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    use ringbuf::HeapRb;
    use ringbuf::traits::{Consumer, Split};

    use overhear::audio::AudioCapture;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let ring = HeapRb::<f32>::new(256 * 1024);
    let (producer, mut consumer) = ring.split();

    let capture = AudioCapture::open(None, producer)?;
    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let mut buf = vec![0.0f32; 16384];
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let n = consumer.pop_slice(&mut buf);
        let samples = &buf[..n];
        let energy = calculate_rms(samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new()?;

    // Generate 2 seconds of 440Hz sine wave at the playback rate
    let sample_rate = 24000_f32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples...", samples.len());
    sink.play_samples(samples, &|| false)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Synthesize and play text through the configured providers
async fn say(text: &str) -> anyhow::Result<()> {
    println!("Saying: \"{text}\"\n");

    let config = Config::load()?;
    let service = SpeechService::from_config(config)?;

    let spoken = service.say(text, true).await?;
    println!("Spoke: {spoken}");

    Ok(())
}

/// List capture devices
fn devices() -> anyhow::Result<()> {
    let devices = list_capture_devices();
    if devices.is_empty() {
        println!("No capture devices found");
    } else {
        println!("Capture devices:");
        for name in devices {
            println!("  {name}");
        }
    }
    Ok(())
}

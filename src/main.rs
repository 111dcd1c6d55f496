use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use magi::assistant::{
    ConversationSession, IdRegistry, OpenAiAssistants, ToolRegistry, WeatherTool,
};
use magi::voice::{
    AudioClip, AudioSource, CpalSink, FrameSource, Microphone, PlaybackService, RecordingStore,
    SpeechCapture, SpeechToText, SttProvider, Synthesizer, TextToSpeech, TtsProvider,
    WakeControl, WakeEvent, listen,
};
use magi::{CommandRouter, Config, RouterSettings, ShutdownSignal, WakeMode};

/// Magi - wake-word voice assistant
#[derive(Parser)]
#[command(name = "magi", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory holding the feedback cue sounds
    #[arg(long, env = "MAGI_SOUNDS_DIR")]
    sounds_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Delete remote threads and assistants left by an earlier run, then exit
    Cleanup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,magi=info",
        1 => "info,magi=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
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
    let mut config = Config::load();
    if let Some(dir) = cli.sounds_dir {
        config.sounds_dir = dir;
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Cleanup => cleanup(&config).await,
        };
    }

    run_assistant(config).await
}

/// Wire every component together and run until shutdown
async fn run_assistant(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(keyword = %config.wake_word.keyword, "starting magi");

    let shutdown = ShutdownSignal::new();
    shutdown.install_signal_handlers();

    let conversation = build_conversation(&config, shutdown.clone())?;

    let transcriber = Arc::new(build_stt(&config)?);
    let recordings = RecordingStore::new(config.recordings_dir())?;
    let capture = SpeechCapture::new(
        Box::new(Microphone::new()?),
        transcriber,
        config.listen_settings(),
        shutdown.clone(),
    )
    .with_recordings(recordings);

    let synthesizer = Arc::new(build_tts(&config)?);
    let playback = PlaybackService::new(Arc::new(CpalSink::new()?))?;

    let (wake_tx, wake_rx) = mpsc::channel(1);
    let mut router = CommandRouter::new(
        wake_rx,
        capture,
        conversation,
        synthesizer,
        playback,
        RouterSettings {
            sounds_dir: config.sounds_dir.clone(),
            command_timeout_secs: config.listen.command_timeout_secs,
            wake_mode: wake_mode(&config),
        },
        shutdown.clone(),
    );

    match start_components(&mut router, &config, wake_tx, &shutdown).await {
        Ok(true) => {}
        Ok(false) => {
            router.shutdown().await;
            return Ok(());
        }
        Err(e) => {
            router.shutdown().await;
            return Err(e.into());
        }
    }

    tracing::info!("magi ready - say \"{}\"", config.wake_word.keyword);
    router.run().await;

    Ok(())
}

/// Open the session, calibrate, then start listening for the wake word
///
/// Returns `false` if shutdown was requested during startup.
async fn start_components(
    router: &mut CommandRouter,
    config: &Config,
    wake_tx: mpsc::Sender<WakeEvent>,
    shutdown: &ShutdownSignal,
) -> magi::Result<bool> {
    router.open_session(&config.system_prompt()).await?;
    router.calibrate(config.listen.calibration_secs).await?;
    if shutdown.is_triggered() {
        return Ok(false);
    }

    if let Some(detector) = start_detector(config, wake_tx).await? {
        router.attach_detector(detector);
    }
    Ok(true)
}

fn build_conversation(
    config: &Config,
    shutdown: ShutdownSignal,
) -> anyhow::Result<ConversationSession> {
    let api = OpenAiAssistants::new(config.api_keys.openai.clone().unwrap_or_default())?;
    let weather = WeatherTool::new(config.api_keys.openweathermap.clone().unwrap_or_default());
    let tools = ToolRegistry::new().with(Arc::new(weather));

    Ok(ConversationSession::new(
        Arc::new(api),
        tools,
        IdRegistry::new(config.thread_registry_path()),
        IdRegistry::new(config.assistant_registry_path()),
        config.session_settings(),
        shutdown,
    ))
}

fn build_stt(config: &Config) -> magi::Result<SpeechToText> {
    match config.stt.provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.stt.model.clone(),
        ),
        SttProvider::Deepgram => SpeechToText::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            config.stt.model.clone(),
        ),
    }
}

fn build_tts(config: &Config) -> magi::Result<TextToSpeech> {
    match config.tts.provider {
        TtsProvider::Google => TextToSpeech::new_google(
            config.api_keys.google.clone().unwrap_or_default(),
            config.voice_settings(),
        ),
        TtsProvider::OpenAI => TextToSpeech::new_openai(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.voice_settings(),
            config.tts.model.clone(),
        ),
    }
}

#[cfg(feature = "rustpotter")]
fn wake_mode(_config: &Config) -> WakeMode {
    WakeMode::Detector
}

#[cfg(not(feature = "rustpotter"))]
fn wake_mode(config: &Config) -> WakeMode {
    WakeMode::Transcript {
        phrase: config.wake_word.keyword.clone(),
    }
}

#[cfg(feature = "rustpotter")]
async fn start_detector(
    config: &Config,
    wake_tx: mpsc::Sender<WakeEvent>,
) -> magi::Result<Option<Box<dyn WakeControl>>> {
    let classifier = magi::voice::RustpotterClassifier::new(
        &config.wake_word.model_path,
        magi::voice::SAMPLE_RATE,
        config.wake_word.threshold,
    )?;
    let detector = magi::voice::WakeWordDetector::start(
        Box::new(classifier),
        config.wake_word.keyword.clone(),
        wake_tx,
    )
    .await?;
    Ok(Some(Box::new(detector)))
}

#[cfg(not(feature = "rustpotter"))]
#[allow(clippy::unused_async, clippy::unnecessary_wraps)]
async fn start_detector(
    config: &Config,
    _wake_tx: mpsc::Sender<WakeEvent>,
) -> magi::Result<Option<Box<dyn WakeControl>>> {
    tracing::warn!(
        keyword = %config.wake_word.keyword,
        "built without rustpotter, listening for the wake phrase in transcripts"
    );
    Ok(None)
}

/// Sweep the id registries and exit
async fn cleanup(config: &Config) -> anyhow::Result<()> {
    if config.api_keys.openai.is_none() {
        anyhow::bail!("OPENAI_API_KEY is not set");
    }
    let conversation = build_conversation(config, ShutdownSignal::new())?;
    let removed = conversation.reconcile().await?;
    println!("Removed {removed} leftover remote resource(s)");
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = Microphone::new()?;
    mic.start().await?;
    println!("Sample rate: {} Hz", mic.sample_rate());
    println!("---");

    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut second = Vec::new();
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, mic.next_chunk()).await {
                Ok(Some(chunk)) => second.extend(chunk),
                Ok(None) | Err(_) => break,
            }
        }

        // 16-bit scale, shown as a fraction of full scale
        let energy = listen::rms_energy(&second) / 32768.0;
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

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

    mic.stop().await;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let playback = PlaybackService::new(Arc::new(CpalSink::new()?))?;
    playback
        .play_and_wait(AudioSource::Clip(AudioClip::mono(samples, sample_rate)))
        .await;
    playback.shutdown().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = build_tts(config)?;
    println!("Synthesizing speech with {:?}...", tts.provider());
    let audio = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    let playback = PlaybackService::new(Arc::new(CpalSink::new()?))?;
    playback.play_and_wait(AudioSource::Encoded(audio)).await;
    playback.shutdown().await;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing_subscriber::EnvFilter;

use voicegate::config::file::config_file_path;
use voicegate::detect::MAX_AMPLITUDE;
use voicegate::voice::{
    HttpUploader, InputDevicePermission, KeywordWakeEngine, Recorder, RecorderEvent,
    RecordingStore, SpeakerPlayer, SpeechToText, WavRecorder,
};
use voicegate::{
    Collaborators, Config, ConversationOrchestrator, EventBus, MicrophoneArbiter, Signal,
    SignalReceiver, SignalSender, VoiceError, VoiceEvent, VoiceService, input, signal,
};

/// voicegate - wake word and button driven voice front end for a remote assistant
#[derive(Parser)]
#[command(name = "voicegate", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice service (default)
    Run {
        /// Print lifecycle events to stdout as JSON lines
        #[arg(long, env = "VOICEGATE_JSON_EVENTS")]
        json_events: bool,
    },
    /// Test microphone input and the silence gate
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Press Enter repeatedly to exercise the button pattern detector
    TestPattern,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicegate=info",
        1 => "info,voicegate=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
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
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run { json_events: false }) {
        Command::Run { json_events } => run_service(config, json_events).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestPattern => test_pattern(&config).await,
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_service(mut config: Config, json_events: bool) -> anyhow::Result<()> {
    let events = EventBus::new();
    let (signals, inbox) = signal::channel();

    spawn_event_printer(&events, json_events);
    let service = build_service(&mut config, &events, signals.clone(), inbox)?;

    // Set up shutdown signal
    let shutdown = signals.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });
    tokio::spawn(input::forward_stdin(signals, config.monitored_keys.clone()));

    tracing::info!(
        keywords = ?config.wake.keywords,
        assistant = %config.assistant.url,
        "voicegate ready"
    );

    service.run().await?;
    Ok(())
}

fn build_service(
    config: &mut Config,
    events: &EventBus,
    signals: SignalSender,
    inbox: SignalReceiver,
) -> anyhow::Result<VoiceService> {
    let api_key = config
        .wake
        .stt_api_key
        .take()
        .unwrap_or_else(|| SecretString::from(String::new()));
    let stt = SpeechToText::new_whisper(&config.wake.stt_url, api_key, &config.wake.keyword_model)
        .map_err(VoiceError::EngineInitializationFailed)?;

    let on_detect = {
        let signals = signals.clone();
        Arc::new(move || {
            signals.wake_word_detected();
        })
    };
    let engine = KeywordWakeEngine::new(&config.wake.keywords, stt, on_detect)
        .map_err(VoiceError::EngineInitializationFailed)?;

    let recorder = Arc::new(WavRecorder::new(signals.clone()));
    let arbiter = MicrophoneArbiter::new(Box::new(engine), recorder, config.arbiter, events.clone());

    let collaborators = Collaborators {
        uploader: Arc::new(HttpUploader::new(
            &config.assistant,
            config.data_dir.join("replies"),
        )?),
        player: Arc::new(SpeakerPlayer::new()),
        permission: Box::new(InputDevicePermission::new(config.wake.capture_permitted)),
    };

    let orchestrator = ConversationOrchestrator::new(
        arbiter,
        collaborators,
        RecordingStore::new(&config.recording.dir),
        config.recording.format(),
        signals,
        events.clone(),
    );

    Ok(VoiceService::new(
        orchestrator,
        config.detection.silence_gate(),
        config.detection.press_detector(),
        events.clone(),
        inbox,
    ))
}

fn spawn_event_printer(events: &EventBus, json: bool) {
    let mut stream = BroadcastStream::new(events.subscribe());
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                },
                Ok(event) => match &event.event {
                    VoiceEvent::TurnError { message, .. } => {
                        tracing::warn!(event = event.event.name(), "{message}");
                    }
                    VoiceEvent::TranscriptReceived {
                        transcription,
                        response_text,
                        ..
                    } => {
                        tracing::info!(
                            you = transcription.as_deref().unwrap_or_default(),
                            assistant = response_text.as_deref().unwrap_or_default(),
                            "transcript"
                        );
                    }
                    other => tracing::debug!(event = other.name(), "lifecycle event"),
                },
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer lagged");
                }
            }
        }
    });
}

/// Record for `duration` seconds, printing the amplitude meter and silence gate decisions
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone, then stay quiet!\n");

    let (signals, mut rx) = signal::channel();
    let recorder = WavRecorder::new(signals);
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("test-mic.wav");

    let mut gate = config.detection.silence_gate();
    gate.enable();
    recorder.start(&path, config.recording.format())?;

    println!(
        "Threshold: {} | Silence after: {} ms",
        gate.threshold(),
        gate.duration_ms()
    );
    println!("---");

    let epoch = Instant::now();
    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            signal = rx.recv() => match signal {
                Some(Signal::Recorder(RecorderEvent::Progress { elapsed_ms, amplitude })) => {
                    let now = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let silent = gate.check(amplitude, now);
                    let bar = (usize::from(amplitude) * 50 / usize::from(MAX_AMPLITUDE)).min(50);
                    println!(
                        "[{elapsed_ms:>6} ms] {amplitude:>5} [{}{}]{}",
                        "#".repeat(bar),
                        " ".repeat(50 - bar),
                        if silent { "  <- silence detected" } else { "" }
                    );
                }
                Some(Signal::Recorder(RecorderEvent::Failed(e))) => return Err(e.into()),
                Some(_) => {}
                None => break,
            }
        }
    }

    recorder.stop()?;
    while let Some(signal) = rx.recv().await {
        match signal {
            Signal::Recorder(RecorderEvent::Finished {
                duration_ms,
                size_bytes,
                ..
            }) => {
                println!("\n---");
                println!("Recorded {duration_ms} ms ({size_bytes} bytes)");
                break;
            }
            Signal::Recorder(RecorderEvent::Failed(e)) => return Err(e.into()),
            _ => {}
        }
    }

    println!("If the meter moved while you spoke, your mic is working!");
    println!("If it stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Feed Enter presses to the pattern detector
async fn test_pattern(config: &Config) -> anyhow::Result<()> {
    let mut detector = config.detection.press_detector();
    println!(
        "Press Enter {} times within {} ms (boundary: {:?}). Ctrl-D to quit.",
        config.detection.press_count,
        config.detection.press_window_ms,
        detector.boundary()
    );

    let epoch = Instant::now();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while lines.next_line().await?.is_some() {
        let now = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        if detector.add_press(now) {
            println!("[{now:>6} ms] pattern detected!");
        } else {
            println!("[{now:>6} ms] {} pending", detector.pending());
        }
    }

    Ok(())
}

fn show_config(config: &Config) {
    match config_file_path() {
        Some(path) if path.exists() => println!("# config file: {}", path.display()),
        Some(path) => println!("# config file: {} (not present)", path.display()),
        None => println!("# config file: unavailable"),
    }
    println!("{config:#?}");
}

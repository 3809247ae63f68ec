use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use beacon_realtime::audio::{
    self, AudioBackend, AudioPacket, CaptureEncoder, CpalBackend, Enqueued, EndNotifier,
    FrameSink, MuteFlag, PLAYBACK_SAMPLE_RATE, PlaybackScheduler,
};
use beacon_realtime::{Config, SessionController, SessionStatus, WebSocketTransport};

/// Beacon Realtime - duplex voice sessions with a realtime speech model
#[derive(Parser)]
#[command(name = "beacon-realtime", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.config/omni/beacon/realtime.toml)
    #[arg(short, long, env = "BEACON_REALTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Realtime model WebSocket endpoint
    #[arg(long)]
    url: Option<String>,

    /// Voice identity
    #[arg(long)]
    voice: Option<String>,

    /// System instruction for the model
    #[arg(long)]
    instruction: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

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
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_realtime=info",
        1 => "info,beacon_realtime=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(url) = cli.url {
        config.transport.url = url;
    }
    if let Some(voice) = cli.voice {
        config.voice.voice = voice;
    }
    if let Some(instruction) = cli.instruction {
        config.voice.system_instruction = Some(instruction);
    }
    config.validate()?;

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    tracing::info!(
        url = %config.transport.url,
        voice = %config.voice.voice,
        "starting realtime session"
    );
    tracing::debug!(?config, "loaded configuration");

    run_session(&config).await
}

/// Run one live session until the user quits or the channel ends
#[allow(clippy::future_not_send)]
async fn run_session(config: &Config) -> anyhow::Result<()> {
    let transport = WebSocketTransport::new(&config.transport.url)?;
    let mut controller = SessionController::new(
        config.session_settings(),
        Box::new(CpalBackend::new()),
        Box::new(transport),
    );

    if let Err(e) = controller.connect().await {
        if let Some(failure) = e.failure() {
            println!("{}", failure.user_message());
        }
        return Err(e.into());
    }

    println!("Connecting... commands: m = toggle mute, q = quit");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut last_mode = controller.mode();
    println!("[{last_mode}]");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, disconnecting");
                controller.disconnect();
            }

            Some(line) = line_rx.recv() => {
                match line.trim() {
                    "m" | "mute" => {
                        let muted = !controller.is_muted();
                        controller.set_muted(muted);
                        println!("{}", if muted { "Muted" } else { "Unmuted" });
                    }
                    "q" | "quit" => controller.disconnect(),
                    "" => {}
                    other => println!("Unknown command: {other}"),
                }
            }

            Some(event) = controller.next_event() => controller.dispatch(event),
        }

        if controller.mode() != last_mode {
            last_mode = controller.mode();
            println!("[{last_mode}]");
        }

        if !controller.is_active() {
            break;
        }
    }

    match controller.status() {
        SessionStatus::Failed(failure) => {
            println!("{}", failure.user_message());
            anyhow::bail!("session failed: {failure}")
        }
        status => {
            println!("Session {status}");
            Ok(())
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let sink_buffer = Arc::clone(&buffer);
    let sink: FrameSink = Arc::new(move |samples: &[f32]| {
        if let Ok(mut buf) = sink_buffer.lock() {
            buf.extend_from_slice(samples);
        }
    });

    let mut capture = CaptureEncoder::start(&CpalBackend::new(), config.capture, sink)?;

    println!("Sample rate: {} Hz", audio::CAPTURE_SAMPLE_RATE);
    println!("Voice threshold: {:.3}", config.capture.vad_threshold);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let energy = audio::rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let voice = if energy > config.capture.vad_threshold {
            "voice"
        } else {
            "     "
        };

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | {} | [{}]",
            i + 1,
            energy,
            peak,
            voice,
            meter
        );
    }

    capture.detach();
    capture.release();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave split into back-to-back packets
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a steady 440Hz tone for 2 seconds\n");

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let on_ended: EndNotifier = Arc::new(move |id| {
        let _ = ended_tx.send(id);
    });
    let output = CpalBackend::new().open_output(on_ended)?;
    let mut scheduler = PlaybackScheduler::new(output, MuteFlag::new());

    // Generate 2 seconds of 440Hz sine wave at the playback rate
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    // 100ms packets, as a model would stream them
    let chunk = PLAYBACK_SAMPLE_RATE as usize / 10;
    let mut scheduled = 0usize;
    for part in samples.chunks(chunk) {
        let packet = AudioPacket::inbound(audio::codec::encode(part).data());
        if let Enqueued::Scheduled { start_at, .. } = scheduler.enqueue(&packet)? {
            tracing::debug!(start_at, "packet scheduled");
            scheduled += 1;
        }
    }

    println!("Scheduled {scheduled} packets at {PLAYBACK_SAMPLE_RATE} Hz...");

    let wait = tokio::time::timeout(Duration::from_secs(4), async {
        let mut finished = 0usize;
        while let Some(id) = ended_rx.recv().await {
            finished += 1;
            if scheduler.on_ended(id) {
                break;
            }
        }
        finished
    })
    .await;

    scheduler.close();

    match wait {
        Ok(finished) => println!("Played {finished} packets"),
        Err(_) => println!("Timed out waiting for playback to finish"),
    }

    println!("\n---");
    println!("If you heard one continuous tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

//! lockstep - master tempo and phase sync
//!
//! Runs a sync session on the default audio output (or a simulated one)
//! and takes line commands on stdin.

mod deck;
mod session;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lockstep_control::{ControlKey, Item, Origin};
use lockstep_input::{parse_command, Command};
use lockstep_sync::SyncConfig;
use session::Session;

/// Block size of the simulated output, in frames
const OFFLINE_BLOCK_FRAMES: usize = 512;

/// Channel count of the simulated output
const OFFLINE_CHANNELS: usize = 2;

/// How long the input loop waits for a command to be applied
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(version, about = "Master tempo and phase sync for multi-deck mixing")]
struct Args {
    /// Number of decks to start with
    #[arg(short, long, default_value_t = 2)]
    decks: u8,

    /// Starting master tempo (overrides the config file)
    #[arg(short, long)]
    bpm: Option<f64>,

    /// Run without an audio device
    #[arg(long)]
    offline: bool,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Result of a command applied on the audio thread
#[derive(Debug)]
enum AudioEvent {
    Reply(Option<String>),
    Error(String),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SyncConfig::load_from(path).unwrap_or_else(|e| {
            info!(path = %path.display(), %e, "using default config");
            SyncConfig::default()
        }),
        None => SyncConfig::load(),
    };
    if let Some(bpm) = args.bpm {
        anyhow::ensure!(bpm > 0.0 && bpm.is_finite(), "Invalid tempo: {}", bpm);
        config.default_bpm = bpm;
    }

    let mut session = Session::new(&config, args.decks)?;
    if let Some(group) = config.last_master {
        session.restore_master(group);
    }
    let session = Arc::new(Mutex::new(session));

    let (cmd_tx, cmd_rx) = bounded(1024);
    let (evt_tx, evt_rx) = bounded(1024);
    let shutdown = Arc::new(AtomicBool::new(false));

    // Spawn audio thread
    let audio_handle = {
        let session = Arc::clone(&session);
        let shutdown = Arc::clone(&shutdown);
        let offline = args.offline;
        thread::spawn(move || run_audio_thread(session, cmd_rx, evt_tx, shutdown, offline))
    };

    println!("lockstep ready, type `help` for commands");
    let result = run_input(&cmd_tx, &evt_rx);

    shutdown.store(true, Ordering::SeqCst);
    let _ = audio_handle.join();

    config.last_master = Some(session.lock().master());
    let saved = match &args.config {
        Some(path) => config.save_to(path),
        None => config.save(),
    };
    if let Err(e) = saved {
        warn!(%e, "failed to save config");
    }

    result
}

/// Read commands from stdin until `quit` or end of input
fn run_input(cmd_tx: &Sender<Command>, evt_rx: &Receiver<AudioEvent>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let quit = command.is_quit();
        cmd_tx.send(command).context("Audio thread stopped")?;
        if quit {
            return Ok(());
        }

        match evt_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(AudioEvent::Reply(Some(text))) => println!("{}", text),
            Ok(AudioEvent::Reply(None)) => {}
            Ok(AudioEvent::Error(e)) => eprintln!("error: {}", e),
            Err(_) => warn!("no reply from audio thread"),
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    Ok(())
}

fn run_audio_thread(
    session: Arc<Mutex<Session>>,
    cmd_rx: Receiver<Command>,
    evt_tx: Sender<AudioEvent>,
    shutdown: Arc<AtomicBool>,
    offline: bool,
) {
    let stream = if offline {
        None
    } else {
        match open_output(&session) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("{:#}, running without audio output", e);
                None
            }
        }
    };
    if stream.is_none() {
        info!("simulating audio output");
    }

    let mut last_block = Instant::now();

    // Command processing loop
    while !shutdown.load(Ordering::Relaxed) {
        match cmd_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(Command::Quit) => break,
            Ok(command) => {
                let event = match session.lock().handle_command(command) {
                    Ok(reply) => AudioEvent::Reply(reply),
                    Err(e) => AudioEvent::Error(format!("{:#}", e)),
                };
                let _ = evt_tx.try_send(event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // Without a device, play blocks as wall-clock time passes
        if stream.is_none() {
            let mut session = session.lock();
            let rate = session.engine().sample_rate().max(1) as f64;
            let block = Duration::from_secs_f64(OFFLINE_BLOCK_FRAMES as f64 / rate);
            while last_block.elapsed() >= block {
                session.process(OFFLINE_BLOCK_FRAMES * OFFLINE_CHANNELS, OFFLINE_CHANNELS);
                last_block += block;
            }
        }
    }
}

/// Open the default output device and drive the session from its callback
///
/// The stream writes silence; it exists to clock the session at the
/// device's real rate.
fn open_output(session: &Arc<Mutex<Session>>) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No audio output device found")?;
    let config = device
        .default_output_config()
        .context("Failed to get audio config")?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    session.lock().registry().set(
        ControlKey::master(Item::SampleRate),
        sample_rate as f64,
        Origin::Engine,
    )?;

    let session = Arc::clone(session);
    // Samples that went by while the command loop held the lock
    let missed = AtomicUsize::new(0);

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                data.fill(0.0);
                // Never block the real-time thread; catch up on the next block
                if let Some(mut session) = session.try_lock() {
                    let samples = data.len() + missed.swap(0, Ordering::Relaxed);
                    session.process(samples, channels);
                } else {
                    missed.fetch_add(data.len(), Ordering::Relaxed);
                }
            },
            |err| {
                error!(%err, "audio stream error");
            },
            None,
        )
        .context("Failed to create audio stream")?;

    stream.play().context("Failed to start audio")?;
    info!(sample_rate, channels, "audio output started");
    Ok(stream)
}

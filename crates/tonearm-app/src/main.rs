//! # Tonearm
//!
//! Plays the files given on the command line in order, looping over the
//! playlist and skipping anything that will not decode.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tonearm_audio::output::{default_device_name, list_output_devices};
use tonearm_audio::{AdvanceOutcome, PlaybackController, PlayerConfig, SessionSnapshot};
use tonearm_core::Playlist;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming an optional JSON config file.
const CONFIG_ENV: &str = "TONEARM_CONFIG";

/// UI poll rate, roughly 30 Hz.
const POLL_INTERVAL: Duration = Duration::from_millis(33);

/// How often progress is logged.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonearm=info,tonearm_audio=info".into()),
        )
        .init();

    info!("Starting Tonearm v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--devices") {
        return print_devices();
    }
    if args.is_empty() {
        bail!("usage: tonearm [--devices] <file>...");
    }

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_config(Path::new(&path))?,
        None => PlayerConfig::default(),
    };
    debug!("Player config: {:?}", config);

    let playlist = Playlist::from_paths(args);
    let mut controller = PlaybackController::start(playlist, config).inspect_err(|e| {
        if e.is_fatal() {
            error!("Audio output unavailable: {e}");
        }
    })?;

    let running = Arc::new(AtomicBool::new(true));
    install_interrupt_handler(running.clone());

    if let AdvanceOutcome::NoPlayableFiles { attempts } = controller.next() {
        controller.shutdown();
        bail!("no playable files ({attempts} tried)");
    }

    let result = run(&mut controller, &running);
    controller.shutdown();
    info!("Goodbye");
    result
}

/// Clear `running` on Ctrl-C. Without a handler the process still exits on
/// the signal, just without a clean shutdown.
fn install_interrupt_handler(running: Arc<AtomicBool>) -> bool {
    match ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to install Ctrl-C handler: {e}");
            false
        }
    }
}

/// Poll the controller until interrupted or nothing is left to play.
fn run(controller: &mut PlaybackController, running: &AtomicBool) -> Result<()> {
    let mut last = controller.snapshot();
    log_track(controller, &last);
    let mut last_progress_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_INTERVAL);

        match controller.poll_events() {
            Some(AdvanceOutcome::NoPlayableFiles { attempts }) => {
                error!("No playable files left after {attempts} attempts");
                bail!("no playable files");
            }
            Some(AdvanceOutcome::Playing { index, attempts }) if attempts > 1 => {
                warn!("Skipped {} unplayable tracks before {index}", attempts - 1);
            }
            _ => {}
        }

        let snapshot = controller.snapshot();
        if snapshot.index != last.index {
            log_track(controller, &snapshot);
        }
        if snapshot.state != last.state {
            debug!("State: {:?}", snapshot.state);
        }
        if last_progress_log.elapsed() >= PROGRESS_INTERVAL {
            let peak = controller.spectrum().peak();
            info!(
                "{:?} {:>5.1}% (spectrum peak {peak:.1} dB)",
                snapshot.state,
                snapshot.progress * 100.0
            );
            last_progress_log = Instant::now();
        }
        last = snapshot;
    }

    info!("Interrupted");
    Ok(())
}

fn log_track(controller: &PlaybackController, snapshot: &SessionSnapshot) {
    let (Some(index), Some(track)) = (snapshot.index, snapshot.track) else {
        return;
    };
    let name = controller
        .playlist()
        .get(index)
        .map_or_else(String::new, |p| p.display().to_string());
    info!(
        "Now playing [{}/{}] {name} ({}, {:.1}s)",
        index + 1,
        controller.playlist().len(),
        track.format(),
        track.duration_secs()
    );
}

/// Read a JSON [`PlayerConfig`]; missing fields take their defaults.
fn load_config(path: &Path) -> Result<PlayerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: PlayerConfig = serde_json::from_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    config.validate()?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

fn print_devices() -> Result<()> {
    let default = default_device_name();
    for name in list_output_devices()? {
        let marker = if default.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {name}");
    }
    Ok(())
}

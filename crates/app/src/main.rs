mod loader;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use pulseviz_core::{estimate_tempo, AppConfig, TrackDescriptor, VizSession};
use tracing_subscriber::EnvFilter;

use crate::loader::WavLoader;

fn main() -> pulseviz_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Analyze { input } => run_analyze(&config, &input),
        Commands::Simulate {
            input,
            seconds,
            fps,
        } => run_simulate(&config, &input, seconds, fps),
    }
}

fn run_analyze(config: &AppConfig, input: &Path) -> pulseviz_core::Result<()> {
    tracing::info!(?input, "analysing track");

    let buffer = loader::decode_wav(input)?;
    let estimate = estimate_tempo(buffer.samples(), buffer.sample_rate(), &config.tempo);

    println!("file:      {}", input.display());
    println!("duration:  {:.1} s", buffer.duration_ms() / 1000.0);
    println!("tempo:     {:.0} BPM{}", estimate.bpm, if estimate.degraded { " (degraded)" } else { "" });
    println!("interval:  {:.1} ms", estimate.beat_interval_ms);
    println!("origin:    {:.1} ms", estimate.origin_ms);
    Ok(())
}

fn run_simulate(
    config: &AppConfig,
    input: &Path,
    seconds: f64,
    fps: f64,
) -> pulseviz_core::Result<()> {
    tracing::info!(?input, seconds, fps, "running headless playback simulation");

    let mut session = VizSession::new(config, WavLoader::new());
    let descriptor = TrackDescriptor::new(track_name(input), input.display().to_string());

    session.add_track(descriptor.clone());
    session.load_track(&descriptor)?;
    let estimate = session.wait_for_tempo()?;
    tracing::info!(bpm = estimate.bpm, degraded = estimate.degraded, "tempo locked");

    session.subscribe_beats(|beat| println!("beat #{:<3} at {:>8.1} ms", beat.index, beat.at_ms));
    session.play()?;

    let delta_ms = 1_000.0 / fps.max(1.0);
    let ticks = (seconds.max(0.0) * fps.max(1.0)) as u64;
    let report_every = fps.max(1.0) as u64;

    for tick in 0..ticks {
        let frame = session.tick(delta_ms);
        if tick % report_every == 0 {
            println!(
                "t={:>6.1}s  low={:.3} mid={:.3} high={:.3}",
                tick as f64 * delta_ms / 1_000.0,
                frame.bands.low,
                frame.bands.mid,
                frame.bands.high,
            );
        }
    }
    Ok(())
}

fn track_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive feature pipeline for the Pulseviz visualiser", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run offline tempo detection on a WAV file and print the estimate.
    Analyze {
        /// Path to the WAV file to analyse.
        input: PathBuf,
    },
    /// Play a WAV file through the feature pipeline without a display,
    /// printing band intensities and beat events.
    Simulate {
        /// Path to the WAV file to play.
        input: PathBuf,
        /// How much playback time to simulate.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Display tick rate of the simulated render loop.
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
}

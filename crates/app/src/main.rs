use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use oculizer_core::{
    AppConfig, AudioListener, DmxUniverse, ErrorLog, FrameSlot, LightController, LightEngine, Rig,
    SceneDirectory, SceneManager, SceneReport,
};
use tracing_subscriber::EnvFilter;

fn main() -> oculizer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rig,
            scenes,
            config,
            scene,
            duration,
        } => run_show(&rig, &scenes, config.as_deref(), scene.as_deref(), duration),
        Commands::Check { rig, scenes, config } => run_check(&rig, &scenes, config.as_deref()),
        Commands::Devices => list_devices(),
    }
}

fn load_config(path: Option<&Path>) -> oculizer_core::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_scenes(
    rig: &Path,
    scenes: &Path,
    config: &AppConfig,
    initial: Option<&str>,
) -> oculizer_core::Result<(SceneManager, SceneReport)> {
    let rig = Arc::new(Rig::load(rig)?);
    tracing::info!(rig = rig.name(), fixtures = rig.len(), "rig loaded");
    SceneManager::new(
        rig,
        config.audio.sample_rate,
        SceneDirectory::new(scenes),
        initial,
    )
}

fn run_show(
    rig: &Path,
    scenes: &Path,
    config: Option<&Path>,
    initial: Option<&str>,
    duration: Option<f64>,
) -> oculizer_core::Result<()> {
    let config = load_config(config)?;
    let (manager, report) = load_scenes(rig, scenes, &config, initial)?;
    let manager = Arc::new(manager);
    for (scene, fixtures) in &report.unresolved {
        tracing::warn!(scene, ?fixtures, "scene references fixtures missing from the rig");
    }

    let frames = FrameSlot::new();
    let errors = ErrorLog::new(config.controller.error_capacity);
    let universe = DmxUniverse::new();

    let mut listener = AudioListener::new(config.audio.clone(), frames.clone(), errors.clone());
    if let Err(err) = listener.start() {
        if !err.is_fatal() {
            return Err(err);
        }
        // Lights that do not follow the spectrum keep running without audio.
        tracing::error!(%err, "audio capture unavailable");
    }

    let engine = LightEngine::new(manager.clone(), frames, errors.clone(), universe.clone());
    let mut controller = LightController::new(engine, config.controller.clone());
    controller.start()?;

    let patched = manager
        .rig()
        .fixtures()
        .iter()
        .map(|fixture| fixture.end_address())
        .max()
        .unwrap_or(0) as usize;
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));

    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        thread::sleep(Duration::from_secs(1));
        let values = universe.range(1, patched).unwrap_or_default();
        tracing::info!(scene = %manager.current_name(), ?values, "universe");
        let dropped = errors.drain().len();
        if dropped > 0 {
            tracing::debug!(count = dropped, "cleared recorded errors");
        }
    }

    controller.stop()?;
    listener.stop();
    Ok(())
}

fn run_check(rig: &Path, scenes: &Path, config: Option<&Path>) -> oculizer_core::Result<()> {
    let config = load_config(config)?;
    let (manager, report) = load_scenes(rig, scenes, &config, None)?;

    let rig = manager.rig();
    println!("rig `{}`: {} fixtures", rig.name(), rig.len());
    for fixture in rig.fixtures() {
        println!(
            "  {:<16} {:<6} {}-{}",
            fixture.name,
            fixture.kind,
            fixture.start_address,
            fixture.end_address()
        );
    }
    println!("scenes: {}", manager.scene_names().join(", "));
    if report.is_clean() {
        println!("every fixture reference resolved");
    } else {
        for (scene, fixtures) in &report.unresolved {
            println!("scene `{scene}`: unknown fixtures {}", fixtures.join(", "));
        }
    }
    Ok(())
}

fn list_devices() -> oculizer_core::Result<()> {
    for name in AudioListener::list_input_devices()? {
        println!("{name}");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive DMX light controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen to the input device and drive the rig from the scene files.
    Run {
        /// Rig definition (JSON).
        #[arg(long)]
        rig: PathBuf,
        /// Directory of scene files, one `*.json` per scene.
        #[arg(long)]
        scenes: PathBuf,
        /// Optional application config (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Scene to start with; defaults to the first by name.
        #[arg(short, long)]
        scene: Option<String>,
        /// Stop after this many seconds instead of running until killed.
        #[arg(short, long)]
        duration: Option<f64>,
    },
    /// Load and validate a rig and its scenes without touching any device.
    Check {
        #[arg(long)]
        rig: PathBuf,
        #[arg(long)]
        scenes: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List audio capture devices.
    Devices,
}

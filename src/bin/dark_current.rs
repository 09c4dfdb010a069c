//! Synchronous grab over a range of exposure times, recording the mean dark
//! level of each frame.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use framegrab::capture::SimulatedSystem;
use framegrab::pipeline::ShutdownSignal;
use framegrab::sink::StatsLog;
use framegrab::sweep::ExposureSweep;
use framegrab::{utils, Config};

/// Capture frames at different exposure times and log their average level.
#[derive(Parser, Debug)]
#[command(name = "dark_current", version)]
struct Args {
    /// ID of the camera to use (using first camera if not specified)
    camera_id: Option<String>,

    /// Configuration file (default: ./framegrab.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args: Args = utils::parse_args();
    utils::init_tracing(args.verbose);

    info!("Capture frames in different exposure time");

    let mut config = Config::load(args.config.as_deref()).unwrap_or_else(|e| utils::abort(e, 1));
    if args.camera_id.is_some() {
        config.capture.camera_id = args.camera_id;
    }

    let system = SimulatedSystem::new(config.simulator.cameras.clone())
        .with_frame_timeout(config.capture.frame_timeout());
    let mut camera = utils::select_camera(&system, config.capture.camera_id.as_deref())
        .unwrap_or_else(|e| utils::abort(e, 1));

    utils::apply_features(camera.as_mut(), &config.capture.features);

    let shutdown = ShutdownSignal::new();
    let sweep = ExposureSweep::new(
        Duration::from_millis(config.sweep.settle_ms),
        config.capture.frame_timeout(),
        shutdown.clone(),
    );
    sweep
        .prepare(camera.as_mut(), config.sweep.pixel_format)
        .unwrap_or_else(|e| utils::abort(e, 1));

    let mut log = StatsLog::create(config.output.dir.join(&config.sweep.log))?;
    info!("Recording to {}", log.path().display());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping sweep");
            shutdown.trigger();
        }
    });

    let exposures = config.sweep.exposures_us.clone();
    let report =
        tokio::task::spawn_blocking(move || sweep.run(camera.as_mut(), &exposures, &mut log))
            .await??;

    info!(
        "{} exposures measured, {} skipped",
        report.measured().count(),
        report.skipped()
    );
    Ok(())
}

//! Asynchronous grab with on-the-fly conversion and display

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};

use framegrab::capture::{
    FormatNegotiator, Frame, FrameForwarder, SimulatedSystem, StreamGuard,
};
use framegrab::convert::{PixelConverter, RawDemosaicer};
use framegrab::pipeline::{BoundedQueue, ConsumerLoop, ShutdownSignal};
use framegrab::sink::{ConsoleDisplay, StatsLog, TiffWriter};
use framegrab::{utils, Config};

/// Stream frames from a camera, convert them for display and archive the
/// raw Bayer data.
#[derive(Parser, Debug)]
#[command(name = "framegrab", version)]
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

    info!("framegrab launching");

    let mut config = Config::load(args.config.as_deref()).unwrap_or_else(|e| utils::abort(e, 1));
    if args.camera_id.is_some() {
        config.capture.camera_id = args.camera_id;
    }

    let system = SimulatedSystem::new(config.simulator.cameras.clone())
        .with_frame_timeout(config.capture.frame_timeout())
        .with_pin_core(config.capture.pin_core);
    let mut camera = utils::select_camera(&system, config.capture.camera_id.as_deref())
        .unwrap_or_else(|e| utils::abort(e, 1));

    utils::apply_features(camera.as_mut(), &config.capture.features);

    let target = config.pipeline.target_format;
    let negotiated = FormatNegotiator::new(target)
        .apply(camera.as_mut())
        .unwrap_or_else(|e| utils::abort(e, 1));
    info!(
        "Streaming {} ({:?}) for display as {}",
        negotiated.format, negotiated.strategy, target
    );

    // Hand-off between the capture thread and the consumer
    let queue = Arc::new(BoundedQueue::<Frame>::new(config.pipeline.queue_capacity));
    let shutdown = ShutdownSignal::new();
    shutdown.attach(queue.clone());
    let forwarder = FrameForwarder::new(queue.clone(), shutdown.clone(), target);

    let mut display = ConsoleDisplay::new();
    if let Some(preview) = &config.output.preview {
        display = display.with_preview(config.output.dir.join(preview), config.output.preview_every);
    }

    let mut consumer = ConsumerLoop::new(
        queue,
        shutdown.clone(),
        PixelConverter::new(target, config.pipeline.bayer_pattern),
        display,
    )
    .with_camera_name(camera.info().name.clone());
    if config.pipeline.archive_raw {
        consumer = consumer.with_archive(
            RawDemosaicer::new(config.pipeline.bayer_pattern, config.pipeline.scale_to_storage),
            TiffWriter::new(&config.output.dir)?,
        );
    }
    if let Some(log) = &config.output.stats_log {
        consumer = consumer.with_stats_log(StatsLog::create(config.output.dir.join(log))?);
    }

    // Off the runtime: tokio's stdin would hold up runtime shutdown.
    utils::spawn_enter_watch(BufReader::new(std::io::stdin()), shutdown.clone())?;

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping stream");
            ctrl_c.trigger();
        }
    });

    let stream = StreamGuard::start(
        camera.as_mut(),
        Box::new(forwarder.clone()),
        config.capture.buffer_count,
    )?;
    info!("Press <Enter> to stop Frame acquisition.");

    let report = tokio::task::spawn_blocking(move || consumer.run()).await?;
    drop(stream);

    let stats = forwarder.stats();
    info!(
        "Capture: {} delivered, {} forwarded, {} discarded, {} returned at shutdown",
        stats.delivered,
        stats.forwarded,
        stats.discarded(),
        stats.rejected
    );

    match report {
        Ok(report) => info!(
            "Processed {} frames ({} failed, {} drained at shutdown)",
            report.processed, report.failed, report.drained
        ),
        Err(e) => {
            warn!("Consumer stopped on a sink error");
            return Err(e.into());
        }
    }

    info!("framegrab shutting down");
    Ok(())
}

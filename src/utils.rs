use std::fmt::Display;
use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};

use clap::Parser;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::capture::camera::{Camera, CameraSystem, FeatureSetting};
use crate::error::CameraError;
use crate::pipeline::ShutdownSignal;

/// Install the global subscriber: uptime timestamps, `RUST_LOG` filtering
/// with a per-crate default, and the Tracy layer when profiling.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("framegrab={level},dark_current={level}")));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_thread_names(true);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    // Already set in tests and when embedded.
    let _ = registry.try_init();
}

/// Parse command-line arguments. `/h` is accepted as a help flag next to
/// `-h`/`--help`; usage errors exit with status 2.
pub fn parse_args<A: Parser>() -> A {
    if std::env::args().skip(1).any(|arg| arg == "/h") {
        let _ = A::command().print_help();
        std::process::exit(0);
    }
    A::parse()
}

/// Report a setup failure and exit with `code`.
pub fn abort(reason: impl Display, code: i32) -> ! {
    error!("{}", reason);
    eprintln!("{reason}. Abort.");
    std::process::exit(code);
}

/// Watch `input` on its own thread and trigger `shutdown` on the first line
/// (the Enter key). The trigger wakes a consumer parked on an empty queue.
///
/// Blocking reads cannot be cancelled, so the thread is left detached when
/// input never arrives.
pub fn spawn_enter_watch<R>(input: R, shutdown: ShutdownSignal) -> io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            if let Some(Ok(_)) = input.lines().next() {
                info!("Enter pressed, stopping stream");
                shutdown.trigger();
            }
        })
}

/// Open the camera with `id`, or the first enumerated one.
#[instrument(skip(system))]
pub fn select_camera(
    system: &dyn CameraSystem,
    id: Option<&str>,
) -> Result<Box<dyn Camera>, CameraError> {
    if let Some(id) = id {
        let camera = system.open(id)?;
        info!("Opened {}", camera.info());
        return Ok(camera);
    }

    let cameras = system.cameras();
    info!("Found {} camera(s)", cameras.len());
    let first = cameras.into_iter().next().ok_or(CameraError::NoCameras)?;
    let camera = system.open(&first.id)?;
    info!("Opened first camera: {}", camera.info());
    Ok(camera)
}

/// Apply configured features in order. A feature the camera lacks or
/// refuses is logged and skipped; returns how many were applied.
#[instrument(skip_all, fields(camera = %camera.info().id))]
pub fn apply_features(camera: &mut dyn Camera, settings: &[FeatureSetting]) -> usize {
    let mut applied = 0;
    for setting in settings {
        match camera.set_feature(&setting.name, setting.value.clone()) {
            Ok(()) => {
                applied += 1;
                match camera.feature(&setting.name) {
                    Ok(now) => info!("{} set to {}", setting.name, now),
                    Err(_) => info!("{} set to {}", setting.name, setting.value),
                }
            }
            Err(e) => warn!("Skipping {}: {}", setting.name, e),
        }
    }
    applied
}

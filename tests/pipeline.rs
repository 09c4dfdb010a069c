//! End-to-end runs of the acquisition pipeline against the simulated driver.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framegrab::capture::{
    Camera, FormatNegotiator, Frame, FrameForwarder, PixelFormat, SimulatedCamera,
    SimulatedCameraConfig, SimulatedSystem, Strategy, StreamGuard,
};
use framegrab::convert::{ConversionResult, PixelConverter, RawDemosaicer};
use framegrab::error::SinkError;
use framegrab::pipeline::{BoundedQueue, ConsumerLoop, ConsumerState, ShutdownSignal};
use framegrab::sink::{DisplaySink, StatsLog, TiffWriter, ENTER_KEY_CODE};
use framegrab::utils;

/// Counts shown frames and presses Enter once `stop_after` have been shown.
struct EnterAfter {
    stop_after: usize,
    shown: Vec<(u32, u32, usize)>,
}

impl EnterAfter {
    fn new(stop_after: usize) -> Self {
        Self {
            stop_after,
            shown: Vec::new(),
        }
    }
}

impl DisplaySink for EnterAfter {
    fn show(&mut self, _title: &str, image: &ConversionResult) -> Result<(), SinkError> {
        self.shown.push((image.width, image.height, image.channels()));
        Ok(())
    }

    fn poll_key(&mut self) -> Option<i32> {
        (self.shown.len() >= self.stop_after).then_some(ENTER_KEY_CODE)
    }
}

fn bayer_camera(id: &str, incomplete_every: u64) -> SimulatedCameraConfig {
    SimulatedCameraConfig {
        id: id.to_string(),
        name: format!("Sim {id}"),
        width: 16,
        height: 12,
        formats: vec![PixelFormat::Mono8, PixelFormat::BayerRG12],
        frame_interval_ms: 1,
        incomplete_every,
        ..Default::default()
    }
}

struct Pipeline {
    queue: Arc<BoundedQueue<Frame>>,
    shutdown: ShutdownSignal,
    forwarder: FrameForwarder,
}

fn pipeline(capacity: usize, target: PixelFormat) -> Pipeline {
    let queue = Arc::new(BoundedQueue::new(capacity));
    let shutdown = ShutdownSignal::new();
    shutdown.attach(queue.clone());
    let forwarder = FrameForwarder::new(queue.clone(), shutdown.clone(), target);
    Pipeline {
        queue,
        shutdown,
        forwarder,
    }
}

#[test]
fn negotiates_bayer_and_archives_until_enter() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = SimulatedCamera::new(bayer_camera("cam0", 0)).unwrap();

    let negotiated = FormatNegotiator::new(PixelFormat::Bgr8).apply(&mut camera).unwrap();
    assert_eq!(negotiated.format, PixelFormat::BayerRG12);
    assert_eq!(negotiated.strategy, Strategy::ConvertColor);
    assert_eq!(camera.pixel_format(), PixelFormat::BayerRG12);

    let p = pipeline(10, PixelFormat::Bgr8);
    let log_path = dir.path().join("output.txt");
    let mut consumer = ConsumerLoop::new(
        p.queue.clone(),
        p.shutdown.clone(),
        PixelConverter::new(PixelFormat::Bgr8, None),
        EnterAfter::new(5),
    )
    .with_archive(
        RawDemosaicer::new(None, true),
        TiffWriter::new(dir.path()).unwrap(),
    )
    .with_stats_log(StatsLog::create(&log_path).unwrap());

    camera.start_streaming(Box::new(p.forwarder.clone()), 10).unwrap();
    let pool = camera.stream_pool().unwrap().clone();

    let report = consumer.run().unwrap();
    camera.stop_streaming().unwrap();

    assert_eq!(report.processed, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert!(p.shutdown.is_triggered());
    assert!(p.queue.is_closed());

    // Every delivered buffer went back exactly once.
    let counters = pool.counters();
    assert_eq!(counters.delivered, counters.requeued);
    assert_eq!(counters.available, 10);

    let stats = p.forwarder.stats();
    assert_eq!(stats.delivered, counters.delivered);
    assert_eq!(stats.delivered, stats.forwarded + stats.discarded() + stats.rejected);

    let tiffs = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "tiff"))
        .count();
    assert_eq!(tiffs, 5);
    let first = image::open(dir.path().join("output_0.tiff")).unwrap();
    assert_eq!((first.width(), first.height()), (16, 12));
    assert!(first.as_rgb16().is_some());

    let log = fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.lines().count(), 5);
    assert!(log.lines().all(|l| l.split(',').count() == 2));
}

#[test]
fn incomplete_frames_never_reach_the_consumer() {
    let mut camera = SimulatedCamera::new(bayer_camera("cam1", 2)).unwrap();
    camera.set_pixel_format(PixelFormat::BayerRG12).unwrap();

    let p = pipeline(4, PixelFormat::Rgb8);
    let mut consumer = ConsumerLoop::new(
        p.queue.clone(),
        p.shutdown.clone(),
        PixelConverter::new(PixelFormat::Rgb8, None),
        EnterAfter::new(6),
    );

    camera.start_streaming(Box::new(p.forwarder.clone()), 4).unwrap();
    let pool = camera.stream_pool().unwrap().clone();
    let report = consumer.run().unwrap();
    camera.stop_streaming().unwrap();

    assert_eq!(report.processed, 6);
    assert_eq!(report.failed, 0);
    assert!(p.forwarder.stats().incomplete >= 5);
    assert_eq!(pool.available(), 4);
}

#[test]
fn external_shutdown_stops_a_running_stream() {
    let system = SimulatedSystem::new(vec![bayer_camera("cam2", 0)])
        .with_frame_timeout(Duration::from_millis(200));
    let mut camera = utils::select_camera(&system, None).unwrap();
    FormatNegotiator::new(PixelFormat::Bgr8).apply(camera.as_mut()).unwrap();

    let p = pipeline(2, PixelFormat::Bgr8);
    let mut consumer = ConsumerLoop::new(
        p.queue.clone(),
        p.shutdown.clone(),
        PixelConverter::new(PixelFormat::Bgr8, None),
        EnterAfter::new(usize::MAX),
    );

    let stopper = p.shutdown.clone();
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stopper.trigger();
    });

    {
        let _stream =
            StreamGuard::start(camera.as_mut(), Box::new(p.forwarder.clone()), 4).unwrap();
        let report = consumer.run().unwrap();
        assert!(report.processed > 0);
        assert!(report.drained <= 2);
    }
    trigger.join().unwrap();

    assert!(!camera.is_streaming());
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert!(p.queue.is_empty());
}

struct LostDisplay;

impl DisplaySink for LostDisplay {
    fn show(&mut self, _title: &str, _image: &ConversionResult) -> Result<(), SinkError> {
        panic!("display window closed underneath the consumer");
    }
}

#[test]
fn panicking_display_does_not_wedge_the_capture_thread() {
    let mut camera = SimulatedCamera::new(bayer_camera("cam3", 0)).unwrap();
    camera.set_pixel_format(PixelFormat::BayerRG12).unwrap();

    let p = pipeline(2, PixelFormat::Bgr8);
    let mut consumer = ConsumerLoop::new(
        p.queue.clone(),
        p.shutdown.clone(),
        PixelConverter::new(PixelFormat::Bgr8, None),
        LostDisplay,
    );

    camera.start_streaming(Box::new(p.forwarder.clone()), 4).unwrap();
    let pool = camera.stream_pool().unwrap().clone();

    // Let the capture thread fill the queue and park on it.
    thread::sleep(Duration::from_millis(50));
    let worker = thread::spawn(move || consumer.run());
    assert!(worker.join().is_err());

    assert!(p.shutdown.is_triggered());
    assert!(p.queue.is_closed());
    assert!(p.queue.is_empty());

    let (done_tx, done_rx) = flume::bounded(1);
    let stopper = thread::spawn(move || {
        camera.stop_streaming().unwrap();
        let _ = done_tx.send(());
        camera
    });
    assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    let camera = stopper.join().unwrap();
    assert!(!camera.is_streaming());

    let counters = pool.counters();
    assert_eq!(counters.delivered, counters.requeued);
    assert_eq!(counters.available, 4);
}

//! Detection loop
//!
//! One run of the loop goes `Starting -> Running -> Stopping -> Stopped`.
//! The loop owns the frame source, face locator and threat monitor; it talks
//! to the rest of the system only through channels (worker events, display,
//! alerts). Cancellation is cooperative: the token is checked once per
//! iteration, so a stop request takes effect after at most one frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alerting::{AlertMessage, AlertSender};
use camera_capture::{FrameSource, FrameSourceFactory};
use chrono::Utc;
use proximity::{
    DistanceEstimator, FaceLocator, LocatorFactory, LocatorParams, PreprocessConfig,
    ThreatMonitor, ThreatTransition,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::annotate::{Annotator, Measurement};
use crate::config::GuardConfig;
use crate::display::DisplayPublisher;
use crate::GuardError;

/// A streak of skipped frames is logged as an error every this many frames
const FAILURE_REPORT_INTERVAL: u32 = 50;

/// Cooperative stop flag shared between the controller and one worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Lifecycle phase of a detection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub skipped: u64,
    pub invalid_detections: u64,
    pub alerts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
    Phase(LoopPhase),
    /// The device could not be opened; the run never started
    DeviceError(String),
    /// The camera opened but the run could not be set up (model, calibration)
    StartError(String),
    /// The run ended on an unrecoverable error
    Failed(String),
    Threat { active: bool },
    /// Final event of every run
    Stopped(RunStats),
}

/// Notification from a worker to the controller
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub run: u64,
    pub kind: WorkerEventKind,
}

/// Sends events tagged with the run id
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    run: u64,
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSender {
    pub(crate) fn new(run: u64, tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { run, tx }
    }

    pub(crate) fn emit(&self, kind: WorkerEventKind) {
        // The controller going away is not the worker's problem
        let _ = self.tx.send(WorkerEvent {
            run: self.run,
            kind,
        });
    }
}

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame was analysed and published
    Processed { faces: usize },
    /// The frame was dropped after a transient failure
    Skipped,
}

/// The running part of a detection run
pub struct DetectionLoop {
    run: u64,
    source: Box<dyn FrameSource>,
    locator: Box<dyn FaceLocator>,
    estimator: DistanceEstimator,
    threat: ThreatMonitor,
    params: LocatorParams,
    preprocess: PreprocessConfig,
    annotator: Arc<Annotator>,
    alerts: AlertSender,
    display: DisplayPublisher,
    events: EventSender,
    clock: Arc<dyn Clock>,
    backoff: Duration,
    max_failures: Option<u32>,
    failures: u32,
    stats: RunStats,
}

impl DetectionLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run: u64,
        config: &GuardConfig,
        source: Box<dyn FrameSource>,
        locator: Box<dyn FaceLocator>,
        annotator: Arc<Annotator>,
        alerts: AlertSender,
        display: DisplayPublisher,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GuardError> {
        let estimator = DistanceEstimator::new(config.proximity.calibration)?;
        Ok(Self {
            run,
            source,
            locator,
            estimator,
            threat: ThreatMonitor::new(&config.proximity.threat),
            params: config.proximity.locator.clone(),
            preprocess: config.proximity.preprocess.clone(),
            annotator,
            alerts,
            display,
            events,
            clock,
            backoff: Duration::from_millis(config.detection.retry_backoff_ms),
            max_failures: config.detection.max_consecutive_failures.map(|n| n.max(1)),
            failures: 0,
            stats: RunStats::default(),
        })
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn threat(&self) -> &ThreatMonitor {
        &self.threat
    }

    /// Iterate until cancelled or an unrecoverable error occurs
    pub fn run(&mut self, cancel: &CancelToken) -> Result<(), GuardError> {
        while !cancel.is_cancelled() {
            self.step()?;
        }
        debug!("Run {} observed cancellation", self.run);
        Ok(())
    }

    /// Capture, analyse, annotate and publish one frame
    pub fn step(&mut self) -> Result<Step, GuardError> {
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => return self.skip(&e.to_string()),
            Err(e) => return Err(e.into()),
        };

        let gray = self.preprocess.apply(frame.to_grayscale());
        let detections = match self.locator.detect(&gray, &self.params) {
            Ok(detections) => detections,
            Err(e) => return self.skip(&e.to_string()),
        };
        self.failures = 0;

        let now = self.clock.now();
        if self.threat.expire(now) == ThreatTransition::Cleared {
            self.events.emit(WorkerEventKind::Threat { active: false });
        }

        let mut measurements = Vec::with_capacity(detections.len());
        for detection in detections {
            let Some(distance_m) = self.estimator.estimate(detection.width) else {
                debug!("Skipping detection with width {}", detection.width);
                self.stats.invalid_detections += 1;
                continue;
            };
            if self.threat.observe(distance_m, now) == ThreatTransition::Started {
                self.raise_alert(distance_m);
            }
            measurements.push(Measurement {
                detection,
                distance_m,
            });
        }

        let faces = measurements.len();
        let annotated = self
            .annotator
            .annotate(frame, measurements, self.threat.remaining(now));
        self.display.publish(self.run, annotated);
        self.stats.frames += 1;

        Ok(Step::Processed { faces })
    }

    /// Release the frame source
    pub(crate) fn into_source(self) -> Box<dyn FrameSource> {
        self.source
    }

    fn raise_alert(&mut self, distance_m: f64) {
        self.stats.alerts += 1;
        let alert = AlertMessage::proximity(
            distance_m,
            self.threat.threshold_m(),
            self.threat.episodes(),
            Utc::now(),
        );
        self.alerts.send(alert);
        self.events.emit(WorkerEventKind::Threat { active: true });
    }

    fn skip(&mut self, reason: &str) -> Result<Step, GuardError> {
        self.failures += 1;
        self.stats.skipped += 1;
        match self.max_failures {
            Some(limit) if self.failures >= limit => {
                return Err(GuardError::TooManyFailures(self.failures));
            }
            _ if self.failures % FAILURE_REPORT_INTERVAL == 0 => {
                error!(
                    "{} consecutive frames failed, still retrying: {}",
                    self.failures, reason
                );
            }
            _ => warn!("Frame skipped ({} in a row): {}", self.failures, reason),
        }
        std::thread::sleep(self.backoff);
        Ok(Step::Skipped)
    }
}

/// Everything one worker needs, moved onto the blocking thread
pub(crate) struct WorkerContext {
    pub run: u64,
    pub config: Arc<GuardConfig>,
    pub sources: Arc<dyn FrameSourceFactory>,
    pub locators: Arc<dyn LocatorFactory>,
    pub annotator: Arc<Annotator>,
    pub alerts: AlertSender,
    pub display: DisplayPublisher,
    pub events: EventSender,
    pub cancel: CancelToken,
    pub clock: Arc<dyn Clock>,
}

/// Body of the worker thread: one complete run
pub(crate) fn run_worker(ctx: WorkerContext) -> RunStats {
    let events = ctx.events.clone();
    let run = ctx.run;

    if ctx.cancel.is_cancelled() {
        debug!("Run {} cancelled before start", run);
        events.emit(WorkerEventKind::Stopped(RunStats::default()));
        return RunStats::default();
    }

    events.emit(WorkerEventKind::Phase(LoopPhase::Starting));
    let mut detection_loop = match start(&ctx) {
        Ok(detection_loop) => detection_loop,
        Err(e @ GuardError::Camera(_)) => {
            error!("Run {} could not open the camera: {}", run, e);
            events.emit(WorkerEventKind::DeviceError(e.to_string()));
            events.emit(WorkerEventKind::Stopped(RunStats::default()));
            return RunStats::default();
        }
        Err(e) => {
            error!("Run {} failed to start: {}", run, e);
            events.emit(WorkerEventKind::StartError(e.to_string()));
            events.emit(WorkerEventKind::Stopped(RunStats::default()));
            return RunStats::default();
        }
    };

    events.emit(WorkerEventKind::Phase(LoopPhase::Running));
    info!("Run {} detecting", run);
    let result = detection_loop.run(&ctx.cancel);

    events.emit(WorkerEventKind::Phase(LoopPhase::Stopping));
    let stats = detection_loop.stats();
    let mut source = detection_loop.into_source();
    source.close();
    drop(source);
    ctx.display.clear(run);

    if let Err(e) = result {
        error!("Run {} aborted: {}", run, e);
        events.emit(WorkerEventKind::Failed(e.to_string()));
    }
    info!(
        "Run {} stopped: {} frames, {} skipped, {} invalid detections, {} alerts",
        run, stats.frames, stats.skipped, stats.invalid_detections, stats.alerts
    );
    events.emit(WorkerEventKind::Stopped(stats));
    stats
}

fn start(ctx: &WorkerContext) -> Result<DetectionLoop, GuardError> {
    let source = ctx.sources.open(&ctx.config.camera)?;
    info!("Frame source ready: {}", source.name());
    // The source is dropped (and closed) if the locator cannot be built
    let locator = ctx.locators.build()?;
    DetectionLoop::new(
        ctx.run,
        &ctx.config,
        source,
        locator,
        ctx.annotator.clone(),
        ctx.alerts.clone(),
        ctx.display.clone(),
        ctx.events.clone(),
        ctx.clock.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::AlertMessage;
    use camera_capture::{CameraError, VideoFrame};
    use image::GrayImage;
    use proximity::{Detection, ProximityError, ScriptedLocator, ThreatState};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Clock advanced by the test source, one tick per capture
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    /// Small frames at 10fps of simulated time; scripted errors first
    struct TickingSource {
        clock: ManualClock,
        errors: VecDeque<CameraError>,
        sequence: u32,
    }

    impl FrameSource for TickingSource {
        fn name(&self) -> &str {
            "ticking"
        }

        fn capture(&mut self) -> Result<VideoFrame, CameraError> {
            self.clock.advance(Duration::from_millis(100));
            if let Some(e) = self.errors.pop_front() {
                return Err(e);
            }
            self.sequence += 1;
            VideoFrame::new(vec![0; 16 * 12 * 3], 16, 12, 0, self.sequence)
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn detect(
            &mut self,
            _gray: &GrayImage,
            _params: &LocatorParams,
        ) -> Result<Vec<Detection>, ProximityError> {
            Err(ProximityError::Detection("classifier exploded".to_string()))
        }
    }

    struct Harness {
        detection_loop: DetectionLoop,
        alerts: mpsc::UnboundedReceiver<AlertMessage>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        display: DisplayPublisher,
    }

    impl Harness {
        fn drain_alerts(&mut self) -> Vec<AlertMessage> {
            let mut out = Vec::new();
            while let Ok(alert) = self.alerts.try_recv() {
                out.push(alert);
            }
            out
        }

        fn drain_events(&mut self) -> Vec<WorkerEventKind> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event.kind);
            }
            out
        }
    }

    fn harness(
        duration_secs: u64,
        errors: Vec<CameraError>,
        locator: Box<dyn FaceLocator>,
    ) -> Harness {
        harness_with_limit(duration_secs, errors, locator, None)
    }

    fn harness_with_limit(
        duration_secs: u64,
        errors: Vec<CameraError>,
        locator: Box<dyn FaceLocator>,
        max_failures: Option<u32>,
    ) -> Harness {
        let mut config = GuardConfig::default();
        config.proximity.threat.duration_secs = duration_secs;
        config.detection.retry_backoff_ms = 0;
        config.detection.max_consecutive_failures = max_failures;

        let clock = ManualClock::new();
        let source = TickingSource {
            clock: clock.clone(),
            errors: errors.into(),
            sequence: 0,
        };
        let (alerts, alert_rx) = AlertSender::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let display = DisplayPublisher::new();

        let detection_loop = DetectionLoop::new(
            7,
            &config,
            Box::new(source),
            locator,
            Arc::new(Annotator::new()),
            alerts,
            display.clone(),
            EventSender::new(7, event_tx),
            Arc::new(clock),
        )
        .unwrap();

        Harness {
            detection_loop,
            alerts: alert_rx,
            events: event_rx,
            display,
        }
    }

    fn face(width: i32) -> Vec<Detection> {
        vec![Detection::new(2, 2, width, width)]
    }

    /// `far` frames at 2m, then `close` frames at 0.5m (default calibration)
    fn approach(far: usize, close: usize) -> Box<dyn FaceLocator> {
        let mut script = vec![face(100); far];
        script.extend(vec![face(400); close]);
        Box::new(ScriptedLocator::new(script, false))
    }

    #[test]
    fn test_one_alert_per_episode() {
        let mut h = harness(60, Vec::new(), approach(5, 50));
        for _ in 0..55 {
            h.detection_loop.step().unwrap();
        }

        let alerts = h.drain_alerts();
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].distance_m - 0.5).abs() < 1e-9);
        assert_eq!(alerts[0].threshold_m, 1.0);
        assert_eq!(h.detection_loop.threat().state(), ThreatState::Active);
        assert_eq!(h.detection_loop.stats().alerts, 1);
        assert_eq!(
            h.drain_events(),
            vec![WorkerEventKind::Threat { active: true }]
        );
    }

    #[test]
    fn test_new_alert_after_episode_expires() {
        // 1s episodes: close for 0.5s, away for 1s, close again
        let mut script = vec![face(400); 5];
        script.extend(vec![face(100); 10]);
        script.extend(vec![face(400); 3]);
        let mut h = harness(1, Vec::new(), Box::new(ScriptedLocator::new(script, false)));

        for _ in 0..15 {
            h.detection_loop.step().unwrap();
        }
        assert_eq!(h.drain_alerts().len(), 1);
        assert_eq!(h.detection_loop.threat().state(), ThreatState::Idle);

        for _ in 0..3 {
            h.detection_loop.step().unwrap();
        }
        assert_eq!(h.drain_alerts().len(), 1);
        assert_eq!(h.detection_loop.threat().episodes(), 2);
        assert_eq!(
            h.drain_events(),
            vec![
                WorkerEventKind::Threat { active: true },
                WorkerEventKind::Threat { active: false },
                WorkerEventKind::Threat { active: true },
            ]
        );
    }

    #[test]
    fn test_invalid_widths_are_skipped() {
        let script = vec![
            vec![Detection::new(0, 0, 0, 10)],
            vec![Detection::new(0, 0, -40, 10), Detection::new(1, 1, 100, 100)],
        ];
        let mut h = harness(60, Vec::new(), Box::new(ScriptedLocator::new(script, false)));

        assert_eq!(h.detection_loop.step().unwrap(), Step::Processed { faces: 0 });
        assert_eq!(h.detection_loop.step().unwrap(), Step::Processed { faces: 1 });
        assert_eq!(h.detection_loop.stats().invalid_detections, 2);
        assert_eq!(h.detection_loop.threat().state(), ThreatState::Idle);
        assert!(h.drain_alerts().is_empty());
    }

    #[test]
    fn test_frames_are_published() {
        let mut h = harness(60, Vec::new(), approach(1, 1));
        h.detection_loop.step().unwrap();
        let shown = h.display.current();
        assert_eq!(shown.run, 7);
        let frame = shown.frame.unwrap();
        assert_eq!(frame.measurements.len(), 1);
        assert!(!frame.threat_active);

        h.detection_loop.step().unwrap();
        assert!(h.display.current().frame.unwrap().threat_active);
    }

    #[test]
    fn test_transient_errors_are_absorbed() {
        let errors = vec![CameraError::Timeout, CameraError::Stream("EAGAIN".into())];
        let mut h = harness(60, errors, approach(3, 0));

        assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        assert_eq!(h.detection_loop.step().unwrap(), Step::Processed { faces: 1 });
        assert_eq!(h.detection_loop.stats().skipped, 2);
        assert_eq!(h.detection_loop.stats().frames, 1);
    }

    #[test]
    fn test_transient_failures_never_end_the_run_by_default() {
        let mut h = harness(60, Vec::new(), Box::new(FailingLocator));
        for _ in 0..(FAILURE_REPORT_INTERVAL * 4) {
            assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        }
        assert_eq!(
            h.detection_loop.stats().skipped,
            u64::from(FAILURE_REPORT_INTERVAL * 4)
        );
        assert!(h.drain_events().is_empty());
    }

    #[test]
    fn test_timeout_streak_recovers() {
        let errors = (0..120).map(|_| CameraError::Timeout).collect();
        let mut h = harness(60, errors, approach(1, 0));
        for _ in 0..120 {
            assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        }
        assert_eq!(h.detection_loop.step().unwrap(), Step::Processed { faces: 1 });
    }

    #[test]
    fn test_configured_failure_limit_ends_the_run() {
        let mut h = harness_with_limit(60, Vec::new(), Box::new(FailingLocator), Some(3));
        assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        assert_eq!(h.detection_loop.step().unwrap(), Step::Skipped);
        assert!(matches!(
            h.detection_loop.step(),
            Err(GuardError::TooManyFailures(3))
        ));
    }

    #[test]
    fn test_disconnect_is_fatal() {
        let mut h = harness(60, vec![CameraError::Disconnected], approach(1, 0));
        assert!(matches!(
            h.detection_loop.step(),
            Err(GuardError::Camera(CameraError::Disconnected))
        ));
    }

    #[test]
    fn test_run_returns_when_cancelled() {
        let mut h = harness(60, Vec::new(), approach(0, 0));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(h.detection_loop.run(&cancel).is_ok());
        assert_eq!(h.detection_loop.stats().frames, 0);
    }
}

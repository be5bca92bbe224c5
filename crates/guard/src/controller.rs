//! Guard controller
//!
//! Owns the operator-facing state (status indicator, current phase) and the
//! single background detection worker. Commands arrive as text lines; worker
//! progress comes back as [`WorkerEvent`]s, which the caller feeds into
//! [`Guard::handle_event`].

use std::sync::Arc;

use alerting::AlertSender;
use camera_capture::FrameSourceFactory;
use proximity::LocatorFactory;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::annotate::Annotator;
use crate::command::{Command, Status};
use crate::config::GuardConfig;
use crate::detection::{
    run_worker, CancelToken, Clock, EventSender, LoopPhase, RunStats, SystemClock, WorkerContext,
    WorkerEvent, WorkerEventKind,
};
use crate::display::{DisplayPublisher, DisplayReceiver};

/// Point-in-time view of the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub status: Status,
    pub phase: LoopPhase,
    pub threat_active: bool,
    pub last_error: Option<String>,
}

/// Receiving end of the worker event stream
pub struct GuardEvents {
    rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl GuardEvents {
    /// Next worker event. Never returns `None` while the `Guard` is alive.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.rx.recv().await
    }
}

struct Worker {
    run: u64,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Command interpreter and worker supervisor
pub struct Guard {
    config: Arc<GuardConfig>,
    sources: Arc<dyn FrameSourceFactory>,
    locators: Arc<dyn LocatorFactory>,
    annotator: Arc<Annotator>,
    alerts: AlertSender,
    display: DisplayPublisher,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    run_id: u64,
    worker: Option<Worker>,
    status: Status,
    phase: LoopPhase,
    threat_active: bool,
    last_error: Option<String>,
}

impl Guard {
    pub fn new(
        config: GuardConfig,
        sources: Arc<dyn FrameSourceFactory>,
        locators: Arc<dyn LocatorFactory>,
        alerts: AlertSender,
    ) -> (Self, GuardEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let annotator = Arc::new(Annotator::from_config(&config.display));
        let guard = Self {
            config: Arc::new(config),
            sources,
            locators,
            annotator,
            alerts,
            display: DisplayPublisher::new(),
            clock: Arc::new(SystemClock),
            events: tx,
            run_id: 0,
            worker: None,
            status: Status::Offline,
            phase: LoopPhase::Stopped,
            threat_active: false,
            last_error: None,
        };
        (guard, GuardEvents { rx })
    }

    /// Replace the time source used by future runs
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            status: self.status,
            phase: self.phase,
            threat_active: self.threat_active,
            last_error: self.last_error.clone(),
        }
    }

    pub fn subscribe_display(&self) -> DisplayReceiver {
        self.display.subscribe()
    }

    /// Interpret one line of operator input
    pub fn handle_input(&mut self, line: &str) -> Option<Command> {
        let Some(command) = Command::parse(line) else {
            debug!("Ignoring input {:?}", line.trim());
            return None;
        };
        match command {
            Command::Activate => {
                self.activate();
            }
            Command::Deactivate => {
                self.deactivate();
            }
        }
        Some(command)
    }

    /// Start a detection run. Returns false if one is already running.
    pub fn activate(&mut self) -> bool {
        if self.worker_is_live() {
            debug!("ACTIVATE ignored: run {} already active", self.run_id);
            return false;
        }

        self.run_id += 1;
        let run = self.run_id;
        let previous = self.worker.take().map(|worker| {
            worker.cancel.cancel();
            worker.handle
        });

        let cancel = CancelToken::new();
        let events = EventSender::new(run, self.events.clone());
        let ctx = WorkerContext {
            run,
            config: self.config.clone(),
            sources: self.sources.clone(),
            locators: self.locators.clone(),
            annotator: self.annotator.clone(),
            alerts: self.alerts.clone(),
            display: self.display.clone(),
            events: events.clone(),
            cancel: cancel.clone(),
            clock: self.clock.clone(),
        };

        let handle = tokio::spawn(async move {
            // Runs never overlap: the device is released before it is reopened
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = tokio::task::spawn_blocking(move || run_worker(ctx)).await {
                error!("Detection worker {} panicked: {}", run, e);
                events.emit(WorkerEventKind::Failed(e.to_string()));
                events.emit(WorkerEventKind::Stopped(RunStats::default()));
            }
        });

        self.worker = Some(Worker {
            run,
            cancel,
            handle,
        });
        self.status = Status::Online;
        self.phase = LoopPhase::Starting;
        self.last_error = None;
        info!("Detection run {} activated", run);
        true
    }

    /// Request the running worker to stop. Returns false if nothing was running.
    pub fn deactivate(&mut self) -> bool {
        let Some(worker) = &self.worker else {
            debug!("DEACTIVATE ignored: no run active");
            return false;
        };
        if worker.cancel.is_cancelled() || self.phase == LoopPhase::Stopped {
            debug!("DEACTIVATE ignored: run {} already stopping", worker.run);
            return false;
        }

        worker.cancel.cancel();
        info!("Detection run {} deactivated", worker.run);
        self.status = Status::Offline;
        self.phase = LoopPhase::Stopping;
        self.threat_active = false;
        true
    }

    /// Apply a worker event. Events from superseded runs are ignored.
    pub fn handle_event(&mut self, event: &WorkerEvent) {
        if event.run != self.run_id {
            debug!("Ignoring event from stale run {}: {:?}", event.run, event.kind);
            return;
        }

        match &event.kind {
            WorkerEventKind::Phase(phase) => {
                // A stop request wins over late progress from the worker
                if !self.cancel_requested() {
                    self.phase = *phase;
                }
            }
            WorkerEventKind::DeviceError(message) => {
                warn!("Camera unavailable: {}", message);
                self.status = Status::Offline;
                self.last_error = Some(message.clone());
            }
            WorkerEventKind::StartError(message) => {
                warn!("Detection run {} could not start: {}", event.run, message);
                self.status = Status::Offline;
                self.last_error = Some(message.clone());
            }
            WorkerEventKind::Failed(message) => {
                warn!("Detection run {} failed: {}", event.run, message);
                self.status = Status::Offline;
                self.last_error = Some(message.clone());
            }
            WorkerEventKind::Threat { active } => {
                self.threat_active = *active && !self.cancel_requested();
            }
            WorkerEventKind::Stopped(stats) => {
                debug!("Run {} final stats: {:?}", event.run, stats);
                self.phase = LoopPhase::Stopped;
                self.status = Status::Offline;
                self.threat_active = false;
            }
        }
    }

    /// Stop any running worker and wait for it to release the camera
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!("Detection worker {} did not exit cleanly: {}", worker.run, e);
            }
        }
        info!("Guard shut down");
    }

    fn cancel_requested(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.cancel.is_cancelled())
    }

    fn worker_is_live(&self) -> bool {
        match &self.worker {
            Some(worker) => {
                !worker.cancel.is_cancelled()
                    && !worker.handle.is_finished()
                    && self.phase != LoopPhase::Stopped
            }
            None => false,
        }
    }
}

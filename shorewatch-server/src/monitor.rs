//! The territory monitor.
//!
//! One task owns the [`TransitionDetector`]. Location callbacks only enqueue
//! events on an mpsc channel, so the detector state is never shared:
//!
//! ```text
//! LocationSource ──callback──► mpsc ──► Monitor::run ──► classify ──► detector
//!                                           ▲                            │
//!                        backup poll ───────┘                            ▼
//!                                                    mpsc ──► dispatch worker ──► sinks
//! ```
//!
//! Alerts are handed to a single dispatch worker, which delivers them one at
//! a time in the order they were raised. Sinks run on the blocking pool, so
//! a slow sink delays later alerts but never the next position fix.
//!
//! When the source has been silent for a whole backup interval the monitor
//! asks it for its current position and runs that through the same pipeline.

use log::{debug, info, trace, warn};
use shorewatch_core::{
    AlertDispatcher, AlertEvent, AlertSink, LocationError, LocationEvent, LocationSource,
    PositionFix, TransitionDetector,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use crate::flash::FlashDriver;
use crate::sinks::{BroadcastSink, CommandSink, FlashSink, LogSink};
use crate::{AlertFrame, ServerError, Session};

/// Location events queued beyond this are dropped
const QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum MonitorMessage {
    Location(LocationEvent),
    Stop,
}

/// Control handle for a running [`Monitor`]
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorMessage>,
}

impl MonitorHandle {
    /// Ask the monitor to stop; returns false if it already has
    pub async fn stop(&self) -> bool {
        self.tx.send(MonitorMessage::Stop).await.is_ok()
    }
}

pub struct Monitor {
    session: Session,
    entity_id: String,
    source: Box<dyn LocationSource>,
    detector: TransitionDetector,
    /// Taken when the monitor starts running
    worker: Option<DispatchWorker>,
    alerts: mpsc::UnboundedSender<AlertEvent>,
    flash: FlashDriver,
    backup_poll: Duration,
    tx: mpsc::Sender<MonitorMessage>,
    rx: mpsc::Receiver<MonitorMessage>,
    started: Instant,
    last_fix_at: Option<Instant>,
}

impl Monitor {
    /// Build a monitor with the standard sinks; must be called from within a
    /// tokio runtime
    pub fn new(session: Session, source: Box<dyn LocationSource>) -> (Self, MonitorHandle) {
        let (args, config, tx_frames) = {
            let inner = session.read().unwrap();
            (inner.args.clone(), inner.config.clone(), inner.tx_frames.clone())
        };

        let flash = FlashDriver::new(tx_frames.clone());
        let mut dispatcher = AlertDispatcher::new(config.style.clone(), config.channels)
            .with_sink(Box::new(LogSink))
            .with_sink(Box::new(BroadcastSink::new(tx_frames, config.channels)))
            .with_sink(Box::new(FlashSink::new(flash.clone())));
        if let Some(command_line) = &args.notify_command {
            match CommandSink::parse(command_line) {
                Some(sink) => dispatcher.add_sink(Box::new(sink)),
                None => warn!("Ignoring empty --notify-command"),
            }
        }
        debug!("{:?}", dispatcher);

        let (alerts, alert_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = MonitorHandle { tx: tx.clone() };
        let monitor = Monitor {
            session,
            entity_id: args.entity,
            source,
            detector: TransitionDetector::new(config.detector),
            worker: Some(DispatchWorker {
                dispatcher,
                rx: alert_rx,
            }),
            alerts,
            flash,
            backup_poll: Duration::from_millis(config.backup_poll_ms),
            tx,
            rx,
            started: Instant::now(),
            last_fix_at: None,
        };
        (monitor, handle)
    }

    /// Add a sink next to the standard ones; only effective before the
    /// monitor runs
    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        if let Some(worker) = self.worker.as_mut() {
            worker.dispatcher.add_sink(sink);
        }
    }

    /// Run as a subsystem until shutdown is requested
    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        self.run_until(subsys.on_shutdown_requested()).await
    }

    /// Run until `shutdown` completes or [`MonitorHandle::stop`] is called
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tokio::pin!(shutdown);

        let dispatch_token = CancellationToken::new();
        let worker = self
            .worker
            .take()
            .map(|worker| tokio::spawn(worker.run(dispatch_token.clone())));

        let listener_tx = self.tx.clone();
        let subscription = self.source.subscribe(Box::new(move |event| {
            if let Err(e) = listener_tx.try_send(MonitorMessage::Location(event)) {
                warn!("Dropping location event: {}", e);
            }
        }));
        info!(
            "Monitoring '{}' from {} source, backup poll every {:?}",
            self.entity_id,
            self.source.name(),
            self.backup_poll
        );
        {
            let mut inner = self.session.write().unwrap();
            inner.status.running = true;
            inner.status.source = self.source.name().to_string();
        }

        let mut poll = tokio::time::interval_at(Instant::now() + self.backup_poll, self.backup_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! { biased;
                _ = &mut shutdown => {
                    debug!("Monitor shutdown requested");
                    break;
                },
                message = self.rx.recv() => match message {
                    Some(MonitorMessage::Location(LocationEvent::Fix(fix))) => {
                        self.last_fix_at = Some(Instant::now());
                        self.process_fix(fix);
                    }
                    Some(MonitorMessage::Location(LocationEvent::Error(e))) => {
                        self.location_error(e);
                    }
                    Some(MonitorMessage::Stop) | None => {
                        debug!("Monitor stop requested");
                        break;
                    }
                },
                _ = poll.tick() => {
                    self.backup_poll();
                }
            }
        }

        subscription.cancel();
        dispatch_token.cancel();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Dispatch worker failed: {}", e);
            }
        }
        self.flash.stop();
        self.detector.remove(&self.entity_id);
        self.session.write().unwrap().status.running = false;
        info!("Stopped monitoring '{}'", self.entity_id);
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn backup_poll(&mut self) {
        if let Some(at) = self.last_fix_at {
            if at.elapsed() < self.backup_poll {
                trace!("Backup poll skipped, last fix {:?} ago", at.elapsed());
                return;
            }
        }
        match self.source.current_position() {
            Ok(fix) => {
                debug!("Backup poll position {}", fix.position);
                self.process_fix(fix);
            }
            Err(e) => self.location_error(e),
        }
    }

    fn process_fix(&mut self, fix: PositionFix) {
        let verdict = self.session.classify(&fix.position);
        let now = self.now_ms();

        let alert = match self.detector.update(&self.entity_id, fix.position, &verdict, now) {
            Ok(alert) => alert,
            Err(e) => {
                warn!("Ignoring position update: {}", e);
                self.session.write().unwrap().status.rejected_updates += 1;
                return;
            }
        };
        trace!(
            "{} safe={} nearest='{}' {:.0} m",
            fix.position,
            verdict.safe,
            verdict.nearest_name,
            verdict.nearest_distance_m
        );

        {
            let mut inner = self.session.write().unwrap();
            inner.status.record_fix(&fix, verdict);
            if let Some(alert) = &alert {
                inner.status.alerts_raised += 1;
                inner.status.last_alert = Some(alert.clone());
            }
        }

        if let Some(alert) = alert {
            self.dispatch(alert);
        }
    }

    fn dispatch(&self, alert: AlertEvent) {
        info!(
            "{} at {}, '{}' {:.0} m away",
            alert.kind, alert.position, alert.nearest_boundary_name, alert.distance_meters
        );
        if self.alerts.send(alert).is_err() {
            warn!("Dispatch worker has stopped, alert not delivered");
        }
    }

    fn location_error(&self, error: LocationError) {
        warn!("Location source {}: {}", self.source.name(), error);
        let tx_frames = {
            let mut inner = self.session.write().unwrap();
            inner.status.last_location_error = Some(error);
            inner.tx_frames.clone()
        };
        let _ = tx_frames.send(AlertFrame::LocationError { error });
    }
}

/// Owns the dispatcher and delivers queued alerts strictly in order
struct DispatchWorker {
    dispatcher: AlertDispatcher,
    rx: mpsc::UnboundedReceiver<AlertEvent>,
}

impl DispatchWorker {
    /// Deliver until the queue closes or `token` is cancelled. A delivery
    /// still running at cancellation is abandoned, not awaited.
    async fn run(self, token: CancellationToken) {
        let DispatchWorker { dispatcher, mut rx } = self;
        let dispatcher = Arc::new(dispatcher);

        loop {
            let alert = tokio::select! { biased;
                _ = token.cancelled() => break,
                alert = rx.recv() => match alert {
                    Some(alert) => alert,
                    None => break,
                },
            };

            let kind = alert.kind;
            let d = dispatcher.clone();
            // Sinks are synchronous and may wait on a child process
            let delivery = tokio::task::spawn_blocking(move || d.dispatch(&alert));
            tokio::select! { biased;
                _ = token.cancelled() => {
                    debug!("Abandoning {} delivery", kind);
                    break;
                },
                report = delivery => match report {
                    Ok(report) if !report.all_delivered() => debug!(
                        "{}: {} of {} sinks failed",
                        kind,
                        report.failed.len(),
                        report.failed.len() + report.delivered.len()
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("{} delivery panicked: {}", kind, e),
                },
            }
        }
        debug!("Dispatch worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ChannelSource, ChannelSourceHandle};
    use shorewatch_core::{
        AlertChannels, AlertKind, AlertPresentation, BoundarySet, Classification, DetectorConfig,
        GeoPoint, MonitorConfig, Polygon, SinkError, ZoneStatus,
    };
    use std::sync::{mpsc as std_mpsc, Mutex};
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    fn square() -> Polygon {
        Polygon::new(
            "home",
            "Home waters",
            vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 1.0),
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(1.0, 0.0),
            ],
            Classification::Safe,
        )
        .unwrap()
    }

    fn fix(lat: f64, lng: f64) -> LocationEvent {
        LocationEvent::Fix(PositionFix::new(lat, lng, 5.0, 0))
    }

    /// Records deliveries; holds exit alerts until the gate opens
    struct GatedSink {
        gate: Mutex<std_mpsc::Receiver<()>>,
        delivered: Arc<Mutex<Vec<AlertKind>>>,
    }

    impl AlertSink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn channel(&self) -> AlertChannels {
            AlertChannels::NOTIFICATION
        }

        fn deliver(&self, event: &AlertEvent, _presentation: &AlertPresentation) -> Result<(), SinkError> {
            if event.kind == AlertKind::TerritoryExit {
                let _ = self.gate.lock().unwrap().recv_timeout(WAIT);
            }
            self.delivered.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    async fn start(
        config: MonitorConfig,
    ) -> (Session, ChannelSourceHandle, MonitorHandle, JoinHandle<Result<(), ServerError>>) {
        let session = Session::new_fake(config, BoundarySet::new(vec![square()], vec![]));
        let (source, handle) = ChannelSource::new();
        let (monitor, monitor_handle) = Monitor::new(session.clone(), Box::new(source));
        let task = tokio::spawn(monitor.run_until(std::future::pending()));
        while !handle.is_subscribed() {
            tokio::task::yield_now().await;
        }
        (session, handle, monitor_handle, task)
    }

    async fn wait_for<F: Fn(&Session) -> bool>(session: &Session, condition: F) {
        tokio::time::timeout(WAIT, async {
            while !condition(session) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_alert(rx: &mut broadcast::Receiver<AlertFrame>) -> AlertEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(AlertFrame::Alert { event, .. }) = rx.recv().await {
                    return event;
                }
            }
        })
        .await
        .expect("no alert received")
    }

    #[tokio::test]
    async fn test_exit_alert_reaches_clients() {
        let (session, source, monitor, task) = start(MonitorConfig::default()).await;
        let mut frames = session.subscribe_frames();

        source.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().fixes_processed == 1).await;
        assert_eq!(session.status().zone_status, ZoneStatus::Safe);

        source.push(fix(1.5, 0.5));
        let alert = next_alert(&mut frames).await;
        assert_eq!(alert.kind, AlertKind::TerritoryExit);
        assert_eq!(alert.nearest_boundary_name, "Home waters");

        let status = session.status();
        assert_eq!(status.zone_status, ZoneStatus::Unsafe);
        assert_eq!(status.alerts_raised, 1);
        assert!(status.running);

        assert!(monitor.stop().await);
        task.await.unwrap().unwrap();
        assert!(!session.status().running);
        assert!(!source.is_subscribed());
    }

    #[tokio::test]
    async fn test_invalid_position_is_rejected() {
        let (session, source, monitor, task) = start(MonitorConfig::default()).await;

        source.push(fix(f64::NAN, 0.5));
        wait_for(&session, |s| s.status().rejected_updates == 1).await;
        assert_eq!(session.status().fixes_processed, 0);
        assert_eq!(session.status().zone_status, ZoneStatus::Unknown);

        source.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().fixes_processed == 1).await;

        monitor.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_location_error_is_reported() {
        let (session, source, monitor, task) = start(MonitorConfig::default()).await;
        let mut frames = session.subscribe_frames();

        source.push(LocationEvent::Error(LocationError::PermissionDenied));
        let frame = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        assert_eq!(
            frame,
            AlertFrame::LocationError {
                error: LocationError::PermissionDenied
            }
        );
        assert_eq!(
            session.status().last_location_error,
            Some(LocationError::PermissionDenied)
        );

        monitor.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_backup_poll_uses_cached_position() {
        let config = MonitorConfig {
            backup_poll_ms: 50,
            ..Default::default()
        };
        let session = Session::new_fake(config, BoundarySet::new(vec![square()], vec![]));
        let (source, handle) = ChannelSource::new();
        // Remembered by the source but never delivered to the monitor
        assert!(!handle.push(fix(0.5, 0.5)));

        let (monitor, monitor_handle) = Monitor::new(session.clone(), Box::new(source));
        let task = tokio::spawn(monitor.run_until(std::future::pending()));

        wait_for(&session, |s| s.status().fixes_processed >= 1).await;
        assert_eq!(session.status().zone_status, ZoneStatus::Safe);

        monitor_handle.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_replaced_boundaries_apply_to_next_fix() {
        let (session, source, monitor, task) = start(MonitorConfig::default()).await;

        source.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().zone_status == ZoneStatus::Safe).await;

        session.replace_boundaries(BoundarySet::empty().into_shared());
        source.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().zone_status == ZoneStatus::Unsafe).await;
        let verdict = session.status().verdict.unwrap();
        assert!(!verdict.has_nearest());

        monitor.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_future_stops_monitor() {
        let session = Session::new_fake(MonitorConfig::default(), BoundarySet::empty());
        let (source, handle) = ChannelSource::new();
        let (monitor, _monitor_handle) = Monitor::new(session.clone(), Box::new(source));
        let token = tokio_util::sync::CancellationToken::new();
        let task = tokio::spawn(monitor.run_until(token.clone().cancelled_owned()));

        while !handle.is_subscribed() {
            tokio::task::yield_now().await;
        }
        token.cancel();
        task.await.unwrap().unwrap();
        assert!(!handle.is_subscribed());
    }

    #[tokio::test]
    async fn test_slow_sink_keeps_order_without_delaying_fixes() {
        let config = MonitorConfig {
            detector: DetectorConfig {
                exit_cooldown_ms: 0,
                enter_cooldown_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let session = Session::new_fake(config, BoundarySet::new(vec![square()], vec![]));
        let (source, handle) = ChannelSource::new();
        let (mut monitor, monitor_handle) = Monitor::new(session.clone(), Box::new(source));

        let (open_gate, gate) = std_mpsc::channel();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        monitor.add_sink(Box::new(GatedSink {
            gate: Mutex::new(gate),
            delivered: delivered.clone(),
        }));
        let task = tokio::spawn(monitor.run_until(std::future::pending()));
        while !handle.is_subscribed() {
            tokio::task::yield_now().await;
        }

        handle.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().fixes_processed == 1).await;
        handle.push(fix(1.5, 0.5));
        wait_for(&session, |s| s.status().fixes_processed == 2).await;

        // The exit alert is stuck in the sink, the next fix still goes through
        handle.push(fix(0.5, 0.5));
        wait_for(&session, |s| s.status().fixes_processed == 3).await;
        let status = session.status();
        assert_eq!(status.zone_status, ZoneStatus::Safe);
        assert_eq!(status.alerts_raised, 2);
        assert!(delivered.lock().unwrap().is_empty());

        open_gate.send(()).unwrap();
        tokio::time::timeout(WAIT, async {
            while delivered.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("alerts not delivered");
        assert_eq!(
            *delivered.lock().unwrap(),
            vec![AlertKind::TerritoryExit, AlertKind::TerritoryEnter]
        );

        monitor_handle.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_abandons_stuck_delivery() {
        let session = Session::new_fake(
            MonitorConfig::default(),
            BoundarySet::new(vec![square()], vec![]),
        );
        let (source, handle) = ChannelSource::new();
        let (mut monitor, monitor_handle) = Monitor::new(session.clone(), Box::new(source));

        // Gate never opens while the monitor runs
        let (open_gate, gate) = std_mpsc::channel();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        monitor.add_sink(Box::new(GatedSink {
            gate: Mutex::new(gate),
            delivered: delivered.clone(),
        }));
        let task = tokio::spawn(monitor.run_until(std::future::pending()));
        while !handle.is_subscribed() {
            tokio::task::yield_now().await;
        }

        handle.push(fix(0.5, 0.5));
        handle.push(fix(1.5, 0.5));
        wait_for(&session, |s| s.status().alerts_raised == 1).await;

        monitor_handle.stop().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop waited for the sink")
            .unwrap()
            .unwrap();
        assert!(!session.status().running);
        assert!(delivered.lock().unwrap().is_empty());
        let _ = open_gate.send(());
    }
}

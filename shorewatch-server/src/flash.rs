//! Screen flash driver.
//!
//! Walks the steps of a [`FlashRequest`] plan on tokio timers and publishes
//! a [`AlertFrame::Flash`] for every on/off edge. Only one flash runs at a
//! time: starting a new one cancels the previous one, and cancelling the
//! driver (monitor stop) ends whatever is running. A cancelled flash always
//! finishes with an "off" frame so clients are never left lit.

use log::{debug, trace};
use shorewatch_core::{FlashRequest, FlashStep};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::AlertFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOutcome {
    Completed,
    Cancelled,
}

#[derive(Clone)]
pub struct FlashDriver {
    tx_frames: broadcast::Sender<AlertFrame>,
    /// Parent of every flash; cancelled on stop
    token: CancellationToken,
    current: Arc<Mutex<Option<CancellationToken>>>,
    runtime: tokio::runtime::Handle,
}

impl FlashDriver {
    /// Create a driver; must be called from within a tokio runtime
    pub fn new(tx_frames: broadcast::Sender<AlertFrame>) -> Self {
        FlashDriver {
            tx_frames,
            token: CancellationToken::new(),
            current: Arc::new(Mutex::new(None)),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Start a flash sequence, cancelling any sequence still running
    pub fn start(&self, request: FlashRequest) -> JoinHandle<FlashOutcome> {
        let token = self.token.child_token();
        if let Some(previous) = self.current.lock().unwrap().replace(token.clone()) {
            previous.cancel();
        }

        let plan = request.plan();
        debug!(
            "Flash {} x{} over {} ms",
            request.color,
            request.flash_count(),
            request.total_duration_ms
        );
        let tx = self.tx_frames.clone();
        self.runtime
            .spawn(async move { run_plan(plan, request, tx, token).await })
    }

    /// Cancel the running flash and refuse to start new ones
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

fn frame(request: &FlashRequest, lit: bool) -> AlertFrame {
    AlertFrame::Flash {
        lit,
        color: request.color.clone(),
        intensity: if lit { request.intensity } else { 0.0 },
    }
}

async fn run_plan(
    plan: Vec<FlashStep>,
    request: FlashRequest,
    tx: broadcast::Sender<AlertFrame>,
    token: CancellationToken,
) -> FlashOutcome {
    let started = Instant::now();
    for step in plan {
        let at = started + Duration::from_millis(step.at_ms);
        tokio::select! { biased;
            _ = token.cancelled() => {
                let _ = tx.send(frame(&request, false));
                debug!("Flash cancelled");
                return FlashOutcome::Cancelled;
            }
            _ = tokio::time::sleep_until(at) => {}
        }
        trace!("Flash {} at {} ms", if step.lit { "on" } else { "off" }, step.at_ms);
        // Err only means no client is connected
        let _ = tx.send(frame(&request, step.lit));
    }
    FlashOutcome::Completed
}

//! Location sources for the server.
//!
//! - [`ChannelSource`]: positions are pushed in from outside (the HTTP
//!   position endpoint, or tests) through a [`ChannelSourceHandle`].
//! - [`ReplaySource`]: positions come from a JSON-lines track file, replayed
//!   with their original spacing divided by a speed factor.
//!
//! Track files hold one record per line; blank lines and lines starting
//! with `#` are ignored:
//!
//! ```text
//! {"timestampMs": 0, "lat": 10.50, "lng": 121.20, "accuracyM": 8}
//! {"timestampMs": 5000, "lat": 10.51, "lng": 121.21}
//! {"timestampMs": 9000, "error": "timeout"}
//! ```

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shorewatch_core::{
    LocationError, LocationEvent, LocationListener, LocationSource, PositionFix, Subscription,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ServerError;

// =============================================================================
// ChannelSource
// =============================================================================

#[derive(Default)]
struct ChannelShared {
    listener: Mutex<Option<(u64, LocationListener)>>,
    last_fix: Mutex<Option<PositionFix>>,
    last_error: Mutex<Option<LocationError>>,
    next_id: AtomicU64,
}

/// Source fed by [`ChannelSourceHandle::push`]
#[derive(Default)]
pub struct ChannelSource {
    shared: Arc<ChannelShared>,
}

/// Producer side of a [`ChannelSource`]; cheap to clone
#[derive(Clone)]
pub struct ChannelSourceHandle {
    shared: Arc<ChannelShared>,
}

impl ChannelSource {
    pub fn new() -> (Self, ChannelSourceHandle) {
        let source = ChannelSource::default();
        let handle = ChannelSourceHandle {
            shared: source.shared.clone(),
        };
        (source, handle)
    }
}

impl ChannelSourceHandle {
    /// Hand an event to the current subscriber.
    ///
    /// Returns false when nobody is subscribed; fixes are still remembered
    /// for [`LocationSource::current_position`].
    pub fn push(&self, event: LocationEvent) -> bool {
        match &event {
            LocationEvent::Fix(fix) => {
                *self.shared.last_fix.lock().unwrap() = Some(*fix);
                *self.shared.last_error.lock().unwrap() = None;
            }
            LocationEvent::Error(e) => {
                *self.shared.last_error.lock().unwrap() = Some(*e);
            }
        }

        let guard = self.shared.listener.lock().unwrap();
        match guard.as_ref() {
            Some((_, listener)) => {
                listener(event);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.listener.lock().unwrap().is_some()
    }
}

impl LocationSource for ChannelSource {
    fn name(&self) -> &str {
        "http"
    }

    fn subscribe(&mut self, listener: LocationListener) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        *self.shared.listener.lock().unwrap() = Some((id, listener));

        let shared = self.shared.clone();
        Subscription::new(move || {
            let mut guard = shared.listener.lock().unwrap();
            // A newer subscription may have replaced ours
            if matches!(guard.as_ref(), Some((current, _)) if *current == id) {
                *guard = None;
            }
        })
    }

    fn current_position(&mut self) -> Result<PositionFix, LocationError> {
        if let Some(fix) = *self.shared.last_fix.lock().unwrap() {
            return Ok(fix);
        }
        Err(self
            .shared
            .last_error
            .lock()
            .unwrap()
            .unwrap_or(LocationError::PositionUnavailable))
    }
}

// =============================================================================
// ReplaySource
// =============================================================================

/// One line of a track file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default)]
    pub accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LocationError>,
}

impl TrackRecord {
    pub fn fix(timestamp_ms: u64, lat: f64, lng: f64) -> Self {
        TrackRecord {
            timestamp_ms,
            lat: Some(lat),
            lng: Some(lng),
            accuracy_m: 0.0,
            error: None,
        }
    }

    fn to_event(&self) -> Option<LocationEvent> {
        if let Some(error) = self.error {
            return Some(LocationEvent::Error(error));
        }
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(LocationEvent::Fix(PositionFix::new(
                lat,
                lng,
                self.accuracy_m,
                self.timestamp_ms,
            ))),
            _ => None,
        }
    }
}

/// Parse a JSON-lines track
pub fn parse_track(text: &str) -> Result<Vec<TrackRecord>, ServerError> {
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: TrackRecord =
            serde_json::from_str(line).map_err(|e| ServerError::InvalidTrack {
                line: index + 1,
                message: e.to_string(),
            })?;
        if record.to_event().is_none() {
            return Err(ServerError::InvalidTrack {
                line: index + 1,
                message: "record needs lat and lng, or error".to_string(),
            });
        }
        records.push(record);
    }
    if records.is_empty() {
        return Err(ServerError::InvalidTrack {
            line: 0,
            message: "track is empty".to_string(),
        });
    }
    Ok(records)
}

/// Plays back a recorded track in real time (scaled by `speed`)
pub struct ReplaySource {
    track: Arc<Vec<TrackRecord>>,
    speed: f64,
    looping: bool,
    last_fix: Arc<Mutex<Option<PositionFix>>>,
    token: Option<CancellationToken>,
}

impl ReplaySource {
    pub fn new(track: Vec<TrackRecord>, speed: f64, looping: bool) -> Result<Self, ServerError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(ServerError::InvalidConfig(format!(
                "replay speed must be a positive number, not {}",
                speed
            )));
        }
        Ok(ReplaySource {
            track: Arc::new(track),
            speed,
            looping,
            last_fix: Arc::new(Mutex::new(None)),
            token: None,
        })
    }

    pub fn from_file(path: &Path, speed: f64, looping: bool) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        let track = parse_track(&text)?;
        info!("Loaded track {} with {} records", path.display(), track.len());
        Self::new(track, speed, looping)
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    fn scaled_delay(&self, gap_ms: u64) -> Duration {
        Duration::from_secs_f64(gap_ms as f64 / 1000.0 / self.speed)
    }
}

impl LocationSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn subscribe(&mut self, listener: LocationListener) -> Subscription {
        if let Some(previous) = self.token.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.token = Some(token.clone());

        let delays: Vec<Duration> = self
            .track
            .iter()
            .scan(None, |previous: &mut Option<u64>, record| {
                let gap = previous.map_or(0, |p| record.timestamp_ms.saturating_sub(p));
                *previous = Some(record.timestamp_ms);
                Some(self.scaled_delay(gap))
            })
            .collect();
        let track = self.track.clone();
        let last_fix = self.last_fix.clone();
        let looping = self.looping;
        let task_token = token.clone();

        tokio::spawn(async move {
            loop {
                for (record, delay) in track.iter().zip(delays.iter()) {
                    tokio::select! {
                        _ = task_token.cancelled() => {
                            debug!("Replay cancelled");
                            return;
                        }
                        _ = tokio::time::sleep(*delay) => {}
                    }
                    let Some(event) = record.to_event() else {
                        continue;
                    };
                    if let LocationEvent::Fix(fix) = &event {
                        *last_fix.lock().unwrap() = Some(*fix);
                    }
                    listener(event);
                }
                if !looping {
                    info!("Replay finished");
                    return;
                }
                debug!("Replay restarting");
            }
        });

        Subscription::new(move || token.cancel())
    }

    fn current_position(&mut self) -> Result<PositionFix, LocationError> {
        match *self.last_fix.lock().unwrap() {
            Some(fix) => Ok(fix),
            None => {
                warn!("Replay has not produced a position yet");
                Err(LocationError::PositionUnavailable)
            }
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

//! # Shorewatch Server
//!
//! Territory monitor with REST API and WebSocket alert stream.
//!
//! This crate runs the [`shorewatch_core`] pipeline on a live position feed:
//! - Loads boundary and land GeoJSON at startup (and on request)
//! - Subscribes to a location source (HTTP push or a replayed track)
//! - Detects territory exits, entries and proximity to boundaries
//! - Fans alerts out to the log, WebSocket clients and a flash driver
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   shorewatch-server                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐ │
//! │  │ REST API    │  │ WebSocket   │  │ LocationSource   │ │
//! │  │ (axum)      │  │ (alerts)    │  │ (http / replay)  │ │
//! │  └──────┬──────┘  └──────▲──────┘  └────────┬─────────┘ │
//! │         │                │                  │ mpsc      │
//! │         ▼                │                  ▼           │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              Session (Arc<RwLock>)                  ││
//! │  │  - Boundary set                                     ││
//! │  │  - Monitor status                                   ││
//! │  │  - Alert broadcast channel                          ││
//! │  └─────────────────────────────────────────────────────┘│
//! │                          ▲                              │
//! │  ┌───────────────────────┴─────────────────────────────┐│
//! │  │  Monitor: classify → TransitionDetector → dispatch  ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## REST API
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /api/v1/status` | Monitor status and last verdict |
//! | `GET /api/v1/boundaries` | Loaded boundaries |
//! | `GET /api/v1/config` | Effective configuration |
//! | `POST /api/v1/position` | Push a position fix (http source) |
//! | `POST /api/v1/boundaries/reload` | Re-read boundary files |
//! | `WS /api/v1/alerts` | Alert and flash frame stream |
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-b, --boundaries` - GeoJSON file with maritime boundaries (required)
//! - `-l, --land` - GeoJSON file with land territory
//! - `-s, --source` - `http` (default) or `replay`
//! - `-p, --port` - HTTP server port (default: 6580)
//! - `-v` - Increase verbosity (use multiple times)

use clap::Parser;
use serde::Serialize;
use shorewatch_core::{
    classify, AlertEvent, ContainmentRule, GeoPoint, LocationError, MonitorConfig, PositionFix,
    SharedBoundarySet, ZoneStatus, ZoneVerdict,
};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod config;
pub mod flash;
pub mod monitor;
pub mod sinks;
pub mod sources;
pub mod web;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the alert frame broadcast channel
const FRAME_CHANNEL_CAPACITY: usize = 64;

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Positions are pushed through `POST /api/v1/position`
    #[default]
    Http,
    /// Positions are read from a JSON-lines track file
    Replay,
}

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 6580)]
    pub port: u16,

    /// Configuration file (JSON). Defaults to config.json in the user config directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// GeoJSON file with maritime boundaries
    #[arg(short, long)]
    pub boundaries: PathBuf,

    /// GeoJSON file with land territory
    #[arg(short, long)]
    pub land: Option<PathBuf>,

    /// Where positions come from
    #[arg(short, long, default_value_t, value_enum)]
    pub source: SourceKind,

    /// Track file for the replay source
    #[arg(long)]
    pub replay_file: Option<PathBuf>,

    /// Replay speed factor; 2.0 plays a track twice as fast
    #[arg(long, default_value_t = 1.0)]
    pub replay_speed: f64,

    /// Restart the replay track when it ends
    #[arg(long, default_value_t = false)]
    pub replay_loop: bool,

    /// Name of the tracked vessel
    #[arg(short, long, default_value = "vessel")]
    pub entity: String,

    /// Directory with a static web client, served under /
    #[arg(long)]
    pub web_root: Option<PathBuf>,

    /// Command run with title and body for every alert notification, e.g. notify-send
    #[arg(long)]
    pub notify_command: Option<String>,

    /// Override exitCooldownMs
    #[arg(long)]
    pub exit_cooldown_ms: Option<u64>,

    /// Override enterCooldownMs
    #[arg(long)]
    pub enter_cooldown_ms: Option<u64>,

    /// Override proximityCooldownMs
    #[arg(long)]
    pub proximity_cooldown_ms: Option<u64>,

    /// Override proximityInnerRadiusM
    #[arg(long)]
    pub proximity_inner_m: Option<f64>,

    /// Override proximityOuterRadiusM
    #[arg(long)]
    pub proximity_outer_m: Option<f64>,

    /// Override backupPollMs
    #[arg(long)]
    pub backup_poll_ms: Option<u64>,

    /// Treat any boundary polygon as safe, regardless of classification
    #[arg(long, default_value_t = false)]
    pub any_boundary: bool,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Cannot read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot parse configuration: {0}")]
    ParseConfig(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] shorewatch_core::ConfigError),
    #[error("{0}")]
    Boundary(#[from] shorewatch_core::BoundaryError),
    #[error("Replay source needs --replay-file")]
    MissingReplayFile,
    #[error("Invalid track line {line}: {message}")]
    InvalidTrack { line: usize, message: String },
}

/// Frame sent to WebSocket clients on `/api/v1/alerts`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AlertFrame {
    #[serde(rename_all = "camelCase")]
    Alert {
        event: AlertEvent,
        presentation: shorewatch_core::AlertPresentation,
    },
    #[serde(rename_all = "camelCase")]
    Flash {
        lit: bool,
        color: String,
        intensity: f32,
    },
    #[serde(rename_all = "camelCase")]
    LocationError { error: LocationError },
}

/// What the monitor last saw, served by `/api/v1/status`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub entity_id: String,
    pub source: String,
    pub zone_status: ZoneStatus,
    pub last_position: Option<GeoPoint>,
    pub accuracy_m: Option<f64>,
    pub last_fix_at: Option<chrono::DateTime<chrono::Utc>>,
    pub verdict: Option<ZoneVerdict>,
    pub fixes_processed: u64,
    pub rejected_updates: u64,
    pub alerts_raised: u64,
    pub last_alert: Option<AlertEvent>,
    pub last_location_error: Option<LocationError>,
}

impl MonitorStatus {
    pub(crate) fn record_fix(&mut self, fix: &PositionFix, verdict: ZoneVerdict) {
        self.zone_status = ZoneStatus::from_safe(verdict.safe);
        self.last_position = Some(fix.position);
        self.accuracy_m = Some(fix.accuracy_m);
        self.last_fix_at = Some(chrono::Utc::now());
        self.verdict = Some(verdict);
        self.fixes_processed += 1;
    }
}

pub struct SessionInner {
    pub args: Cli,
    pub config: MonitorConfig,
    pub boundaries: SharedBoundarySet,
    pub status: MonitorStatus,
    pub tx_frames: broadcast::Sender<AlertFrame>,
}

#[derive(Clone)]
pub struct Session {
    pub inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, SessionInner>, PoisonError<RwLockReadGuard<'_, SessionInner>>>
    {
        self.inner.read()
    }

    pub fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, SessionInner>, PoisonError<RwLockWriteGuard<'_, SessionInner>>>
    {
        self.inner.write()
    }

    pub fn new(args: Cli, config: MonitorConfig, boundaries: SharedBoundarySet) -> Self {
        let (tx_frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Session {
            inner: Arc::new(RwLock::new(SessionInner {
                status: MonitorStatus {
                    entity_id: args.entity.clone(),
                    ..Default::default()
                },
                args,
                config,
                boundaries,
                tx_frames,
            })),
        }
    }

    #[cfg(test)]
    pub fn new_fake(config: MonitorConfig, boundaries: shorewatch_core::BoundarySet) -> Self {
        // Nothing is started; only for tests
        Self::new(
            Cli::parse_from(["shorewatch-server", "-b", "boundaries.geojson"]),
            config,
            boundaries.into_shared(),
        )
    }

    pub fn args(&self) -> Cli {
        self.read().unwrap().args.clone()
    }

    pub fn config(&self) -> MonitorConfig {
        self.read().unwrap().config.clone()
    }

    pub fn containment_rule(&self) -> ContainmentRule {
        self.read().unwrap().config.containment_rule
    }

    /// Current boundary set; cheap, the set is shared
    pub fn boundaries(&self) -> SharedBoundarySet {
        self.read().unwrap().boundaries.clone()
    }

    /// Swap in a new boundary set; fixes classified afterwards use it
    pub fn replace_boundaries(&self, boundaries: SharedBoundarySet) {
        self.write().unwrap().boundaries = boundaries;
    }

    pub fn status(&self) -> MonitorStatus {
        self.read().unwrap().status.clone()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<AlertFrame> {
        self.read().unwrap().tx_frames.subscribe()
    }

    pub fn frame_sender(&self) -> broadcast::Sender<AlertFrame> {
        self.read().unwrap().tx_frames.clone()
    }

    /// Classify a position against the current boundaries
    pub fn classify(&self, position: &GeoPoint) -> ZoneVerdict {
        let (boundaries, rule) = {
            let inner = self.read().unwrap();
            (inner.boundaries.clone(), inner.config.containment_rule)
        };
        classify(position, &boundaries, rule)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

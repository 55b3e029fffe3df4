//! Transition Detector
//!
//! Per-entity state machine that turns a stream of [`ZoneVerdict`]s into
//! [`AlertEvent`]s.
//!
//! ```text
//!              first fix (no alert)
//!   Unknown ───────────────────────────┐
//!                                      ▼
//!            ┌──── TerritoryExit ──── Safe ◄─┐
//!            ▼                               │
//!          Unsafe ───── TerritoryEnter ──────┘
//! ```
//!
//! While `Safe` with no state change, a nearest boundary inside the
//! proximity band raises a `ProximityWarning`.
//!
//! Every alert kind has its own cooldown clock. A suppressed transition still
//! records the new state; it only skips the alert.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::alert::{AlertEvent, AlertKind};
use crate::classifier::ZoneVerdict;
use crate::error::PositionError;
use crate::geo::GeoPoint;

/// Zone status of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    /// No classification recorded yet
    Unknown,
    Safe,
    Unsafe,
}

impl Default for ZoneStatus {
    fn default() -> Self {
        ZoneStatus::Unknown
    }
}

impl ZoneStatus {
    pub fn from_safe(safe: bool) -> Self {
        if safe {
            ZoneStatus::Safe
        } else {
            ZoneStatus::Unsafe
        }
    }
}

impl std::fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneStatus::Unknown => write!(f, "Unknown"),
            ZoneStatus::Safe => write!(f, "Safe"),
            ZoneStatus::Unsafe => write!(f, "Unsafe"),
        }
    }
}

/// Cooldowns and proximity band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    pub exit_cooldown_ms: u64,
    pub enter_cooldown_ms: u64,
    pub proximity_cooldown_ms: u64,
    /// Proximity band lower bound (exclusive), meters
    pub proximity_inner_radius_m: f64,
    /// Proximity band upper bound (exclusive), meters
    pub proximity_outer_radius_m: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            exit_cooldown_ms: 10_000,
            enter_cooldown_ms: 30_000,
            proximity_cooldown_ms: 60_000,
            proximity_inner_radius_m: 1000.0,
            proximity_outer_radius_m: 5000.0,
        }
    }
}

impl DetectorConfig {
    pub fn cooldown_ms(&self, kind: AlertKind) -> u64 {
        match kind {
            AlertKind::TerritoryExit => self.exit_cooldown_ms,
            AlertKind::TerritoryEnter => self.enter_cooldown_ms,
            AlertKind::ProximityWarning => self.proximity_cooldown_ms,
        }
    }

    /// True if `distance_m` lies strictly inside the proximity band
    pub fn in_proximity_band(&self, distance_m: f64) -> bool {
        distance_m > self.proximity_inner_radius_m && distance_m < self.proximity_outer_radius_m
    }
}

/// State kept for one monitored subject
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub last_position: Option<GeoPoint>,
    pub last_zone_status: ZoneStatus,
    /// Time each alert kind last fired
    pub last_alert_timestamp: HashMap<AlertKind, u64>,
    pub last_verdict: Option<ZoneVerdict>,
    pub last_update_ms: Option<u64>,
    pub fixes_processed: u64,
}

impl TrackedEntity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `kind` is outside its cooldown at `now_ms`.
    ///
    /// Kinds that never fired are always ready. A clock that went backwards
    /// counts as zero elapsed time.
    pub fn cooldown_elapsed(&self, kind: AlertKind, now_ms: u64, config: &DetectorConfig) -> bool {
        match self.last_alert_timestamp.get(&kind) {
            Some(&last) => now_ms.saturating_sub(last) > config.cooldown_ms(kind),
            None => true,
        }
    }

    /// Apply one classified position.
    ///
    /// Returns the alert to emit, if any. The position is validated before
    /// any state changes, so a rejected update leaves the entity untouched.
    pub fn observe(
        &mut self,
        position: GeoPoint,
        verdict: &ZoneVerdict,
        now_ms: u64,
        config: &DetectorConfig,
    ) -> Result<Option<AlertEvent>, PositionError> {
        if !position.is_valid() {
            return Err(PositionError::InvalidPosition {
                lat: position.lat,
                lng: position.lng,
            });
        }

        let previous = self.last_zone_status;
        let current = ZoneStatus::from_safe(verdict.safe);

        let candidate = match (previous, current) {
            (ZoneStatus::Unknown, _) => None,
            (ZoneStatus::Safe, ZoneStatus::Unsafe) => Some(AlertKind::TerritoryExit),
            (ZoneStatus::Unsafe, ZoneStatus::Safe) => Some(AlertKind::TerritoryEnter),
            (ZoneStatus::Safe, ZoneStatus::Safe)
                if config.in_proximity_band(verdict.nearest_distance_m) =>
            {
                Some(AlertKind::ProximityWarning)
            }
            _ => None,
        };

        let alert = match candidate {
            Some(kind) if self.cooldown_elapsed(kind, now_ms, config) => {
                self.last_alert_timestamp.insert(kind, now_ms);
                Some(AlertEvent {
                    kind,
                    position,
                    nearest_boundary_name: verdict.nearest_name.clone(),
                    distance_meters: verdict.nearest_distance_m,
                    timestamp: now_ms,
                })
            }
            _ => None,
        };

        self.last_position = Some(position);
        self.last_zone_status = current;
        self.last_verdict = Some(verdict.clone());
        self.last_update_ms = Some(now_ms);
        self.fixes_processed += 1;

        Ok(alert)
    }
}

/// Owns the tracked state of every monitored entity
#[derive(Debug, Default)]
pub struct TransitionDetector {
    config: DetectorConfig,
    entities: HashMap<String, TrackedEntity>,
}

impl TransitionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        TransitionDetector {
            config,
            entities: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Process a classified position for an entity, creating it on first use
    pub fn update(
        &mut self,
        entity_id: &str,
        position: GeoPoint,
        verdict: &ZoneVerdict,
        now_ms: u64,
    ) -> Result<Option<AlertEvent>, PositionError> {
        if !position.is_valid() {
            return Err(PositionError::InvalidPosition {
                lat: position.lat,
                lng: position.lng,
            });
        }
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .observe(position, verdict, now_ms, &self.config)
    }

    pub fn entity(&self, entity_id: &str) -> Option<&TrackedEntity> {
        self.entities.get(entity_id)
    }

    /// Stop tracking an entity, discarding its state
    pub fn remove(&mut self, entity_id: &str) -> Option<TrackedEntity> {
        self.entities.remove(entity_id)
    }

    /// Discard all tracked state
    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

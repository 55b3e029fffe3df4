//! Alert events and the dispatcher contract.
//!
//! The detector produces [`AlertEvent`]s. Turning those into sound, light,
//! notifications and vibration is the job of pluggable [`AlertSink`]s; this
//! module only decides *what* each channel should present
//! ([`AlertPresentation`]) and isolates sinks from each other.
//!
//! # Channels
//!
//! | Channel      | Request                 | Severity selects           |
//! |--------------|-------------------------|----------------------------|
//! | Audio        | [`SirenRequest`]        | clip and repeat count      |
//! | Flash        | [`FlashRequest`]        | color                      |
//! | Notification | [`NotificationRequest`] | `require_interaction`      |
//! | Haptic       | [`VibrationPattern`]    | pattern length             |

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

// =============================================================================
// Alert Events
// =============================================================================

/// Kind of alert emitted by the transition detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    /// Left safe territory
    TerritoryExit,
    /// Returned to safe territory
    TerritoryEnter,
    /// Still safe, but close to a boundary
    ProximityWarning,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [
        AlertKind::TerritoryExit,
        AlertKind::TerritoryEnter,
        AlertKind::ProximityWarning,
    ];

    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::TerritoryExit => Severity::Critical,
            AlertKind::ProximityWarning => Severity::Warning,
            AlertKind::TerritoryEnter => Severity::Info,
        }
    }

    /// Stable tag, used to deduplicate notifications of the same kind
    pub fn tag(&self) -> &'static str {
        match self {
            AlertKind::TerritoryExit => "territory-exit",
            AlertKind::TerritoryEnter => "territory-enter",
            AlertKind::ProximityWarning => "proximity-warning",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::TerritoryExit => write!(f, "Territory exit"),
            AlertKind::TerritoryEnter => write!(f, "Territory enter"),
            AlertKind::ProximityWarning => write!(f, "Proximity warning"),
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An alert emitted on a meaningful zone transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub position: GeoPoint,
    pub nearest_boundary_name: String,
    pub distance_meters: f64,
    /// Monotonic timestamp in milliseconds
    pub timestamp: u64,
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

// =============================================================================
// Channel Requests
// =============================================================================

bitflags! {
    /// Set of alert output channels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AlertChannels: u8 {
        const AUDIO = 0b0001;
        const FLASH = 0b0010;
        const NOTIFICATION = 0b0100;
        const HAPTIC = 0b1000;
    }
}

impl Default for AlertChannels {
    fn default() -> Self {
        AlertChannels::all()
    }
}

/// Siren clip, selected by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SirenClip {
    /// Continuous high-pitch siren
    Emergency,
    /// Two-tone warning
    Warning,
    /// Short chime
    Chime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SirenRequest {
    pub clip: SirenClip,
    /// Playback volume (0.0 - 1.0)
    pub volume: f32,
    /// Number of times to play the clip
    pub repeat: u32,
}

/// Longest flash a configuration may ask for
pub const MAX_FLASH_DURATION_MS: u64 = 60_000;

/// Upper bound on on/off cycles in one flash plan
pub const MAX_FLASH_CYCLES: u64 = 500;

/// Screen flash request: alternate on/off every `interval_ms` for
/// `total_duration_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashRequest {
    pub color: String,
    pub total_duration_ms: u64,
    pub interval_ms: u64,
    /// Overlay opacity while lit (0.0 - 1.0)
    pub intensity: f32,
}

/// One step of a flash plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashStep {
    /// Offset from the start of the flash in milliseconds
    pub at_ms: u64,
    pub lit: bool,
}

impl FlashRequest {
    /// Number of on/off cycles that fit in the total duration (at least one)
    pub fn flash_count(&self) -> u64 {
        self.schedule().0
    }

    /// Deterministic on/off schedule.
    ///
    /// Always ends with an "off" step no later than `total_duration_ms`, so a
    /// driver that simply walks the plan terminates on its own. Requests
    /// asking for more than [`MAX_FLASH_CYCLES`] cycles are stretched to that
    /// many cycles over the same duration.
    pub fn plan(&self) -> Vec<FlashStep> {
        let (count, interval) = self.schedule();
        let mut steps = Vec::with_capacity(2 * count as usize);
        for i in 0..count {
            let start = i.saturating_mul(2).saturating_mul(interval);
            steps.push(FlashStep { at_ms: start, lit: true });
            steps.push(FlashStep {
                at_ms: start.saturating_add(interval),
                lit: false,
            });
        }
        steps
    }

    /// Cycle count and half-period in milliseconds
    fn schedule(&self) -> (u64, u64) {
        let period = self.interval_ms.saturating_mul(2);
        if self.interval_ms == 0 || period > self.total_duration_ms {
            // Single flash spanning the whole duration
            return (1, self.total_duration_ms / 2);
        }
        let cycles = self.total_duration_ms / period;
        if cycles > MAX_FLASH_CYCLES {
            (MAX_FLASH_CYCLES, self.total_duration_ms / (2 * MAX_FLASH_CYCLES))
        } else {
            (cycles, self.interval_ms)
        }
    }
}

/// System notification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// Notifications with the same tag replace each other
    pub tag: String,
    pub require_interaction: bool,
}

/// Vibration pattern: alternating on/off durations in milliseconds,
/// starting with "on"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibrationPattern(pub Vec<u32>);

impl VibrationPattern {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => VibrationPattern(vec![500, 200, 500, 200, 500, 200, 1000]),
            Severity::Warning => VibrationPattern(vec![300, 150, 300]),
            Severity::Info => VibrationPattern(vec![200]),
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.0.iter().map(|&d| d as u64).sum()
    }
}

// =============================================================================
// Presentation
// =============================================================================

/// Configurable look and feel of alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertStyle {
    /// Flash color override; by default the color follows severity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_color: Option<String>,
    pub flash_duration_ms: u64,
    pub flash_interval_ms: u64,
    pub flash_intensity: f32,
    pub audio_volume: f32,
    pub notification_icon: String,
}

impl Default for AlertStyle {
    fn default() -> Self {
        AlertStyle {
            flash_color: None,
            flash_duration_ms: 3000,
            flash_interval_ms: 150,
            flash_intensity: 0.8,
            audio_volume: 1.0,
            notification_icon: "/icons/alert.png".to_string(),
        }
    }
}

/// Everything each channel needs to present one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPresentation {
    pub severity: Severity,
    pub siren: SirenRequest,
    pub flash: FlashRequest,
    pub notification: NotificationRequest,
    pub vibration: VibrationPattern,
}

impl AlertPresentation {
    pub fn for_event(event: &AlertEvent, style: &AlertStyle) -> Self {
        let severity = event.severity();

        let (clip, repeat, default_color) = match severity {
            Severity::Critical => (SirenClip::Emergency, 3, "#ff1744"),
            Severity::Warning => (SirenClip::Warning, 1, "#ffab00"),
            Severity::Info => (SirenClip::Chime, 1, "#00c853"),
        };

        let title = match event.kind {
            AlertKind::TerritoryExit => "You have left safe waters".to_string(),
            AlertKind::TerritoryEnter => "Back in safe waters".to_string(),
            AlertKind::ProximityWarning => "Approaching boundary".to_string(),
        };

        let body = if event.nearest_boundary_name.is_empty() {
            format!("Position {}", event.position)
        } else {
            format!(
                "{} is {} away (position {})",
                event.nearest_boundary_name,
                format_distance(event.distance_meters),
                event.position
            )
        };

        AlertPresentation {
            severity,
            siren: SirenRequest {
                clip,
                volume: style.audio_volume.clamp(0.0, 1.0),
                repeat,
            },
            flash: FlashRequest {
                color: style
                    .flash_color
                    .clone()
                    .unwrap_or_else(|| default_color.to_string()),
                total_duration_ms: style.flash_duration_ms,
                interval_ms: style.flash_interval_ms,
                intensity: style.flash_intensity.clamp(0.0, 1.0),
            },
            notification: NotificationRequest {
                title,
                body,
                icon: style.notification_icon.clone(),
                tag: event.kind.tag().to_string(),
                require_interaction: severity == Severity::Critical,
            },
            vibration: VibrationPattern::for_severity(severity),
        }
    }
}

/// Human readable distance: meters below 1 km, otherwise km with one decimal
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() {
        "unknown distance".to_string()
    } else if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

// =============================================================================
// Sinks & Dispatcher
// =============================================================================

/// Failure reported by a sink. Always soft: logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// A side-effect channel for alerts.
///
/// Implementations must return quickly: anything long-running (playing a
/// clip, running a flash sequence) should be handed off, not awaited.
pub trait AlertSink: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Channel(s) this sink serves
    fn channel(&self) -> AlertChannels;

    /// Present the alert
    fn deliver(&self, event: &AlertEvent, presentation: &AlertPresentation) -> Result<(), SinkError>;
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SinkError)>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans alerts out to every sink on an enabled channel
pub struct AlertDispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    enabled: AlertChannels,
    style: AlertStyle,
}

impl AlertDispatcher {
    pub fn new(style: AlertStyle, enabled: AlertChannels) -> Self {
        AlertDispatcher {
            sinks: Vec::new(),
            enabled,
            style,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn style(&self) -> &AlertStyle {
        &self.style
    }

    pub fn enabled_channels(&self) -> AlertChannels {
        self.enabled
    }

    /// Deliver an alert to every enabled sink.
    ///
    /// Each sink is attempted independently; failures are logged and
    /// collected in the report.
    pub fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let presentation = AlertPresentation::for_event(event, &self.style);
        let mut report = DispatchReport::default();

        for sink in &self.sinks {
            if !self.enabled.intersects(sink.channel()) {
                continue;
            }
            match sink.deliver(event, &presentation) {
                Ok(()) => {
                    debug!("{}: delivered {} alert", sink.name(), event.kind);
                    report.delivered.push(sink.name().to_string());
                }
                Err(e) => {
                    warn!("{}: failed to deliver {} alert: {}", sink.name(), event.kind, e);
                    report.failed.push((sink.name().to_string(), e));
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn exit_event() -> AlertEvent {
        AlertEvent {
            kind: AlertKind::TerritoryExit,
            position: GeoPoint::new(10.5, 121.2),
            nearest_boundary_name: "Sample EEZ".to_string(),
            distance_meters: 1520.0,
            timestamp: 1000,
        }
    }

    struct RecordingSink {
        name: &'static str,
        channel: AlertChannels,
        fail: bool,
        seen: Arc<Mutex<Vec<AlertKind>>>,
    }

    impl AlertSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        fn channel(&self) -> AlertChannels {
            self.channel
        }

        fn deliver(&self, event: &AlertEvent, _: &AlertPresentation) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::PermissionDenied("notifications blocked".into()));
            }
            self.seen.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    #[test]
    fn test_severity_order() {
        assert!(AlertKind::TerritoryExit.severity() > AlertKind::ProximityWarning.severity());
        assert!(AlertKind::ProximityWarning.severity() > AlertKind::TerritoryEnter.severity());
    }

    #[test]
    fn test_presentation_for_exit() {
        let p = AlertPresentation::for_event(&exit_event(), &AlertStyle::default());
        assert_eq!(p.severity, Severity::Critical);
        assert_eq!(p.siren.clip, SirenClip::Emergency);
        assert_eq!(p.notification.tag, "territory-exit");
        assert!(p.notification.require_interaction);
        assert!(p.notification.body.contains("Sample EEZ"));
        assert!(p.notification.body.contains("1.5 km"));
        assert_eq!(p.flash.total_duration_ms, 3000);
        assert!(p.vibration.0.len() > VibrationPattern::for_severity(Severity::Info).0.len());
    }

    #[test]
    fn test_style_overrides() {
        let style = AlertStyle {
            flash_color: Some("#ffffff".to_string()),
            audio_volume: 4.0,
            ..AlertStyle::default()
        };
        let p = AlertPresentation::for_event(&exit_event(), &style);
        assert_eq!(p.flash.color, "#ffffff");
        assert_eq!(p.siren.volume, 1.0);
    }

    #[test]
    fn test_flash_plan_terminates_within_duration() {
        let flash = FlashRequest {
            color: "#ff0000".to_string(),
            total_duration_ms: 3000,
            interval_ms: 150,
            intensity: 0.8,
        };
        let plan = flash.plan();
        assert_eq!(flash.flash_count(), 10);
        assert_eq!(plan.len(), 20);
        assert!(plan[0].lit);
        let last = plan.last().unwrap();
        assert!(!last.lit);
        assert!(last.at_ms <= 3000);
        // Strictly increasing offsets, alternating state
        for pair in plan.windows(2) {
            assert!(pair[1].at_ms > pair[0].at_ms);
            assert_ne!(pair[1].lit, pair[0].lit);
        }
    }

    #[test]
    fn test_flash_plan_degenerate_interval() {
        let flash = FlashRequest {
            color: "#ff0000".to_string(),
            total_duration_ms: 1000,
            interval_ms: 0,
            intensity: 1.0,
        };
        let plan = flash.plan();
        assert_eq!(plan, vec![
            FlashStep { at_ms: 0, lit: true },
            FlashStep { at_ms: 500, lit: false },
        ]);
    }

    #[test]
    fn test_flash_plan_is_bounded() {
        let style = AlertStyle {
            flash_duration_ms: u64::MAX,
            flash_interval_ms: 1,
            ..AlertStyle::default()
        };
        let flash = AlertPresentation::for_event(&exit_event(), &style).flash;
        let plan = flash.plan();
        assert_eq!(flash.flash_count(), MAX_FLASH_CYCLES);
        assert_eq!(plan.len(), 2 * MAX_FLASH_CYCLES as usize);
        for pair in plan.windows(2) {
            assert!(pair[1].at_ms > pair[0].at_ms);
        }

        // Dense requests are stretched but still fill the duration
        let flash = FlashRequest {
            color: "#ff0000".to_string(),
            total_duration_ms: MAX_FLASH_DURATION_MS,
            interval_ms: 1,
            intensity: 1.0,
        };
        let plan = flash.plan();
        assert_eq!(plan.len(), 2 * MAX_FLASH_CYCLES as usize);
        assert_eq!(plan[1].at_ms, 60);
        assert_eq!(plan.last().unwrap().at_ms, MAX_FLASH_DURATION_MS);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::new(AlertStyle::default(), AlertChannels::all())
            .with_sink(Box::new(RecordingSink {
                name: "notification",
                channel: AlertChannels::NOTIFICATION,
                fail: true,
                seen: seen.clone(),
            }))
            .with_sink(Box::new(RecordingSink {
                name: "audio",
                channel: AlertChannels::AUDIO,
                fail: false,
                seen: seen.clone(),
            }));

        let report = dispatcher.dispatch(&exit_event());
        assert_eq!(report.delivered, vec!["audio".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "notification");
        assert_eq!(*seen.lock().unwrap(), vec![AlertKind::TerritoryExit]);
    }

    #[test]
    fn test_disabled_channel_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::new(AlertStyle::default(), AlertChannels::AUDIO)
            .with_sink(Box::new(RecordingSink {
                name: "haptic",
                channel: AlertChannels::HAPTIC,
                fail: false,
                seen: seen.clone(),
            }));
        let report = dispatcher.dispatch(&exit_event());
        assert!(report.delivered.is_empty());
        assert!(report.all_delivered());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(850.4), "850 m");
        assert_eq!(format_distance(2500.0), "2.5 km");
        assert_eq!(format_distance(f64::INFINITY), "unknown distance");
    }
}

//! Monitor configuration.
//!
//! All values have defaults and can be overridden from a JSON document using
//! camelCase keys; missing keys keep their defaults:
//!
//! ```json
//! {
//!   "exitCooldownMs": 10000,
//!   "proximityOuterRadiusM": 8000,
//!   "flashColor": "#ff0000",
//!   "channels": "AUDIO | FLASH"
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::alert::{AlertChannels, AlertStyle, MAX_FLASH_DURATION_MS};
use crate::classifier::ContainmentRule;
use crate::detector::DetectorConfig;
use crate::error::ConfigError;

/// Default interval of the backup position poll
pub const DEFAULT_BACKUP_POLL_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub detector: DetectorConfig,
    #[serde(flatten)]
    pub style: AlertStyle,
    pub containment_rule: ContainmentRule,
    pub channels: AlertChannels,
    pub backup_poll_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            detector: DetectorConfig::default(),
            style: AlertStyle::default(),
            containment_rule: ContainmentRule::default(),
            channels: AlertChannels::default(),
            backup_poll_ms: DEFAULT_BACKUP_POLL_MS,
        }
    }
}

impl MonitorConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check for values that make the monitor misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if !(d.proximity_inner_radius_m >= 0.0) {
            return Err(ConfigError::NegativeInnerRadius);
        }
        if !(d.proximity_outer_radius_m > d.proximity_inner_radius_m) {
            return Err(ConfigError::EmptyProximityBand);
        }
        if self.backup_poll_ms == 0 {
            return Err(ConfigError::ZeroBackupPoll);
        }
        if self.style.flash_interval_ms == 0 {
            return Err(ConfigError::ZeroFlashInterval);
        }
        if self.style.flash_duration_ms > MAX_FLASH_DURATION_MS {
            return Err(ConfigError::FlashTooLong {
                value: self.style.flash_duration_ms,
                max: MAX_FLASH_DURATION_MS,
            });
        }
        if !(0.0..=1.0).contains(&self.style.flash_intensity) {
            return Err(ConfigError::OutOfRange("flashIntensity"));
        }
        if !(0.0..=1.0).contains(&self.style.audio_volume) {
            return Err(ConfigError::OutOfRange("audioVolume"));
        }
        Ok(())
    }
}

//! Location source abstraction.
//!
//! Position feeds differ per platform (browser geolocation, GPS daemons,
//! NMEA over UDP, recorded tracks). The monitor only needs two things from
//! them: a push subscription for continuous fixes, and a one-shot query used
//! by the backup poll when the push feed stalls.
//!
//! # Design
//!
//! Subscriptions are callback based and not tied to any runtime. The
//! returned [`Subscription`] unsubscribes when dropped, so a monitor that
//! stops (or panics) never leaves a feed running.
//!
//! ```rust,ignore
//! use shorewatch_core::location::{LocationEvent, LocationSource};
//!
//! let subscription = source.subscribe(Box::new(move |event| match event {
//!     LocationEvent::Fix(fix) => queue.push(fix),
//!     LocationEvent::Error(e) => log::warn!("location error: {}", e),
//! }));
//! // ... later
//! subscription.cancel();
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

/// A position fix from a location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub position: GeoPoint,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    /// Timestamp in milliseconds (source clock)
    pub timestamp_ms: u64,
}

impl PositionFix {
    pub fn new(lat: f64, lng: f64, accuracy_m: f64, timestamp_ms: u64) -> Self {
        PositionFix {
            position: GeoPoint::new(lat, lng),
            accuracy_m,
            timestamp_ms,
        }
    }
}

/// Errors reported by a location source
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationError {
    /// The user or platform refused access to location
    #[error("Location permission denied")]
    PermissionDenied,
    /// No position could be determined
    #[error("Position unavailable")]
    PositionUnavailable,
    /// No position was obtained within the source's deadline
    #[error("Location request timed out")]
    Timeout,
}

/// Something a location source reports to its subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(PositionFix),
    Error(LocationError),
}

/// Subscriber callback
pub type LocationListener = Box<dyn Fn(LocationEvent) + Send + Sync>;

/// Handle to an active subscription; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` exactly once when it ends
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    /// Unsubscribe now
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscription {{ active: {} }}", self.is_active())
    }
}

/// Platform-independent location provider
pub trait LocationSource: Send {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Start delivering continuous updates to `listener`
    fn subscribe(&mut self, listener: LocationListener) -> Subscription;

    /// Most recent position, for the backup poll.
    ///
    /// Must not block for long; sources without a cached position should
    /// return [`LocationError::PositionUnavailable`].
    fn current_position(&mut self) -> Result<PositionFix, LocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_cancels_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_active());
        sub.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let c = count.clone();
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_location_error_display() {
        assert_eq!(format!("{}", LocationError::Timeout), "Location request timed out");
        assert!(!Subscription::noop().is_active());
    }
}

//! # Shorewatch Core
//!
//! Platform-independent maritime geofence library.
//!
//! Given a stream of positions, this crate decides whether a vessel is inside
//! safe territory (domestic maritime zones plus land), how far it is from the
//! nearest boundary, and when a crossing deserves an alert. It contains pure
//! logic with **no I/O, no clock and no async runtime**; timestamps are
//! supplied by the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  shorewatch-core (platform-independent, no tokio/async)    │
//! │  ├── geo/          (ray casting, boundary distance)        │
//! │  ├── boundary/     (classified polygons, land territory)   │
//! │  ├── geodata/      (GeoJSON ingestion)                     │
//! │  ├── classifier/   (safe / unsafe verdict)                 │
//! │  ├── detector/     (transition state machine, cooldowns)   │
//! │  ├── alert/        (alert events, dispatcher contract)     │
//! │  └── location/     (LocationSource contract)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                ┌─────────────┴─────────────┐
//!                │  shorewatch-server        │
//!                │  (tokio monitor, sinks)   │
//!                └───────────────────────────┘
//! ```
//!
//! Data flows `LocationSource → classify → TransitionDetector → AlertDispatcher`.
//!
//! ## Example: Classifying and Detecting
//!
//! ```rust
//! use shorewatch_core::{
//!     classify, AlertKind, BoundarySet, Classification, ContainmentRule, DetectorConfig,
//!     GeoPoint, Polygon, TransitionDetector,
//! };
//!
//! let square = Polygon::new(
//!     "home",
//!     "Home waters",
//!     vec![
//!         GeoPoint::new(0.0, 0.0),
//!         GeoPoint::new(0.0, 1.0),
//!         GeoPoint::new(1.0, 1.0),
//!         GeoPoint::new(1.0, 0.0),
//!     ],
//!     Classification::Safe,
//! )
//! .unwrap();
//! let boundaries = BoundarySet::new(vec![square], vec![]);
//! let mut detector = TransitionDetector::new(DetectorConfig::default());
//!
//! let inside = GeoPoint::new(0.5, 0.5);
//! let verdict = classify(&inside, &boundaries, ContainmentRule::DomesticWaters);
//! assert!(detector.update("vessel", inside, &verdict, 0).unwrap().is_none());
//!
//! let outside = GeoPoint::new(1.5, 0.5);
//! let verdict = classify(&outside, &boundaries, ContainmentRule::DomesticWaters);
//! let alert = detector.update("vessel", outside, &verdict, 1_000).unwrap().unwrap();
//! assert_eq!(alert.kind, AlertKind::TerritoryExit);
//! ```

pub mod alert;
pub mod boundary;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod geo;
pub mod geodata;
pub mod location;

// Re-export commonly used types
pub use alert::{
    AlertChannels, AlertDispatcher, AlertEvent, AlertKind, AlertPresentation, AlertSink,
    AlertStyle, DispatchReport, FlashRequest, FlashStep, NotificationRequest, Severity,
    SinkError, SirenRequest, VibrationPattern,
};
pub use boundary::{BoundarySet, BoundarySummary, Classification, Polygon, SharedBoundarySet};
pub use classifier::{classify, ContainmentRule, ZoneVerdict};
pub use config::MonitorConfig;
pub use detector::{DetectorConfig, TrackedEntity, TransitionDetector, ZoneStatus};
pub use error::{BoundaryError, ConfigError, PositionError};
pub use geo::GeoPoint;
pub use location::{
    LocationError, LocationEvent, LocationListener, LocationSource, PositionFix, Subscription,
};

//! Error types for boundary loading and position processing

use thiserror::Error;

/// Errors that can occur while building boundaries
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundaryError {
    /// Document is not valid GeoJSON
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// Ring has fewer than 3 distinct vertices
    #[error("Boundary '{id}' has a degenerate ring with {points} points")]
    DegenerateRing { id: String, points: usize },

    /// Position is not a `[lng, lat]` pair within range
    #[error("Invalid coordinate {0}")]
    InvalidCoordinate(String),

    /// Ring spans the 180th meridian
    #[error("Boundary '{0}' crosses the antimeridian, which is not supported")]
    CrossesAntimeridian(String),

    /// Geometry type other than Polygon, MultiPolygon or GeometryCollection
    #[error("Unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    /// Unknown value in `properties.classification`
    #[error("Unknown classification: {0}")]
    UnknownClassification(String),

    /// Document contained no usable polygons
    #[error("No polygons found in {0}")]
    NoPolygons(String),
}

impl From<geojson::Error> for BoundaryError {
    fn from(e: geojson::Error) -> Self {
        BoundaryError::InvalidGeoJson(e.to_string())
    }
}

/// Errors that reject a single position update.
///
/// A rejected update never touches tracked state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    /// Latitude or longitude is not finite or out of range
    #[error("Invalid position {lat},{lng}")]
    InvalidPosition { lat: f64, lng: f64 },
}

/// Configuration values the monitor cannot run with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("proximityInnerRadiusM must be a non-negative number")]
    NegativeInnerRadius,

    #[error("proximityOuterRadiusM must be larger than proximityInnerRadiusM")]
    EmptyProximityBand,

    #[error("backupPollMs must be greater than zero")]
    ZeroBackupPoll,

    #[error("flashIntervalMs must be greater than zero")]
    ZeroFlashInterval,

    #[error("flashDurationMs is {value}, the limit is {max}")]
    FlashTooLong { value: u64, max: u64 },

    /// Fraction outside 0.0 - 1.0
    #[error("{0} must be between 0 and 1")]
    OutOfRange(&'static str),
}

//! Planar geometry on geographic coordinates.
//!
//! Containment uses ray casting (even-odd rule) directly on latitude and
//! longitude. Distances use a local equirectangular approximation centred on
//! the query point: the longitude delta is scaled by `cos(latitude)` and one
//! degree of latitude is taken as 60 nautical miles.
//!
//! This is accurate to well under a percent at the kilometre to tens of
//! kilometres scale where boundary proximity matters. It is not geodesic, and
//! it does not handle rings that cross the antimeridian or reach the poles;
//! the loader in [`crate::geodata`] refuses the former and warns about the latter.

use serde::{Deserialize, Serialize};

/// One nautical mile in meters
pub const NAUTICAL_MILE: f64 = 1852.0;

/// Meters per degree of latitude (60 nautical miles)
pub const METERS_PER_DEGREE_LATITUDE: f64 = 60.0 * NAUTICAL_MILE;

/// Calculate meters per degree longitude at a given latitude
#[inline]
pub fn meters_per_degree_longitude(lat_deg: f64) -> f64 {
    METERS_PER_DEGREE_LATITUDE * lat_deg.to_radians().cos()
}

/// A geographic position in degrees.
///
/// Note the field order: internally we always store `lat` first, whereas
/// GeoJSON positions are `[lng, lat]`. Conversion happens once, in the loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees (-90..=90)
    pub lat: f64,
    /// Longitude in degrees (-180..=180)
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lat, lng }
    }

    /// Check that both coordinates are finite and within range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Approximate distance to another point in meters (equirectangular,
    /// scaled at this point's latitude)
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        planar_delta_meters(self.lat, other.lat - self.lat, other.lng - self.lng)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat, self.lng)
    }
}

/// Convert a (lat, lng) degree delta to meters at the given latitude
#[inline]
fn planar_delta_meters(at_lat: f64, d_lat: f64, d_lng: f64) -> f64 {
    let north = d_lat * METERS_PER_DEGREE_LATITUDE;
    let east = d_lng * meters_per_degree_longitude(at_lat);
    (north * north + east * east).sqrt()
}

/// Ray-casting point in polygon test.
///
/// The ring is implicitly closed: the last vertex connects back to the first.
/// Rings with fewer than 3 vertices contain nothing.
pub fn point_in_polygon(p: &GeoPoint, ring: &[GeoPoint]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = &ring[i];
        let b = &ring[j];
        // Edge straddles the horizontal line through p?
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let crossing_lng = (b.lng - a.lng) * (p.lat - a.lat) / (b.lat - a.lat) + a.lng;
            if p.lng < crossing_lng {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance in meters from `p` to the segment `a`-`b`.
///
/// The projection parameter is computed in planar (lng, lat) degrees and
/// clamped to the segment; only the final delta is converted to meters.
pub fn distance_to_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let dx = b.lng - a.lng;
    let dy = b.lat - a.lat;
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq > 0.0 {
        (((p.lng - a.lng) * dx + (p.lat - a.lat) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let closest_lng = a.lng + t * dx;
    let closest_lat = a.lat + t * dy;
    planar_delta_meters(p.lat, closest_lat - p.lat, closest_lng - p.lng)
}

/// Minimum distance in meters from `p` to any edge of the ring.
///
/// Returns `f64::INFINITY` for rings with fewer than 3 vertices.
pub fn distance_to_polygon_boundary(p: &GeoPoint, ring: &[GeoPoint]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return f64::INFINITY;
    }

    let mut best = f64::INFINITY;
    for i in 0..n {
        let d = distance_to_segment(p, &ring[i], &ring[(i + 1) % n]);
        if d < best {
            best = d;
        }
    }
    best
}

/// True if any edge of the ring spans more than 180 degrees of longitude,
/// which only happens for rings drawn across the antimeridian.
pub fn crosses_antimeridian(ring: &[GeoPoint]) -> bool {
    let n = ring.len();
    (0..n).any(|i| (ring[(i + 1) % n].lng - ring[i].lng).abs() > 180.0)
}

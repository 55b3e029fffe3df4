//! Boundary Registry
//!
//! Named, classified polygons and the land territory they are checked
//! together with. A [`BoundarySet`] is built once and never mutated; to
//! refresh boundaries, build a new set and swap the `Arc`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BoundaryError;
use crate::geo::{self, GeoPoint};

/// Classification of a boundary polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Domestic waters, fishing permitted
    Safe,
    /// Domestic waters close to a border
    Warning,
    /// Protected or closed area
    Restricted,
    /// Foreign or international waters
    International,
}

impl Default for Classification {
    fn default() -> Self {
        Classification::Safe
    }
}

impl Classification {
    /// Whether being inside a polygon of this class counts as domestic waters
    pub fn is_domestic(&self) -> bool {
        matches!(self, Classification::Safe | Classification::Warning)
    }

    /// Default display color for this class
    pub fn default_color(&self) -> &'static str {
        match self {
            Classification::Safe => "#2e7d32",
            Classification::Warning => "#f9a825",
            Classification::Restricted => "#c62828",
            Classification::International => "#1565c0",
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = BoundaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(Classification::Safe),
            "warning" => Ok(Classification::Warning),
            "restricted" => Ok(Classification::Restricted),
            "international" => Ok(Classification::International),
            _ => Err(BoundaryError::UnknownClassification(s.to_string())),
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Safe => write!(f, "safe"),
            Classification::Warning => write!(f, "warning"),
            Classification::Restricted => write!(f, "restricted"),
            Classification::International => write!(f, "international"),
        }
    }
}

/// A named boundary polygon.
///
/// The exterior ring and any holes are implicitly closed and hold at least
/// 3 vertices each when built through [`Polygon::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Polygon {
    pub id: String,
    pub name: String,
    /// Exterior ring
    pub ring: Vec<GeoPoint>,
    /// Interior rings (excluded from the polygon)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<GeoPoint>>,
    pub classification: Classification,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Polygon {
    /// Create a polygon without holes, validating the ring
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        ring: Vec<GeoPoint>,
        classification: Classification,
    ) -> Result<Self, BoundaryError> {
        let id = id.into();
        validate_ring(&id, &ring)?;
        Ok(Polygon {
            id,
            name: name.into(),
            ring,
            holes: Vec::new(),
            classification,
            color: classification.default_color().to_string(),
            description: None,
        })
    }

    /// Add an interior ring
    pub fn with_hole(mut self, hole: Vec<GeoPoint>) -> Result<Self, BoundaryError> {
        validate_ring(&self.id, &hole)?;
        self.holes.push(hole);
        Ok(self)
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check if the point is inside the exterior ring and outside every hole
    pub fn contains(&self, p: &GeoPoint) -> bool {
        geo::point_in_polygon(p, &self.ring)
            && !self.holes.iter().any(|h| geo::point_in_polygon(p, h))
    }

    /// Distance in meters to the nearest edge of any ring
    pub fn distance_to_boundary(&self, p: &GeoPoint) -> f64 {
        self.holes
            .iter()
            .map(|h| geo::distance_to_polygon_boundary(p, h))
            .fold(geo::distance_to_polygon_boundary(p, &self.ring), f64::min)
    }

    /// Total number of vertices over all rings
    pub fn vertex_count(&self) -> usize {
        self.ring.len() + self.holes.iter().map(Vec::len).sum::<usize>()
    }
}

pub(crate) fn validate_ring(id: &str, ring: &[GeoPoint]) -> Result<(), BoundaryError> {
    if ring.len() < 3 {
        return Err(BoundaryError::DegenerateRing {
            id: id.to_string(),
            points: ring.len(),
        });
    }
    if let Some(p) = ring.iter().find(|p| !p.is_valid()) {
        return Err(BoundaryError::InvalidCoordinate(format!(
            "{} in boundary '{}'",
            p, id
        )));
    }
    if geo::crosses_antimeridian(ring) {
        return Err(BoundaryError::CrossesAntimeridian(id.to_string()));
    }
    Ok(())
}

/// The full set of boundaries checked during a monitoring session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundarySet {
    boundaries: Vec<Polygon>,
    land: Vec<Polygon>,
}

/// Shared, immutable boundary set
pub type SharedBoundarySet = Arc<BoundarySet>;

impl BoundarySet {
    /// Build a boundary set from maritime polygons and the land territory.
    ///
    /// The land territory is usually a single polygon, but simplified land
    /// outlines often arrive as a MultiPolygon and are kept as its parts.
    pub fn new(boundaries: Vec<Polygon>, land: Vec<Polygon>) -> Self {
        BoundarySet { boundaries, land }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc` for sharing between the classifier and readers
    pub fn into_shared(self) -> SharedBoundarySet {
        Arc::new(self)
    }

    pub fn boundaries(&self) -> &[Polygon] {
        &self.boundaries
    }

    pub fn land(&self) -> &[Polygon] {
        &self.land
    }

    pub fn get(&self, id: &str) -> Option<&Polygon> {
        self.boundaries.iter().find(|p| p.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty() && self.land.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    /// Check if the point is on land
    pub fn is_on_land(&self, p: &GeoPoint) -> bool {
        self.land.iter().any(|l| l.contains(p))
    }
}

/// Boundary summary for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundarySummary {
    pub id: String,
    pub name: String,
    pub classification: Classification,
    pub color: String,
    pub vertices: usize,
}

impl From<&Polygon> for BoundarySummary {
    fn from(p: &Polygon) -> Self {
        BoundarySummary {
            id: p.id.clone(),
            name: p.name.clone(),
            classification: p.classification,
            color: p.color.clone(),
            vertices: p.vertex_count(),
        }
    }
}

impl BoundarySet {
    /// Get summaries of all maritime boundaries
    pub fn summaries(&self) -> Vec<BoundarySummary> {
        self.boundaries.iter().map(BoundarySummary::from).collect()
    }
}

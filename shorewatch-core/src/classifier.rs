//! Zone Classifier
//!
//! Turns a position and a [`BoundarySet`] into a single safe/unsafe verdict
//! plus the nearest maritime boundary. Land counts towards "safe" but is not
//! a proximity target: a boat is never warned about approaching its own coast.

use serde::{Deserialize, Serialize};

use crate::boundary::BoundarySet;
use crate::geo::GeoPoint;

/// Which boundary polygons make a position safe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainmentRule {
    /// On land, or inside a polygon classified as domestic waters
    #[default]
    DomesticWaters,
    /// On land, or inside any registered polygon regardless of class
    AnyBoundary,
}

/// Result of classifying one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneVerdict {
    /// Inside safe territory
    pub safe: bool,
    /// Distance in meters to the nearest maritime boundary edge
    /// (`f64::INFINITY` when there are no boundaries)
    pub nearest_distance_m: f64,
    /// Name of the nearest maritime boundary (empty when there are none)
    pub nearest_name: String,
    /// Name of the first polygon that contains the position, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containing_zone: Option<String>,
    /// Position is inside the land territory
    pub on_land: bool,
}

impl ZoneVerdict {
    /// True if a nearest boundary exists at a finite distance
    pub fn has_nearest(&self) -> bool {
        self.nearest_distance_m.is_finite()
    }
}

/// Classify a position against a boundary set.
///
/// Polygons are OR-combined: being inside any qualifying polygon (or on
/// land) is enough.
pub fn classify(p: &GeoPoint, set: &BoundarySet, rule: ContainmentRule) -> ZoneVerdict {
    let on_land = set.is_on_land(p);

    let mut containing_zone = None;
    let mut in_safe_water = false;
    let mut nearest_distance_m = f64::INFINITY;
    let mut nearest_name = "";

    for polygon in set.boundaries() {
        if polygon.contains(p) {
            if containing_zone.is_none() {
                containing_zone = Some(polygon.name.clone());
            }
            in_safe_water |= match rule {
                ContainmentRule::DomesticWaters => polygon.classification.is_domestic(),
                ContainmentRule::AnyBoundary => true,
            };
        }

        let d = polygon.distance_to_boundary(p);
        if d < nearest_distance_m {
            nearest_distance_m = d;
            nearest_name = &polygon.name;
        }
    }

    ZoneVerdict {
        safe: on_land || in_safe_water,
        nearest_distance_m,
        nearest_name: nearest_name.to_string(),
        containing_zone,
        on_land,
    }
}

impl BoundarySet {
    /// Classify a position against this set
    pub fn classify(&self, p: &GeoPoint, rule: ContainmentRule) -> ZoneVerdict {
        classify(p, self, rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{Classification, Polygon};

    fn square(id: &str, lat0: f64, lng0: f64, size: f64, class: Classification) -> Polygon {
        let ring = vec![
            GeoPoint::new(lat0, lng0),
            GeoPoint::new(lat0, lng0 + size),
            GeoPoint::new(lat0 + size, lng0 + size),
            GeoPoint::new(lat0 + size, lng0),
        ];
        Polygon::new(id, id, ring, class).unwrap()
    }

    fn sample_set() -> BoundarySet {
        BoundarySet::new(
            vec![
                square("home", 0.0, 0.0, 1.0, Classification::Safe),
                square("reserve", 0.0, 2.0, 1.0, Classification::Restricted),
            ],
            vec![square("land", 0.0, -1.0, 1.0, Classification::Safe)],
        )
    }

    #[test]
    fn test_inside_domestic_waters() {
        let verdict = classify(&GeoPoint::new(0.5, 0.5), &sample_set(), ContainmentRule::DomesticWaters);
        assert!(verdict.safe);
        assert!(!verdict.on_land);
        assert_eq!(verdict.containing_zone.as_deref(), Some("home"));
        assert_eq!(verdict.nearest_name, "home");
    }

    #[test]
    fn test_outside_all() {
        let verdict = classify(&GeoPoint::new(1.5, 0.5), &sample_set(), ContainmentRule::DomesticWaters);
        assert!(!verdict.safe);
        assert_eq!(verdict.containing_zone, None);
        assert_eq!(verdict.nearest_name, "home");
        assert!(verdict.has_nearest());
    }

    #[test]
    fn test_on_land_is_safe() {
        let verdict = classify(&GeoPoint::new(0.5, -0.5), &sample_set(), ContainmentRule::DomesticWaters);
        assert!(verdict.safe);
        assert!(verdict.on_land);
        // Land is never the proximity target
        assert_eq!(verdict.nearest_name, "home");
    }

    #[test]
    fn test_containment_rules() {
        let set = sample_set();
        let in_reserve = GeoPoint::new(0.5, 2.5);
        assert!(!classify(&in_reserve, &set, ContainmentRule::DomesticWaters).safe);
        assert!(classify(&in_reserve, &set, ContainmentRule::AnyBoundary).safe);
        assert_eq!(
            classify(&in_reserve, &set, ContainmentRule::DomesticWaters).nearest_name,
            "reserve"
        );
    }

    #[test]
    fn test_overlapping_polygons_or_combined() {
        let set = BoundarySet::new(
            vec![
                square("foreign", 0.0, 0.0, 2.0, Classification::International),
                square("home", 0.5, 0.5, 1.0, Classification::Safe),
            ],
            vec![],
        );
        let verdict = classify(&GeoPoint::new(1.0, 1.0), &set, ContainmentRule::DomesticWaters);
        assert!(verdict.safe);
        assert_eq!(verdict.containing_zone.as_deref(), Some("foreign"));
    }

    #[test]
    fn test_empty_set() {
        let verdict = classify(&GeoPoint::new(0.0, 0.0), &BoundarySet::empty(), ContainmentRule::default());
        assert!(!verdict.safe);
        assert!(!verdict.has_nearest());
        assert_eq!(verdict.nearest_name, "");
    }
}

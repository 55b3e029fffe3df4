//! GeoJSON ingestion for boundary and land data.
//!
//! Maritime boundary datasets (EEZ extracts and the like) arrive as a
//! `FeatureCollection` of `Polygon` / `MultiPolygon` features with positions
//! in `[lng, lat]` order. Everything is converted to [`GeoPoint`] here, once,
//! and MultiPolygons are flattened into one [`Polygon`] per part.
//!
//! Bad parts are skipped rather than failing the whole document; the reasons
//! are returned in [`LoadedBoundaries::skipped`] and logged. A part whose
//! hole ring is invalid is skipped too, so an enclave is never silently
//! absorbed into the surrounding zone.

use geojson::{feature::Id, Feature, GeoJson, Geometry, Value};
use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::boundary::{self, BoundarySet, Classification, Polygon};
use crate::error::BoundaryError;
use crate::geo::GeoPoint;

/// Latitude beyond which the equirectangular distance is badly distorted
pub const POLAR_WARNING_LATITUDE: f64 = 80.0;

/// Options applied to every polygon in a boundary document
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Classification used when a feature has no `classification` property
    pub default_classification: Classification,
    /// Prefix for generated names when no name property is present
    pub name_prefix: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            default_classification: Classification::Safe,
            name_prefix: "Boundary".to_string(),
        }
    }
}

/// Result of loading a boundary document
#[derive(Debug, Default)]
pub struct LoadedBoundaries {
    pub polygons: Vec<Polygon>,
    /// Parts that were dropped, with the reason
    pub skipped: Vec<BoundaryError>,
}

/// Per-feature attributes shared by all parts of its geometry
struct FeatureInfo {
    id: String,
    name: String,
    description: Option<String>,
    classification: Classification,
    color: Option<String>,
}

/// Parse a boundary document.
///
/// Accepts a `FeatureCollection`, a single `Feature` or a bare geometry.
pub fn parse_boundaries(json: &str, options: &LoadOptions) -> Result<LoadedBoundaries, BoundaryError> {
    let document: GeoJson = json.parse()?;
    let mut loaded = LoadedBoundaries::default();

    match document {
        GeoJson::FeatureCollection(collection) => {
            for (index, feature) in collection.features.iter().enumerate() {
                load_feature(feature, index, options, &mut loaded);
            }
        }
        GeoJson::Feature(feature) => load_feature(&feature, 0, options, &mut loaded),
        GeoJson::Geometry(geometry) => {
            let info = FeatureInfo {
                id: "0".to_string(),
                name: format!("{} 1", options.name_prefix),
                description: None,
                classification: options.default_classification,
                color: None,
            };
            load_geometry(&geometry, &info, &mut loaded);
        }
    }

    for reason in &loaded.skipped {
        warn!("Skipping boundary part: {}", reason);
    }
    debug!(
        "Loaded {} boundary polygons ({} skipped)",
        loaded.polygons.len(),
        loaded.skipped.len()
    );
    Ok(loaded)
}

/// Parse the land territory document.
///
/// Land is always treated as domestic; classification properties are ignored.
pub fn parse_land(json: &str) -> Result<Vec<Polygon>, BoundaryError> {
    let options = LoadOptions {
        default_classification: Classification::Safe,
        name_prefix: "Land".to_string(),
    };
    let loaded = parse_boundaries(json, &options)?;
    if loaded.polygons.is_empty() {
        return Err(BoundaryError::NoPolygons("land territory".to_string()));
    }
    Ok(loaded
        .polygons
        .into_iter()
        .map(|mut p| {
            p.classification = Classification::Safe;
            p
        })
        .collect())
}

/// Build a complete [`BoundarySet`] from boundary and (optional) land documents
pub fn load_boundary_set(
    boundaries_json: &str,
    land_json: Option<&str>,
    options: &LoadOptions,
) -> Result<BoundarySet, BoundaryError> {
    let boundaries = parse_boundaries(boundaries_json, options)?;
    if boundaries.polygons.is_empty() {
        return Err(BoundaryError::NoPolygons("boundary document".to_string()));
    }
    let land = match land_json {
        Some(json) => parse_land(json)?,
        None => {
            warn!("No land territory loaded; only maritime boundaries will count as safe");
            Vec::new()
        }
    };
    Ok(BoundarySet::new(boundaries.polygons, land))
}

fn load_feature(feature: &Feature, index: usize, options: &LoadOptions, loaded: &mut LoadedBoundaries) {
    let Some(geometry) = &feature.geometry else {
        debug!("Feature {} has no geometry", index);
        return;
    };

    let id = match &feature.id {
        Some(Id::String(s)) => s.clone(),
        Some(Id::Number(n)) => n.to_string(),
        None => match feature.property("mrgid") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => index.to_string(),
        },
    };

    let name = string_property(feature, "geoname")
        .or_else(|| string_property(feature, "territory1"))
        .or_else(|| string_property(feature, "name"))
        .unwrap_or_else(|| format!("{} {}", options.name_prefix, index + 1));

    let classification = match string_property(feature, "classification") {
        Some(value) => match value.parse::<Classification>() {
            Ok(c) => c,
            Err(e) => {
                warn!("Feature '{}': {}, using {}", id, e, options.default_classification);
                options.default_classification
            }
        },
        None => options.default_classification,
    };

    let info = FeatureInfo {
        id,
        name,
        description: string_property(feature, "territory1"),
        classification,
        color: string_property(feature, "color"),
    };
    load_geometry(geometry, &info, loaded);
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn load_geometry(geometry: &Geometry, info: &FeatureInfo, loaded: &mut LoadedBoundaries) {
    match &geometry.value {
        Value::Polygon(rings) => push_polygon(rings, info, None, loaded),
        Value::MultiPolygon(parts) => {
            for (k, rings) in parts.iter().enumerate() {
                push_polygon(rings, info, Some(k), loaded);
            }
        }
        Value::GeometryCollection(geometries) => {
            for g in geometries {
                load_geometry(g, info, loaded);
            }
        }
        other => loaded
            .skipped
            .push(BoundaryError::UnsupportedGeometry(geometry_type_name(other).to_string())),
    }
}

fn geometry_type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
        #[allow(unreachable_patterns)]
        _ => "Unknown",
    }
}

fn push_polygon(
    rings: &[Vec<Vec<f64>>],
    info: &FeatureInfo,
    part: Option<usize>,
    loaded: &mut LoadedBoundaries,
) {
    let id = match part {
        Some(k) => format!("{}#{}", info.id, k),
        None => info.id.clone(),
    };

    let Some((exterior, holes)) = rings.split_first() else {
        loaded.skipped.push(BoundaryError::DegenerateRing { id, points: 0 });
        return;
    };

    let polygon = convert_ring(exterior)
        .and_then(|ring| Polygon::new(id.clone(), info.name.clone(), ring, info.classification));
    let mut polygon = match polygon {
        Ok(p) => p,
        Err(e) => {
            loaded.skipped.push(e);
            return;
        }
    };

    // A part with a bad hole is dropped whole, never kept without the hole
    for hole in holes {
        match convert_ring(hole).and_then(|h| boundary::validate_ring(&id, &h).map(|_| h)) {
            Ok(h) => polygon.holes.push(h),
            Err(e) => {
                loaded.skipped.push(e);
                return;
            }
        }
    }

    if polygon
        .ring
        .iter()
        .any(|p| p.lat.abs() > POLAR_WARNING_LATITUDE)
    {
        warn!(
            "Boundary '{}' extends beyond {} degrees latitude; distances there are approximate",
            polygon.id, POLAR_WARNING_LATITUDE
        );
    }

    if let Some(color) = &info.color {
        polygon.color = color.clone();
    }
    polygon.description = info.description.clone();
    loaded.polygons.push(polygon);
}

/// Convert `[lng, lat]` positions to points, dropping the closing duplicate
fn convert_ring(positions: &[Vec<f64>]) -> Result<Vec<GeoPoint>, BoundaryError> {
    let mut ring = positions
        .iter()
        .map(|pos| match pos.as_slice() {
            [lng, lat, ..] => Ok(GeoPoint::new(*lat, *lng)),
            _ => Err(BoundaryError::InvalidCoordinate(format!("{:?}", pos))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    Ok(ring)
}

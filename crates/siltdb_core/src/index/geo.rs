//! Geo points, cells, and query-region covering.
//!
//! Points are quantized onto geohash cells at a fixed index precision.
//! Geohash identifiers are base-32 encodings of interleaved (lon, lat)
//! bits, so a coarser cell is a string prefix of every finer cell nested
//! inside it; probing a coarse cell is a prefix scan over the geo
//! namespace. Radius queries expand the centre into a bounding box, cover
//! the box with cells at the coarsest precision that keeps the probe count
//! bounded, and rely on the exact distance / containment check to discard
//! the false positives the covering admits.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Earth radius in metres used by the exact distance filter.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Upper bound on cells probed per geo predicate.
const MAX_PROBE_CELLS: usize = 64;

/// A geographic point in decimal degrees.
///
/// Any document object carrying numeric `lat` and `lon` fields in range is
/// treated as a geo point; extra fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, −90..90.
    pub lat: f64,
    /// Longitude, −180..180.
    pub lon: f64,
}

impl GeoPoint {
    /// Checks that both coordinates are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Interprets a document value as a geo point, if it is one.
#[must_use]
pub fn as_geo_point(value: &Value) -> Option<GeoPoint> {
    if !value.is_object() {
        return None;
    }
    let point: GeoPoint = serde_json::from_value(value.clone()).ok()?;
    point.is_valid().then_some(point)
}

/// Haversine distance between two points in metres.
#[must_use]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Encodes a point's index cell at the given precision.
pub fn cell_for(point: GeoPoint, precision: usize) -> DbResult<String> {
    geohash::encode(
        geohash::Coord {
            x: point.lon,
            y: point.lat,
        },
        precision,
    )
    .map_err(|e| DbError::invalid_geo(e.to_string()))
}

/// An axis-aligned query region in decimal degrees.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    /// The box covering `centre ± radius` metres, clamped to legal
    /// coordinates. Regions crossing the antimeridian are clamped, not
    /// wrapped.
    #[must_use]
    pub fn around(centre: GeoPoint, radius_m: f64) -> Self {
        let metres_per_degree = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        let dlat = radius_m / metres_per_degree;
        let cos_lat = centre.lat.to_radians().cos().max(1e-6);
        let dlon = (radius_m / (metres_per_degree * cos_lat)).min(180.0);

        Self {
            min_lat: (centre.lat - dlat).max(-90.0),
            min_lon: (centre.lon - dlon).max(-180.0),
            max_lat: (centre.lat + dlat).min(90.0),
            max_lon: (centre.lon + dlon).min(180.0),
        }
    }
}

/// Cell height and width in degrees at a geohash precision.
///
/// A geohash of length `p` carries `5p` interleaved bits, longitude taking
/// the extra bit at odd totals.
fn cell_dims(precision: usize) -> (f64, f64) {
    let total_bits = 5 * precision as u32;
    let lon_bits = total_bits.div_ceil(2);
    let lat_bits = total_bits / 2;
    (
        180.0 / (1u64 << lat_bits) as f64,
        360.0 / (1u64 << lon_bits) as f64,
    )
}

/// Computes the covering cell set for a query region.
///
/// The precision is lowered from `index_precision` until the estimated
/// cell count fits [`MAX_PROBE_CELLS`]; since coarser cells are prefixes
/// of finer ones, probing them by prefix still reaches every index entry.
pub fn covering_cells(bbox: BoundingBox, index_precision: usize) -> DbResult<Vec<String>> {
    let height = (bbox.max_lat - bbox.min_lat).max(0.0);
    let width = (bbox.max_lon - bbox.min_lon).max(0.0);

    let mut precision = index_precision.max(1);
    while precision > 1 {
        let (cell_h, cell_w) = cell_dims(precision);
        let estimate = ((height / cell_h) as usize + 2) * ((width / cell_w) as usize + 2);
        if estimate <= MAX_PROBE_CELLS {
            break;
        }
        precision -= 1;
    }

    let (cell_h, cell_w) = cell_dims(precision);
    let lat_steps = (height / cell_h).ceil() as usize + 1;
    let lon_steps = (width / cell_w).ceil() as usize + 1;

    let mut cells = BTreeSet::new();
    for i in 0..=lat_steps {
        let lat = (bbox.min_lat + i as f64 * cell_h).min(bbox.max_lat).clamp(-90.0, 90.0);
        for j in 0..=lon_steps {
            let lon = (bbox.min_lon + j as f64 * cell_w).min(bbox.max_lon).clamp(-180.0, 180.0);
            let cell = cell_for(GeoPoint { lat, lon }, precision)?;
            cells.insert(cell);
        }
    }

    Ok(cells.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn geo_point_detection() {
        assert!(as_geo_point(&json!({"lat": 52.5, "lon": 13.4})).is_some());
        assert!(as_geo_point(&json!({"lat": 52.5, "lon": 13.4, "name": "Berlin"})).is_some());
        assert!(as_geo_point(&json!({"lat": 52, "lon": 13})).is_some());

        assert!(as_geo_point(&json!({"lat": 91.0, "lon": 0.0})).is_none());
        assert!(as_geo_point(&json!({"lat": 0.0, "lon": 181.0})).is_none());
        assert!(as_geo_point(&json!({"lat": 52.5})).is_none());
        assert!(as_geo_point(&json!({"lat": "52.5", "lon": 13.4})).is_none());
        assert!(as_geo_point(&json!([52.5, 13.4])).is_none());
        assert!(as_geo_point(&json!(52.5)).is_none());
    }

    #[test]
    fn haversine_known_distance() {
        // Berlin to Hamburg is roughly 255 km.
        let berlin = GeoPoint { lat: 52.52, lon: 13.405 };
        let hamburg = GeoPoint { lat: 53.551, lon: 9.993 };
        let d = haversine_m(berlin, hamburg);
        assert!((d - 255_000.0).abs() < 5_000.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint { lat: 10.0, lon: 20.0 };
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn cell_is_prefix_stable_across_precisions() {
        let p = GeoPoint { lat: 52.52, lon: 13.405 };
        let fine = cell_for(p, 7).unwrap();
        let coarse = cell_for(p, 4).unwrap();
        assert_eq!(fine.len(), 7);
        assert!(fine.starts_with(&coarse));
    }

    #[test]
    fn bbox_expansion_contains_radius() {
        let centre = GeoPoint { lat: 48.0, lon: 11.0 };
        let bbox = BoundingBox::around(centre, 5_000.0);

        // Points 5 km due north/east must fall inside the box.
        assert!(bbox.max_lat - centre.lat >= 5_000.0 / 111_195.0 - 1e-9);
        assert!(bbox.max_lon - centre.lon >= 5_000.0 / (111_195.0 * 0.67) - 1e-2);
        assert!(bbox.min_lat < centre.lat && bbox.min_lon < centre.lon);
    }

    #[test]
    fn bbox_clamps_at_poles() {
        let bbox = BoundingBox::around(GeoPoint { lat: 89.9, lon: 0.0 }, 100_000.0);
        assert!(bbox.max_lat <= 90.0);
        assert!(bbox.min_lon >= -180.0 && bbox.max_lon <= 180.0);
    }

    #[test]
    fn covering_is_bounded_and_contains_centre_cell() {
        let centre = GeoPoint { lat: 52.52, lon: 13.405 };
        let bbox = BoundingBox::around(centre, 5_000.0);
        let cells = covering_cells(bbox, 7).unwrap();

        assert!(!cells.is_empty());
        assert!(cells.len() <= MAX_PROBE_CELLS);

        // The centre's index cell must be reachable through some covering
        // cell prefix.
        let centre_cell = cell_for(centre, 7).unwrap();
        assert!(
            cells.iter().any(|c| centre_cell.starts_with(c.as_str())),
            "no covering cell is a prefix of {centre_cell}"
        );
    }

    #[test]
    fn covering_catches_points_near_the_rim() {
        let centre = GeoPoint { lat: 10.0, lon: 10.0 };
        let radius = 2_000.0;
        let bbox = BoundingBox::around(centre, radius);
        let cells = covering_cells(bbox, 7).unwrap();

        // A point just inside the radius, north-east of centre.
        let rim = GeoPoint { lat: 10.0120, lon: 10.0120 };
        assert!(haversine_m(centre, rim) < radius);
        let rim_cell = cell_for(rim, 7).unwrap();
        assert!(
            cells.iter().any(|c| rim_cell.starts_with(c.as_str())),
            "rim point's cell {rim_cell} not covered"
        );
    }

    #[test]
    fn tiny_region_covers_with_few_cells() {
        let bbox = BoundingBox::around(GeoPoint { lat: 0.0, lon: 0.0 }, 50.0);
        let cells = covering_cells(bbox, 7).unwrap();
        assert!(cells.len() <= 9, "got {} cells", cells.len());
    }
}

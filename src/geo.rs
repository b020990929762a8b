//! Geographic cell quantization and distance math.
//!
//! A GeoCell is a 0.1-degree grid bucket (~11 km at the equator) used as a
//! room key so that nearby connections land in the same multicast group.
//! Poles and the antimeridian get no special handling: cell ids are plain
//! truncated coordinate pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid granularity: 0.1 degrees per cell.
const CELLS_PER_DEGREE: f64 = 10.0;

/// Mean Earth radius in kilometers, used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A coarse latitude/longitude grid bucket. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoCell {
    pub lat_q: i32,
    pub lng_q: i32,
}

impl GeoCell {
    /// Quantize a point into its containing cell. Pure and deterministic:
    /// the same coordinates always yield the same cell.
    pub fn of(lat: f64, lng: f64) -> Self {
        Self {
            lat_q: (lat * CELLS_PER_DEGREE).floor() as i32,
            lng_q: (lng * CELLS_PER_DEGREE).floor() as i32,
        }
    }
}

impl fmt::Display for GeoCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lat_q, self.lng_q)
    }
}

/// Great-circle distance between two points in kilometers (haversine).
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    // Rounding can push `a` marginally past 1.0 for near-antipodal points,
    // which would make asin return NaN.
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_of_is_deterministic() {
        let a = GeoCell::of(19.0760, 72.8777);
        let b = GeoCell::of(19.0760, 72.8777);
        assert_eq!(a, b);
    }

    #[test]
    fn nearby_points_share_a_cell() {
        // Both within the same 0.1-degree bucket
        let a = GeoCell::of(19.0760, 72.8777);
        let b = GeoCell::of(19.0712, 72.8745);
        assert_eq!(a, b);
    }

    #[test]
    fn distant_points_get_distinct_cells() {
        let mumbai = GeoCell::of(19.0760, 72.8777);
        let delhi = GeoCell::of(28.6139, 77.2090);
        assert_ne!(mumbai, delhi);
    }

    #[test]
    fn negative_coordinates_floor_consistently() {
        // floor, not truncation: -0.05 lands in cell -1, not 0
        let cell = GeoCell::of(-0.05, -0.05);
        assert_eq!(cell.lat_q, -1);
        assert_eq!(cell.lng_q, -1);
    }

    #[test]
    fn haversine_zero_at_same_point() {
        assert_eq!(haversine_km(19.0760, 72.8777, 19.0760, 72.8777), 0.0);
    }

    #[test]
    fn haversine_antipodal_points_stay_finite() {
        // Half the Earth's circumference, never NaN
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite(), "distance was {d}");
        assert!(d > 20_000.0 && d < 20_050.0, "unexpected distance {d}");
    }

    #[test]
    fn haversine_mumbai_to_pune() {
        // Mumbai -> Pune is roughly 120 km great-circle
        let d = haversine_km(19.0760, 72.8777, 18.5204, 73.8567);
        assert!(d > 100.0 && d < 140.0, "unexpected distance {d}");
    }
}

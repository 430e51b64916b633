//! Geographic primitives on the H3 grid: coordinate validation, cell
//! derivation, disk queries, and haversine distances.
//!
//! Default resolution is 9 (~240m cell size), suitable for city-scale
//! dispatch.

use h3o::{CellIndex, LatLng, Resolution};

use crate::error::DispatchError;
use crate::types::GeoPoint;

#[derive(Debug, Clone, Copy)]
pub struct GeoGrid {
    resolution: Resolution,
}

impl GeoGrid {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Derive the grid cell containing `point`, rejecting malformed input
    /// before it can reach any index structure.
    pub fn cell_for(&self, point: GeoPoint) -> Result<CellIndex, DispatchError> {
        if !point.lat.is_finite()
            || !point.lon.is_finite()
            || point.lat.abs() > 90.0
            || point.lon.abs() > 180.0
        {
            return Err(DispatchError::InvalidCoordinates {
                lat: point.lat,
                lon: point.lon,
            });
        }
        let coords = LatLng::new(point.lat, point.lon).map_err(|_| {
            DispatchError::InvalidCoordinates {
                lat: point.lat,
                lon: point.lon,
            }
        })?;
        Ok(coords.to_cell(self.resolution))
    }

    /// All cells within grid distance `k` of `origin` (ring 0 is the origin
    /// cell itself).
    pub fn grid_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        debug_assert_eq!(
            origin.resolution(),
            self.resolution,
            "origin resolution must match GeoGrid resolution"
        );
        origin.grid_disk::<Vec<_>>(k)
    }
}

impl Default for GeoGrid {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
        }
    }
}

/// Haversine distance between two coordinate pairs, in kilometers.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_identical_points_is_zero() {
        let p = GeoPoint::new(52.52, 13.405);
        assert!(distance_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn distance_berlin_to_munich_is_roughly_known() {
        let berlin = GeoPoint::new(52.520, 13.405);
        let munich = GeoPoint::new(48.137, 11.575);
        let d = distance_km(berlin, munich);
        assert!(d > 495.0 && d < 515.0, "got {d}");
    }

    #[test]
    fn cell_for_rejects_out_of_range_latitude() {
        let grid = GeoGrid::default();
        let err = grid.cell_for(GeoPoint::new(91.0, 13.4)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCoordinates { .. }));
    }

    #[test]
    fn cell_for_rejects_non_finite_coordinates() {
        let grid = GeoGrid::default();
        assert!(grid.cell_for(GeoPoint::new(f64::NAN, 13.4)).is_err());
        assert!(grid.cell_for(GeoPoint::new(52.5, f64::INFINITY)).is_err());
    }

    #[test]
    fn cell_centroid_stays_close_to_input_point() {
        let grid = GeoGrid::default();
        let p = GeoPoint::new(52.52, 13.405);
        let cell = grid.cell_for(p).expect("valid point");
        let center: LatLng = cell.into();
        let d = distance_km(p, GeoPoint::new(center.lat(), center.lng()));
        assert!(d < 0.5, "centroid {d} km away at resolution 9");
    }

    #[test]
    fn grid_disk_contains_origin_and_respects_k() {
        let grid = GeoGrid::default();
        let origin = grid
            .cell_for(GeoPoint::new(52.52, 13.405))
            .expect("valid point");
        let cells = grid.grid_disk(origin, 2);

        assert!(cells.contains(&origin));
        for cell in cells {
            let distance = origin.grid_distance(cell).expect("grid distance");
            assert!(distance <= 2);
        }
    }
}

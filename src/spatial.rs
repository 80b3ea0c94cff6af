//! # Spatial Index
//!
//! Coarse lat/lon grid for proximity queries. A point lands in cell
//! `(floor(lat / cell_deg), floor(lon / cell_deg))`; queries scan the
//! surrounding block of cells, widened whenever the search radius exceeds
//! what the 3x3 block is guaranteed to cover.

use crate::config::EARTH_RADIUS_KM;
use hashbrown::HashMap;

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Cell coordinates of a point.
pub type CellKey = (i64, i64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEntry<T> {
    pub lat: f64,
    pub lon: f64,
    pub item: T,
}

/// A neighbour found by a radius query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<T> {
    pub item: T,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct GridIndex<T> {
    cell_deg: f64,
    cells: HashMap<CellKey, Vec<GridEntry<T>>>,
    len: usize,
}

impl<T: Copy> GridIndex<T> {
    /// Create an empty grid whose cells are `cell_size_km` tall.
    pub fn new(cell_size_km: f64) -> Self {
        Self {
            cell_deg: cell_size_km / KM_PER_DEGREE,
            cells: HashMap::new(),
            len: 0,
        }
    }

    pub fn cell_key(&self, lat: f64, lon: f64) -> CellKey {
        (
            (lat / self.cell_deg).floor() as i64,
            (lon / self.cell_deg).floor() as i64,
        )
    }

    pub fn insert(&mut self, lat: f64, lon: f64, item: T) {
        if !(lat.is_finite() && lon.is_finite()) {
            return;
        }
        let key = self.cell_key(lat, lon);
        self.cells
            .entry(key)
            .or_default()
            .push(GridEntry { lat, lon, item });
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Everything in the 3x3 block around the point's cell. Absent cells contribute nothing.
    pub fn neighbors(&self, lat: f64, lon: f64) -> Vec<&GridEntry<T>> {
        self.block(lat, lon, 1, 1)
    }

    /// Entries within `radius_km`, nearest first.
    pub fn within(&self, lat: f64, lon: f64, radius_km: f64) -> Vec<Neighbor<T>> {
        if !(lat.is_finite() && lon.is_finite()) {
            return Vec::new();
        }
        let (lat_rings, lon_rings) = self.rings_for(lat, radius_km);
        let mut found: Vec<Neighbor<T>> = self
            .block(lat, lon, lat_rings, lon_rings)
            .into_iter()
            .filter_map(|entry| {
                let distance_km = haversine_km(lat, lon, entry.lat, entry.lon);
                (distance_km <= radius_km).then_some(Neighbor {
                    item: entry.item,
                    distance_km,
                })
            })
            .collect();
        found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        found
    }

    /// Cells to scan on each side so the block covers `radius_km`.
    fn rings_for(&self, lat: f64, radius_km: f64) -> (i64, i64) {
        let cell_height_km = self.cell_deg * KM_PER_DEGREE;
        // Longitude cells shrink towards the poles.
        let cos_lat = lat.to_radians().cos().abs().max(0.01);
        let cell_width_km = cell_height_km * cos_lat;
        let rings = |cell_km: f64| ((radius_km / cell_km).ceil() as i64).max(1);
        (rings(cell_height_km), rings(cell_width_km))
    }

    fn block(&self, lat: f64, lon: f64, lat_rings: i64, lon_rings: i64) -> Vec<&GridEntry<T>> {
        let (row, col) = self.cell_key(lat, lon);
        let mut out = Vec::new();
        for d_row in -lat_rings..=lat_rings {
            for d_col in -lon_rings..=lon_rings {
                if let Some(bucket) = self.cells.get(&(row + d_row, col + d_col)) {
                    out.extend(bucket.iter());
                }
            }
        }
        out
    }
}

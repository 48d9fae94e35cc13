//! Geohash cell indexing.
//!
//! Encodes a (latitude, longitude) pair into a fixed-precision base-32
//! cell identifier and decodes identifiers back into their bounding box.
//! Longitude is bisected first; each bisection contributes one bit and
//! five bits make one character.

use serde::{Deserialize, Serialize};

use crate::types::{CellId, GeohashError, Position};

/// Geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Default precision: roughly 5 x 5 km cells.
pub const DEFAULT_PRECISION: usize = 5;

/// Longest precision that still fits comfortably in f64 bisection.
pub const MAX_PRECISION: usize = 12;

const LAT_MAX: f64 = 90.0;
const LON_MAX: f64 = 180.0;

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// Rectangular cell extent in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Corners in (lat, lon) order, walking SW → NW → NE → SE.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_lat, self.min_lon),
            (self.max_lat, self.min_lon),
            (self.max_lat, self.max_lon),
            (self.min_lat, self.max_lon),
        ]
    }

    /// Point-in-polygon test against the four corners.
    ///
    /// Ray casting along the latitude axis. For an axis-aligned box this
    /// is half-open: the south and west edges are inside, the north and
    /// east edges are not, which matches how `encode` assigns a point
    /// sitting exactly on a bisection line to the upper half. The one
    /// exception is the world edge: `encode` puts lat 90 and lon 180 in the
    /// last cell along that axis, so that cell owns its north or east edge.
    pub fn contains(&self, position: &Position) -> bool {
        if point_in_polygon(position, &self.corners()) {
            return true;
        }
        let (lat, lon) = (position.latitude, position.longitude);
        let lat_in = (self.min_lat <= lat && lat < self.max_lat)
            || (lat == LAT_MAX && self.max_lat == LAT_MAX);
        let lon_in = (self.min_lon <= lon && lon < self.max_lon)
            || (lon == LON_MAX && self.max_lon == LON_MAX);
        lat_in && lon_in
    }

    /// Centre of the cell.
    pub fn center(&self) -> Position {
        Position {
            latitude: (self.min_lat + self.max_lat) / 2.0,
            longitude: (self.min_lon + self.max_lon) / 2.0,
        }
    }
}

fn point_in_polygon(point: &Position, polygon: &[(f64, f64)]) -> bool {
    let (lat, lon) = (point.latitude, point.longitude);
    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let (lat_i, lon_i) = polygon[i];
        let (lat_j, lon_j) = polygon[j];

        let straddles = (lon_i <= lon && lon < lon_j) || (lon_j <= lon && lon < lon_i);
        if straddles && lat < (lat_j - lat_i) * (lon - lon_i) / (lon_j - lon_i) + lat_i {
            inside = !inside;
        }
        j = i;
    }

    inside
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Encode a position into a cell identifier of `precision` characters.
///
/// Latitude must lie in [-90, 90] and longitude in [-180, 180]; values
/// outside those ranges are a caller bug and produce an edge cell.
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> CellId {
    let (mut min_lat, mut max_lat) = (-90.0_f64, 90.0_f64);
    let (mut min_lon, mut max_lon) = (-180.0_f64, 180.0_f64);

    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bit = 0;
    let mut ch = 0usize;

    while hash.len() < precision {
        if even {
            let mid = (min_lon + max_lon) / 2.0;
            if longitude >= mid {
                ch |= 1 << (4 - bit);
                min_lon = mid;
            } else {
                max_lon = mid;
            }
        } else {
            let mid = (min_lat + max_lat) / 2.0;
            if latitude >= mid {
                ch |= 1 << (4 - bit);
                min_lat = mid;
            } else {
                max_lat = mid;
            }
        }
        even = !even;

        if bit < 4 {
            bit += 1;
        } else {
            hash.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }

    CellId::new(hash)
}

/// Encode a [`Position`] at the given precision.
pub fn encode_position(position: &Position, precision: usize) -> CellId {
    encode(position.latitude, position.longitude, precision)
}

/// Decode a cell identifier into the bounding box it covers.
pub fn decode_bbox(cell: &CellId) -> Result<BoundingBox, GeohashError> {
    let (mut min_lat, mut max_lat) = (-90.0_f64, 90.0_f64);
    let (mut min_lon, mut max_lon) = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in cell.as_str().chars() {
        let value = BASE32
            .iter()
            .position(|&b| b as char == c)
            .ok_or_else(|| GeohashError::InvalidCharacter {
                cell: cell.to_string(),
                character: c,
            })?;

        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            if even {
                let mid = (min_lon + max_lon) / 2.0;
                if bit == 1 {
                    min_lon = mid;
                } else {
                    max_lon = mid;
                }
            } else {
                let mid = (min_lat + max_lat) / 2.0;
                if bit == 1 {
                    min_lat = mid;
                } else {
                    max_lat = mid;
                }
            }
            even = !even;
        }
    }

    Ok(BoundingBox {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use geo_types::{Coord, Rect};
use serde::{Deserialize, Serialize};

/// Minimum displacement (degrees) before a marker is actually moved.
pub const POSITION_EPSILON: f64 = 1e-7;

/// Two overlays closer than this (degrees) are treated as the same spot.
pub const COLOCATED_EPSILON: f64 = 1e-5;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METERS_PER_DEG_LAT: f64 = 111_320.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Largest per-axis difference in degrees.
    pub fn max_axis_delta(&self, other: &LatLng) -> f64 {
        (self.lat - other.lat).abs().max((self.lng - other.lng).abs())
    }

    pub fn moved_beyond(&self, other: &LatLng, epsilon: f64) -> bool {
        self.max_axis_delta(other) > epsilon
    }

    pub fn is_colocated(&self, other: &LatLng) -> bool {
        self.max_axis_delta(other) <= COLOCATED_EPSILON
    }

    /// Planar distance in degrees, only meaningful for nearby points.
    pub fn degree_distance(&self, other: &LatLng) -> f64 {
        ((self.lat - other.lat).powi(2) + (self.lng - other.lng).powi(2)).sqrt()
    }

    /// Great-circle distance in meters.
    pub fn haversine_m(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    pub fn pos_key(&self) -> String {
        pos_key(self.lat, self.lng)
    }
}

impl From<LatLng> for Coord<f64> {
    fn from(p: LatLng) -> Self {
        Coord { x: p.lng, y: p.lat }
    }
}

impl From<Coord<f64>> for LatLng {
    fn from(c: Coord<f64>) -> Self {
        LatLng::new(c.y, c.x)
    }
}

/// Fixed-precision grouping key. Never use it as a coordinate.
pub fn pos_key(lat: f64, lng: f64) -> String {
    format!("{:.5},{:.5}", lat, lng)
}

/// Axis-aligned viewport rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    rect: Rect<f64>,
}

impl Bounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            rect: Rect::new(Coord::from(south_west), Coord::from(north_east)),
        }
    }

    pub fn around(center: LatLng, span_lat: f64, span_lng: f64) -> Self {
        Self::new(
            LatLng::new(center.lat - span_lat / 2.0, center.lng - span_lng / 2.0),
            LatLng::new(center.lat + span_lat / 2.0, center.lng + span_lng / 2.0),
        )
    }

    pub fn south_west(&self) -> LatLng {
        self.rect.min().into()
    }

    pub fn north_east(&self) -> LatLng {
        self.rect.max().into()
    }

    pub fn center(&self) -> LatLng {
        self.rect.center().into()
    }

    pub fn contains(&self, p: &LatLng) -> bool {
        let (sw, ne) = (self.south_west(), self.north_east());
        p.lat >= sw.lat && p.lat <= ne.lat && p.lng >= sw.lng && p.lng <= ne.lng
    }

    pub fn width_m(&self) -> f64 {
        let c = self.center();
        self.rect.width() * METERS_PER_DEG_LAT * c.lat.to_radians().cos()
    }

    pub fn height_m(&self) -> f64 {
        self.rect.height() * METERS_PER_DEG_LAT
    }

    pub fn shorter_edge_m(&self) -> f64 {
        self.width_m().min(self.height_m())
    }

    pub fn rect(&self) -> Rect<f64> {
        self.rect
    }
}

/// Pixel position inside the map container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &ScreenPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

pub fn meters_to_lat_deg(m: f64) -> f64 {
    m / METERS_PER_DEG_LAT
}

pub fn meters_to_lng_deg(m: f64, at_lat: f64) -> f64 {
    let cos = at_lat.to_radians().cos().max(1e-6);
    m / (METERS_PER_DEG_LAT * cos)
}

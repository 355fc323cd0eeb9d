//! Great-circle distance and coarse bounding boxes for the candidate query.

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two points in decimal degrees
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push `a` just outside [0, 1] at identical or antipodal points
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Squared degree distance with longitude scaled at the origin's latitude
///
/// Only meaningful for ranking nearby points against one origin; the candidate
/// pool query orders by the same expression.
pub fn approx_sq_degrees(origin_lat: f64, origin_lon: f64, lat: f64, lon: f64) -> f64 {
    let dlat = lat - origin_lat;
    let dlon = (lon - origin_lon) * origin_lat.to_radians().cos();
    dlat * dlat + dlon * dlon
}

/// Latitude/longitude rectangle guaranteed to contain every point within a radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(lat: f64, lon: f64, radius_km: f64) -> Self {
        // slightly less than the true km/degree so the box errs on the large side
        let km_per_degree = 111.0;
        let lat_change = radius_km.max(0.0) / km_per_degree;
        let min_lat = (lat - lat_change).max(-90.0);
        let max_lat = (lat + lat_change).min(90.0);

        // longitude span widens with latitude, so size it for the most poleward edge
        let widest = min_lat.abs().max(max_lat.abs());
        let cos_lat = widest.to_radians().cos();

        let (min_lon, max_lon) = if cos_lat <= 1e-6 || max_lat >= 90.0 || min_lat <= -90.0 {
            (-180.0, 180.0)
        } else {
            let lon_change = lat_change / cos_lat;
            if lon_change >= 180.0 || lon - lon_change < -180.0 || lon + lon_change > 180.0 {
                // wraps the antimeridian: fall back to the full longitude range
                (-180.0, 180.0)
            } else {
                (lon - lon_change, lon + lon_change)
            }
        };

        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

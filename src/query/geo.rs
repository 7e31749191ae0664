use crate::types::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().asin()
}

/// Great-circle distance in meters.
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine(a.lat, a.lon, b.lat, b.lon)
}

pub fn within(point: &GeoPoint, center: &GeoPoint, radius_m: f64) -> bool {
    distance(point, center) <= radius_m
}

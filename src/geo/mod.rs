pub mod eta;
pub mod fee;
pub mod quote;

use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_distance_km(a.lat, a.lng, b.lat, b.lng)
}

pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lon2 - lon1).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + phi1.cos() * phi2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

/// Half-away-from-zero rounding to two decimals, used for money and displayed km.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{haversine_distance_km, haversine_km, round2};
    use crate::models::location::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 6.9271,
            lng: 79.8612,
        };
        let distance = haversine_km(&p, &p);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (6.9271, 79.8612, 9.6615, 80.0255),
            (-33.8688, 151.2093, 51.5074, -0.1278),
            (0.0, 179.9, 0.0, -179.9),
            (89.9, 0.0, -89.9, 180.0),
        ];
        for (lat1, lon1, lat2, lon2) in pairs {
            let forward = haversine_distance_km(lat1, lon1, lat2, lon2);
            let backward = haversine_distance_km(lat2, lon2, lat1, lon1);
            assert_eq!(forward, backward);
        }
    }

    #[test]
    fn antimeridian_neighbours_are_close() {
        let distance = haversine_distance_km(0.0, 179.9, 0.0, -179.9);
        assert!(distance < 25.0);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round2(87.5), 87.5);
        assert_eq!(round2(1.005_000_1), 1.01);
        assert_eq!(round2(2.344), 2.34);
    }
}

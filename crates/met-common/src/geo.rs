//! Great-circle distance helpers.

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert!(haversine_km(52.52, 13.405, 52.52, 13.405) < 1e-9);
    }

    #[test]
    fn test_berlin_to_hamburg() {
        // Berlin (52.52, 13.405) to Hamburg (53.551, 9.994) is ~255 km.
        let d = haversine_km(52.52, 13.405, 53.551, 9.994);
        assert!((d - 255.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_symmetry() {
        let a = haversine_km(48.1, 11.6, 50.1, 8.7);
        let b = haversine_km(50.1, 8.7, 48.1, 11.6);
        assert!((a - b).abs() < 1e-9);
    }
}

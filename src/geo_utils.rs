//! Geographic utilities.

use geo::{Distance, Haversine, Point};

use crate::LocationSample;

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let point1 = Point::new(lng1, lat1);
    let point2 = Point::new(lng2, lat2);
    Haversine::distance(point1, point2)
}

/// Great-circle distance between two samples in meters.
///
/// Non-finite results (corrupt coordinates) collapse to zero.
pub fn sample_distance(from: &LocationSample, to: &LocationSample) -> f64 {
    let d = haversine_distance(from.latitude, from.longitude, to.latitude, to.longitude);
    if d.is_finite() {
        d.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_millidegree_latitude() {
        // 0.001 degrees of latitude is roughly 111 meters
        let d = haversine_distance(46.5, 8.0, 46.501, 8.0);
        assert!((d - 111.2).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_same_point_is_zero() {
        let a = LocationSample::new(0.0, 46.5, 8.0, 1000.0);
        assert_eq!(sample_distance(&a, &a), 0.0);
    }
}

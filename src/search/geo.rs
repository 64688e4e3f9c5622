//! Great-circle distance and bounding boxes

use crate::models::GeoPoint;
use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Kilometers spanned by one degree of latitude
pub const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Haversine distance between two points in kilometers
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Absorbs rounding between box bounds and the haversine distance
const BOUND_SLACK_DEGREES: f64 = 1e-9;

/// Coarse rectangle enclosing a circle, used to prefilter candidates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// Longitude bounds; `None` when the circle spans a pole or the antimeridian
    pub lng: Option<(f64, f64)>,
}

impl BoundingBox {
    /// Box around `center` containing every point within `radius_km`
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        // Angular radius of the circle on the sphere
        let angle = radius_km / EARTH_RADIUS_KM;
        let dlat = angle.to_degrees() + BOUND_SLACK_DEGREES;
        let min_lat = center.lat - dlat;
        let max_lat = center.lat + dlat;

        let lng = if min_lat <= -90.0 || max_lat >= 90.0 {
            None
        } else {
            // Widest longitude spread of a spherical cap
            let spread = angle.sin() / center.lat.to_radians().cos();
            if spread >= 1.0 {
                None
            } else {
                let dlng = spread.asin().to_degrees() + BOUND_SLACK_DEGREES;
                let (min_lng, max_lng) = (center.lng - dlng, center.lng + dlng);
                if min_lng < -180.0 || max_lng > 180.0 {
                    None
                } else {
                    Some((min_lng, max_lng))
                }
            }
        };

        Self {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            lng,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        if point.lat < self.min_lat || point.lat > self.max_lat {
            return false;
        }
        match self.lng {
            Some((min_lng, max_lng)) => point.lng >= min_lng && point.lng <= max_lng,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Sofia to Plovdiv, roughly 133 km
        let sofia = GeoPoint::new(42.6977, 23.3219);
        let plovdiv = GeoPoint::new(42.1354, 24.7453);
        let d = haversine_km(sofia, plovdiv);
        assert!((d - 132.9).abs() < 2.0, "got {d}");
        assert_eq!(haversine_km(sofia, sofia), 0.0);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - KM_PER_DEGREE).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_contains_circle() {
        let center = GeoPoint::new(42.0, 23.0);
        let bbox = BoundingBox::around(center, 10.0);
        assert!(bbox.contains(center));
        assert!(bbox.contains(GeoPoint::new(42.0 + 9.9 / KM_PER_DEGREE, 23.0)));
        assert!(!bbox.contains(GeoPoint::new(43.0, 23.0)));
        assert!(bbox.lng.is_some());
    }

    #[test]
    fn test_bounding_box_antimeridian_and_poles() {
        let bbox = BoundingBox::around(GeoPoint::new(0.0, 179.99), 50.0);
        assert!(bbox.lng.is_none());
        assert!(bbox.contains(GeoPoint::new(0.0, -179.99)));

        let polar = BoundingBox::around(GeoPoint::new(89.9, 0.0), 50.0);
        assert!(polar.lng.is_none());
        assert_eq!(polar.max_lat, 90.0);
    }

    #[test]
    fn test_bounding_box_high_latitude_spread() {
        let center = GeoPoint::new(80.0, 0.0);
        let edge = GeoPoint::new(81.06, 26.6);
        let d = haversine_km(center, edge);
        assert!(d < 500.0, "got {d}");

        let bbox = BoundingBox::around(center, 500.0);
        assert!(bbox.lng.is_some());
        assert!(bbox.contains(edge));
    }

    #[test]
    fn test_bounding_box_never_cuts_the_circle() {
        // Points on the circle's rim at many bearings must all fall inside the box
        for &(lat, lng, radius) in &[
            (0.0, 0.0, 100.0),
            (60.0, 10.0, 800.0),
            (75.0, -120.0, 1200.0),
            (-85.0, 45.0, 300.0),
            (10.0, 178.0, 150.0),
        ] {
            let center = GeoPoint::new(lat, lng);
            let bbox = BoundingBox::around(center, radius);
            let angle = radius / EARTH_RADIUS_KM;
            let (phi, lambda) = (lat.to_radians(), lng.to_radians());

            for step in 0..360 {
                let bearing = (step as f64).to_radians();
                let rim_lat = (phi.sin() * angle.cos()
                    + phi.cos() * angle.sin() * bearing.cos())
                .asin();
                let rim_lng = lambda
                    + (bearing.sin() * angle.sin() * phi.cos())
                        .atan2(angle.cos() - phi.sin() * rim_lat.sin());
                let mut rim_lng = rim_lng.to_degrees();
                if rim_lng > 180.0 {
                    rim_lng -= 360.0;
                } else if rim_lng < -180.0 {
                    rim_lng += 360.0;
                }

                let rim = GeoPoint::new(rim_lat.to_degrees(), rim_lng);
                assert!(
                    bbox.contains(rim),
                    "rim point {rim:?} outside box {bbox:?} around ({lat}, {lng})"
                );
            }
        }
    }
}

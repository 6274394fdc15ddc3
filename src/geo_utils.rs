//! Geographic utilities: great-circle distance, path length, bounds and the
//! small formatting helpers used for route summaries.

use geo::{BoundingRect, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::LatLng;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Maximum distance for [`find_closest_index`] to report a match.
pub const CLOSEST_MATCH_RADIUS_METERS: f64 = 5_000.0;

/// Bounding box of Nepal, used to sanity-check itinerary coordinates.
pub const NEPAL_BOUNDS: Bounds = Bounds {
    min_lat: 26.3,
    max_lat: 30.4,
    min_lng: 80.0,
    max_lng: 88.2,
};

/// Great-circle distance between two points in meters (haversine formula).
///
/// # Example
/// ```
/// use trek_route::LatLng;
/// use trek_route::geo_utils::haversine_distance;
///
/// let a = LatLng::new(27.8, 86.7);
/// let b = LatLng::new(27.9, 86.7);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 11_119.5).abs() < 1.0);
/// ```
pub fn haversine_distance(p1: &LatLng, p2: &LatLng) -> f64 {
    let lat1 = p1.lat.to_radians();
    let lat2 = p2.lat.to_radians();
    let dlat = (p2.lat - p1.lat).to_radians();
    let dlng = (p2.lng - p1.lng).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Total length of a polyline in meters. Paths with fewer than two points
/// have zero length.
pub fn path_distance(path: &[LatLng]) -> f64 {
    path.windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Bounding box for a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from coordinates, `None` for an empty slice.
    pub fn from_points(points: &[LatLng]) -> Option<Self> {
        let line: LineString<f64> = points.iter().map(|p| Coord::from(*p)).collect();
        line.bounding_rect().map(|rect| Self {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }

    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Check a coordinate against a region bounding box (e.g. [`NEPAL_BOUNDS`]).
pub fn is_within_region(point: &LatLng, region: &Bounds) -> bool {
    point.is_valid() && region.contains(point)
}

/// Index of the path point nearest to `target`, if it lies within
/// [`CLOSEST_MATCH_RADIUS_METERS`].
pub fn find_closest_index(path: &[LatLng], target: &LatLng) -> Option<usize> {
    path.iter()
        .enumerate()
        .map(|(i, p)| (i, haversine_distance(p, target)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, d)| *d < CLOSEST_MATCH_RADIUS_METERS)
        .map(|(i, _)| i)
}

/// Slice of `full_path` between the points nearest to `start` and `end`.
///
/// Used to highlight a single day on an already stitched route. Returns an
/// empty vector when either endpoint is too far from the path.
pub fn extract_day_segment(full_path: &[LatLng], start: &LatLng, end: &LatLng) -> Vec<LatLng> {
    match (
        find_closest_index(full_path, start),
        find_closest_index(full_path, end),
    ) {
        (Some(a), Some(b)) => {
            let (from, to) = if a <= b { (a, b) } else { (b, a) };
            full_path[from..=to].to_vec()
        }
        _ => Vec::new(),
    }
}

/// Human-readable distance: "850 m" below a kilometre, "12.3 km" above.
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{} m", meters.max(0.0).round() as u64)
    }
}

/// Human-readable duration: "3h 20m", "5h", or "2d 4h" beyond a day.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0h".to_string();
    }
    let total_minutes = (seconds / 60.0).round() as u64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 24 {
        format!("{}d {}h", hours / 24, hours % 24)
    } else if minutes > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}h", hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = LatLng::new(27.8, 86.7);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = LatLng::new(27.6869, 86.7314);
        let b = LatLng::new(27.9881, 86.9250);
        let d1 = haversine_distance(&a, &b);
        let d2 = haversine_distance(&b, &a);
        assert!((d1 - d2).abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_distance(&LatLng::new(0.0, 0.0), &LatLng::new(1.0, 0.0));
        // 2πR / 360
        assert!((d - 111_194.93).abs() < 0.5);
    }

    #[test]
    fn test_path_distance() {
        assert_eq!(path_distance(&[]), 0.0);
        assert_eq!(path_distance(&[LatLng::new(27.8, 86.7)]), 0.0);

        let a = LatLng::new(27.8, 86.7);
        let b = LatLng::new(27.85, 86.7);
        let c = LatLng::new(27.9, 86.7);
        let total = path_distance(&[a, b, c]);
        assert!((total - haversine_distance(&a, &c)).abs() < 0.01);
    }

    #[test]
    fn test_bounds() {
        assert!(Bounds::from_points(&[]).is_none());

        let bounds = Bounds::from_points(&[
            LatLng::new(27.7, 86.9),
            LatLng::new(28.0, 86.6),
            LatLng::new(27.9, 86.7),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 27.7);
        assert_eq!(bounds.max_lat, 28.0);
        assert_eq!(bounds.min_lng, 86.6);
        assert_eq!(bounds.max_lng, 86.9);
        assert!(bounds.contains(&bounds.center()));
    }

    #[test]
    fn test_region_check() {
        assert!(is_within_region(&LatLng::new(27.7172, 85.324), &NEPAL_BOUNDS));
        assert!(!is_within_region(&LatLng::new(51.5, -0.12), &NEPAL_BOUNDS));
    }

    #[test]
    fn test_find_closest_index() {
        let path = vec![
            LatLng::new(27.80, 86.70),
            LatLng::new(27.85, 86.70),
            LatLng::new(27.90, 86.70),
        ];
        assert_eq!(find_closest_index(&path, &LatLng::new(27.851, 86.70)), Some(1));
        assert_eq!(find_closest_index(&path, &LatLng::new(30.0, 80.0)), None);
        assert_eq!(find_closest_index(&[], &LatLng::new(27.8, 86.7)), None);
    }

    #[test]
    fn test_extract_day_segment() {
        let path: Vec<LatLng> = (0..10)
            .map(|i| LatLng::new(27.8 + i as f64 * 0.01, 86.7))
            .collect();

        let day = extract_day_segment(&path, &LatLng::new(27.82, 86.7), &LatLng::new(27.85, 86.7));
        assert_eq!(day.len(), 4);
        assert_eq!(day[0], path[2]);
        assert_eq!(day[3], path[5]);

        // Reversed endpoints give the same slice
        let reversed =
            extract_day_segment(&path, &LatLng::new(27.85, 86.7), &LatLng::new(27.82, 86.7));
        assert_eq!(reversed, day);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(850.4), "850 m");
        assert_eq!(format_distance(1000.0), "1.0 km");
        assert_eq!(format_distance(12_345.0), "12.3 km");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(f64::NAN), "0h");
        assert_eq!(format_duration(0.0), "0h");
        assert_eq!(format_duration(5.0 * 3600.0), "5h");
        assert_eq!(format_duration(3.0 * 3600.0 + 20.0 * 60.0), "3h 20m");
        assert_eq!(format_duration(52.0 * 3600.0), "2d 4h");
    }
}

//! Spatial query utilities for distance and bearing calculations.
//!
//! Uses the Haversine formula for distances on Earth's surface. Projection
//! and interpolation work in plain coordinate space (x = longitude,
//! y = latitude), which is accurate enough over the few hundred metres a
//! vehicle moves between polls.

use geo::{ClosestPoint, Coord, HaversineBearing, HaversineDistance, Line, LineString, Point};

/// Squared length below which two coordinates are considered the same point.
pub const DEGENERATE_EPSILON_2: f64 = 1e-18;

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance(p1: Point, p2: Point) -> f64 {
    p1.haversine_distance(&p2)
}

/// Calculate distance from point to line segment in meters
pub fn haversine_distance_to_line(point: Point, line: Line) -> f64 {
    let line_string = LineString::from(vec![line.start, line.end]);

    match line_string.closest_point(&point) {
        geo::Closest::Intersection(p) | geo::Closest::SinglePoint(p) => {
            haversine_distance(point, p)
        }
        geo::Closest::Indeterminate => f64::INFINITY,
    }
}

/// Initial bearing from `from` to `to` in degrees, normalized to [0, 360).
///
/// Returns `None` when the two coordinates coincide, since the bearing is
/// undefined there.
pub fn bearing_degrees(from: Coord, to: Coord) -> Option<f64> {
    if distance_2(from, to) <= DEGENERATE_EPSILON_2 {
        return None;
    }

    let bearing = Point::from(from).haversine_bearing(Point::from(to));
    Some(bearing.rem_euclid(360.0))
}

pub fn distance_2(a: Coord, b: Coord) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

pub fn distance(a: Coord, b: Coord) -> f64 {
    distance_2(a, b).sqrt()
}

/// Closest point to `p` on segment `a`-`b`, with its parameter `t` in [0, 1].
pub fn project_on_segment(p: Coord, a: Coord, b: Coord) -> (Coord, f64) {
    let ab = b - a;
    let ab_ab = ab.x * ab.x + ab.y * ab.y;

    if ab_ab == 0.0 {
        // Segment is actually a point
        return (a, 0.0);
    }

    let ap = p - a;
    let t = ((ap.x * ab.x + ap.y * ab.y) / ab_ab).clamp(0.0, 1.0);
    (a + ab * t, t)
}

/// Running arc length at every vertex; the first entry is always zero.
pub fn cumulative_lengths(coords: &[Coord]) -> Vec<f64> {
    let mut total = 0.0;
    let mut lengths = Vec::with_capacity(coords.len());
    lengths.push(0.0);
    for pair in coords.windows(2) {
        total += distance(pair[0], pair[1]);
        lengths.push(total);
    }
    lengths.truncate(coords.len());
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_haversine_distance() {
        // Distance from NYC to LA is approximately 3,936 km
        let nyc = Point::new(-74.0060, 40.7128);
        let la = Point::new(-118.2437, 34.0522);

        let dist = haversine_distance(nyc, la);
        assert!((dist - 3_936_000.0).abs() < 50_000.0); // Within 50km
    }

    #[test]
    fn test_distance_to_line() {
        let point = Point::new(127.9, 37.3);
        let line = Line::new(Coord { x: 127.9, y: 37.2 }, Coord { x: 127.9, y: 37.4 });

        // Point is on the line, distance should be near 0
        assert!(haversine_distance_to_line(point, line) < 1.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coord { x: 0.0, y: 0.0 };

        assert_abs_diff_eq!(bearing_degrees(origin, Coord { x: 0.0, y: 1.0 }).unwrap(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing_degrees(origin, Coord { x: 10.0, y: 0.0 }).unwrap(), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing_degrees(origin, Coord { x: 0.0, y: -1.0 }).unwrap(), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing_degrees(origin, Coord { x: -1.0, y: 0.0 }).unwrap(), 270.0, epsilon = 1e-9);
        assert_eq!(bearing_degrees(origin, origin), None);
    }

    #[test]
    fn test_project_on_segment_clamps() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 10.0, y: 0.0 };

        let (p, t) = project_on_segment(Coord { x: 4.0, y: 3.0 }, a, b);
        assert_eq!(p, Coord { x: 4.0, y: 0.0 });
        assert_abs_diff_eq!(t, 0.4);

        let (p, t) = project_on_segment(Coord { x: -5.0, y: 1.0 }, a, b);
        assert_eq!(p, a);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_cumulative_lengths() {
        let coords = [
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 3.0, y: 4.0 },
            Coord { x: 3.0, y: 6.0 },
        ];
        assert_eq!(cumulative_lengths(&coords), vec![0.0, 5.0, 7.0]);
        assert!(cumulative_lengths(&[]).is_empty());
    }
}

//! Arc-length parameterised paths.
//!
//! A [`TravelPath`] is the route a rendered vehicle follows during one
//! animation: either a straight line between two samples or the stretch of a
//! route polyline between two projections.

use geo::Coord;

use crate::spatial::queries::{bearing_degrees, cumulative_lengths, DEGENERATE_EPSILON_2};

#[derive(Clone, Debug, PartialEq)]
pub struct TravelPath {
    points: Vec<Coord>,
    cumulative: Vec<f64>,
}

/// Position on a path together with the bearing of the segment it lies on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathSample {
    pub position: Coord,
    /// `None` when the path has no segment with a defined bearing
    pub heading: Option<f64>,
}

impl TravelPath {
    /// Consecutive duplicate points are collapsed.
    pub fn new(mut points: Vec<Coord>) -> Self {
        points.dedup();
        let cumulative = cumulative_lengths(&points);
        Self { points, cumulative }
    }

    pub fn straight(from: Coord, to: Coord) -> Self {
        Self::new(vec![from, to])
    }

    /// A path that stays at one point.
    pub fn stationary(at: Coord) -> Self {
        Self::new(vec![at])
    }

    pub fn points(&self) -> &[Coord] {
        &self.points
    }

    pub fn start(&self) -> Option<Coord> {
        self.points.first().copied()
    }

    pub fn end(&self) -> Option<Coord> {
        self.points.last().copied()
    }

    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// True when start and end (and everything between) collapse to one point.
    pub fn is_degenerate(&self) -> bool {
        self.length() * self.length() <= DEGENERATE_EPSILON_2
    }

    /// Bearing of the last segment with a defined bearing.
    pub fn final_heading(&self) -> Option<f64> {
        self.points
            .windows(2)
            .rev()
            .find_map(|pair| bearing_degrees(pair[0], pair[1]))
    }

    /// Samples the path at `fraction` of its arc length (clamped to [0, 1]).
    pub fn sample(&self, fraction: f64) -> Option<PathSample> {
        let first = *self.points.first()?;
        if self.points.len() == 1 || self.is_degenerate() {
            return Some(PathSample {
                position: *self.points.last().unwrap_or(&first),
                heading: None,
            });
        }

        let target = self.length() * fraction.clamp(0.0, 1.0);

        // First segment whose end lies at or beyond the target distance
        let segment = self.cumulative[1..]
            .iter()
            .position(|&end| end >= target)
            .unwrap_or(self.points.len() - 2);

        let a = self.points[segment];
        let b = self.points[segment + 1];
        let seg_start = self.cumulative[segment];
        let seg_len = self.cumulative[segment + 1] - seg_start;

        let t = if seg_len > 0.0 {
            (target - seg_start) / seg_len
        } else {
            0.0
        };

        Some(PathSample {
            position: a + (b - a) * t,
            heading: bearing_degrees(a, b).or_else(|| self.final_heading()),
        })
    }
}

//! Route polylines with arc-length projection.
//!
//! A [`Polyline`] is the physical path of one route in one direction. Points
//! are snapped onto it by projecting to the nearest segment (found through an
//! R-tree), and the stretch between two projections becomes the path a
//! vehicle animates along, so it never cuts corners across map geometry.

use std::fmt;

use geo::{Coord, Line, Point};
use rstar::RTree;

use crate::spatial::index::SegmentNode;
use crate::spatial::path::TravelPath;
use crate::spatial::queries::{
    bearing_degrees, cumulative_lengths, distance_2, haversine_distance, project_on_segment,
};

#[derive(Clone)]
pub struct Polyline {
    coords: Vec<Coord>,
    cumulative: Vec<f64>,
    tree: RTree<SegmentNode>,
}

/// Result of snapping a point onto a polyline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    /// Closest point on the polyline
    pub position: Coord,
    /// Index of the segment (its start vertex) the position lies on
    pub segment: usize,
    /// Arc length from the polyline start to `position`
    pub distance_along: f64,
    /// Great-circle distance from the projected point to `position`, in meters
    pub offset_m: f64,
    /// Bearing of the segment the position lies on
    pub segment_heading: Option<f64>,
}

impl Polyline {
    pub fn new(coords: Vec<Coord>) -> Self {
        let cumulative = cumulative_lengths(&coords);
        let tree = RTree::bulk_load(
            coords
                .windows(2)
                .enumerate()
                .map(|(index, pair)| SegmentNode::new(index, Line::new(pair[0], pair[1])))
                .collect(),
        );

        Self {
            coords,
            cumulative,
            tree,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Snapping needs at least one segment.
    pub fn is_snappable(&self) -> bool {
        self.coords.len() >= 2
    }

    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Projects `point` onto the nearest segment. `None` if the polyline has
    /// fewer than two points.
    pub fn project(&self, point: Coord) -> Option<Projection> {
        let node = self.tree.nearest_neighbor_iter(&[point.x, point.y]).next()?;
        let (position, t) = project_on_segment(point, node.segment.start, node.segment.end);

        let segment_len = self.cumulative[node.index + 1] - self.cumulative[node.index];

        Some(Projection {
            position,
            segment: node.index,
            distance_along: self.cumulative[node.index] + segment_len * t,
            offset_m: haversine_distance(Point::from(point), Point::from(position)),
            segment_heading: bearing_degrees(node.segment.start, node.segment.end),
        })
    }

    /// The stretch of the polyline between two projections, walking backwards
    /// through vertices when `to` lies before `from`.
    pub fn path_between(&self, from: &Projection, to: &Projection) -> TravelPath {
        let mut points = vec![from.position];

        if from.segment < to.segment {
            points.extend_from_slice(&self.coords[from.segment + 1..=to.segment]);
        } else if from.segment > to.segment {
            points.extend(self.coords[to.segment + 1..=from.segment].iter().rev());
        }

        points.push(to.position);
        TravelPath::new(points)
    }

    /// Squared coordinate-space distance from `point` to the polyline.
    pub fn distance_2(&self, point: Coord) -> Option<f64> {
        self.project(point).map(|p| distance_2(point, p.position))
    }
}

impl Default for Polyline {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Polyline {
    fn eq(&self, other: &Self) -> bool {
        self.coords == other.coords
    }
}

impl fmt::Debug for Polyline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polyline")
            .field("points", &self.coords.len())
            .field("length", &self.length())
            .finish()
    }
}

impl From<Vec<Coord>> for Polyline {
    fn from(coords: Vec<Coord>) -> Self {
        Self::new(coords)
    }
}

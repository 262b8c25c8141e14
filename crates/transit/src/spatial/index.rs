//! R-tree nodes for polyline snapping.
//!
//! A polyline is indexed segment by segment so that projecting a vehicle
//! position onto a long route path does not scan every segment. Distances in
//! the tree are squared Euclidean distances in coordinate space.

use geo::{Coord, Line};
use rstar::{PointDistance, RTreeObject, AABB};

use crate::spatial::queries::{distance_2, project_on_segment};

// ============================================================================
// Polyline Segment Spatial Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct SegmentNode {
    /// Position of the segment's start vertex in the owning polyline
    pub index: usize,
    pub segment: Line,
    aabb: AABB<[f64; 2]>,
}

impl SegmentNode {
    pub fn new(index: usize, segment: Line) -> Self {
        let start = [segment.start.x, segment.start.y];
        let end = [segment.end.x, segment.end.y];

        let aabb = AABB::from_corners(start, end);

        Self {
            index,
            segment,
            aabb,
        }
    }
}

impl RTreeObject for SegmentNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

impl PointDistance for SegmentNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let p = Coord {
            x: point[0],
            y: point[1],
        };
        let (closest, _) = project_on_segment(p, self.segment.start, self.segment.end);
        distance_2(p, closest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstar::RTree;

    #[test]
    fn test_nearest_segment() {
        let nodes = vec![
            SegmentNode::new(0, Line::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 })),
            SegmentNode::new(1, Line::new(Coord { x: 10.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 })),
        ];
        let tree = RTree::bulk_load(nodes);

        let nearest = tree.nearest_neighbor_iter(&[9.0, 6.0]).next().unwrap();
        assert_eq!(nearest.index, 1);

        let nearest = tree.nearest_neighbor_iter(&[3.0, -1.0]).next().unwrap();
        assert_eq!(nearest.index, 0);
    }

    #[test]
    fn test_point_segment_distance() {
        let node = SegmentNode::new(0, Line::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
        assert_eq!(node.distance_2(&[3.0, 4.0]), 25.0);
    }
}

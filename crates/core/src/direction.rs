//! Travel direction from stop matching.
//!
//! A vehicle reports its nearest stop id and that stop's order. One physical
//! stop can appear twice on a route (once per direction), so the order is used
//! to pick the logical stop: the candidate whose order is closest to the
//! reported one wins, and on a tie the earlier stop in sequence order wins.

use std::collections::{HashMap, HashSet};

use geo::Point;
use itertools::Itertools;
use livebus_transit::{haversine_distance, DirectionCode, NodeId, RawSample, RouteDetail, Stop};
use tracing::warn;

#[derive(Clone, Debug, Default)]
pub struct DirectionResolver {
    stops: Vec<Stop>,
    // node id -> indices into `stops`, in sequence order
    by_node: HashMap<NodeId, Vec<usize>>,
    always_upward: HashSet<NodeId>,
}

impl DirectionResolver {
    /// `stops` must be in stop-sequence order.
    pub fn new<I, S>(stops: Vec<Stop>, always_upward: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let by_node = stops
            .iter()
            .enumerate()
            .map(|(index, stop)| (stop.node_id.clone(), index))
            .into_group_map();

        Self {
            stops,
            by_node,
            always_upward: always_upward
                .into_iter()
                .map(|id| NodeId::new(id.as_ref().trim()))
                .collect(),
        }
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// Direction of a vehicle last seen at `node_id` with order `node_ord`.
    ///
    /// `None` means unknown; there is no default direction.
    pub fn get_direction(&self, node_id: &str, node_ord: i64) -> Option<DirectionCode> {
        let node_id = node_id.trim();
        if node_id.is_empty() {
            return None;
        }

        if self.always_upward.contains(node_id) {
            return Some(DirectionCode::Up);
        }

        let Some(candidates) = self.by_node.get(node_id) else {
            warn!(node_id, "No stop matches node id");
            return None;
        };

        candidates
            .iter()
            .map(|&index| &self.stops[index])
            .min_by_key(|stop| stop.node_ord.abs_diff(node_ord))
            .map(|stop| stop.direction)
    }

    pub fn direction_for(&self, sample: &RawSample) -> Option<DirectionCode> {
        let node_id = sample.node_id.as_ref()?;
        self.get_direction(node_id.as_str(), sample.node_ord)
    }

    pub fn stop_exists(&self, node_id: &str) -> bool {
        self.by_node.contains_key(node_id.trim())
    }

    /// Closest stop to `point` and its distance in meters.
    pub fn nearest_stop(&self, point: Point) -> Option<(&Stop, f64)> {
        self.stops
            .iter()
            .map(|stop| (stop, haversine_distance(point, stop.location)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Direction of the sequence item with exactly `node_ord`.
pub fn direction_from_details(details: &RouteDetail, node_ord: i64) -> Option<DirectionCode> {
    details
        .sequence
        .iter()
        .find(|item| item.nodeord == node_ord)
        .map(|item| DirectionCode::from_updown_code(item.updowncd))
}

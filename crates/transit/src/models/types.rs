//! Core data types and enums for live transit data.

use geo::{Coord, Point};
use serde::{Deserialize, Serialize};

use crate::identifiers::*;

// ============================================================================
// Enums
// ============================================================================

/// Travel direction along a route.
///
/// The upstream feed encodes this as `updowncd` (1 = up, 0 = down).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionCode {
    Up,
    Down,
}

impl DirectionCode {
    /// Any non-zero code is treated as up, matching the feed's own convention.
    pub fn from_updown_code(code: i64) -> Self {
        if code == 0 {
            Self::Down
        } else {
            Self::Up
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "up" | "1" => Some(Self::Up),
            "down" | "0" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A named transit line and the feed identifiers its vehicles report under.
///
/// `representative_id` is always the first element of `feed_ids`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub name: RouteName,
    pub representative_id: FeedId,
    pub feed_ids: Vec<FeedId>,
}

impl Route {
    /// Returns `None` for an empty identifier list; such a route is treated as absent.
    pub fn new(name: RouteName, feed_ids: Vec<FeedId>) -> Option<Self> {
        let representative_id = feed_ids.first()?.clone();
        Some(Self {
            name,
            representative_id,
            feed_ids,
        })
    }

    pub fn serves(&self, feed_id: &FeedId) -> bool {
        self.feed_ids.contains(feed_id)
    }
}

/// A fixed point along a route.
///
/// Several stops may share a `node_id` (one physical stop serving both
/// directions); they then differ in `direction` or `node_ord`.
#[derive(Clone, Debug, PartialEq)]
pub struct Stop {
    pub node_id: NodeId,
    pub node_ord: i64,
    pub direction: DirectionCode,
    pub location: Point,
    pub label: String,
}

/// One polling result for one vehicle. Superseded by every poll.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    pub vehicle_id: VehicleId,
    pub route_label: RouteName,
    pub location: Coord,
    pub node_id: Option<NodeId>,
    pub node_ord: i64,
    /// Feed identifier the vehicle reported under, when the feed provides one
    pub feed_id: Option<FeedId>,
}

impl RawSample {
    /// True when `other` would move the vehicle (position or stop progress changed).
    pub fn differs_from(&self, other: &RawSample) -> bool {
        self.location != other.location
            || self.node_ord != other.node_ord
            || self.node_id != other.node_id
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransitError {
    #[error("Route not found: {0}")]
    RouteNotFound(RouteName),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl TransitError {
    /// True for the "absent resource" outcome, as opposed to a transport failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for TransitError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransitError>;

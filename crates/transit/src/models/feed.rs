//! Wire formats of the upstream documents.
//!
//! The static route map and the live vehicle feed are plain JSON. Field names
//! follow the upstream API (`gpslati`, `nodeord`, `updowncd`, ...) and are
//! mapped onto the domain types in [`crate::models::types`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use geo::{Coord, Point};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::identifiers::*;
use crate::models::types::*;

// ============================================================================
// Static topology document
// ============================================================================

/// The route map: every known route label and its feed identifiers, plus
/// per-feed stop sequences and the station table.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TopologyDocument {
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: Option<String>,
    pub route_numbers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub route_details: HashMap<String, RouteDetail>,
    #[serde(default)]
    pub stations: BTreeMap<String, StationRecord>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RouteDetail {
    #[serde(default)]
    pub sequence: Vec<SequenceItem>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SequenceItem {
    #[serde(deserialize_with = "lenient_i64")]
    pub nodeord: i64,
    pub nodeid: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub updowncd: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StationRecord {
    pub gpslati: f64,
    pub gpslong: f64,
    #[serde(default)]
    pub nodenm: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub nodeord: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub updowncd: i64,
}

impl TopologyDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// All routes with at least one feed identifier, keyed by label.
    pub fn routes(&self) -> BTreeMap<RouteName, Route> {
        self.route_numbers
            .iter()
            .filter_map(|(name, ids)| {
                let name = RouteName::new(name);
                Route::new(name.clone(), ids.iter().map(FeedId::new).collect())
                    .map(|route| (name, route))
            })
            .collect()
    }

    pub fn route(&self, name: &str) -> Option<Route> {
        let ids = self.route_numbers.get(name)?;
        Route::new(RouteName::new(name), ids.iter().map(FeedId::new).collect())
    }

    pub fn route_detail(&self, feed_id: &FeedId) -> Option<&RouteDetail> {
        self.route_details.get(feed_id.as_str())
    }

    /// The whole station table as stops, stably ordered by `node_ord`.
    pub fn stations(&self) -> Vec<Stop> {
        let mut stops: Vec<Stop> = self
            .stations
            .iter()
            .map(|(node_id, record)| record.to_stop(NodeId::new(node_id)))
            .collect();
        stops.sort_by_key(|stop| stop.node_ord);
        stops
    }

    /// Stops of one route in stop-sequence order.
    ///
    /// Sequences of every feed identifier are concatenated in feed order; a
    /// node id may appear once per direction. Coordinates and labels come from
    /// the station table, and sequence items without a station record are skipped.
    pub fn route_stops(&self, route: &Route) -> Vec<Stop> {
        route
            .feed_ids
            .iter()
            .filter_map(|feed_id| self.route_detail(feed_id))
            .flat_map(|detail| detail.sequence.iter())
            .filter_map(|item| {
                let record = self.stations.get(&item.nodeid)?;
                Some(Stop {
                    node_id: NodeId::new(&item.nodeid),
                    node_ord: item.nodeord,
                    direction: DirectionCode::from_updown_code(item.updowncd),
                    location: record.location(),
                    label: record.nodenm.clone(),
                })
            })
            .collect()
    }
}

impl StationRecord {
    pub fn location(&self) -> Point {
        Point::new(self.gpslong, self.gpslati)
    }

    fn to_stop(&self, node_id: NodeId) -> Stop {
        Stop {
            node_id,
            node_ord: self.nodeord,
            direction: DirectionCode::from_updown_code(self.updowncd),
            location: self.location(),
            label: self.nodenm.clone(),
        }
    }
}

// ============================================================================
// Live vehicle feed
// ============================================================================

#[derive(Clone, Debug, Deserialize)]
pub struct VehicleRecord {
    pub vehicleno: String,
    #[serde(default)]
    pub routenm: Option<String>,
    pub gpslati: f64,
    pub gpslong: f64,
    #[serde(default)]
    pub nodeid: Option<String>,
    #[serde(default)]
    pub nodenm: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub nodeord: i64,
    #[serde(default)]
    pub routeid: Option<String>,
}

impl VehicleRecord {
    /// `fallback_route` labels records whose `routenm` is missing.
    pub fn into_sample(self, fallback_route: &RouteName) -> RawSample {
        RawSample {
            vehicle_id: VehicleId::new(&self.vehicleno),
            route_label: self
                .routenm
                .map(RouteName::from)
                .unwrap_or_else(|| fallback_route.clone()),
            location: Coord {
                x: self.gpslong,
                y: self.gpslati,
            },
            node_id: self
                .nodeid
                .map(|id| id.trim().to_owned())
                .filter(|id| !id.is_empty())
                .map(NodeId::from),
            node_ord: self.nodeord,
            feed_id: self.routeid.map(FeedId::from),
        }
    }
}

/// Parses a live feed response.
///
/// Accepts the `response.body.items.item` envelope (where `item` may be a
/// single object and `items` may be an empty string when nothing runs) as well
/// as a bare JSON array.
pub fn parse_vehicle_records(bytes: &[u8]) -> Result<Vec<VehicleRecord>> {
    let value: Value = serde_json::from_slice(bytes)?;

    let items = if value.is_array() {
        value
    } else {
        value
            .pointer("/response/body/items/item")
            .cloned()
            .unwrap_or(Value::Null)
    };

    match items {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(TransitError::from))
            .collect(),
        item @ Value::Object(_) => Ok(vec![serde_json::from_value(item)?]),
        _ => Ok(Vec::new()),
    }
}

/// A poll result for one route, shared between all subscribers.
#[derive(Clone, Debug)]
pub struct VehicleSnapshot {
    pub route: RouteName,
    pub fetched_at: DateTime<Utc>,
    pub vehicles: std::sync::Arc<[RawSample]>,
}

impl VehicleSnapshot {
    pub fn new(route: RouteName, vehicles: Vec<RawSample>) -> Self {
        Self {
            route,
            fetched_at: Utc::now(),
            vehicles: vehicles.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

// The upstream API serialises some integers as strings.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("invalid integer: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid integer: {s:?}"))),
        Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("expected integer, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_MAP: &str = r#"{
        "lastUpdated": "2025-03-01",
        "route_numbers": {
            "30": ["WJB251000068", "WJB251000069"],
            "34": ["WJB251000070"],
            "Shuttle": []
        },
        "route_details": {
            "WJB251000068": {
                "sequence": [
                    {"nodeord": 1, "nodeid": "N1", "updowncd": 1},
                    {"nodeord": 2, "nodeid": "N2", "updowncd": 1},
                    {"nodeord": 3, "nodeid": "N1", "updowncd": 0}
                ]
            }
        },
        "stations": {
            "N1": {"gpslati": 37.30, "gpslong": 127.90, "nodenm": "Terminal", "nodeord": 1, "updowncd": 1},
            "N2": {"gpslati": 37.31, "gpslong": 127.91, "nodenm": "Campus", "nodeord": "2", "updowncd": "1"}
        }
    }"#;

    #[test]
    fn test_route_map_filters_empty_routes() {
        let doc = TopologyDocument::from_slice(ROUTE_MAP.as_bytes()).unwrap();
        let routes = doc.routes();

        assert_eq!(routes.len(), 2);
        assert!(routes.contains_key("30"));
        assert!(doc.route("Shuttle").is_none());
        assert!(doc.route("99").is_none());

        let route = doc.route("30").unwrap();
        assert_eq!(route.representative_id.as_str(), "WJB251000068");
        assert_eq!(route.feed_ids.len(), 2);
    }

    #[test]
    fn test_route_stops_follow_sequence() {
        let doc = TopologyDocument::from_slice(ROUTE_MAP.as_bytes()).unwrap();
        let stops = doc.route_stops(&doc.route("30").unwrap());

        let ids: Vec<_> = stops.iter().map(|s| (s.node_id.as_str(), s.direction)).collect();
        assert_eq!(
            ids,
            vec![
                ("N1", DirectionCode::Up),
                ("N2", DirectionCode::Up),
                ("N1", DirectionCode::Down),
            ]
        );
        assert_eq!(stops[1].label, "Campus");
    }

    #[test]
    fn test_stations_accept_string_integers() {
        let doc = TopologyDocument::from_slice(ROUTE_MAP.as_bytes()).unwrap();
        let stations = doc.stations();

        assert_eq!(stations.len(), 2);
        assert_eq!(stations[1].node_ord, 2);
        assert_eq!(stations[1].location, Point::new(127.91, 37.31));
    }

    #[test]
    fn test_parse_vehicle_envelope() {
        let body = r#"{"response": {"body": {"items": {"item": [
            {"vehicleno": "77-1234", "routenm": "30", "gpslati": 37.3, "gpslong": 127.9,
             "nodeid": "N1", "nodenm": "Terminal", "nodeord": 5, "routeid": "WJB251000068"},
            {"vehicleno": "77-5678", "gpslati": 37.31, "gpslong": 127.91, "nodeord": "7"}
        ]}}}}"#;

        let records = parse_vehicle_records(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let route = RouteName::new("30");
        let second = records[1].clone().into_sample(&route);
        assert_eq!(second.route_label, route);
        assert_eq!(second.node_ord, 7);
        assert_eq!(second.node_id, None);

        let first = records[0].clone().into_sample(&route);
        assert_eq!(first.feed_id, Some(FeedId::new("WJB251000068")));
        assert_eq!(first.location, Coord { x: 127.9, y: 37.3 });
    }

    #[test]
    fn test_parse_vehicle_single_item_and_empty() {
        let single = r#"{"response": {"body": {"items": {"item":
            {"vehicleno": "77-1234", "gpslati": 37.3, "gpslong": 127.9, "nodeord": 1}
        }}}}"#;
        assert_eq!(parse_vehicle_records(single.as_bytes()).unwrap().len(), 1);

        let empty = r#"{"response": {"body": {"items": ""}}}"#;
        assert!(parse_vehicle_records(empty.as_bytes()).unwrap().is_empty());

        let bare = r#"[{"vehicleno": "1", "gpslati": 0.0, "gpslong": 0.0}]"#;
        assert_eq!(parse_vehicle_records(bare.as_bytes()).unwrap().len(), 1);

        assert!(matches!(
            parse_vehicle_records(b"<html>").unwrap_err(),
            TransitError::Parse(_)
        ));
    }
}

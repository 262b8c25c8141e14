#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use geo::Coord;
use livebus_core::source::{PolylineKey, TransitSource};
use livebus_core::transit::{
    FeedId, GeometryDocument, RawSample, Result, RouteName, TopologyDocument, VehicleId,
};

/// Route "30" has enough stops of its own; N1 is served in both directions.
pub const ROUTE_MAP: &str = r#"{
    "lastUpdated": "2025-03-01",
    "route_numbers": {"30": ["F30A", "F30B"], "34": ["F34"]},
    "route_details": {
        "F30A": {"sequence": [
            {"nodeord": 3, "nodeid": "N0", "updowncd": 1},
            {"nodeord": 4, "nodeid": "N1", "updowncd": 1},
            {"nodeord": 6, "nodeid": "N2", "updowncd": 1}
        ]},
        "F30B": {"sequence": [
            {"nodeord": 8, "nodeid": "N2", "updowncd": 0},
            {"nodeord": 9, "nodeid": "N1", "updowncd": 0}
        ]}
    },
    "stations": {
        "N0": {"gpslati": 37.000, "gpslong": 127.000, "nodenm": "Depot"},
        "N1": {"gpslati": 37.001, "gpslong": 127.000, "nodenm": "Terminal"},
        "N2": {"gpslati": 37.002, "gpslong": 127.000, "nodenm": "Campus"}
    }
}"#;

pub const LINE_GEOMETRY: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "properties": {"dir": "up", "seq": 1},
     "geometry": {"type": "LineString", "coordinates": [[127.0, 37.001], [127.0, 37.002]]}},
    {"type": "Feature", "properties": {"dir": "up", "seq": 0},
     "geometry": {"type": "LineString", "coordinates": [[127.0, 37.0], [127.0, 37.001]]}}
]}"#;

/// An up line about 26 m east of [`LINE_GEOMETRY`].
pub const OFFSET_GEOMETRY: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "properties": {"dir": "up", "seq": 0},
     "geometry": {"type": "LineString", "coordinates": [[127.0003, 37.0], [127.0003, 37.002]]}}
]}"#;

/// In-memory upstream with fetch counters.
#[derive(Default)]
pub struct FakeSource {
    pub map_fetches: AtomicUsize,
    pub vehicle_fetches: AtomicUsize,
    pub geometry_fetches: Mutex<HashMap<String, usize>>,
    pub geometry: Mutex<HashMap<String, String>>,
    pub vehicles: Mutex<HashMap<String, Vec<RawSample>>>,
    pub map_delay: Duration,
    pub vehicle_delay: Duration,
}

impl FakeSource {
    pub fn with_geometry(self, stem: &str, body: &str) -> Self {
        self.geometry
            .lock()
            .unwrap()
            .insert(stem.to_owned(), body.to_owned());
        self
    }

    pub fn set_vehicles(&self, feed_id: &str, vehicles: Vec<RawSample>) {
        self.vehicles
            .lock()
            .unwrap()
            .insert(feed_id.to_owned(), vehicles);
    }

    pub fn geometry_fetches(&self, stem: &str) -> usize {
        self.geometry_fetches
            .lock()
            .unwrap()
            .get(stem)
            .copied()
            .unwrap_or(0)
    }
}

impl TransitSource for FakeSource {
    fn fetch_route_map(&self) -> Pin<Box<dyn Future<Output = Result<TopologyDocument>> + Send + '_>> {
        Box::pin(async move {
            self.map_fetches.fetch_add(1, Ordering::SeqCst);
            if !self.map_delay.is_zero() {
                tokio::time::sleep(self.map_delay).await;
            }
            TopologyDocument::from_slice(ROUTE_MAP.as_bytes())
        })
    }

    fn fetch_geometry<'a>(
        &'a self,
        key: &'a PolylineKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GeometryDocument>>> + Send + 'a>> {
        Box::pin(async move {
            let stem = key.file_stem().to_owned();
            *self
                .geometry_fetches
                .lock()
                .unwrap()
                .entry(stem.clone())
                .or_default() += 1;

            let body = self.geometry.lock().unwrap().get(&stem).cloned();
            body.map(|body| GeometryDocument::from_slice(body.as_bytes()))
                .transpose()
        })
    }

    fn fetch_vehicles<'a>(
        &'a self,
        _route: &'a RouteName,
        feed_id: &'a FeedId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawSample>>> + Send + 'a>> {
        Box::pin(async move {
            self.vehicle_fetches.fetch_add(1, Ordering::SeqCst);
            if !self.vehicle_delay.is_zero() {
                tokio::time::sleep(self.vehicle_delay).await;
            }
            let vehicles = self.vehicles.lock().unwrap().get(feed_id.as_str()).cloned();
            Ok(vehicles.unwrap_or_default())
        })
    }
}

pub fn sample(vehicle: &str, route: &str, x: f64, y: f64) -> RawSample {
    RawSample {
        vehicle_id: VehicleId::new(vehicle),
        route_label: RouteName::new(route),
        location: Coord { x, y },
        node_id: None,
        node_ord: 0,
        feed_id: None,
    }
}

//! Static route topology and geometry, loaded through the single-flight cache.

use std::sync::Arc;

use livebus_transit::{
    FeedId, GeometryDocument, Result, Route, RouteDetail, RouteName, RoutePolylines, Stop,
    TopologyDocument,
};
use tracing::{debug, warn};

use crate::cache::SingleFlightCache;
use crate::source::{PolylineKey, TransitSource};

const ROUTE_MAP_KEY: &str = "route-map";

/// A geometry document together with its merged per-direction polylines.
#[derive(Debug)]
pub struct RouteGeometry {
    pub document: GeometryDocument,
    pub polylines: RoutePolylines,
}

impl RouteGeometry {
    pub fn new(document: GeometryDocument) -> Self {
        let polylines = document.merged();
        Self {
            document,
            polylines,
        }
    }
}

pub struct RouteResolver {
    source: Arc<dyn TransitSource>,
    topology: SingleFlightCache<&'static str, Arc<TopologyDocument>>,
    geometry: SingleFlightCache<PolylineKey, Option<Arc<RouteGeometry>>>,
    min_valid_stops: usize,
}

impl RouteResolver {
    pub fn new(source: Arc<dyn TransitSource>, min_valid_stops: usize) -> Self {
        Self {
            source,
            topology: SingleFlightCache::new(),
            geometry: SingleFlightCache::new(),
            min_valid_stops,
        }
    }

    pub fn source(&self) -> &Arc<dyn TransitSource> {
        &self.source
    }

    /// The whole route map, fetched once and shared.
    pub async fn topology(&self) -> Result<Arc<TopologyDocument>> {
        let source = Arc::clone(&self.source);
        self.topology
            .get_or_fetch(ROUTE_MAP_KEY, move || async move {
                source.fetch_route_map().await.map(Arc::new)
            })
            .await
    }

    /// `Ok(None)` when the label is not in the route map.
    pub async fn route_info(&self, name: &str) -> Result<Option<Route>> {
        let route = self.topology().await?.route(name.trim());
        if route.is_none() {
            warn!(route = name, "Route not present in route map");
        }
        Ok(route)
    }

    /// Every label with at least one feed identifier, sorted.
    pub async fn available_routes(&self) -> Result<Vec<RouteName>> {
        Ok(self.topology().await?.routes().into_keys().collect())
    }

    pub async fn route_details(&self, feed_id: &FeedId) -> Result<Option<RouteDetail>> {
        Ok(self.topology().await?.route_detail(feed_id).cloned())
    }

    /// Stops of `route` in stop-sequence order.
    ///
    /// Falls back to the full station table when the route's own stop
    /// sequences yield fewer than the configured minimum.
    pub async fn route_stops(&self, route: &Route) -> Result<Vec<Stop>> {
        let topology = self.topology().await?;
        let stops = topology.route_stops(route);
        if stops.len() >= self.min_valid_stops {
            return Ok(stops);
        }

        debug!(
            route = %route.name,
            matched = stops.len(),
            "Too few route stops, using the station table"
        );
        Ok(topology.stations())
    }

    /// Geometry for `key`; `Ok(None)` when none is recorded.
    pub async fn polyline(&self, key: &PolylineKey) -> Result<Option<Arc<RouteGeometry>>> {
        let source = Arc::clone(&self.source);
        let owned_key = key.clone();
        let geometry = self
            .geometry
            .get_or_fetch(key.clone(), move || async move {
                let document = source.fetch_geometry(&owned_key).await?;
                if document.is_none() {
                    warn!(key = %owned_key, "No geometry recorded");
                }
                Ok(document.map(|document| Arc::new(RouteGeometry::new(document))))
            })
            .await?;

        Ok(geometry)
    }

    pub fn evict_polyline(&self, key: &PolylineKey) -> bool {
        self.geometry.evict(key)
    }

    /// Drops cached geometry of every route except `route`.
    pub fn retain_geometry_for(&self, route: &RouteName) -> usize {
        self.geometry.retain(|key| &key.route == route)
    }

    /// Forgets everything; the route map is re-derived on next use.
    pub fn invalidate_all(&self) {
        self.topology.clear();
        self.geometry.clear();
    }

    pub fn cached_geometry_count(&self) -> usize {
        self.geometry.len()
    }
}

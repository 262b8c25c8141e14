//! The tracker service object.
//!
//! A [`Tracker`] owns every cache and loop of the tracking core. Create one at
//! application start, hand references to the code that needs it, and call
//! [`Tracker::reset`] on sign-out or full reload.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use livebus_transit::{
    DirectionCode, FeedId, Route, RouteName, RoutePolylines, Stop, TransitError, VehicleId,
    VehicleSnapshot,
};
use tracing::{debug, info, warn};

use crate::cache::SingleFlightCache;
use crate::config::TrackerConfig;
use crate::direction::DirectionResolver;
use crate::error::{FeedError, Result};
use crate::motion::{AnimatedPose, IngestSummary, MotionEngine, MotionSettings, RouteContext};
use crate::polling::{PollingService, SubscriptionHandle};
use crate::resolver::{RouteGeometry, RouteResolver};
use crate::source::{FeedClient, PolylineKey, TransitSource};

pub struct Tracker {
    config: TrackerConfig,
    resolver: Arc<RouteResolver>,
    polling: PollingService,
    directions: SingleFlightCache<RouteName, Arc<DirectionResolver>>,
    engine: Arc<Mutex<MotionEngine>>,
}

/// Geometry a snapshot's vehicles snap to.
#[derive(Default)]
struct SnapshotGeometry {
    by_feed: HashMap<FeedId, Arc<RouteGeometry>>,
    fallback: Option<Arc<RouteGeometry>>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, source: Arc<dyn TransitSource>) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(RouteResolver::new(source, config.direction.min_valid_stops));
        let engine = Arc::new(Mutex::new(MotionEngine::new(MotionSettings::from(&config.motion))));

        // Vehicles of a route nobody watches any more are torn down.
        let idle_engine = Arc::downgrade(&engine);
        let polling = PollingService::with_idle_hook(
            Arc::clone(&resolver),
            config.live.poll_interval(),
            move |route: &RouteName| {
                if let Some(engine) = idle_engine.upgrade() {
                    let released = lock_engine(&engine).release_route(route);
                    debug!(route = %route, released, "Released vehicles of idle route");
                }
            },
        );

        Ok(Self {
            config,
            resolver,
            polling,
            directions: SingleFlightCache::new(),
            engine,
        })
    }

    /// A tracker reading the configured HTTP endpoints.
    pub fn from_config(config: TrackerConfig) -> Result<Self> {
        let client = FeedClient::from_config(&config)?;
        info!(
            live = %config.live.base_url,
            static_data = %config.static_data.base_url,
            "Using HTTP feed"
        );
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<RouteResolver> {
        &self.resolver
    }

    pub fn polling(&self) -> &PollingService {
        &self.polling
    }

    // ------------------------------------------------------------------------
    // Live feed
    // ------------------------------------------------------------------------

    /// See [`PollingService::subscribe`]. When the last subscription of a
    /// route ends, the route's animation state is released. Must be called
    /// within a tokio runtime.
    pub fn subscribe<D, E>(&self, route: impl Into<RouteName>, on_data: D, on_error: E) -> SubscriptionHandle
    where
        D: Fn(&VehicleSnapshot) + Send + Sync + 'static,
        E: Fn(Option<FeedError>) + Send + Sync + 'static,
    {
        self.polling.subscribe(route, on_data, on_error)
    }

    pub fn latest(&self, route: &RouteName) -> Option<VehicleSnapshot> {
        self.polling.latest(route)
    }

    /// Evicts snapshots, geometry and stop data of every route but `route`,
    /// once `route` has confirmed data.
    pub fn clear_other_caches(&self, route: &RouteName) -> bool {
        if !self.polling.clear_other_caches(route) {
            return false;
        }
        self.directions.evict_all_except(route);
        true
    }

    // ------------------------------------------------------------------------
    // Static data
    // ------------------------------------------------------------------------

    pub async fn route_info(&self, name: &str) -> Result<Option<Route>> {
        Ok(self.resolver.route_info(name).await?)
    }

    pub async fn available_routes(&self) -> Result<Vec<RouteName>> {
        Ok(self.resolver.available_routes().await?)
    }

    pub async fn polyline(&self, key: &PolylineKey) -> Result<Option<Arc<RouteGeometry>>> {
        Ok(self.resolver.polyline(key).await?)
    }

    pub async fn route_stops(&self, route: &RouteName) -> Result<Vec<Stop>> {
        let info = self
            .resolver
            .route_info(route.as_str())
            .await?
            .ok_or_else(|| TransitError::RouteNotFound(route.clone()))?;
        Ok(self.resolver.route_stops(&info).await?)
    }

    /// Stop matcher of `route`, built once from its stop list.
    pub async fn direction_resolver(&self, route: &RouteName) -> Result<Arc<DirectionResolver>> {
        let resolver = Arc::clone(&self.resolver);
        let always_upward = self.config.direction.always_upward_node_ids.clone();
        let owned_route = route.clone();

        let directions = self
            .directions
            .get_or_fetch(route.clone(), move || async move {
                let info = resolver
                    .route_info(owned_route.as_str())
                    .await?
                    .ok_or(TransitError::RouteNotFound(owned_route))?;
                let stops = resolver.route_stops(&info).await?;
                Ok(Arc::new(DirectionResolver::new(stops, always_upward)))
            })
            .await?;

        Ok(directions)
    }

    pub async fn get_direction(
        &self,
        route: &RouteName,
        node_id: &str,
        node_ord: i64,
    ) -> Result<Option<DirectionCode>> {
        Ok(self
            .direction_resolver(route)
            .await?
            .get_direction(node_id, node_ord))
    }

    // ------------------------------------------------------------------------
    // Animation
    // ------------------------------------------------------------------------

    /// Feeds one poll result into the motion engine.
    ///
    /// Each vehicle snaps to the geometry of its own feed identifier, falling
    /// back to the route's representative feed and then to the route label.
    /// Missing geometry or stop data degrade to unsnapped motion and unknown
    /// directions; they are logged, not returned.
    pub async fn ingest(&self, snapshot: &VehicleSnapshot) -> IngestSummary {
        let route = &snapshot.route;

        let geometry = self.snapshot_geometry(snapshot).await;
        let directions = match self.direction_resolver(route).await {
            Ok(directions) => Some(directions),
            Err(error) => {
                warn!(route = %route, error = %error, "Stops unavailable, directions unknown");
                None
            }
        };

        let by_feed: HashMap<FeedId, &RoutePolylines> = geometry
            .by_feed
            .iter()
            .map(|(feed_id, geometry)| (feed_id.clone(), &geometry.polylines))
            .collect();
        let context = RouteContext {
            polylines: geometry.fallback.as_deref().map(|geometry| &geometry.polylines),
            feed_polylines: Some(&by_feed),
            directions: directions.as_deref(),
        };
        self.engine().ingest(route, &snapshot.vehicles, context)
    }

    async fn snapshot_geometry(&self, snapshot: &VehicleSnapshot) -> SnapshotGeometry {
        let route = &snapshot.route;
        let representative = match self.resolver.route_info(route.as_str()).await {
            Ok(info) => info.map(|info| info.representative_id),
            Err(error) => {
                warn!(route = %route, error = %error, "Route map unavailable, animating unsnapped");
                return SnapshotGeometry::default();
            }
        };

        let feed_ids: BTreeSet<FeedId> = snapshot
            .vehicles
            .iter()
            .filter_map(|sample| sample.feed_id.clone())
            .chain(representative.clone())
            .collect();
        let loaded = join_all(feed_ids.into_iter().map(|feed_id| async move {
            let key = PolylineKey::variant(route.clone(), feed_id.clone());
            self.load_geometry(&key).await.map(|geometry| (feed_id, geometry))
        }))
        .await;
        let by_feed: HashMap<FeedId, Arc<RouteGeometry>> = loaded.into_iter().flatten().collect();

        let fallback = match representative.and_then(|feed_id| by_feed.get(&feed_id).cloned()) {
            Some(geometry) => Some(geometry),
            None => self.load_geometry(&PolylineKey::route(route.clone())).await,
        };

        SnapshotGeometry { by_feed, fallback }
    }

    async fn load_geometry(&self, key: &PolylineKey) -> Option<Arc<RouteGeometry>> {
        self.resolver.polyline(key).await.unwrap_or_else(|error| {
            warn!(key = %key, error = %error, "Geometry unavailable, animating unsnapped");
            None
        })
    }

    pub fn tick(&self, elapsed: Duration) {
        self.engine().tick(elapsed);
    }

    pub fn animated_state(&self, vehicle_id: &VehicleId) -> Option<AnimatedPose> {
        self.engine().animated_state(vehicle_id)
    }

    pub fn poses(&self, route: &RouteName) -> Vec<AnimatedPose> {
        self.engine().poses_for_route(route)
    }

    /// Drops the animation state of `route`, e.g. when its view closes.
    pub fn release_route(&self, route: &RouteName) -> usize {
        self.engine().release_route(route)
    }

    /// Stops all polling and forgets every cached document and animation.
    pub fn reset(&self) {
        self.polling.shutdown();
        self.resolver.invalidate_all();
        self.directions.clear();
        self.engine().reset();
        info!("Tracker reset");
    }

    fn engine(&self) -> MutexGuard<'_, MotionEngine> {
        lock_engine(&self.engine)
    }
}

fn lock_engine(engine: &Mutex<MotionEngine>) -> MutexGuard<'_, MotionEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Shared polling of the live vehicle feed.
//!
//! Each route with at least one subscriber has exactly one poll loop. Every
//! tick fetches all of the route's feed identifiers, then hands the same
//! snapshot to every current subscriber. A failed tick reports the failure and
//! leaves the last good snapshot in place. The loop stops when the last
//! subscriber leaves; its last snapshot stays cached until
//! [`PollingService::clear_other_caches`] evicts it.
//!
//! Snapshots are numbered in publication order and a subscriber never
//! receives one older than the last it was handed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::try_join_all;
use livebus_transit::{RawSample, RouteName, VehicleSnapshot};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::resolver::RouteResolver;

type DataCallback = Box<dyn Fn(&VehicleSnapshot) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(Option<FeedError>) + Send + Sync>;
type IdleHook = Box<dyn Fn(&RouteName) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: AtomicBool,
    // Sequence number of the newest snapshot handed to `on_data`
    delivered: AtomicU64,
    on_data: DataCallback,
    on_error: ErrorCallback,
}

impl Subscriber {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // Re-checks `active` between the two callbacks so an unsubscribe from
    // inside `on_data` also suppresses `on_error`. A snapshot older than one
    // already delivered is dropped together with its classification.
    fn deliver(&self, snapshot: Option<&Published>, error: Option<&FeedError>) {
        if let Some(published) = snapshot {
            if !self.is_active() {
                return;
            }
            if self.delivered.fetch_max(published.seq, Ordering::AcqRel) >= published.seq {
                return;
            }
            (self.on_data)(&published.snapshot);
        }
        if self.is_active() {
            (self.on_error)(error.cloned());
        }
    }
}

#[derive(Clone)]
struct Published {
    seq: u64,
    snapshot: VehicleSnapshot,
}

struct RouteFeed {
    generation: u64,
    // Set by the first successful fetch of this poll loop
    confirmed: bool,
    subscribers: Vec<Arc<Subscriber>>,
    shutdown: Arc<Notify>,
}

#[derive(Default)]
struct FeedState {
    active: HashMap<RouteName, RouteFeed>,
    // Last good snapshot per route, kept after the route goes idle
    snapshots: HashMap<RouteName, Published>,
    next_seq: u64,
}

struct Inner {
    state: Mutex<FeedState>,
    resolver: Arc<RouteResolver>,
    poll_interval: Duration,
    next_id: AtomicU64,
    on_idle: Option<IdleHook>,
}

pub struct PollingService {
    inner: Arc<Inner>,
}

/// Keeps a subscription alive. Delivery stops when the handle is released
/// through [`unsubscribe`](Self::unsubscribe) or dropped.
pub struct SubscriptionHandle {
    service: Weak<Inner>,
    route: RouteName,
    subscriber: Arc<Subscriber>,
}

impl PollingService {
    pub fn new(resolver: Arc<RouteResolver>, poll_interval: Duration) -> Self {
        Self::build(resolver, poll_interval, None)
    }

    /// Like [`new`](Self::new), calling `on_idle` whenever the last
    /// subscriber of a route leaves. The hook runs outside the service's lock.
    pub fn with_idle_hook<H>(resolver: Arc<RouteResolver>, poll_interval: Duration, on_idle: H) -> Self
    where
        H: Fn(&RouteName) + Send + Sync + 'static,
    {
        Self::build(resolver, poll_interval, Some(Box::new(on_idle)))
    }

    fn build(resolver: Arc<RouteResolver>, poll_interval: Duration, on_idle: Option<IdleHook>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(FeedState::default()),
                resolver,
                poll_interval,
                next_id: AtomicU64::new(1),
                on_idle,
            }),
        }
    }

    /// Registers interest in `route`, starting its poll loop if idle.
    ///
    /// `on_data` receives every successful poll result; `on_error` follows it
    /// with `None`, or with [`FeedError::NoneRunning`] for an empty result,
    /// and is called alone with the classified failure when a tick fails. A
    /// cached snapshot of the route is delivered immediately.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe<D, E>(&self, route: impl Into<RouteName>, on_data: D, on_error: E) -> SubscriptionHandle
    where
        D: Fn(&VehicleSnapshot) + Send + Sync + 'static,
        E: Fn(Option<FeedError>) + Send + Sync + 'static,
    {
        let route = route.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            on_data: Box::new(on_data),
            on_error: Box::new(on_error),
        });

        let cached = {
            let mut state = self.inner.state();
            let cached = state.snapshots.get(&route).cloned();

            match state.active.get_mut(&route) {
                Some(feed) => feed.subscribers.push(Arc::clone(&subscriber)),
                None => {
                    let shutdown = Arc::new(Notify::new());
                    state.active.insert(
                        route.clone(),
                        RouteFeed {
                            generation: id,
                            confirmed: false,
                            subscribers: vec![Arc::clone(&subscriber)],
                            shutdown: Arc::clone(&shutdown),
                        },
                    );
                    info!(route = %route, "Starting poll loop");
                    tokio::spawn(poll_loop(
                        Arc::downgrade(&self.inner),
                        route.clone(),
                        id,
                        shutdown,
                        self.inner.poll_interval,
                    ));
                }
            }
            cached
        };

        if let Some(published) = cached {
            subscriber.deliver(Some(&published), classify(&published.snapshot).as_ref());
        }

        SubscriptionHandle {
            service: Arc::downgrade(&self.inner),
            route,
            subscriber,
        }
    }

    /// The last good snapshot of `route`, if one is cached.
    pub fn latest(&self, route: &RouteName) -> Option<VehicleSnapshot> {
        self.inner
            .state()
            .snapshots
            .get(route)
            .map(|published| published.snapshot.clone())
    }

    /// Routes with a running poll loop, sorted.
    pub fn active_routes(&self) -> Vec<RouteName> {
        let mut routes: Vec<RouteName> = self.inner.state().active.keys().cloned().collect();
        routes.sort();
        routes
    }

    pub fn subscriber_count(&self, route: &RouteName) -> usize {
        self.inner
            .state()
            .active
            .get(route)
            .map_or(0, |feed| feed.subscribers.len())
    }

    /// Evicts cached snapshots and geometry of every route except `route`.
    ///
    /// Does nothing and returns `false` until the running poll loop of
    /// `route` has had a successful fetch, so the screen never goes blank
    /// while new data is unconfirmed. A snapshot left over from an earlier
    /// subscription does not count.
    pub fn clear_other_caches(&self, route: &RouteName) -> bool {
        let snapshots = {
            let mut state = self.inner.state();
            if !state.active.get(route).is_some_and(|feed| feed.confirmed) {
                debug!(route = %route, "No confirmed data yet, keeping other caches");
                return false;
            }
            let before = state.snapshots.len();
            state.snapshots.retain(|cached, _| cached == route);
            before - state.snapshots.len()
        };

        let geometry = self.inner.resolver.retain_geometry_for(route);
        debug!(route = %route, snapshots, geometry, "Cleared caches of other routes");
        true
    }

    /// Stops every poll loop, silences every subscriber and drops all cached
    /// snapshots.
    pub fn shutdown(&self) {
        let feeds: Vec<RouteFeed> = {
            let mut state = self.inner.state();
            state.snapshots.clear();
            state.active.drain().map(|(_, feed)| feed).collect()
        };

        for feed in feeds {
            for subscriber in &feed.subscribers {
                subscriber.active.store(false, Ordering::Release);
            }
            feed.shutdown.notify_one();
        }
    }
}

impl Drop for PollingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_route(&self, route: &RouteName) -> Result<Vec<RawSample>, FeedError> {
        let info = self
            .resolver
            .route_info(route.as_str())
            .await
            .map_err(FeedError::from)?
            .ok_or_else(|| FeedError::InvalidRoute(route.clone()))?;

        let source = self.resolver.source();
        let batches = try_join_all(
            info.feed_ids
                .iter()
                .map(|feed_id| source.fetch_vehicles(route, feed_id)),
        )
        .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    fn publish(&self, route: &RouteName, generation: u64, outcome: Result<Vec<RawSample>, FeedError>) {
        let (subscribers, snapshot, error) = {
            let mut state = self.state();
            let subscribers = match state.active.get_mut(route) {
                Some(feed) if feed.generation == generation => {
                    if outcome.is_ok() {
                        feed.confirmed = true;
                    }
                    feed.subscribers.clone()
                }
                _ => {
                    debug!(route = %route, "Route no longer polled, dropping result");
                    return;
                }
            };

            match outcome {
                Ok(vehicles) => {
                    state.next_seq += 1;
                    let published = Published {
                        seq: state.next_seq,
                        snapshot: VehicleSnapshot::new(route.clone(), vehicles),
                    };
                    state.snapshots.insert(route.clone(), published.clone());
                    let error = classify(&published.snapshot);
                    (subscribers, Some(published), error)
                }
                Err(error) => {
                    warn!(route = %route, error = %error, "Poll failed, keeping last good data");
                    (subscribers, None, Some(error))
                }
            }
        };

        debug!(
            route = %route,
            vehicles = snapshot.as_ref().map_or(0, |p| p.snapshot.vehicles.len()),
            subscribers = subscribers.len(),
            "Delivering poll result"
        );
        for subscriber in &subscribers {
            subscriber.deliver(snapshot.as_ref(), error.as_ref());
        }
    }

    fn remove_subscriber(&self, route: &RouteName, id: u64) {
        let idle = {
            let mut state = self.state();
            let Some(feed) = state.active.get_mut(route) else {
                return;
            };

            feed.subscribers.retain(|subscriber| subscriber.id != id);
            if !feed.subscribers.is_empty() {
                return;
            }
            state.active.remove(route)
        };

        if let Some(feed) = idle {
            feed.shutdown.notify_one();
            info!(route = %route, "Last subscriber left, stopping poll loop");
            if let Some(on_idle) = &self.on_idle {
                on_idle(route);
            }
        }
    }
}

fn classify(snapshot: &VehicleSnapshot) -> Option<FeedError> {
    snapshot.is_empty().then_some(FeedError::NoneRunning)
}

async fn poll_loop(
    service: Weak<Inner>,
    route: RouteName,
    generation: u64,
    shutdown: Arc<Notify>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = interval.tick() => {}
        }

        let Some(inner) = service.upgrade() else {
            break;
        };
        let outcome = inner.fetch_route(&route).await;
        inner.publish(&route, generation, outcome);
    }

    debug!(route = %route, "Poll loop exited");
}

impl SubscriptionHandle {
    pub fn route(&self) -> &RouteName {
        &self.route
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.is_active()
    }

    /// Stops delivery immediately. A fetch already in flight for other
    /// subscribers keeps running; its result is simply not delivered here.
    pub fn unsubscribe(self) {
        self.release();
    }

    fn release(&self) {
        if !self.subscriber.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.service.upgrade() {
            inner.remove_subscriber(&self.route, self.subscriber.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    use geo::Coord;
    use livebus_transit::{
        FeedId, GeometryDocument, Result, TopologyDocument, TransitError, VehicleId,
    };

    use super::*;
    use crate::source::{PolylineKey, TransitSource};

    const ROUTE_MAP: &str = r#"{"route_numbers": {
        "30": ["F30A", "F30B"],
        "34": ["F34"],
        "night": ["FN"]
    }}"#;

    #[derive(Default)]
    struct FakeSource {
        vehicles: Mutex<HashMap<String, Result<Vec<RawSample>>>>,
        fetches: AtomicUsize,
        delay: Duration,
    }

    impl FakeSource {
        fn set(&self, feed_id: &str, result: Result<Vec<RawSample>>) {
            self.vehicles.lock().unwrap().insert(feed_id.to_owned(), result);
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl TransitSource for FakeSource {
        fn fetch_route_map(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<TopologyDocument>> + Send + '_>> {
            Box::pin(async { TopologyDocument::from_slice(ROUTE_MAP.as_bytes()) })
        }

        fn fetch_geometry<'a>(
            &'a self,
            _key: &'a PolylineKey,
        ) -> Pin<Box<dyn Future<Output = Result<Option<GeometryDocument>>> + Send + 'a>> {
            Box::pin(async { Ok(None) })
        }

        fn fetch_vehicles<'a>(
            &'a self,
            _route: &'a RouteName,
            feed_id: &'a FeedId,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<RawSample>>> + Send + 'a>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.vehicles
                    .lock()
                    .unwrap()
                    .get(feed_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| Ok(Vec::new()))
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<Arc<[RawSample]>>>,
        errors: Mutex<Vec<Option<FeedError>>>,
    }

    impl Recorder {
        fn data(&self) -> Vec<Arc<[RawSample]>> {
            self.data.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<Option<FeedError>> {
            self.errors.lock().unwrap().clone()
        }
    }

    fn bus(id: &str, x: f64) -> RawSample {
        RawSample {
            vehicle_id: VehicleId::new(id),
            route_label: RouteName::new("30"),
            location: Coord { x, y: 37.0 },
            node_id: None,
            node_ord: 1,
            feed_id: None,
        }
    }

    fn service(source: FakeSource) -> (Arc<FakeSource>, PollingService) {
        let source = Arc::new(source);
        let resolver = Arc::new(RouteResolver::new(source.clone(), 4));
        (source, PollingService::new(resolver, Duration::from_secs(3)))
    }

    fn subscribe(service: &PollingService, route: &str, recorder: &Arc<Recorder>) -> SubscriptionHandle {
        let data = Arc::clone(recorder);
        let errors = Arc::clone(recorder);
        service.subscribe(
            route,
            move |snapshot: &VehicleSnapshot| data.data.lock().unwrap().push(snapshot.vehicles.clone()),
            move |error| errors.errors.lock().unwrap().push(error),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_share_one_snapshot() {
        let source = FakeSource::default();
        source.set("F30A", Ok(vec![bus("a", 127.0)]));
        source.set("F30B", Ok(vec![bus("b", 128.0)]));
        let (source, service) = service(source);

        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let _a = subscribe(&service, "30", &first);
        let _b = subscribe(&service, "30", &second);
        settle().await;

        let (first_data, second_data) = (first.data(), second.data());
        assert_eq!(first_data.len(), 1);
        assert!(Arc::ptr_eq(&first_data[0], &second_data[0]));

        let ids: Vec<&str> = first_data[0].iter().map(|s| s.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(first.errors(), vec![None]);

        assert_eq!(source.fetches(), 2);
        assert_eq!(service.subscriber_count(&RouteName::new("30")), 2);
        assert_eq!(service.active_routes(), vec![RouteName::new("30")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_snapshot() {
        let source = FakeSource::default();
        source.set("F34", Ok(vec![bus("a", 127.0)]));
        let (source, service) = service(source);
        let route = RouteName::new("34");

        let recorder = Arc::new(Recorder::default());
        let _handle = subscribe(&service, "34", &recorder);
        settle().await;
        let good = service.latest(&route).unwrap();

        source.set("F34", Err(TransitError::Network("timeout".into())));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(recorder.data().len(), 1);
        assert!(matches!(recorder.errors().last(), Some(Some(FeedError::Network(_)))));
        assert!(Arc::ptr_eq(&service.latest(&route).unwrap().vehicles, &good.vehicles));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_feed_is_none_running() {
        let (_, service) = service(FakeSource::default());
        let recorder = Arc::new(Recorder::default());
        let _handle = subscribe(&service, "night", &recorder);
        settle().await;

        assert_eq!(recorder.data().len(), 1);
        assert!(recorder.data()[0].is_empty());
        assert_eq!(recorder.errors(), vec![Some(FeedError::NoneRunning)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_route_is_invalid() {
        let (source, service) = service(FakeSource::default());
        let recorder = Arc::new(Recorder::default());
        let _handle = subscribe(&service, "99", &recorder);
        settle().await;

        assert!(recorder.data().is_empty());
        assert_eq!(
            recorder.errors(),
            vec![Some(FeedError::InvalidRoute(RouteName::new("99")))]
        );
        assert_eq!(source.fetches(), 0);
        assert!(!service.clear_other_caches(&RouteName::new("99")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_unsubscribe_stops_polling() {
        let (source, service) = service(FakeSource::default());
        let recorder = Arc::new(Recorder::default());
        let handle = subscribe(&service, "34", &recorder);

        settle().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(source.fetches(), 2);

        handle.unsubscribe();
        assert!(service.active_routes().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.fetches(), 2);
        assert_eq!(recorder.data().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_unsubscribe_is_dropped() {
        let source = FakeSource {
            delay: Duration::from_secs(1),
            ..FakeSource::default()
        };
        source.set("F34", Ok(vec![bus("a", 127.0)]));
        let (source, service) = service(source);

        let recorder = Arc::new(Recorder::default());
        let handle = subscribe(&service, "34", &recorder);
        settle().await;
        assert_eq!(source.fetches(), 1);

        handle.unsubscribe();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(recorder.data().is_empty());
        assert!(recorder.errors().is_empty());
        assert!(service.latest(&RouteName::new("34")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_cached_snapshot() {
        let source = FakeSource::default();
        source.set("F34", Ok(vec![bus("a", 127.0)]));
        let (_, service) = service(source);

        let early = Arc::new(Recorder::default());
        let _early = subscribe(&service, "34", &early);
        settle().await;

        let late = Arc::new(Recorder::default());
        let _late = subscribe(&service, "34", &late);

        assert_eq!(late.data().len(), 1);
        assert!(Arc::ptr_eq(&late.data()[0], &early.data()[0]));
        assert_eq!(late.errors(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_from_callback() {
        let source = FakeSource::default();
        source.set("F34", Ok(vec![bus("a", 127.0)]));
        let (_, service) = service(source);

        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_slot, inner_calls) = (Arc::clone(&slot), Arc::clone(&calls));

        let handle = service.subscribe(
            "34",
            move |_: &VehicleSnapshot| {
                inner_calls.fetch_add(1, Ordering::SeqCst);
                let handle = inner_slot.lock().unwrap().take();
                if let Some(handle) = handle {
                    handle.unsubscribe();
                }
            },
            |_| panic!("error callback after unsubscribe"),
        );
        *slot.lock().unwrap() = Some(handle);

        settle().await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(service.active_routes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_from_earlier_visit_does_not_confirm_route() {
        let source = FakeSource::default();
        source.set("F30A", Ok(vec![bus("a", 127.0)]));
        let (_, service) = service(source);
        let route = RouteName::new("30");

        let first_visit = Arc::new(Recorder::default());
        let handle = subscribe(&service, "30", &first_visit);
        settle().await;
        assert!(service.clear_other_caches(&route));
        handle.unsubscribe();
        assert!(!service.clear_other_caches(&route));

        let second_visit = Arc::new(Recorder::default());
        let _handle = subscribe(&service, "30", &second_visit);
        assert_eq!(second_visit.data().len(), 1);
        assert!(!service.clear_other_caches(&route));

        settle().await;
        assert_eq!(second_visit.data().len(), 2);
        assert!(service.clear_other_caches(&route));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_does_not_confirm_route() {
        let source = FakeSource::default();
        source.set("F34", Err(TransitError::Network("timeout".into())));
        let (source, service) = service(source);
        let route = RouteName::new("34");

        let recorder = Arc::new(Recorder::default());
        let _handle = subscribe(&service, "34", &recorder);
        settle().await;
        assert!(!service.clear_other_caches(&route));

        source.set("F34", Ok(vec![bus("a", 127.0)]));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(service.clear_other_caches(&route));
    }

    #[test]
    fn test_older_snapshot_not_delivered_after_newer() {
        let recorder = Arc::new(Recorder::default());
        let (data, errors) = (Arc::clone(&recorder), Arc::clone(&recorder));
        let subscriber = Subscriber {
            id: 1,
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            on_data: Box::new(move |snapshot: &VehicleSnapshot| {
                data.data.lock().unwrap().push(snapshot.vehicles.clone())
            }),
            on_error: Box::new(move |error: Option<FeedError>| errors.errors.lock().unwrap().push(error)),
        };

        let older = Published {
            seq: 1,
            snapshot: VehicleSnapshot::new(RouteName::new("30"), vec![bus("a", 127.0)]),
        };
        let newer = Published {
            seq: 2,
            snapshot: VehicleSnapshot::new(RouteName::new("30"), vec![bus("a", 127.1)]),
        };

        subscriber.deliver(Some(&newer), None);
        subscriber.deliver(Some(&older), None);
        subscriber.deliver(Some(&newer), None);

        let delivered = recorder.data();
        assert_eq!(delivered.len(), 1);
        assert!(Arc::ptr_eq(&delivered[0], &newer.snapshot.vehicles));
        assert_eq!(recorder.errors(), vec![None]);

        // Failures carry no snapshot and are always reported.
        subscriber.deliver(None, Some(&FeedError::Network("timeout".into())));
        assert_eq!(recorder.errors().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_shutdown_beats_overdue_tick() {
        // Fetches outlast the poll interval, so a tick is overdue by the time
        // the unsubscribe is seen.
        let source = FakeSource {
            delay: Duration::from_secs(5),
            ..FakeSource::default()
        };
        let (source, service) = service(source);

        let recorder = Arc::new(Recorder::default());
        let handle = subscribe(&service, "34", &recorder);
        settle().await;
        assert_eq!(source.fetches(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.unsubscribe();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.fetches(), 1);
        assert!(recorder.data().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_hook_runs_when_last_subscriber_leaves() {
        let source = Arc::new(FakeSource::default());
        let resolver = Arc::new(RouteResolver::new(source, 4));
        let idled: Arc<Mutex<Vec<RouteName>>> = Arc::default();
        let sink = Arc::clone(&idled);
        let service = PollingService::with_idle_hook(resolver, Duration::from_secs(3), move |route| {
            sink.lock().unwrap().push(route.clone())
        });

        let recorder = Arc::new(Recorder::default());
        let first = subscribe(&service, "34", &recorder);
        let second = subscribe(&service, "34", &recorder);
        settle().await;

        first.unsubscribe();
        assert!(idled.lock().unwrap().is_empty());

        drop(second);
        assert_eq!(*idled.lock().unwrap(), vec![RouteName::new("34")]);
    }
}

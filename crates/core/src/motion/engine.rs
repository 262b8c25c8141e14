//! Per-vehicle animation state.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use geo::Coord;
use livebus_transit::{
    DirectionCode, FeedId, Polyline, Projection, RawSample, RouteName, RoutePolylines,
    TravelPath, VehicleId,
};
use tracing::debug;

use crate::config::MotionConfig;
use crate::direction::DirectionResolver;
use crate::motion::Easing;

/// Polls a vehicle may be missing from before its state is dropped.
const MAX_MISSED_POLLS: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionSettings {
    pub duration: Duration,
    pub easing: Easing,
    /// Farthest a raw point may lie from a polyline and still be snapped to it
    pub max_snap_distance_m: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self::from(&MotionConfig::default())
    }
}

impl From<&MotionConfig> for MotionSettings {
    fn from(config: &MotionConfig) -> Self {
        Self {
            duration: config.animation_duration(),
            easing: config.easing,
            max_snap_distance_m: config.max_snap_distance_m,
        }
    }
}

/// Static route data consulted while ingesting samples. Any part may be
/// missing; vehicles are then animated in a straight line, or with an unknown
/// direction.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteContext<'a> {
    /// Geometry for samples whose feed has none of its own
    pub polylines: Option<&'a RoutePolylines>,
    /// Geometry recorded under individual feed identifiers
    pub feed_polylines: Option<&'a HashMap<FeedId, &'a RoutePolylines>>,
    pub directions: Option<&'a DirectionResolver>,
}

impl<'a> RouteContext<'a> {
    /// The geometry `sample` snaps to: its own feed's if recorded, otherwise
    /// the route's.
    pub fn polylines_for(&self, sample: &RawSample) -> Option<&'a RoutePolylines> {
        let own = sample
            .feed_id
            .as_ref()
            .zip(self.feed_polylines)
            .and_then(|(feed_id, by_feed)| by_feed.get(feed_id).copied());
        own.or(self.polylines)
    }
}

/// What a renderer draws for one vehicle in the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimatedPose {
    pub vehicle_id: VehicleId,
    pub route: RouteName,
    pub position: Coord,
    /// Degrees clockwise from north, in [0, 360)
    pub heading: f64,
    pub direction: Option<DirectionCode>,
    /// Time-normalised animation progress in [0, 1]
    pub progress: f64,
    pub target: RawSample,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub added: usize,
    pub retargeted: usize,
    pub unchanged: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct VehicleState {
    route: RouteName,
    position: Coord,
    heading: Option<f64>,
    // Headings the current animation turns between
    start_heading: Option<f64>,
    end_heading: Option<f64>,
    target: RawSample,
    path: TravelPath,
    elapsed: Duration,
    progress: f64,
    direction: Option<DirectionCode>,
    missed_polls: u8,
}

struct Snap<'a> {
    polyline: &'a Polyline,
    direction: DirectionCode,
    projection: Projection,
}

pub struct MotionEngine {
    settings: MotionSettings,
    vehicles: HashMap<VehicleId, VehicleState>,
}

impl MotionEngine {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            settings,
            vehicles: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// Applies one poll result for `route`.
    ///
    /// New vehicles appear at their (snapped) position without animating.
    /// Vehicles whose sample changed are retargeted from where they are
    /// currently drawn. Vehicles of `route` missing from this poll and the
    /// previous one are dropped.
    pub fn ingest(
        &mut self,
        route: &RouteName,
        samples: &[RawSample],
        context: RouteContext<'_>,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut seen = HashSet::with_capacity(samples.len());

        for sample in samples {
            if !seen.insert(sample.vehicle_id.clone()) {
                continue;
            }

            let resolved = context
                .directions
                .and_then(|directions| directions.direction_for(sample));
            let polylines = context.polylines_for(sample);

            match self.vehicles.get_mut(&sample.vehicle_id) {
                Some(state) => {
                    state.missed_polls = 0;
                    state.route = route.clone();
                    if sample.differs_from(&state.target) {
                        retarget(&self.settings, state, sample, resolved, polylines);
                        summary.retargeted += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                None => {
                    let state = place(&self.settings, route, sample, resolved, polylines);
                    self.vehicles.insert(sample.vehicle_id.clone(), state);
                    summary.added += 1;
                }
            }
        }

        self.vehicles.retain(|vehicle_id, state| {
            if &state.route != route || seen.contains(vehicle_id) {
                return true;
            }
            state.missed_polls += 1;
            let keep = state.missed_polls < MAX_MISSED_POLLS;
            if !keep {
                summary.dropped += 1;
                debug!(vehicle = %vehicle_id, route = %route, "Vehicle gone, dropping state");
            }
            keep
        });

        summary
    }

    /// Advances every animation by `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        let settings = self.settings;
        for state in self.vehicles.values_mut() {
            advance(&settings, state, elapsed);
        }
    }

    pub fn animated_state(&self, vehicle_id: &VehicleId) -> Option<AnimatedPose> {
        self.vehicles
            .get(vehicle_id)
            .map(|state| pose(vehicle_id, state))
    }

    pub fn poses(&self) -> Vec<AnimatedPose> {
        let mut poses: Vec<AnimatedPose> = self
            .vehicles
            .iter()
            .map(|(vehicle_id, state)| pose(vehicle_id, state))
            .collect();
        poses.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        poses
    }

    pub fn poses_for_route(&self, route: &RouteName) -> Vec<AnimatedPose> {
        let mut poses = self.poses();
        poses.retain(|pose| &pose.route == route);
        poses
    }

    /// Drops every vehicle of `route`. Returns the number dropped.
    pub fn release_route(&mut self, route: &RouteName) -> usize {
        let before = self.vehicles.len();
        self.vehicles.retain(|_, state| &state.route != route);
        before - self.vehicles.len()
    }

    pub fn reset(&mut self) {
        self.vehicles.clear();
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// True while any vehicle is still moving towards its target.
    pub fn is_animating(&self) -> bool {
        self.vehicles.values().any(|state| state.progress < 1.0)
    }
}

impl Default for MotionEngine {
    fn default() -> Self {
        Self::new(MotionSettings::default())
    }
}

fn place(
    settings: &MotionSettings,
    route: &RouteName,
    sample: &RawSample,
    resolved: Option<DirectionCode>,
    polylines: Option<&RoutePolylines>,
) -> VehicleState {
    let snap = snap_target(settings, sample.location, resolved, polylines);
    let (position, heading, direction) = match &snap {
        Some(snap) => (
            snap.projection.position,
            snap.projection.segment_heading,
            Some(snap.direction),
        ),
        None => (sample.location, None, resolved),
    };

    VehicleState {
        route: route.clone(),
        position,
        heading,
        start_heading: heading,
        end_heading: heading,
        target: sample.clone(),
        path: TravelPath::stationary(position),
        elapsed: Duration::ZERO,
        progress: 1.0,
        direction,
        missed_polls: 0,
    }
}

fn retarget(
    settings: &MotionSettings,
    state: &mut VehicleState,
    sample: &RawSample,
    resolved: Option<DirectionCode>,
    polylines: Option<&RoutePolylines>,
) {
    let from = state.position;
    match snap_target(settings, sample.location, resolved, polylines) {
        Some(snap) => {
            state.path = match snap.polyline.project(from) {
                Some(start) => snap.polyline.path_between(&start, &snap.projection),
                None => TravelPath::straight(from, snap.projection.position),
            };
            state.direction = Some(snap.direction);
        }
        None => {
            state.path = TravelPath::straight(from, sample.location);
            state.direction = resolved;
        }
    }

    // A vehicle without a known heading faces its destination straight away.
    state.end_heading = state.path.final_heading().or(state.heading);
    state.start_heading = state.heading.or(state.end_heading);

    state.target = sample.clone();
    state.elapsed = Duration::ZERO;
    state.progress = 0.0;
}

// The resolved direction's polyline is preferred; otherwise the closer of the
// two within snapping range, which also corrects the direction.
fn snap_target<'a>(
    settings: &MotionSettings,
    point: Coord,
    resolved: Option<DirectionCode>,
    polylines: Option<&'a RoutePolylines>,
) -> Option<Snap<'a>> {
    let polylines = polylines?;
    let within_range = move |direction: DirectionCode| {
        let polyline = polylines.get(direction);
        if !polyline.is_snappable() {
            return None;
        }
        let projection = polyline.project(point)?;
        (projection.offset_m <= settings.max_snap_distance_m).then_some(Snap {
            polyline,
            direction,
            projection,
        })
    };

    if let Some(snap) = resolved.and_then(within_range) {
        return Some(snap);
    }

    [DirectionCode::Up, DirectionCode::Down]
        .into_iter()
        .filter_map(within_range)
        .min_by(|a, b| a.projection.offset_m.total_cmp(&b.projection.offset_m))
}

fn advance(settings: &MotionSettings, state: &mut VehicleState, elapsed: Duration) {
    if state.progress >= 1.0 {
        return;
    }

    state.elapsed += elapsed;
    state.progress = if settings.duration.is_zero() {
        1.0
    } else {
        (state.elapsed.as_secs_f64() / settings.duration.as_secs_f64()).clamp(0.0, 1.0)
    };

    if state.progress >= 1.0 {
        if let Some(end) = state.path.end() {
            state.position = end;
        }
        state.heading = state.end_heading;
        return;
    }

    let eased = settings.easing.apply(state.progress);
    if let Some(sample) = state.path.sample(eased) {
        state.position = sample.position;
    }
    state.heading = match (state.start_heading, state.end_heading) {
        (Some(from), Some(to)) => Some(interpolate_heading(from, to, eased)),
        (from, to) => to.or(from),
    };
}

/// Turns from `from` towards `to` along the shorter arc; the result is in
/// [0, 360).
fn interpolate_heading(from: f64, to: f64, fraction: f64) -> f64 {
    let from = from.rem_euclid(360.0);
    let mut delta = to.rem_euclid(360.0) - from;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }

    let heading = (from + delta * fraction).rem_euclid(360.0);
    if heading >= 360.0 { 0.0 } else { heading }
}

fn pose(vehicle_id: &VehicleId, state: &VehicleState) -> AnimatedPose {
    AnimatedPose {
        vehicle_id: vehicle_id.clone(),
        route: state.route.clone(),
        position: state.position,
        heading: state.heading.unwrap_or(0.0),
        direction: state.direction,
        progress: state.progress,
        target: state.target.clone(),
    }
}

//! # livebus-core
//!
//! Real-time vehicle tracking: shared polling of a live bus feed, cached
//! route topology and geometry, stop-based direction matching and smooth,
//! path-snapped vehicle animation.
//!
//! Everything hangs off a [`Tracker`], which is constructed explicitly and
//! owns its caches; nothing is global.

pub mod cache;
pub mod config;
pub mod direction;
pub mod error;
pub mod motion;
pub mod polling;
pub mod resolver;
pub mod source;
pub mod tracker;

pub use cache::{CacheStats, SingleFlightCache};
pub use config::TrackerConfig;
pub use direction::{direction_from_details, DirectionResolver};
pub use error::{FeedError, Result, TrackerError};
pub use motion::{AnimatedPose, Easing, FrameSource, IntervalFrames, MotionEngine, RouteContext};
pub use polling::{PollingService, SubscriptionHandle};
pub use resolver::{RouteGeometry, RouteResolver};
pub use source::{FeedClient, HttpFetcher, PolylineKey, TransitSource};
pub use tracker::Tracker;

// Re-export transit from the transit crate
pub use livebus_transit as transit;

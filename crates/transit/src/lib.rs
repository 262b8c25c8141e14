//! # livebus-transit
//!
//! Data model and geometry for live bus tracking.
//!
//! ## Features
//!
//! - **Wire formats**: the static route map, per-route GeoJSON geometry and
//!   the live vehicle feed
//! - **Segment merge**: direction-tagged line segments joined into one
//!   polyline per direction
//! - **Path projection**: R-tree backed nearest-segment lookup and subpaths
//!   between two projected points
//! - **Pluggable networking**: implement [`DataFetcher`] to supply bytes
//!
//! ## Example
//!
//! ```
//! use livebus_transit::prelude::*;
//! use geo::Coord;
//!
//! let line = Polyline::new(vec![
//!     Coord { x: 0.0, y: 0.0 },
//!     Coord { x: 10.0, y: 0.0 },
//!     Coord { x: 10.0, y: 10.0 },
//! ]);
//!
//! let from = line.project(Coord { x: 5.0, y: 0.2 }).unwrap();
//! let to = line.project(Coord { x: 9.8, y: 5.0 }).unwrap();
//!
//! let path = line.path_between(&from, &to);
//! assert_eq!(path.points().len(), 3);
//! ```

pub mod identifiers;
pub mod models;
pub mod network;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::identifiers::*;
    pub use crate::models::{feed::*, geometry::*, types::*};
    pub use crate::network::traits::*;
    pub use crate::spatial::{
        bearing_degrees, haversine_distance, haversine_distance_to_line, PathSample, Polyline,
        Projection, TravelPath,
    };
}

pub use prelude::*;

//! Spatial indexing, path projection and distance utilities.

pub mod index;
pub mod path;
pub mod polyline;
pub mod queries;

pub use path::{PathSample, TravelPath};
pub use polyline::{Polyline, Projection};
pub use queries::{bearing_degrees, haversine_distance, haversine_distance_to_line};

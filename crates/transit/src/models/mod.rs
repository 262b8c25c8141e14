//! Transit data models, wire formats and geometry.

pub mod feed;
pub mod geometry;
pub mod types;

// Re-exports for convenience
pub use feed::{
    parse_vehicle_records, RouteDetail, SequenceItem, StationRecord, TopologyDocument,
    VehicleRecord, VehicleSnapshot,
};
pub use geometry::{merge_segments, GeometryDocument, LineSegment, RoutePolylines};
pub use types::{DirectionCode, RawSample, Result, Route, Stop, TransitError};

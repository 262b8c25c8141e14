//! Route geometry documents and the segment merge.
//!
//! A geometry document is a GeoJSON FeatureCollection of line segments, each
//! tagged with a direction and a link order. Merging groups the segments by
//! direction, sorts each group by link order and concatenates them into one
//! continuous [`Polyline`] per direction.

use geo::Coord;
use geojson::{GeoJson, JsonObject, Value as GeometryValue};
use serde_json::Value;

use crate::models::types::*;
use crate::spatial::Polyline;

/// One tagged line segment of a route's geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct LineSegment {
    pub direction: DirectionCode,
    pub link_order: i64,
    pub coords: Vec<Coord>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryDocument {
    pub segments: Vec<LineSegment>,
}

/// Merged geometry of one route variant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutePolylines {
    pub up: Polyline,
    pub down: Polyline,
}

impl RoutePolylines {
    pub fn get(&self, direction: DirectionCode) -> &Polyline {
        match direction {
            DirectionCode::Up => &self.up,
            DirectionCode::Down => &self.down,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

impl GeometryDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| TransitError::Parse(e.to_string()))?;
        let geojson: GeoJson = text
            .parse()
            .map_err(|e: geojson::Error| TransitError::Parse(e.to_string()))?;
        Ok(Self::from_geojson(geojson))
    }

    /// Features without a recognisable direction tag or without line
    /// geometry are ignored.
    pub fn from_geojson(geojson: GeoJson) -> Self {
        let features = match geojson {
            GeoJson::FeatureCollection(collection) => collection.features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(_) => Vec::new(),
        };

        let segments = features
            .into_iter()
            .flat_map(|feature| {
                let properties = feature.properties.unwrap_or_default();
                let tagged = direction_tag(&properties)
                    .map(|direction| (direction, link_order(&properties)));

                let lines = match (tagged, feature.geometry.map(|g| g.value)) {
                    (Some(_), Some(GeometryValue::LineString(line))) => vec![line],
                    (Some(_), Some(GeometryValue::MultiLineString(lines))) => lines,
                    _ => Vec::new(),
                };

                lines.into_iter().filter_map(move |line| {
                    let (direction, link_order) = tagged?;
                    Some(LineSegment {
                        direction,
                        link_order,
                        coords: line
                            .iter()
                            .filter(|position| position.len() >= 2)
                            .map(|position| Coord {
                                x: position[0],
                                y: position[1],
                            })
                            .collect(),
                    })
                })
            })
            .collect();

        Self { segments }
    }

    pub fn merged(&self) -> RoutePolylines {
        RoutePolylines {
            up: merge_segments(&self.segments, DirectionCode::Up),
            down: merge_segments(&self.segments, DirectionCode::Down),
        }
    }
}

/// Concatenates the segments of one direction in link order.
///
/// Segments with fewer than two points are dropped. Where a segment starts
/// exactly on the previous segment's last coordinate, the shared coordinate is
/// kept once; no tolerance is applied.
pub fn merge_segments(segments: &[LineSegment], direction: DirectionCode) -> Polyline {
    let mut group: Vec<&LineSegment> = segments
        .iter()
        .filter(|s| s.direction == direction && s.coords.len() >= 2)
        .collect();
    group.sort_by_key(|s| s.link_order);

    let mut merged: Vec<Coord> = Vec::new();
    for segment in group {
        let skip = usize::from(merged.last() == segment.coords.first());
        merged.extend_from_slice(&segment.coords[skip..]);
    }

    Polyline::new(merged)
}

// Supports the current scheme (`dir: "up"|"down"`) and the legacy ones
// (`updnDir: "1"|"0"`, numeric `direction`).
fn direction_tag(properties: &JsonObject) -> Option<DirectionCode> {
    if let Some(Value::String(dir)) = properties.get("dir") {
        return DirectionCode::from_tag(dir);
    }

    match properties.get("updnDir").or_else(|| properties.get("direction")) {
        Some(Value::String(code)) => DirectionCode::from_tag(code),
        Some(Value::Number(code)) => code.as_i64().map(DirectionCode::from_updown_code),
        _ => None,
    }
}

fn link_order(properties: &JsonObject) -> i64 {
    ["seq", "turn_seq", "section_id", "linkOrder", "linkOrd"]
        .iter()
        .find_map(|key| match properties.get(*key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

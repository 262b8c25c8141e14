//! Tracker configuration.
//!
//! Values come from defaults, an optional TOML file and `LIVEBUS_*`
//! environment variables, applied in that order.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TrackerError};
use crate::motion::Easing;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_ANIMATION_DURATION_MS: u64 = 4000;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
pub const DEFAULT_MAX_SNAP_DISTANCE_M: f64 = 50.0;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_CLIENT_NAME: &str = "wBus";
pub const DEFAULT_MIN_VALID_STOPS: usize = 4;

const ENV_PREFIX: &str = "LIVEBUS_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub live: LiveConfig,
    pub static_data: StaticDataConfig,
    pub http: HttpConfig,
    pub motion: MotionConfig,
    pub direction: DirectionConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Base URL of the live vehicle API
    pub base_url: String,
    /// Endpoint path; the feed identifier is appended as the last segment
    pub vehicle_path: String,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticDataConfig {
    pub base_url: String,
    pub route_map: String,
    pub polyline_dir: String,
    pub geometry_extension: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total attempts per request
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Sent as the `Client` request header
    pub client_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub animation_duration_ms: u64,
    pub easing: Easing,
    pub max_snap_distance_m: f64,
    pub frame_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionConfig {
    /// Stops that resolve to the up direction regardless of matching
    pub always_upward_node_ids: Vec<String>,
    /// Below this many route stops the whole station table is used
    pub min_valid_stops: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            vehicle_path: "getBusLocation".into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Default for StaticDataConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            route_map: "routeMap.json".into(),
            polyline_dir: "polylines".into(),
            geometry_extension: ".geojson".into(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            client_name: DEFAULT_CLIENT_NAME.into(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            animation_duration_ms: DEFAULT_ANIMATION_DURATION_MS,
            easing: Easing::Linear,
            max_snap_distance_m: DEFAULT_MAX_SNAP_DISTANCE_M,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            always_upward_node_ids: Vec::new(),
            min_valid_stops: DEFAULT_MIN_VALID_STOPS,
        }
    }
}

impl LiveConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl HttpConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl MotionConfig {
    pub fn animation_duration(&self) -> Duration {
        Duration::from_millis(self.animation_duration_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl TrackerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| TrackerError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Overrides fields from `LIVEBUS_*` process environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    /// Applies overrides from `lookup`, keyed without the `LIVEBUS_` prefix.
    /// Unparseable values are logged and skipped.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("API_URL") {
            self.live.base_url = value;
        }
        if let Some(value) = lookup("STATIC_URL") {
            self.static_data.base_url = value;
        }
        if let Some(value) = lookup("CLIENT_NAME") {
            self.http.client_name = value;
        }
        if let Some(value) = lookup("ALWAYS_UPWARD_NODE_IDS") {
            self.direction.always_upward_node_ids = value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_owned)
                .collect();
        }

        parse_override(&lookup, "POLL_INTERVAL_MS", &mut self.live.poll_interval_ms);
        parse_override(&lookup, "RETRIES", &mut self.http.retries);
        parse_override(&lookup, "RETRY_DELAY_MS", &mut self.http.retry_delay_ms);
        parse_override(
            &lookup,
            "ANIMATION_DURATION_MS",
            &mut self.motion.animation_duration_ms,
        );
        parse_override(&lookup, "EASING", &mut self.motion.easing);
        parse_override(
            &lookup,
            "MAX_SNAP_DISTANCE_M",
            &mut self.motion.max_snap_distance_m,
        );
        parse_override(&lookup, "FRAME_INTERVAL_MS", &mut self.motion.frame_interval_ms);
        parse_override(&lookup, "MIN_VALID_STOPS", &mut self.direction.min_valid_stops);
    }

    pub fn validate(&self) -> Result<()> {
        if self.live.poll_interval_ms == 0 {
            return Err(TrackerError::Config("live.poll_interval_ms must be > 0".into()));
        }
        if self.motion.animation_duration_ms == 0 {
            return Err(TrackerError::Config(
                "motion.animation_duration_ms must be > 0".into(),
            ));
        }
        if self.motion.frame_interval_ms == 0 {
            return Err(TrackerError::Config(
                "motion.frame_interval_ms must be > 0".into(),
            ));
        }
        if !self.motion.max_snap_distance_m.is_finite() || self.motion.max_snap_distance_m < 0.0 {
            return Err(TrackerError::Config(
                "motion.max_snap_distance_m must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Additional checks for building the HTTP feed client.
    pub fn validate_for_http(&self) -> Result<()> {
        self.validate()?;
        if self.live.base_url.trim().is_empty() {
            return Err(TrackerError::Config("live.base_url is not set".into()));
        }
        if self.static_data.base_url.trim().is_empty() {
            return Err(TrackerError::Config("static_data.base_url is not set".into()));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key = %format!("{ENV_PREFIX}{key}"), value = %raw, "Ignoring unparseable override"),
    }
}

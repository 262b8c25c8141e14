//! Error types of the tracking core.

use livebus_transit::{RouteName, TransitError};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Transit(#[from] TransitError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failure classification delivered to subscribers.
///
/// Error callbacks receive `Option<FeedError>`; `None` reports a successful
/// tick.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The feed answered with zero vehicles, e.g. outside service hours.
    #[error("no vehicles running")]
    NoneRunning,

    #[error("network failure: {0}")]
    Network(String),

    #[error("route not resolvable: {0}")]
    InvalidRoute(RouteName),
}

impl From<TransitError> for FeedError {
    fn from(error: TransitError) -> Self {
        match error {
            TransitError::RouteNotFound(route) => Self::InvalidRoute(route),
            other => Self::Network(other.to_string()),
        }
    }
}

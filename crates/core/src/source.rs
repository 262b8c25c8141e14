//! Upstream data sources.
//!
//! [`TransitSource`] is the seam between the tracker and the outside world.
//! [`FeedClient`] implements it on top of any [`DataFetcher`]; [`HttpFetcher`]
//! is the reqwest-backed fetcher used in production.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use livebus_transit::{
    parse_vehicle_records, DataFetcher, FeedId, GeometryDocument, RawSample, Result, RouteName,
    TopologyDocument, TransitError,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::{HttpConfig, TrackerConfig};
use crate::error::TrackerError;

/// Cache key of a geometry document: the route plus an optional variant
/// identifier, since one route label may have several recorded shapes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolylineKey {
    pub route: RouteName,
    pub variant: Option<FeedId>,
}

impl PolylineKey {
    pub fn route(route: impl Into<RouteName>) -> Self {
        Self {
            route: route.into(),
            variant: None,
        }
    }

    pub fn variant(route: impl Into<RouteName>, variant: impl Into<FeedId>) -> Self {
        Self {
            route: route.into(),
            variant: Some(variant.into()),
        }
    }

    /// Name of the geometry file, without extension.
    pub fn file_stem(&self) -> &str {
        self.variant
            .as_ref()
            .map(FeedId::as_str)
            .unwrap_or_else(|| self.route.as_str())
    }
}

impl fmt::Display for PolylineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}", self.route, variant),
            None => write!(f, "{}", self.route),
        }
    }
}

/// Everything the tracker reads from upstream.
pub trait TransitSource: Send + Sync {
    /// The static route map with stop sequences and the station table.
    fn fetch_route_map(&self) -> Pin<Box<dyn Future<Output = Result<TopologyDocument>> + Send + '_>>;

    /// `Ok(None)` when no geometry is recorded for `key`.
    fn fetch_geometry<'a>(
        &'a self,
        key: &'a PolylineKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GeometryDocument>>> + Send + 'a>>;

    /// Vehicles currently reporting under one feed identifier of `route`.
    fn fetch_vehicles<'a>(
        &'a self,
        route: &'a RouteName,
        feed_id: &'a FeedId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawSample>>> + Send + 'a>>;
}

// ============================================================================
// HTTP transport
// ============================================================================

pub struct HttpFetcher {
    client: reqwest::Client,
    attempts: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> std::result::Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        let client_name = HeaderValue::from_str(&config.client_name)
            .map_err(|e| TrackerError::Config(format!("http.client_name: {e}")))?;
        headers.insert(HeaderName::from_static("client"), client_name);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TrackerError::Client(e.to_string()))?;

        Ok(Self {
            client,
            attempts: config.retries.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransitError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransitError::NotFound(url.to_owned()));
        }

        let response = response
            .error_for_status()
            .map_err(|e| TransitError::Network(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransitError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

impl DataFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let mut attempt = 1;
            loop {
                match self.fetch_once(url).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(error) if error.is_not_found() || attempt >= self.attempts => {
                        return Err(error);
                    }
                    Err(error) => {
                        warn!(url, attempt, error = %error, "Request failed, retrying");
                        attempt += 1;
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        })
    }
}

// ============================================================================
// Feed client
// ============================================================================

/// Builds upstream URLs and decodes the documents behind them.
pub struct FeedClient<F> {
    fetcher: F,
    live_base: String,
    vehicle_path: String,
    static_base: String,
    route_map: String,
    polyline_dir: String,
    geometry_extension: String,
}

impl FeedClient<HttpFetcher> {
    pub fn from_config(config: &TrackerConfig) -> std::result::Result<Self, TrackerError> {
        config.validate_for_http()?;
        Ok(Self::new(HttpFetcher::new(&config.http)?, config))
    }
}

impl<F: DataFetcher> FeedClient<F> {
    pub fn new(fetcher: F, config: &TrackerConfig) -> Self {
        Self {
            fetcher,
            live_base: trim_slashes(&config.live.base_url).to_owned(),
            vehicle_path: trim_slashes(&config.live.vehicle_path).to_owned(),
            static_base: trim_slashes(&config.static_data.base_url).to_owned(),
            route_map: trim_slashes(&config.static_data.route_map).to_owned(),
            polyline_dir: trim_slashes(&config.static_data.polyline_dir).to_owned(),
            geometry_extension: config.static_data.geometry_extension.clone(),
        }
    }

    pub fn route_map_url(&self) -> String {
        format!("{}/{}", self.static_base, self.route_map)
    }

    pub fn geometry_url(&self, key: &PolylineKey) -> String {
        format!(
            "{}/{}/{}{}",
            self.static_base,
            self.polyline_dir,
            key.file_stem(),
            self.geometry_extension
        )
    }

    pub fn vehicles_url(&self, feed_id: &FeedId) -> String {
        format!("{}/{}/{}", self.live_base, self.vehicle_path, feed_id)
    }
}

impl<F: DataFetcher> TransitSource for FeedClient<F> {
    fn fetch_route_map(&self) -> Pin<Box<dyn Future<Output = Result<TopologyDocument>> + Send + '_>> {
        Box::pin(async move {
            let url = self.route_map_url();
            let bytes = self.fetcher.fetch(&url).await?;
            TopologyDocument::from_slice(&bytes)
        })
    }

    fn fetch_geometry<'a>(
        &'a self,
        key: &'a PolylineKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GeometryDocument>>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.geometry_url(key);
            match self.fetcher.fetch(&url).await {
                Ok(bytes) => GeometryDocument::from_slice(&bytes).map(Some),
                Err(error) if error.is_not_found() => {
                    debug!(key = %key, "No geometry recorded");
                    Ok(None)
                }
                Err(error) => Err(error),
            }
        })
    }

    fn fetch_vehicles<'a>(
        &'a self,
        route: &'a RouteName,
        feed_id: &'a FeedId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawSample>>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.vehicles_url(feed_id);
            let bytes = self.fetcher.fetch(&url).await?;
            Ok(parse_vehicle_records(&bytes)?
                .into_iter()
                .map(|record| record.into_sample(route))
                .collect())
        })
    }
}

fn trim_slashes(s: &str) -> &str {
    s.trim_matches('/')
}

//! Pluggable networking traits.
//!
//! External crates implement these to provide data fetching capabilities.

use std::future::Future;
use std::pin::Pin;

use crate::models::types::Result;

/// Fetch raw bytes from a URL.
///
/// Implementations report an absent resource (HTTP 404 or equivalent) as
/// [`TransitError::NotFound`](crate::models::types::TransitError::NotFound)
/// and every other transport failure as `Network`.
pub trait DataFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

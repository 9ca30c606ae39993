use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::error::{AppError, Result};

pub mod batch;
pub mod decode;
pub mod http;
pub mod request;

pub use batch::{CancelFlag, FetchProgress, FetchReport, FetchResults, RateLimitedBatchFetcher};
pub use http::HttpJsonSource;
pub use request::{history_url, metadata_url, timeseries_url, Request};

/// Why a single attempt failed. Retried by the batch fetcher and never surfaced to its callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("response body is not usable JSON: {0}")]
    Decode(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

pub type AttemptResult = std::result::Result<Value, FetchError>;

/// Anything that can turn a URL into a decoded JSON document.
pub trait JsonSource: Send + Sync {
    fn fetch_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, AttemptResult>;
}

/// Single bounded request for the handful of one-off documents (update times, item dumps).
pub async fn fetch_one<S>(source: &S, url: &str, timeout: Duration) -> Result<Value>
where
    S: JsonSource + ?Sized,
{
    match tokio::time::timeout(timeout, source.fetch_json(url)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::message(format!("Request to {url} failed: {err}"))),
        Err(_) => Err(AppError::message(format!(
            "Request to {url} timed out after {timeout:?}"
        ))),
    }
}

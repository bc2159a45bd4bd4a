//! YouTube search extraction
//!
//! - [`client`]: HTTP client for the Data API v3 `search` endpoint
//! - [`fetcher`]: pagination loop with bounded retry on transient failures
//!
//! The loop talks to the API through the [`SearchApi`] trait so it can be
//! driven by the real client or by a test double.

pub mod client;
pub mod fetcher;

pub use client::YoutubeClient;
pub use fetcher::Fetcher;

use async_trait::async_trait;
use thiserror::Error;
use ytetl_common::RawItem;

/// One page request. Result-type filter and ordering are fixed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub page_size: u32,
    pub page_token: Option<&'a str>,
}

/// One page of results plus the cursor for the next page, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub items: Vec<RawItem>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search_page(&self, request: &SearchRequest<'_>) -> Result<SearchPage, FetchError>;
}

#[async_trait]
impl<T: SearchApi + ?Sized> SearchApi for &T {
    async fn search_page(&self, request: &SearchRequest<'_>) -> Result<SearchPage, FetchError> {
        (**self).search_page(request).await
    }
}

/// Error types for extraction
#[derive(Debug, Error)]
pub enum FetchError {
    /// Worth retrying: timeouts, connection resets, 408/429/5xx, rate limits
    #[error("Transient API error{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },

    /// Retrying would not help: bad request, invalid key, quota exhausted
    #[error("API error{}: {message}", status_suffix(.status))]
    Api { status: Option<u16>, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() || err.is_connect() || err.is_request() {
            FetchError::Transient {
                status,
                message: err.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Api {
                status,
                message: err.to_string(),
            }
        }
    }
}

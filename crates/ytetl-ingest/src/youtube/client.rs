//! HTTP client for the YouTube Data API v3 search endpoint

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use ytetl_common::RawItem;

use super::{FetchError, SearchApi, SearchPage, SearchRequest};
use crate::config::{ApiKey, FetchConfig};

/// Result type filter sent with every search.
const RESULT_TYPE: &str = "video";

/// Newest first, matching a daily incremental crawl.
const ORDER: &str = "date";

/// Error reasons YouTube uses for short-term throttling.
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<RawItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// API client bound to one credential
pub struct YoutubeClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl YoutubeClient {
    pub fn new(config: &FetchConfig, api_key: ApiKey) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("ytetl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }
}

#[async_trait]
impl SearchApi for YoutubeClient {
    async fn search_page(&self, request: &SearchRequest<'_>) -> Result<SearchPage, FetchError> {
        let page_size = request.page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("part", "snippet"),
            ("q", request.query),
            ("type", RESULT_TYPE),
            ("order", ORDER),
            ("maxResults", page_size.as_str()),
            ("key", self.api_key.expose()),
        ];
        if let Some(token) = request.page_token {
            params.push(("pageToken", token));
        }

        debug!(query = %request.query, page_size = request.page_size, page_token = ?request.page_token, "GET search");

        let response = self.client.get(self.search_url()).query(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        let body: SearchListResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(SearchPage {
            items: body.items,
            next_page_token: body.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Map a non-success response to a retryable or fatal error.
fn classify_error(status: StatusCode, body: &str) -> FetchError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    let rate_limited = envelope.as_ref().is_some_and(|e| {
        e.error
            .errors
            .iter()
            .any(|d| RATE_LIMIT_REASONS.contains(&d.reason.as_str()))
    });

    let transient = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || (status == StatusCode::FORBIDDEN && rate_limited);

    let status = Some(status.as_u16());
    if transient {
        FetchError::Transient { status, message }
    } else {
        FetchError::Api { status, message }
    }
}

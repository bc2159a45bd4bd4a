//! Shared fixtures for ytetl-ingest integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use ytetl_common::Record;
use ytetl_ingest::config::{PipelineConfig, PipelineConfigBuilder, RetryPolicy};

pub const API_KEY: &str = "test-api-key";

/// One search result as the Data API returns it.
pub fn search_item(video_id: &str, title: &str, published_at: &str) -> Value {
    json!({
        "kind": "youtube#searchResult",
        "etag": "etag",
        "id": {"kind": "youtube#video", "videoId": video_id},
        "snippet": {
            "publishedAt": published_at,
            "channelId": "UC123",
            "title": title,
            "description": format!("description of {}", title),
            "channelTitle": "Test Channel",
            "liveBroadcastContent": "none"
        }
    })
}

/// A `search.list` response body with `count` items numbered from `start`.
pub fn search_page(prefix: &str, start: usize, count: usize, next_token: Option<&str>) -> Value {
    let items: Vec<Value> = (start..start + count)
        .map(|i| {
            search_item(
                &format!("{}{:04}", prefix, i),
                &format!("{} video {}", prefix, i),
                "2024-03-01T12:00:00Z",
            )
        })
        .collect();

    let mut body = json!({
        "kind": "youtube#searchListResponse",
        "regionCode": "KR",
        "pageInfo": {"totalResults": 1000000, "resultsPerPage": count},
        "items": items
    });
    if let Some(token) = next_token {
        body["nextPageToken"] = json!(token);
    }
    body
}

pub fn google_error(code: u16, reason: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": format!("{} ({})", reason, code),
            "errors": [{"message": reason, "domain": "youtube", "reason": reason}]
        }
    })
}

pub fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("yt.db").display())
}

pub fn record(video_id: &str, title: &str) -> Record {
    Record {
        video_id: video_id.to_string(),
        title: title.to_string(),
        channel_title: "Test Channel".to_string(),
        published_at: None,
        description: String::new(),
        query_tag: "kpop".to_string(),
    }
}

/// No page delay and millisecond backoffs.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn fast_config(api_base_url: &str, data_dir: &Path) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .api_key(API_KEY)
        .api_base_url(api_base_url)
        .data_dir(data_dir)
        .page_delay(Duration::ZERO)
        .retry(fast_retry())
}

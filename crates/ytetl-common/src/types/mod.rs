//! Domain types shared by every pipeline stage

mod timestamp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CommonError, Result};

pub use timestamp::{format_timestamp, parse_timestamp_lenient};

/// Split a comma-separated query list, trimming entries and dropping blanks.
///
/// An input with no usable entry is rejected rather than yielding an empty run.
pub fn parse_query_list(raw: &str) -> Result<Vec<String>> {
    let queries: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();

    if queries.is_empty() {
        return Err(CommonError::InvalidQueryList(format!(
            "'{}' contains no search keywords",
            raw
        )));
    }

    Ok(queries)
}

/// One search result exactly as the remote API returned it.
///
/// The payload is kept verbatim so snapshots can be replayed; accessors pull
/// out the fields the normalizer needs and report shape problems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawItem(pub Value);

impl RawItem {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// External identifier: `id.videoId` for search results, or `id` itself
    /// when the API returned a bare string.
    pub fn video_id(&self) -> Result<&str> {
        let id = match self.0.get("id") {
            Some(Value::String(id)) => Some(id.as_str()),
            Some(Value::Object(obj)) => obj.get("videoId").and_then(Value::as_str),
            _ => None,
        };

        match id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(CommonError::MalformedItem(
                "missing or non-string id.videoId".to_string(),
            )),
        }
    }

    /// A text field of `snippet`. Absent or null fields read as empty;
    /// any non-string value is a shape error.
    pub fn snippet_text(&self, field: &str) -> Result<String> {
        let snippet = self.snippet()?;
        match snippet.get(field) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(CommonError::MalformedItem(format!(
                "snippet.{} has unexpected type ({})",
                field,
                json_type_name(other)
            ))),
        }
    }

    /// Raw `snippet.publishedAt`, if it is a string at all.
    pub fn published_at_raw(&self) -> Option<&str> {
        self.0
            .get("snippet")
            .and_then(|s| s.get("publishedAt"))
            .and_then(Value::as_str)
    }

    fn snippet(&self) -> Result<&serde_json::Map<String, Value>> {
        self.0
            .get("snippet")
            .and_then(Value::as_object)
            .ok_or_else(|| CommonError::MalformedItem("missing snippet object".to_string()))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalized row written to tabular artifacts and merged into the
/// destination table. `video_id` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
    #[serde(
        serialize_with = "timestamp::serialize_optional",
        deserialize_with = "timestamp::deserialize_lenient"
    )]
    pub published_at: Option<DateTime<Utc>>,
    pub description: String,
    pub query_tag: String,
}

/// Column order of the tabular artifact and the destination table.
pub const RECORD_COLUMNS: [&str; 6] = [
    "video_id",
    "title",
    "channel_title",
    "published_at",
    "description",
    "query_tag",
];

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_list() {
        assert_eq!(
            parse_query_list("kpop,music,hiphop").unwrap(),
            vec!["kpop", "music", "hiphop"]
        );
        assert_eq!(parse_query_list(" lo fi , ,jazz ").unwrap(), vec!["lo fi", "jazz"]);
        assert!(parse_query_list(" , ,").is_err());
        assert!(parse_query_list("").is_err());
    }

    #[test]
    fn test_video_id_from_search_result() {
        let item = RawItem::new(json!({"id": {"kind": "youtube#video", "videoId": "abc123"}}));
        assert_eq!(item.video_id().unwrap(), "abc123");
    }

    #[test]
    fn test_video_id_from_plain_string() {
        let item = RawItem::new(json!({"id": "xyz"}));
        assert_eq!(item.video_id().unwrap(), "xyz");
    }

    #[test]
    fn test_video_id_missing() {
        let item = RawItem::new(json!({"id": {"kind": "youtube#channel", "channelId": "c1"}}));
        assert!(item.video_id().is_err());

        let item = RawItem::new(json!({"id": {"videoId": 42}}));
        assert!(item.video_id().is_err());
    }

    #[test]
    fn test_snippet_text() {
        let item = RawItem::new(json!({
            "snippet": {"title": "Hello", "description": null, "channelTitle": 7}
        }));
        assert_eq!(item.snippet_text("title").unwrap(), "Hello");
        assert_eq!(item.snippet_text("description").unwrap(), "");
        assert_eq!(item.snippet_text("missing").unwrap(), "");
        assert!(item.snippet_text("channelTitle").is_err());

        let no_snippet = RawItem::new(json!({"id": "x"}));
        assert!(no_snippet.snippet_text("title").is_err());
    }

    #[test]
    fn test_raw_item_is_transparent() {
        let value = json!({"id": {"videoId": "v"}, "etag": "e"});
        let item: RawItem = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(serde_json::to_value(&item).unwrap(), value);
    }
}

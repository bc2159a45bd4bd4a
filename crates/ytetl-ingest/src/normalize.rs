//! Raw search results → fixed-shape records

use tracing::{debug, info, warn};
use ytetl_common::types::parse_timestamp_lenient;
use ytetl_common::{RawItem, Record};

use crate::artifacts::{QuarantinedItem, Snapshot};

/// Records of one snapshot plus the items that could not become records.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<Record>,
    pub quarantined: Vec<QuarantinedItem>,
}

impl Normalized {
    pub fn skipped(&self) -> usize {
        self.quarantined.len()
    }
}

/// Map one raw item, tagging it with the query that produced it.
///
/// A missing id or a text field of the wrong JSON type is an error. An
/// unparseable or non-string `publishedAt` is not: it becomes `None`.
pub fn normalize_item(item: &RawItem, query_tag: &str) -> ytetl_common::Result<Record> {
    let video_id = item.video_id()?.to_string();

    let published_at = match item.published_at_raw() {
        Some(raw) => {
            let parsed = parse_timestamp_lenient(raw);
            if parsed.is_none() && !raw.trim().is_empty() {
                debug!(video_id = %video_id, raw, "Unparseable publishedAt, storing NULL");
            }
            parsed
        },
        None => None,
    };

    Ok(Record {
        title: item.snippet_text("title")?,
        channel_title: item.snippet_text("channelTitle")?,
        published_at,
        description: item.snippet_text("description")?,
        query_tag: query_tag.to_string(),
        video_id,
    })
}

/// Normalize every item of a snapshot, keeping API order.
pub fn normalize_snapshot(snapshot: &Snapshot) -> Normalized {
    let mut out = Normalized {
        records: Vec::with_capacity(snapshot.items.len()),
        quarantined: Vec::new(),
    };

    for (index, item) in snapshot.items.iter().enumerate() {
        match normalize_item(item, &snapshot.query) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                warn!(query = %snapshot.query, index, error = %e, "Skipping malformed item");
                out.quarantined.push(QuarantinedItem {
                    index,
                    reason: e.to_string(),
                    item: item.clone(),
                });
            },
        }
    }

    info!(
        query = %snapshot.query,
        rows = out.records.len(),
        skipped = out.skipped(),
        "Normalized {} items ({} skipped)",
        out.records.len(),
        out.skipped()
    );

    out
}

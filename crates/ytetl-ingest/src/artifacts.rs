//! Artifact storage under the data directory
//!
//! ```text
//! {data_dir}/raw/{ts}_{query}.json        snapshot (one per query, write-once)
//! {data_dir}/processed/{ts}_{query}.csv   tabular records
//! {data_dir}/quarantine/{ts}_{query}.json items the normalizer skipped
//! {data_dir}/runs/{run_id}.json           run manifest
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use ytetl_common::{RawItem, Record};

const RAW_DIR: &str = "raw";
const PROCESSED_DIR: &str = "processed";
const QUARANTINE_DIR: &str = "quarantine";
const RUNS_DIR: &str = "runs";

/// Error types for artifact I/O
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid CSV in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Snapshot '{0}' already exists; snapshots are never overwritten")]
    SnapshotExists(PathBuf),
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Point-in-time capture of one query's raw results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub query: String,
    pub fetched_at: DateTime<Utc>,
    pub item_count: usize,
    pub items: Vec<RawItem>,
}

impl Snapshot {
    pub fn new(query: impl Into<String>, fetched_at: DateTime<Utc>, items: Vec<RawItem>) -> Self {
        Self {
            query: query.into(),
            fetched_at,
            item_count: items.len(),
            items,
        }
    }

    /// `{%Y-%m-%dT%H-%M-%SZ}_{query}`, shared by every artifact of this query.
    pub fn stem(&self) -> String {
        artifact_stem(&self.fetched_at, &self.query)
    }
}

/// On-disk snapshot forms. Bare arrays are accepted for replaying older dumps.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Full(Snapshot),
    Items(Vec<RawItem>),
}

/// A raw item the normalizer refused, kept for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedItem {
    pub index: usize,
    pub reason: String,
    pub item: RawItem,
}

pub fn artifact_stem(fetched_at: &DateTime<Utc>, query: &str) -> String {
    format!("{}_{}", fetched_at.format("%Y-%m-%dT%H-%M-%SZ"), sanitize_query(query))
}

/// Spaces and anything that could break out of the directory become `_`.
pub fn sanitize_query(query: &str) -> String {
    query
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// File-system rooted artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|e| ArtifactError::io(&dir, e))?;
        Ok(dir)
    }

    /// Write a snapshot once. An existing file with the same name is an error.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.dir(RAW_DIR)?.join(format!("{}.json", snapshot.stem()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ArtifactError::SnapshotExists(path.clone()),
                _ => ArtifactError::io(&path, e),
            })?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|e| ArtifactError::json(&path, e))?;
        writer.flush().map_err(|e| ArtifactError::io(&path, e))?;

        info!(items = snapshot.item_count, path = %path.display(), "Saved {} items to {}", snapshot.item_count, path.display());
        Ok(path)
    }

    pub fn read_snapshot(&self, path: &Path) -> Result<Snapshot> {
        let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
        let document: SnapshotDocument =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| ArtifactError::json(path, e))?;

        Ok(match document {
            SnapshotDocument::Full(snapshot) => snapshot,
            SnapshotDocument::Items(items) => {
                let (fetched_at, query) = parse_legacy_stem(path);
                Snapshot::new(query, fetched_at, items)
            },
        })
    }

    /// Write records as CSV with a header row. Rewrites are atomic.
    pub fn write_table(&self, stem: &str, records: &[Record]) -> Result<PathBuf> {
        let path = self.dir(PROCESSED_DIR)?.join(format!("{}.csv", stem));
        let tmp = path.with_extension("csv.tmp");

        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(|e| ArtifactError::csv(&tmp, e))?;
            for record in records {
                writer.serialize(record).map_err(|e| ArtifactError::csv(&tmp, e))?;
            }
            writer.flush().map_err(|e| ArtifactError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| ArtifactError::io(&path, e))?;

        debug!(rows = records.len(), path = %path.display(), "Wrote tabular artifact");
        Ok(path)
    }

    pub fn read_table(&self, path: &Path) -> Result<Vec<Record>> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| ArtifactError::csv(path, e))?;
        reader
            .deserialize()
            .collect::<std::result::Result<Vec<Record>, _>>()
            .map_err(|e| ArtifactError::csv(path, e))
    }

    pub fn write_quarantine(&self, stem: &str, items: &[QuarantinedItem]) -> Result<PathBuf> {
        let path = self.dir(QUARANTINE_DIR)?.join(format!("{}.json", stem));
        self.write_json(&path, &items)?;
        Ok(path)
    }

    pub fn manifest_path(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self.dir(RUNS_DIR)?.join(format!("{}.json", run_id)))
    }

    /// Run ids with a manifest, oldest first.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let dir = self.dir(RUNS_DIR)?;
        let entries = fs::read_dir(&dir).map_err(|e| ArtifactError::io(&dir, e))?;

        let mut runs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ArtifactError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    runs.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Pretty JSON, written to a temp file and renamed into place.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(|e| ArtifactError::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value).map_err(|e| ArtifactError::json(&tmp, e))?;
            writer.flush().map_err(|e| ArtifactError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| ArtifactError::json(path, e))
    }
}

/// Recover `(fetched_at, query)` from `{ts}_{query}.json`; falls back to the
/// file's whole stem and the epoch. The query part is the sanitized name as
/// written, since `_` in it may stand for a space or be literal.
fn parse_legacy_stem(path: &Path) -> (DateTime<Utc>, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some((ts, query)) = stem.split_once('_') {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H-%M-%SZ") {
            return (naive.and_utc(), query.to_string());
        }
    }

    (DateTime::<Utc>::default(), stem)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 15).unwrap()
    }

    #[test]
    fn test_stem_is_timestamp_and_query() {
        assert_eq!(artifact_stem(&fetched_at(), "kpop"), "2024-05-01T08-30-15Z_kpop");
        assert_eq!(
            artifact_stem(&fetched_at(), "lo fi/hip hop"),
            "2024-05-01T08-30-15Z_lo_fi_hip_hop"
        );
        assert_eq!(artifact_stem(&fetched_at(), "케이팝"), "2024-05-01T08-30-15Z_케이팝");
    }

    #[test]
    fn test_snapshot_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let snapshot = Snapshot::new("kpop", fetched_at(), vec![RawItem::new(json!({"id": "a"}))]);

        let path = store.write_snapshot(&snapshot).unwrap();
        assert!(path.ends_with("raw/2024-05-01T08-30-15Z_kpop.json"));
        assert_eq!(store.read_snapshot(&path).unwrap(), snapshot);

        let err = store.write_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, ArtifactError::SnapshotExists(_)));
    }

    #[test]
    fn test_reads_bare_array_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = dir.path().join("2024-05-01T08-30-15Z_hip_hop.json");
        fs::write(&path, r#"[{"id": {"videoId": "a"}}, {"id": {"videoId": "b"}}]"#).unwrap();

        let snapshot = store.read_snapshot(&path).unwrap();
        assert_eq!(snapshot.query, "hip_hop");
        assert_eq!(snapshot.fetched_at, fetched_at());
        assert_eq!(snapshot.item_count, 2);
    }

    #[test]
    fn test_table_keeps_null_and_coerces_bad_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let records = vec![
            Record {
                video_id: "a".to_string(),
                title: "Title, with comma".to_string(),
                channel_title: "Chan".to_string(),
                published_at: Some(fetched_at()),
                description: "line one\nline two".to_string(),
                query_tag: "kpop".to_string(),
            },
            Record {
                video_id: "b".to_string(),
                title: String::new(),
                channel_title: String::new(),
                published_at: None,
                description: String::new(),
                query_tag: "kpop".to_string(),
            },
        ];

        let path = store.write_table("2024-05-01T08-30-15Z_kpop", &records).unwrap();
        assert_eq!(store.read_table(&path).unwrap(), records);

        let edited = dir.path().join("edited.csv");
        fs::write(
            &edited,
            "video_id,title,channel_title,published_at,description,query_tag\nc,T,C,yesterday-ish,D,kpop\n",
        )
        .unwrap();
        let rows = store.read_table(&edited).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].published_at, None);
    }
}

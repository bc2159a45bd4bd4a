//! Stage coordination: extract → transform → load
//!
//! Stages hand each other immutable values naming the artifacts they wrote.
//! The same values are recorded in a per-run manifest under
//! `{data_dir}/runs/`, so each stage can also run as its own process and pick
//! up where the previous one stopped.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactStore, Snapshot};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, IngestError, Result};
use crate::normalize::normalize_snapshot;
use crate::sink::{LoadMode, SinkWriter};
use crate::youtube::{Fetcher, SearchApi, YoutubeClient};

// ============================================================================
// Run identity and manifest
// ============================================================================

/// `{UTC %Y%m%dT%H%M%SZ}-{8 hex}`; sorts by start time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8]))
    }

    /// Accept an externally supplied id; it becomes a file name.
    pub fn parse(raw: &str) -> std::result::Result<Self, ConfigError> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !raw.starts_with('.');

        if !valid {
            return Err(ConfigError::invalid(format!(
                "run id '{}' may only contain letters, digits, '-', '_' and '.'",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => f.write_str("extract"),
            Stage::Transform => f.write_str("transform"),
            Stage::Load => f.write_str("load"),
        }
    }
}

/// A file produced for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub query: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub completed_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_loaded: Option<u64>,
}

/// Stage name → artifacts, one file per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub stages: BTreeMap<Stage, StageRecord>,
}

impl RunManifest {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            stages: BTreeMap::new(),
        }
    }

    /// A copy of this manifest with `stage` recorded (or replaced).
    pub fn with_stage(&self, stage: Stage, record: StageRecord) -> Self {
        let mut stages = self.stages.clone();
        stages.insert(stage, record);
        Self {
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            stages,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn load(store: &ArtifactStore, run_id: &RunId) -> Result<Self> {
        let path = store.manifest_path(run_id.as_str())?;
        if !path.exists() {
            return Err(IngestError::handoff(format!(
                "no manifest for run '{}' at {}",
                run_id,
                path.display()
            )));
        }
        Ok(store.read_json(&path)?)
    }

    /// Existing manifest for the run, or a fresh one.
    fn load_or_new(store: &ArtifactStore, run_id: &RunId) -> Result<Self> {
        let path = store.manifest_path(run_id.as_str())?;
        if path.exists() {
            Ok(store.read_json(&path)?)
        } else {
            Ok(Self::new(run_id.clone()))
        }
    }

    pub fn save(&self, store: &ArtifactStore) -> Result<PathBuf> {
        let path = store.manifest_path(self.run_id.as_str())?;
        store.write_json(&path, self)?;
        Ok(path)
    }
}

/// The run to resume: the one asked for, or the most recently created
/// manifest. Ties on `created_at` go to the larger run id.
pub fn resolve_run_id(store: &ArtifactStore, requested: Option<&str>) -> Result<RunId> {
    if let Some(raw) = requested {
        return Ok(RunId::parse(raw)?);
    }

    let mut latest: Option<(DateTime<Utc>, RunId)> = None;
    for id in store.list_runs()? {
        let manifest = RunManifest::load(store, &RunId(id))?;
        let candidate = (manifest.created_at, manifest.run_id);
        if latest.as_ref().map_or(true, |current| candidate > *current) {
            latest = Some(candidate);
        }
    }

    latest
        .map(|(_, run_id)| run_id)
        .ok_or_else(|| IngestError::handoff(format!("no runs recorded under {}", store.root().display())))
}

// ============================================================================
// Handoff values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutput {
    pub run_id: RunId,
    pub snapshots: Vec<Artifact>,
}

impl ExtractOutput {
    pub fn from_manifest(manifest: &RunManifest) -> Result<Self> {
        let record = upstream(manifest, Stage::Extract)?;
        Ok(Self {
            run_id: manifest.run_id.clone(),
            snapshots: record.artifacts.clone(),
        })
    }

    /// Explicit snapshot files; the query is read from each document.
    pub fn from_paths(store: &ArtifactStore, run_id: RunId, paths: &[PathBuf]) -> Result<Self> {
        let snapshots = paths
            .iter()
            .map(|path| -> Result<Artifact> {
                let snapshot = store.read_snapshot(path)?;
                Ok(Artifact {
                    query: snapshot.query,
                    path: path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { run_id, snapshots })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub run_id: RunId,
    pub tables: Vec<Artifact>,
    pub skipped: usize,
}

impl TransformOutput {
    pub fn from_manifest(manifest: &RunManifest) -> Result<Self> {
        let record = upstream(manifest, Stage::Transform)?;
        Ok(Self {
            run_id: manifest.run_id.clone(),
            tables: record.artifacts.clone(),
            skipped: record.skipped.unwrap_or(0),
        })
    }

    /// Explicit CSV files, e.g. hand-corrected ones.
    pub fn from_paths(run_id: RunId, paths: &[PathBuf]) -> Self {
        let tables = paths
            .iter()
            .map(|path| Artifact {
                query: String::new(),
                path: path.clone(),
            })
            .collect();
        Self {
            run_id,
            tables,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutput {
    pub run_id: RunId,
    pub rows_loaded: u64,
    pub tables: usize,
    pub mode: LoadMode,
}

/// Outputs of a full `run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub extract: ExtractOutput,
    pub transform: TransformOutput,
    pub load: LoadOutput,
}

fn upstream(manifest: &RunManifest, stage: Stage) -> Result<&StageRecord> {
    manifest.stage(stage).ok_or_else(|| {
        IngestError::handoff(format!(
            "run '{}' has no completed {} stage",
            manifest.run_id, stage
        ))
    })
}

fn record_stage(
    store: &ArtifactStore,
    run_id: &RunId,
    stage: Stage,
    record: StageRecord,
) -> Result<()> {
    let manifest = RunManifest::load_or_new(store, run_id)?.with_stage(stage, record);
    let path = manifest.save(store)?;
    info!(run_id = %run_id, stage = %stage, path = %path.display(), "Updated run manifest");
    Ok(())
}

// ============================================================================
// Stages
// ============================================================================

/// Fetch every query and write one snapshot each, using the live API.
pub async fn extract(config: &PipelineConfig, run_id: RunId) -> Result<ExtractOutput> {
    let api_key = config.require_api_key()?.clone();
    let client = YoutubeClient::new(&config.fetch, api_key).map_err(IngestError::Client)?;
    extract_with(&client, config, run_id).await
}

/// Extraction against any [`SearchApi`].
///
/// Queries run through an ordered stream bounded by `query_concurrency`;
/// the first failing query aborts the stage.
#[instrument(skip(api, config, run_id), fields(run_id = %run_id))]
pub async fn extract_with<A: SearchApi>(
    api: A,
    config: &PipelineConfig,
    run_id: RunId,
) -> Result<ExtractOutput> {
    config.validate()?;
    let queries = dedup_queries(config.require_queries()?);
    let store = ArtifactStore::new(&config.data_dir);
    let fetcher = Fetcher::new(api, config.fetch.clone());

    info!(
        queries = queries.len(),
        max_total = config.max_total,
        concurrency = config.query_concurrency,
        "Starting extraction"
    );

    let snapshots: Vec<Artifact> = stream::iter(queries)
        .map(|query| {
            let fetcher = &fetcher;
            let store = &store;
            async move {
                let items = fetcher
                    .fetch(&query, config.max_total)
                    .await
                    .map_err(|e| IngestError::fetch(query.as_str(), e))?;
                let snapshot = Snapshot::new(query.as_str(), Utc::now(), items);
                let path = store.write_snapshot(&snapshot)?;
                Ok::<_, IngestError>(Artifact { query, path })
            }
        })
        .buffered(config.query_concurrency.max(1))
        .try_collect()
        .await?;

    record_stage(
        &store,
        &run_id,
        Stage::Extract,
        StageRecord {
            completed_at: Utc::now(),
            artifacts: snapshots.clone(),
            skipped: None,
            rows_loaded: None,
        },
    )?;

    Ok(ExtractOutput { run_id, snapshots })
}

fn dedup_queries(queries: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    queries
        .iter()
        .filter(|q| {
            let first = seen.insert(q.as_str());
            if !first {
                warn!(query = %q, "Ignoring repeated query");
            }
            first
        })
        .cloned()
        .collect()
}

/// Normalize each snapshot into a tabular artifact.
#[instrument(skip(config, input), fields(run_id = %input.run_id))]
pub fn transform(config: &PipelineConfig, input: &ExtractOutput) -> Result<TransformOutput> {
    if input.snapshots.is_empty() {
        return Err(IngestError::handoff("transform received no snapshots"));
    }

    let store = ArtifactStore::new(&config.data_dir);
    let mut tables = Vec::with_capacity(input.snapshots.len());
    let mut skipped = 0;

    for artifact in &input.snapshots {
        let snapshot = store.read_snapshot(&artifact.path)?;
        let normalized = normalize_snapshot(&snapshot);
        let stem = snapshot.stem();

        if !normalized.quarantined.is_empty() {
            let path = store.write_quarantine(&stem, &normalized.quarantined)?;
            warn!(
                query = %snapshot.query,
                skipped = normalized.skipped(),
                path = %path.display(),
                "Quarantined malformed items"
            );
            skipped += normalized.skipped();
        }

        let path = store.write_table(&stem, &normalized.records)?;
        info!(
            query = %snapshot.query,
            rows = normalized.records.len(),
            path = %path.display(),
            "Wrote tabular artifact"
        );
        tables.push(Artifact {
            query: snapshot.query,
            path,
        });
    }

    record_stage(
        &store,
        &input.run_id,
        Stage::Transform,
        StageRecord {
            completed_at: Utc::now(),
            artifacts: tables.clone(),
            skipped: Some(skipped),
            rows_loaded: None,
        },
    )?;

    Ok(TransformOutput {
        run_id: input.run_id.clone(),
        tables,
        skipped,
    })
}

/// Merge every tabular artifact into the destination table.
#[instrument(skip(config, input), fields(run_id = %input.run_id))]
pub async fn load(config: &PipelineConfig, input: &TransformOutput) -> Result<LoadOutput> {
    if input.tables.is_empty() {
        return Err(IngestError::handoff("load received no tabular artifacts"));
    }

    config.validate()?;
    let db_url = config.require_db_url()?;
    let store = ArtifactStore::new(&config.data_dir);

    let sink = SinkWriter::connect(db_url, config.load_mode, config.table_name.as_str()).await?;
    sink.ensure_schema().await?;

    let mut rows_loaded = 0u64;
    for table in &input.tables {
        rows_loaded += sink.load_table(&store, &table.path).await?;
    }
    let mode = sink.mode();
    sink.close().await;

    info!(
        rows = rows_loaded,
        tables = input.tables.len(),
        "Loaded {} rows from {} files",
        rows_loaded,
        input.tables.len()
    );

    record_stage(
        &store,
        &input.run_id,
        Stage::Load,
        StageRecord {
            completed_at: Utc::now(),
            artifacts: input.tables.clone(),
            skipped: None,
            rows_loaded: Some(rows_loaded),
        },
    )?;

    Ok(LoadOutput {
        run_id: input.run_id.clone(),
        rows_loaded,
        tables: input.tables.len(),
        mode,
    })
}

/// All three stages in order under one run id.
pub async fn run_pipeline(config: &PipelineConfig, run_id: RunId) -> Result<RunSummary> {
    config.validate()?;
    // Fail before spending API quota if the sink is not configured.
    config.require_db_url()?;

    let extract = extract(config, run_id).await?;
    let transform = transform(config, &extract)?;
    let load = load(config, &transform).await?;

    Ok(RunSummary {
        extract,
        transform,
        load,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_run_id_shape() {
        let id = RunId::generate();
        let (ts, suffix) = id.as_str().split_once('-').unwrap();
        assert_eq!(ts.len(), 16);
        assert!(ts.ends_with('Z'));
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_run_id_rejects_paths() {
        assert!(RunId::parse("20240501T000000Z-abcd1234").is_ok());
        assert!(RunId::parse("../etc/passwd").is_err());
        assert!(RunId::parse("").is_err());
    }

    #[test]
    fn test_with_stage_returns_new_manifest() {
        let manifest = RunManifest::new(RunId::parse("r1").unwrap());
        let record = StageRecord {
            completed_at: Utc::now(),
            artifacts: vec![Artifact {
                query: "kpop".to_string(),
                path: PathBuf::from("raw/a.json"),
            }],
            skipped: None,
            rows_loaded: None,
        };

        let next = manifest.with_stage(Stage::Extract, record);
        assert!(manifest.stage(Stage::Extract).is_none());
        assert_eq!(next.stage(Stage::Extract).unwrap().artifacts.len(), 1);
        assert!(TransformOutput::from_manifest(&next).is_err());
        assert_eq!(ExtractOutput::from_manifest(&next).unwrap().snapshots.len(), 1);
    }

    #[test]
    fn test_manifest_roundtrip_and_latest_run() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        for id in ["20240101T000000Z-aaaaaaaa", "20240301T000000Z-bbbbbbbb"] {
            RunManifest::new(RunId::parse(id).unwrap()).save(&store).unwrap();
        }

        let latest = resolve_run_id(&store, None).unwrap();
        assert_eq!(latest.as_str(), "20240301T000000Z-bbbbbbbb");

        let manifest = RunManifest::load(&store, &latest).unwrap();
        assert_eq!(manifest.run_id, latest);
        assert!(manifest.stages.is_empty());
    }

    #[test]
    fn test_latest_run_follows_creation_time_not_name() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut named = RunManifest::new(RunId::parse("zzz-backfill").unwrap());
        named.created_at = Utc::now() - chrono::Duration::hours(1);
        named.save(&store).unwrap();

        let generated = RunManifest::new(RunId::generate());
        generated.save(&store).unwrap();

        assert_eq!(resolve_run_id(&store, None).unwrap(), generated.run_id);
    }

    #[test]
    fn test_no_runs_is_a_handoff_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(resolve_run_id(&store, None), Err(IngestError::Handoff(_))));
    }

    #[test]
    fn test_transform_rejects_empty_handoff() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::builder().data_dir(dir.path()).build();
        let input = ExtractOutput {
            run_id: RunId::generate(),
            snapshots: vec![],
        };
        assert!(matches!(transform(&config, &input), Err(IngestError::Handoff(_))));
    }

    #[test]
    fn test_repeated_queries_are_dropped() {
        let queries = vec!["kpop".to_string(), "music".to_string(), "kpop".to_string()];
        assert_eq!(dedup_queries(&queries), ["kpop", "music"]);
    }
}

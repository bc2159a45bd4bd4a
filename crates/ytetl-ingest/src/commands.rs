//! CLI command handlers
//!
//! Each handler turns parsed arguments into a [`PipelineConfig`], runs one
//! coordinator entry point and prints a short result to stdout.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use ytetl_common::types::parse_query_list;

use crate::artifacts::ArtifactStore;
use crate::config::{PipelineConfig, PipelineConfigBuilder, RetryPolicy};
use crate::coordinator::{self, ExtractOutput, RunId, RunManifest, TransformOutput};
use crate::error::Result;
use crate::{Cli, Commands, SinkArgs, SourceArgs};

/// Execute the parsed command
pub async fn execute(cli: &Cli) -> Result<()> {
    let base = PipelineConfig::builder()
        .data_dir(cli.data_dir.clone())
        .table_name(cli.table.clone());

    match &cli.command {
        Commands::Extract { source, run_id } => {
            let config = with_source(base, source)?.build();
            let run_id = new_or_given(run_id.as_deref())?;
            let output = coordinator::extract(&config, run_id).await?;

            println!("run_id: {}", output.run_id);
            for snapshot in &output.snapshots {
                println!("{}\t{}", snapshot.query, snapshot.path.display());
            }
        },

        Commands::Transform { run_id, inputs } => {
            let config = base.build();
            let input = extract_handoff(&config, run_id.as_deref(), inputs)?;
            let output = coordinator::transform(&config, &input)?;

            println!("run_id: {}", output.run_id);
            for table in &output.tables {
                println!("{}\t{}", table.query, table.path.display());
            }
            if output.skipped > 0 {
                println!("skipped: {}", output.skipped);
            }
        },

        Commands::Load {
            sink,
            run_id,
            inputs,
        } => {
            let config = with_sink(base, sink).build();
            // A missing URL is reported before looking for artifacts.
            config.require_db_url()?;
            let input = transform_handoff(&config, run_id.as_deref(), inputs)?;
            let output = coordinator::load(&config, &input).await?;

            println!("run_id: {}", output.run_id);
            println!(
                "loaded {} rows from {} files ({})",
                output.rows_loaded, output.tables, output.mode
            );
        },

        Commands::Run {
            source,
            sink,
            run_id,
        } => {
            let config = with_sink(with_source(base, source)?, sink).build();
            let run_id = new_or_given(run_id.as_deref())?;
            let summary = coordinator::run_pipeline(&config, run_id).await?;

            println!("run_id: {}", summary.load.run_id);
            println!(
                "snapshots: {}, tables: {}, skipped: {}, rows loaded: {} ({})",
                summary.extract.snapshots.len(),
                summary.transform.tables.len(),
                summary.transform.skipped,
                summary.load.rows_loaded,
                summary.load.mode
            );
        },
    }

    Ok(())
}

fn with_source(builder: PipelineConfigBuilder, args: &SourceArgs) -> Result<PipelineConfigBuilder> {
    let queries = match args.query.as_deref() {
        Some(raw) => parse_query_list(raw)?,
        None => Vec::new(),
    };

    let mut builder = builder
        .queries(queries)
        .max_total(args.max_total)
        .api_base_url(args.api_base_url.clone())
        .query_concurrency(args.query_concurrency)
        .page_delay(Duration::from_millis(args.page_delay_ms))
        .retry(RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        });

    if let Some(key) = &args.api_key {
        builder = builder.api_key(key.clone());
    }
    Ok(builder)
}

fn with_sink(builder: PipelineConfigBuilder, args: &SinkArgs) -> PipelineConfigBuilder {
    let builder = builder.load_mode(args.load_mode);
    match &args.db_url {
        Some(url) => builder.db_url(url.clone()),
        None => builder,
    }
}

fn new_or_given(run_id: Option<&str>) -> Result<RunId> {
    match run_id {
        Some(raw) => Ok(RunId::parse(raw)?),
        None => Ok(RunId::generate()),
    }
}

fn extract_handoff(
    config: &PipelineConfig,
    run_id: Option<&str>,
    inputs: &[PathBuf],
) -> Result<ExtractOutput> {
    let store = ArtifactStore::new(&config.data_dir);

    if !inputs.is_empty() {
        let run_id = new_or_given(run_id)?;
        info!(run_id = %run_id, files = inputs.len(), "Transforming explicit snapshot files");
        return ExtractOutput::from_paths(&store, run_id, inputs);
    }

    let run_id = coordinator::resolve_run_id(&store, run_id)?;
    ExtractOutput::from_manifest(&RunManifest::load(&store, &run_id)?)
}

fn transform_handoff(
    config: &PipelineConfig,
    run_id: Option<&str>,
    inputs: &[PathBuf],
) -> Result<TransformOutput> {
    let store = ArtifactStore::new(&config.data_dir);

    if !inputs.is_empty() {
        let run_id = new_or_given(run_id)?;
        info!(run_id = %run_id, files = inputs.len(), "Loading explicit table files");
        return Ok(TransformOutput::from_paths(run_id, inputs));
    }

    let run_id = coordinator::resolve_run_id(&store, run_id)?;
    TransformOutput::from_manifest(&RunManifest::load(&store, &run_id)?)
}

//! Error types for the ingest pipeline
//!
//! Each stage has its own error enum; [`IngestError`] is what the coordinator
//! and the CLI see.

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::sink::SinkError;
use crate::youtube::FetchError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Invalid or missing run configuration. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("YouTube API key not set. Provide --api-key or set YT_API_KEY")]
    MissingApiKey,

    #[error("Database URL not set. Provide --db-url or set DB_URL")]
    MissingDatabaseUrl,

    #[error("No search queries given. Provide --query or set YT_QUERY (comma-separated)")]
    NoQueries,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Fetch failed for query '{query}': {source}")]
    Fetch {
        query: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to initialise API client: {0}")]
    Client(#[source] FetchError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A stage was handed nothing to work on
    #[error("Stage handoff error: {0}")]
    Handoff(String),

    #[error(transparent)]
    Common(#[from] ytetl_common::CommonError),
}

impl IngestError {
    pub fn fetch(query: impl Into<String>, source: FetchError) -> Self {
        Self::Fetch {
            query: query.into(),
            source,
        }
    }

    pub fn handoff(msg: impl Into<String>) -> Self {
        Self::Handoff(msg.into())
    }
}

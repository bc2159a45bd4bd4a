//! How a staged batch is merged into the destination table

use std::fmt::Debug;

use super::{Dialect, SinkError};
use crate::config::LoadModePreference;

/// Guarantee the destination gives for repeated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// One row per `video_id`; later loads overwrite
    Upsert,
    /// Every load appends; duplicate keys possible
    Append,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::Upsert => f.write_str("upsert"),
            LoadMode::Append => f.write_str("append"),
        }
    }
}

/// SQL for creating and merging into the destination, chosen once per sink.
///
/// The staging table always has the columns `seq, video_id, title,
/// channel_title, published_at, description, query_tag`, all text except
/// `seq`. `merge_sql` takes the batch timestamp as its only bind parameter.
pub trait LoadStrategy: Send + Sync + Debug {
    fn mode(&self) -> LoadMode;

    fn create_table_sql(&self, table: &str) -> String;

    fn merge_sql(&self, table: &str, stage: &str) -> String;
}

/// `INSERT … ON CONFLICT (video_id) DO UPDATE`. The last row per key in a
/// batch wins.
#[derive(Debug, Clone)]
pub struct NativeUpsert {
    dialect: Dialect,
}

impl NativeUpsert {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl LoadStrategy for NativeUpsert {
    fn mode(&self) -> LoadMode {
        LoadMode::Upsert
    }

    fn create_table_sql(&self, table: &str) -> String {
        create_table(&self.dialect, table, "video_id TEXT PRIMARY KEY")
    }

    fn merge_sql(&self, table: &str, stage: &str) -> String {
        format!(
            "INSERT INTO {table} (video_id, title, channel_title, published_at, description, query_tag, loaded_at) \
             SELECT s.video_id, s.title, s.channel_title, {published}, s.description, s.query_tag, {loaded} \
             FROM {stage} s \
             WHERE s.seq = (SELECT MAX(d.seq) FROM {stage} d WHERE d.video_id = s.video_id) \
             ON CONFLICT (video_id) DO UPDATE SET \
             title = EXCLUDED.title, \
             channel_title = EXCLUDED.channel_title, \
             published_at = EXCLUDED.published_at, \
             description = EXCLUDED.description, \
             query_tag = EXCLUDED.query_tag, \
             loaded_at = EXCLUDED.loaded_at",
            published = self.dialect.timestamp_expr("s.published_at"),
            loaded = self.dialect.timestamp_expr("$1"),
        )
    }
}

/// Plain `INSERT … SELECT` in batch order. No key constraint.
#[derive(Debug, Clone)]
pub struct AppendOnly {
    dialect: Dialect,
}

impl AppendOnly {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl LoadStrategy for AppendOnly {
    fn mode(&self) -> LoadMode {
        LoadMode::Append
    }

    fn create_table_sql(&self, table: &str) -> String {
        create_table(&self.dialect, table, "video_id TEXT NOT NULL")
    }

    fn merge_sql(&self, table: &str, stage: &str) -> String {
        format!(
            "INSERT INTO {table} (video_id, title, channel_title, published_at, description, query_tag, loaded_at) \
             SELECT s.video_id, s.title, s.channel_title, {published}, s.description, s.query_tag, {loaded} \
             FROM {stage} s ORDER BY s.seq",
            published = self.dialect.timestamp_expr("s.published_at"),
            loaded = self.dialect.timestamp_expr("$1"),
        )
    }
}

fn create_table(dialect: &Dialect, table: &str, key_column: &str) -> String {
    let ts = dialect.timestamp_type();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         {key_column}, \
         title TEXT, \
         channel_title TEXT, \
         published_at {ts}, \
         description TEXT, \
         query_tag TEXT, \
         loaded_at {ts})"
    )
}

/// Resolve the configured preference against what the backend supports.
pub fn select_strategy(
    dialect: &Dialect,
    preference: LoadModePreference,
) -> Result<Box<dyn LoadStrategy>, SinkError> {
    let native = dialect.supports_native_upsert();

    match (preference, native) {
        (LoadModePreference::Append, _) | (LoadModePreference::Auto, false) => {
            Ok(Box::new(AppendOnly::new(dialect.clone())))
        },
        (LoadModePreference::Auto, true) | (LoadModePreference::Upsert, true) => {
            Ok(Box::new(NativeUpsert::new(dialect.clone())))
        },
        (LoadModePreference::Upsert, false) => Err(SinkError::UnsupportedMode {
            dialect: dialect.to_string(),
            mode: LoadMode::Upsert,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_prefers_native_upsert() {
        let strategy = select_strategy(&Dialect::Postgres, LoadModePreference::Auto).unwrap();
        assert_eq!(strategy.mode(), LoadMode::Upsert);

        let strategy = select_strategy(&Dialect::Sqlite, LoadModePreference::Auto).unwrap();
        assert_eq!(strategy.mode(), LoadMode::Upsert);
    }

    #[test]
    fn test_auto_falls_back_to_append() {
        let dialect = Dialect::Other("MySQL".to_string());
        let strategy = select_strategy(&dialect, LoadModePreference::Auto).unwrap();
        assert_eq!(strategy.mode(), LoadMode::Append);
    }

    #[test]
    fn test_forced_upsert_on_unsupported_dialect_fails() {
        let dialect = Dialect::Other("MySQL".to_string());
        let err = select_strategy(&dialect, LoadModePreference::Upsert).unwrap_err();
        assert!(matches!(err, SinkError::UnsupportedMode { .. }));
        assert!(err.to_string().contains("--load-mode"));
    }

    #[test]
    fn test_forced_append() {
        let strategy = select_strategy(&Dialect::Postgres, LoadModePreference::Append).unwrap();
        assert_eq!(strategy.mode(), LoadMode::Append);
        assert!(!strategy.create_table_sql("videos").contains("PRIMARY KEY"));
    }

    #[test]
    fn test_postgres_upsert_sql_casts_timestamps() {
        let strategy = NativeUpsert::new(Dialect::Postgres);
        let ddl = strategy.create_table_sql("youtube_videos");
        assert!(ddl.contains("video_id TEXT PRIMARY KEY"));
        assert!(ddl.contains("published_at TIMESTAMPTZ"));

        let merge = strategy.merge_sql("youtube_videos", "stage");
        assert!(merge.contains("CAST(s.published_at AS TIMESTAMPTZ)"));
        assert!(merge.contains("CAST($1 AS TIMESTAMPTZ)"));
        assert!(merge.contains("ON CONFLICT (video_id) DO UPDATE"));
        assert!(merge.contains("MAX(d.seq)"));
    }

    #[test]
    fn test_sqlite_keeps_text_timestamps() {
        let merge = NativeUpsert::new(Dialect::Sqlite).merge_sql("youtube_videos", "stage");
        assert!(!merge.contains("CAST"));
        assert!(merge.contains("loaded_at = EXCLUDED.loaded_at"));
    }
}

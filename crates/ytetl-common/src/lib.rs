//! ytetl Common Library
//!
//! Shared types, error handling and logging for the ytetl workspace.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Types**: the raw search payload ([`RawItem`]), the normalized
//!   [`Record`] row and query-list parsing
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use ytetl_common::types::parse_query_list;
//!
//! let queries = parse_query_list("kpop, music ,,hiphop").unwrap();
//! assert_eq!(queries, vec!["kpop", "music", "hiphop"]);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{RawItem, Record};

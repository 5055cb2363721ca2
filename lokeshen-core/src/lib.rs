//! Core database types for the Lokeshen spatial toolkit.
//!
//! The crate owns the value model shared by every layer, the statement
//! classifier that routes SQL to the right marshaling path, and the
//! [`DatabaseBridge`] seam with its SQLite implementation.
#![deny(unsafe_code)]

use camino::Utf8PathBuf;
use serde::Serialize;

mod bridge;
mod error;
mod statement;
pub mod store;
mod value;

#[doc(hidden)]
pub mod test_support;

pub use bridge::{DatabaseBridge, GeometryColumn, GeometryType, InitOptions, SpatialBackend};
pub use error::BridgeError;
pub use statement::{StatementKind, is_identifier, quote_identifier};
pub use store::{BUILTIN_ENGINE_VERSION, SqliteBridge, StoredGeometry};
pub use value::{Row, SqlValue};

/// Rows returned by a read statement.
///
/// # Examples
///
/// ```
/// use lokeshen_core::{QueryResult, Row, SqlValue};
///
/// let mut row = Row::new();
/// row.insert("ward".into(), SqlValue::from("Kilimani"));
/// let result = QueryResult::new(vec![row]);
/// assert!(result.success);
/// assert_eq!(result.row_count, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Always `true` for a returned value; failures surface as errors.
    pub success: bool,
    /// Number of rows in [`QueryResult::rows`].
    pub row_count: usize,
    /// One map per result row, keyed by lower-cased column name.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Wrap collected rows.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            rows,
        }
    }

    /// Consume the result and return the first row, if any.
    #[must_use]
    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatementResult {
    /// Always `true` for a returned value; failures surface as errors.
    pub success: bool,
    /// Rows inserted, updated or deleted by the statement.
    pub rows_affected: u64,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_id: i64,
}

/// Outcome of opening a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitResult {
    /// Always `true` for a returned value; failures surface as errors.
    pub success: bool,
    /// Opened path, or the `:memory:` sentinel.
    pub path: Utf8PathBuf,
    /// Version reported by the spatial engine; `None` when spatial support
    /// is disabled.
    pub spatialite_version: Option<String>,
}

/// Outcome of closing a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseResult {
    /// Always `true` for a returned value; failures surface as errors.
    pub success: bool,
    /// Human-readable description of what happened.
    pub message: String,
}

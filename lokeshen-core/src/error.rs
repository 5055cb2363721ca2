//! Errors raised by [`crate::DatabaseBridge`] implementations.

use std::io;

use camino::Utf8PathBuf;
use rusqlite::Error as SqliteError;
use thiserror::Error;

use crate::{SqlValue, StatementKind};

/// Failures surfaced by the native SQL adapter.
///
/// Engine diagnostics are wrapped together with the SQL and parameters that
/// produced them. A failed query or statement leaves the connection usable.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The parent directory of the database file could not be created.
    #[error("failed to create parent directory for {path:?}")]
    CreateDirectory {
        /// Database path whose parent was being created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path:?}")]
    DatabaseOpen {
        /// Location of the SQLite database on disk.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// The spatial extension could not be loaded or verified.
    #[error("spatial engine initialisation failed: {reason}")]
    EngineInit {
        /// Engine diagnostic text.
        reason: String,
    },
    /// `init_database` was called while a connection was still open.
    #[error("database {path:?} is still open; close it before opening another")]
    AlreadyOpen {
        /// Path of the connection that is still open.
        path: Utf8PathBuf,
    },
    /// An operation needed a connection but none was open.
    #[error("no database connection is open")]
    NoActiveConnection,
    /// The SQL text contained no statement.
    #[error("SQL statement is empty")]
    EmptyStatement,
    /// The SQL text held more than one statement.
    #[error("{operation} runs a single statement but {sql:?} contains several")]
    MultipleStatements {
        /// Bridge operation that rejected the SQL.
        operation: &'static str,
        /// Rejected SQL text.
        sql: String,
    },
    /// The SQL was routed to the wrong marshaling path.
    #[error("{operation} expects a {expected} statement but {sql:?} is a {found} statement")]
    StatementKindMismatch {
        /// Bridge operation that rejected the SQL.
        operation: &'static str,
        /// Kind the operation accepts.
        expected: StatementKind,
        /// Kind the classifier assigned.
        found: StatementKind,
        /// Rejected SQL text.
        sql: String,
    },
    /// The engine rejected a read statement.
    #[error("query failed: {source} (sql: {sql}; params: {params:?})")]
    QueryExecution {
        /// SQL text that failed.
        sql: String,
        /// Bound parameters in call order.
        params: Vec<SqlValue>,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// The engine rejected a write statement.
    #[error("statement failed: {source} (sql: {sql}; params: {params:?})")]
    StatementExecution {
        /// SQL text that failed.
        sql: String,
        /// Bound parameters in call order.
        params: Vec<SqlValue>,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A write was attempted on a read-only connection.
    #[error("database {path:?} was opened read-only; refusing {sql:?}")]
    ReadOnlyViolation {
        /// Path of the read-only database.
        path: Utf8PathBuf,
        /// Rejected SQL text or operation name.
        sql: String,
    },
    /// Closing the connection failed; the connection stays open.
    #[error("failed to close SQLite database at {path:?}")]
    Close {
        /// Path of the database that could not be closed.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Spatial metadata catalog maintenance failed.
    #[error("failed to {step}")]
    SpatialMetadata {
        /// Catalog step that failed.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A spatial function reported failure for a table column.
    #[error("{function} rejected {table}.{column}")]
    SpatialFunctionRejected {
        /// Spatial function that returned a failure code.
        function: &'static str,
        /// Table argument.
        table: String,
        /// Column argument.
        column: String,
    },
    /// The geometry column has not been registered in the spatial catalog.
    #[error("geometry column {table}.{column} is not registered in the spatial metadata catalog")]
    GeometryColumnNotRegistered {
        /// Table argument.
        table: String,
        /// Column argument.
        column: String,
    },
    /// A spatial operation was requested on a connection opened without
    /// spatial support.
    #[error("spatial support is disabled for {path:?}")]
    SpatialDisabled {
        /// Path of the connection.
        path: Utf8PathBuf,
    },
    /// A table, column or pragma name was not a bare identifier.
    #[error("{value:?} is not a valid SQL identifier")]
    InvalidIdentifier {
        /// Rejected name.
        value: String,
    },
}

//! `rusqlite` connection wrapper implementing the bridge primitives.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use lokeshen_fs::{ensure_parent_dir, is_memory_database};
use rusqlite::{Batch, Connection, OpenFlags, params_from_iter};

use crate::{
    BridgeError, CloseResult, DatabaseBridge, GeometryColumn, InitOptions, InitResult,
    QueryResult, Row, SpatialBackend, SqlValue, StatementKind, StatementResult,
};

use super::spatial;

struct OpenDatabase {
    connection: Connection,
    path: Utf8PathBuf,
    read_only: bool,
    spatial: SpatialBackend,
    metadata_initialised: bool,
}

/// Bridge over a single SQLite connection.
#[derive(Default)]
pub struct SqliteBridge {
    open: Option<OpenDatabase>,
}

impl fmt::Debug for SqliteBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SqliteBridge");
        if let Some(open) = &self.open {
            debug
                .field("path", &open.path)
                .field("read_only", &open.read_only)
                .field("spatial", &open.spatial)
                .field("metadata_initialised", &open.metadata_initialised);
        }
        debug.finish_non_exhaustive()
    }
}

impl SqliteBridge {
    /// Create a bridge with no open connection.
    #[must_use]
    pub const fn new() -> Self {
        Self { open: None }
    }

    /// Whether the open connection has a spatial metadata catalog.
    #[must_use]
    pub fn spatial_metadata_initialised(&self) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.metadata_initialised)
    }

    fn active(&mut self) -> Result<&mut OpenDatabase, BridgeError> {
        self.open.as_mut().ok_or(BridgeError::NoActiveConnection)
    }

    fn writable(&mut self, operation: &str) -> Result<&mut OpenDatabase, BridgeError> {
        let open = self.active()?;
        if open.read_only {
            return Err(BridgeError::ReadOnlyViolation {
                path: open.path.clone(),
                sql: operation.to_owned(),
            });
        }
        Ok(open)
    }
}

impl DatabaseBridge for SqliteBridge {
    fn init_database(
        &mut self,
        path: &Utf8Path,
        options: &InitOptions,
    ) -> Result<InitResult, BridgeError> {
        if let Some(open) = &self.open {
            return Err(BridgeError::AlreadyOpen {
                path: open.path.clone(),
            });
        }

        let connection = open_connection(path, options.read_only)?;
        spatial::attach(&connection, &options.spatial)?;
        let spatialite_version = spatial::probe_version(&connection, &options.spatial)?;
        let metadata_initialised = if options.read_only {
            spatial::metadata_present(&connection)?
        } else {
            spatial::ensure_metadata(&connection, &options.spatial)?
        };

        info!(
            "opened database at {path} (read_only: {}, spatial: {})",
            options.read_only,
            spatialite_version.as_deref().unwrap_or("disabled")
        );
        self.open = Some(OpenDatabase {
            connection,
            path: path.to_path_buf(),
            read_only: options.read_only,
            spatial: options.spatial.clone(),
            metadata_initialised,
        });

        Ok(InitResult {
            success: true,
            path: path.to_path_buf(),
            spatialite_version,
        })
    }

    fn spatialite_version(&mut self) -> Result<String, BridgeError> {
        let open = self.active()?;
        spatial::probe_version(&open.connection, &open.spatial)?.ok_or_else(|| {
            BridgeError::SpatialDisabled {
                path: open.path.clone(),
            }
        })
    }

    fn execute_query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult, BridgeError> {
        let open = self.active()?;
        expect_kind(sql, "execute_query", |kind| kind.returns_rows())?;
        ensure_single_statement(&open.connection, sql, "execute_query")?;
        let result =
            run_query(&open.connection, sql, params).map_err(|source| {
                BridgeError::QueryExecution {
                    sql: sql.to_owned(),
                    params: params.to_vec(),
                    source,
                }
            })?;
        debug!("query returned {} rows: {sql}", result.row_count);
        Ok(result)
    }

    fn execute_statement(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, BridgeError> {
        let open = self.active()?;
        let kind = expect_kind(sql, "execute_statement", |kind| !kind.returns_rows())?;
        ensure_single_statement(&open.connection, sql, "execute_statement")?;
        if open.read_only {
            return Err(BridgeError::ReadOnlyViolation {
                path: open.path.clone(),
                sql: sql.to_owned(),
            });
        }
        let result = run_statement(&mut open.connection, kind, sql, params).map_err(|source| {
            BridgeError::StatementExecution {
                sql: sql.to_owned(),
                params: params.to_vec(),
                source,
            }
        })?;
        debug!("statement changed {} rows: {sql}", result.rows_affected);
        Ok(result)
    }

    fn execute_pragma_query(&mut self, pragma: &str) -> Result<QueryResult, BridgeError> {
        let body = pragma_body(pragma)?;
        self.execute_query(&format!("PRAGMA {body}"), &[])
    }

    fn init_spatial_metadata(&mut self) -> Result<(), BridgeError> {
        let open = self.writable("init_spatial_metadata")?;
        if !open.spatial.is_enabled() {
            return Err(BridgeError::SpatialDisabled {
                path: open.path.clone(),
            });
        }
        open.metadata_initialised = spatial::ensure_metadata(&open.connection, &open.spatial)?;
        Ok(())
    }

    fn register_geometry_column(&mut self, column: &GeometryColumn) -> Result<(), BridgeError> {
        let open = self.writable("register_geometry_column")?;
        spatial::register_geometry_column(&mut open.connection, &open.spatial, &open.path, column)
    }

    fn create_spatial_index(&mut self, table: &str, column: &str) -> Result<(), BridgeError> {
        let open = self.writable("create_spatial_index")?;
        spatial::create_spatial_index(&open.connection, &open.spatial, &open.path, table, column)
    }

    fn close_database(&mut self) -> Result<CloseResult, BridgeError> {
        let Some(open) = self.open.take() else {
            return Ok(CloseResult {
                success: true,
                message: "no database was open".to_owned(),
            });
        };

        let OpenDatabase {
            connection,
            path,
            read_only,
            spatial,
            metadata_initialised,
        } = open;
        match connection.close() {
            Ok(()) => {
                info!("closed database at {path}");
                Ok(CloseResult {
                    success: true,
                    message: format!("closed {path}"),
                })
            }
            Err((connection, source)) => {
                warn!("closing {path} failed: {source}");
                self.open = Some(OpenDatabase {
                    connection,
                    path: path.clone(),
                    read_only,
                    spatial,
                    metadata_initialised,
                });
                Err(BridgeError::Close { path, source })
            }
        }
    }

    fn database_path(&self) -> Option<&Utf8Path> {
        self.open.as_ref().map(|open| open.path.as_path())
    }
}

fn open_connection(path: &Utf8Path, read_only: bool) -> Result<Connection, BridgeError> {
    let open_error = |source| BridgeError::DatabaseOpen {
        path: path.to_path_buf(),
        source,
    };

    let connection = if is_memory_database(path.as_str()) {
        Connection::open_in_memory().map_err(open_error)?
    } else {
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            ensure_parent_dir(path).map_err(|source| BridgeError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            })?;
            OpenFlags::default()
        };
        Connection::open_with_flags(path.as_std_path(), flags).map_err(open_error)?
    };

    // SQLite opens lazily; touch the schema so corrupt files fail here.
    connection
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(open_error)?;
    Ok(connection)
}

fn expect_kind(
    sql: &str,
    operation: &'static str,
    accepts: impl Fn(StatementKind) -> bool,
) -> Result<StatementKind, BridgeError> {
    let kind = StatementKind::classify(sql).ok_or(BridgeError::EmptyStatement)?;
    if accepts(kind) {
        return Ok(kind);
    }
    let expected = if kind.returns_rows() {
        StatementKind::Write
    } else {
        StatementKind::Query
    };
    Err(BridgeError::StatementKindMismatch {
        operation,
        expected,
        found: kind,
        sql: sql.to_owned(),
    })
}

/// Reject SQL whose tail holds a second statement.
///
/// Trailing semicolons and comments are fine. A first statement that does not
/// prepare is left for the execution path to report.
fn ensure_single_statement(
    connection: &Connection,
    sql: &str,
    operation: &'static str,
) -> Result<(), BridgeError> {
    let mut batch = Batch::new(connection, sql);
    if !matches!(batch.next(), Ok(Some(_))) {
        return Ok(());
    }
    match batch.next() {
        Ok(None) => Ok(()),
        // The tail may not prepare before the first statement has run.
        Ok(Some(_)) | Err(_) => Err(BridgeError::MultipleStatements {
            operation,
            sql: sql.to_owned(),
        }),
    }
}

fn pragma_body(pragma: &str) -> Result<&str, BridgeError> {
    let trimmed = pragma.trim().trim_end_matches(';').trim_end();
    let body = match trimmed.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PRAGMA") => trimmed.get(6..).unwrap_or(""),
        _ => trimmed,
    }
    .trim();

    if crate::statement::pragma_assigns(body) {
        return Err(BridgeError::StatementKindMismatch {
            operation: "execute_pragma_query",
            expected: StatementKind::Query,
            found: StatementKind::Control,
            sql: pragma.to_owned(),
        });
    }
    let name = body.split_once('(').map_or(body, |(name, _)| name).trim();
    let valid = !name.is_empty()
        && name
            .split('.')
            .all(crate::is_identifier);
    if !valid {
        return Err(BridgeError::InvalidIdentifier {
            value: pragma.to_owned(),
        });
    }
    Ok(body)
}

fn run_query(
    connection: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> rusqlite::Result<QueryResult> {
    let mut statement = connection.prepare(sql)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_lowercase)
        .collect();

    let mut rows = statement.query(params_from_iter(params.iter()))?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in columns.iter().enumerate() {
            record.insert(name.clone(), SqlValue::from_value_ref(row.get_ref(index)?));
        }
        collected.push(record);
    }
    Ok(QueryResult::new(collected))
}

fn run_statement(
    connection: &mut Connection,
    kind: StatementKind,
    sql: &str,
    params: &[SqlValue],
) -> rusqlite::Result<StatementResult> {
    if kind == StatementKind::Write && connection.is_autocommit() {
        let transaction = connection.transaction()?;
        let result = execute_and_count(&transaction, sql, params)?;
        transaction.commit()?;
        return Ok(result);
    }
    execute_and_count(connection, sql, params)
}

fn execute_and_count(
    connection: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> rusqlite::Result<StatementResult> {
    let before: i64 = connection.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    {
        let mut statement = connection.prepare(sql)?;
        let mut rows = statement.query(params_from_iter(params.iter()))?;
        while rows.next()?.is_some() {}
    }
    // `changes()` keeps the count of the last DML statement, so only trust it
    // when the running total moved.
    let (changes, after): (i64, i64) =
        connection.query_row("SELECT changes(), total_changes()", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    let rows_affected = if after > before {
        u64::try_from(changes).unwrap_or_default()
    } else {
        0
    };

    Ok(StatementResult {
        success: true,
        rows_affected,
        last_insert_id: connection.last_insert_rowid(),
    })
}

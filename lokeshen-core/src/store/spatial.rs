//! Spatial engine attachment and metadata catalog maintenance.

use camino::Utf8Path;
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{BridgeError, GeometryColumn, SpatialBackend, is_identifier};

use super::geometry;

const BUILTIN_CATALOG: &str = r#"
CREATE TABLE IF NOT EXISTS spatial_ref_sys (
    srid INTEGER NOT NULL PRIMARY KEY,
    auth_name TEXT NOT NULL,
    auth_srid INTEGER NOT NULL,
    ref_sys_name TEXT NOT NULL DEFAULT 'Unknown',
    proj4text TEXT NOT NULL,
    srtext TEXT NOT NULL DEFAULT 'Undefined'
);
INSERT OR IGNORE INTO spatial_ref_sys
    (srid, auth_name, auth_srid, ref_sys_name, proj4text, srtext)
VALUES
    (0, 'NONE', 0, 'Undefined - Cartesian', '', 'Undefined'),
    (4326, 'epsg', 4326, 'WGS 84', '+proj=longlat +datum=WGS84 +no_defs',
     'GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]]');
CREATE TABLE IF NOT EXISTS geometry_columns (
    f_table_name TEXT NOT NULL,
    f_geometry_column TEXT NOT NULL,
    geometry_type INTEGER NOT NULL,
    coord_dimension INTEGER NOT NULL,
    srid INTEGER NOT NULL REFERENCES spatial_ref_sys (srid),
    spatial_index_enabled INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (f_table_name, f_geometry_column)
);
"#;

/// Make the configured spatial functions available on `connection`.
pub(super) fn attach(connection: &Connection, backend: &SpatialBackend) -> Result<(), BridgeError> {
    match backend {
        SpatialBackend::Disabled => Ok(()),
        SpatialBackend::Builtin => {
            geometry::register_functions(connection).map_err(|err| BridgeError::EngineInit {
                reason: format!("registering geometry functions: {err}"),
            })
        }
        SpatialBackend::Extension { library } => load_extension(connection, library),
    }
}

#[expect(
    unsafe_code,
    reason = "SQLite extension loading runs arbitrary native code from the configured library"
)]
fn load_extension(connection: &Connection, library: &Utf8Path) -> Result<(), BridgeError> {
    let engine_error = |err: rusqlite::Error| BridgeError::EngineInit {
        reason: format!("loading {library}: {err}"),
    };
    // SAFETY: the library path comes from trusted configuration and loading
    // is disabled again straight after.
    let loaded = unsafe {
        connection
            .load_extension_enable()
            .and_then(|()| connection.load_extension(library.as_std_path(), None))
    };
    let disabled = connection.load_extension_disable();
    loaded.map_err(engine_error)?;
    disabled.map_err(engine_error)?;
    info!("loaded spatial extension {library}");
    Ok(())
}

/// Ask the engine for its version, `None` when spatial support is disabled.
pub(super) fn probe_version(
    connection: &Connection,
    backend: &SpatialBackend,
) -> Result<Option<String>, BridgeError> {
    if !backend.is_enabled() {
        return Ok(None);
    }
    connection
        .query_row("SELECT spatialite_version()", [], |row| row.get(0))
        .map(Some)
        .map_err(|err| BridgeError::EngineInit {
            reason: format!("spatialite_version() failed: {err}"),
        })
}

/// Whether the catalog tables exist.
pub(super) fn metadata_present(connection: &Connection) -> Result<bool, BridgeError> {
    let count: i64 = connection
        .query_row(
            "SELECT count(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('spatial_ref_sys', 'geometry_columns')",
            [],
            |row| row.get(0),
        )
        .map_err(|source| BridgeError::SpatialMetadata {
            step: "inspect spatial metadata",
            source,
        })?;
    Ok(count == 2)
}

/// Create the catalog when missing; returns whether one now exists.
pub(super) fn ensure_metadata(
    connection: &Connection,
    backend: &SpatialBackend,
) -> Result<bool, BridgeError> {
    match backend {
        SpatialBackend::Disabled => Ok(false),
        SpatialBackend::Builtin => {
            connection
                .execute_batch(BUILTIN_CATALOG)
                .map_err(|source| BridgeError::SpatialMetadata {
                    step: "create spatial metadata tables",
                    source,
                })?;
            Ok(true)
        }
        SpatialBackend::Extension { .. } => {
            if metadata_present(connection)? {
                debug!("spatial metadata already present");
                return Ok(true);
            }
            let created: i64 = connection
                .query_row("SELECT InitSpatialMetadata(1)", [], |row| row.get(0))
                .map_err(|source| BridgeError::SpatialMetadata {
                    step: "initialise spatial metadata",
                    source,
                })?;
            if created != 1 {
                return Err(BridgeError::SpatialFunctionRejected {
                    function: "InitSpatialMetadata",
                    table: "spatial_ref_sys".to_owned(),
                    column: "*".to_owned(),
                });
            }
            info!("initialised spatial metadata");
            Ok(true)
        }
    }
}

/// Register `column` in `geometry_columns`, adding the column when the
/// built-in backend needs it. Registering twice is a no-op.
pub(super) fn register_geometry_column(
    connection: &mut Connection,
    backend: &SpatialBackend,
    path: &Utf8Path,
    column: &GeometryColumn,
) -> Result<(), BridgeError> {
    validate(&column.table)?;
    validate(&column.column)?;
    if !backend.is_enabled() {
        return Err(BridgeError::SpatialDisabled {
            path: path.to_path_buf(),
        });
    }
    ensure_metadata(connection, backend)?;
    if is_registered(connection, &column.table, &column.column)? {
        debug!(
            "geometry column {}.{} already registered",
            column.table, column.column
        );
        return Ok(());
    }

    match backend {
        SpatialBackend::Extension { .. } => {
            let added: i64 = connection
                .query_row(
                    "SELECT AddGeometryColumn(?1, ?2, ?3, ?4, 'XY')",
                    params![
                        column.table,
                        column.column,
                        column.srid,
                        column.geometry_type.as_str()
                    ],
                    |row| row.get(0),
                )
                .map_err(|source| BridgeError::SpatialMetadata {
                    step: "add geometry column",
                    source,
                })?;
            if added != 1 {
                return Err(rejected("AddGeometryColumn", column));
            }
        }
        SpatialBackend::Builtin | SpatialBackend::Disabled => {
            register_builtin(connection, column)?;
        }
    }
    info!(
        "registered geometry column {}.{} ({}, srid {})",
        column.table,
        column.column,
        column.geometry_type.as_str(),
        column.srid
    );
    Ok(())
}

fn register_builtin(connection: &mut Connection, column: &GeometryColumn) -> Result<(), BridgeError> {
    let metadata = |source| BridgeError::SpatialMetadata {
        step: "add geometry column",
        source,
    };
    let savepoint = connection.savepoint().map_err(metadata)?;

    let table_exists: bool = savepoint
        .query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?1)",
            [&column.table],
            |row| row.get(0),
        )
        .map_err(metadata)?;
    if !table_exists {
        return Err(rejected("AddGeometryColumn", column));
    }

    let column_exists: bool = savepoint
        .query_row(
            "SELECT count(*) > 0 FROM pragma_table_info(?1) WHERE lower(name) = lower(?2)",
            [&column.table, &column.column],
            |row| row.get(0),
        )
        .map_err(metadata)?;
    if !column_exists {
        savepoint
            .execute(
                &format!(
                    "ALTER TABLE \"{}\" ADD COLUMN \"{}\" TEXT",
                    column.table, column.column
                ),
                [],
            )
            .map_err(metadata)?;
    }

    savepoint
        .execute(
            "INSERT INTO geometry_columns \
             (f_table_name, f_geometry_column, geometry_type, coord_dimension, srid) \
             VALUES (lower(?1), lower(?2), ?3, 2, ?4)",
            params![
                column.table,
                column.column,
                column.geometry_type.code(),
                column.srid
            ],
        )
        .map_err(metadata)?;
    savepoint.commit().map_err(metadata)
}

/// Build a spatial index over a registered geometry column.
pub(super) fn create_spatial_index(
    connection: &Connection,
    backend: &SpatialBackend,
    path: &Utf8Path,
    table: &str,
    column: &str,
) -> Result<(), BridgeError> {
    validate(table)?;
    validate(column)?;
    if !backend.is_enabled() {
        return Err(BridgeError::SpatialDisabled {
            path: path.to_path_buf(),
        });
    }
    if !metadata_present(connection)? || !is_registered(connection, table, column)? {
        return Err(BridgeError::GeometryColumnNotRegistered {
            table: table.to_owned(),
            column: column.to_owned(),
        });
    }

    let metadata = |source| BridgeError::SpatialMetadata {
        step: "create spatial index",
        source,
    };
    match backend {
        SpatialBackend::Extension { .. } => {
            let created: i64 = connection
                .query_row("SELECT CreateSpatialIndex(?1, ?2)", [table, column], |row| {
                    row.get(0)
                })
                .map_err(metadata)?;
            if created != 1 {
                return Err(BridgeError::SpatialFunctionRejected {
                    function: "CreateSpatialIndex",
                    table: table.to_owned(),
                    column: column.to_owned(),
                });
            }
        }
        SpatialBackend::Builtin | SpatialBackend::Disabled => {
            connection
                .execute(
                    "UPDATE geometry_columns SET spatial_index_enabled = 1 \
                     WHERE f_table_name = lower(?1) AND f_geometry_column = lower(?2)",
                    [table, column],
                )
                .map_err(metadata)?;
        }
    }
    info!("spatial index enabled for {table}.{column}");
    Ok(())
}

fn is_registered(connection: &Connection, table: &str, column: &str) -> Result<bool, BridgeError> {
    connection
        .query_row(
            "SELECT 1 FROM geometry_columns \
             WHERE lower(f_table_name) = lower(?1) AND lower(f_geometry_column) = lower(?2)",
            [table, column],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|source| BridgeError::SpatialMetadata {
            step: "look up geometry column",
            source,
        })
}

fn validate(name: &str) -> Result<(), BridgeError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(BridgeError::InvalidIdentifier {
            value: name.to_owned(),
        })
    }
}

fn rejected(function: &'static str, column: &GeometryColumn) -> BridgeError {
    BridgeError::SpatialFunctionRejected {
        function,
        table: column.table.clone(),
        column: column.column.clone(),
    }
}

//! Application schema: Kenyan ward boundaries and located notes.

use async_trait::async_trait;
use log::info;
use lokeshen_core::{GeometryColumn, GeometryType, SqlValue};

use crate::{DatabaseContext, InitHook, SessionError};

const CREATE_WARDS: &str = "CREATE TABLE IF NOT EXISTS kenya_wards (
    id INTEGER PRIMARY KEY,
    ward_code TEXT UNIQUE,
    ward TEXT NOT NULL,
    county TEXT,
    constituency TEXT,
    population INTEGER
)";

const CREATE_NOTES: &str = "CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT
)";

/// Geometry columns the schema registers, in creation order.
#[must_use]
pub fn geometry_columns() -> [GeometryColumn; 2] {
    [
        GeometryColumn::wgs84("kenya_wards", "geom", GeometryType::MultiPolygon),
        GeometryColumn::wgs84("notes", "location", GeometryType::Point),
    ]
}

/// Create the application tables, register their geometry columns and index
/// them. Safe to run on every start.
///
/// Geometry columns are left out of the table DDL because SpatiaLite's
/// `AddGeometryColumn` must create them itself.
pub async fn bootstrap_schema(context: &DatabaseContext) -> Result<(), SessionError> {
    context.init_spatial_metadata().await?;
    context.execute_statement(CREATE_WARDS, &[]).await?;
    context.execute_statement(CREATE_NOTES, &[]).await?;

    for column in geometry_columns() {
        let (table, name) = (column.table.clone(), column.column.clone());
        context.register_geometry_column(column).await?;
        if !spatial_index_enabled(context, &table, &name).await? {
            context.create_spatial_index(&table, &name).await?;
        }
    }
    info!("application schema is up to date");
    Ok(())
}

async fn spatial_index_enabled(
    context: &DatabaseContext,
    table: &str,
    column: &str,
) -> Result<bool, SessionError> {
    let result = context
        .execute_query(
            "SELECT spatial_index_enabled FROM geometry_columns \
             WHERE lower(f_table_name) = lower(?1) AND lower(f_geometry_column) = lower(?2)",
            &[table.into(), column.into()],
        )
        .await?;
    Ok(result
        .into_first()
        .and_then(|row| row.get("spatial_index_enabled").and_then(SqlValue::as_i64))
        .is_some_and(|enabled| enabled != 0))
}

/// [`InitHook`] running [`bootstrap_schema`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaBootstrap;

#[async_trait]
impl InitHook for SchemaBootstrap {
    async fn on_init(&self, context: &DatabaseContext) -> Result<(), SessionError> {
        bootstrap_schema(context).await
    }
}

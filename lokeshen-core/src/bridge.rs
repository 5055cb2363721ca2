//! The native SQL execution seam.

use camino::{Utf8Path, Utf8PathBuf};

use crate::{BridgeError, CloseResult, InitResult, QueryResult, SqlValue, StatementResult};

/// Spatial capabilities attached to a connection when it opens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpatialBackend {
    /// Plain SQLite without geometry functions.
    Disabled,
    /// Portable geometry functions implemented in Rust and registered on the
    /// connection, with a SpatiaLite-shaped metadata catalog.
    #[default]
    Builtin,
    /// Load a SpatiaLite build (for example `mod_spatialite`) as a runtime
    /// extension.
    Extension {
        /// Library name or path handed to SQLite's extension loader.
        library: Utf8PathBuf,
    },
}

impl SpatialBackend {
    /// Whether geometry functions are available.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Options applied by [`DatabaseBridge::init_database`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitOptions {
    /// Open without write access; writes fail with
    /// [`BridgeError::ReadOnlyViolation`].
    pub read_only: bool,
    /// Spatial capabilities to attach.
    pub spatial: SpatialBackend,
}

impl InitOptions {
    /// Options for a writable connection with the given spatial backend.
    #[must_use]
    pub const fn with_spatial(spatial: SpatialBackend) -> Self {
        Self {
            read_only: false,
            spatial,
        }
    }

    /// Set whether the connection is read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Geometry types understood by the spatial metadata catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    /// Any geometry.
    Geometry,
    /// A single point.
    Point,
    /// A single line string.
    LineString,
    /// A single polygon.
    Polygon,
    /// A collection of points.
    MultiPoint,
    /// A collection of line strings.
    MultiLineString,
    /// A collection of polygons.
    MultiPolygon,
}

impl GeometryType {
    /// Name used by SpatiaLite's `AddGeometryColumn`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "GEOMETRY",
            Self::Point => "POINT",
            Self::LineString => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLineString => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
        }
    }

    /// Numeric code stored in `geometry_columns.geometry_type`.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Geometry => 0,
            Self::Point => 1,
            Self::LineString => 2,
            Self::Polygon => 3,
            Self::MultiPoint => 4,
            Self::MultiLineString => 5,
            Self::MultiPolygon => 6,
        }
    }
}

/// A geometry column to register with the spatial metadata catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryColumn {
    /// Owning table.
    pub table: String,
    /// Column holding geometries.
    pub column: String,
    /// Spatial reference system identifier, e.g. 4326 for WGS84.
    pub srid: i32,
    /// Declared geometry type.
    pub geometry_type: GeometryType,
}

impl GeometryColumn {
    /// Describe a WGS84 geometry column.
    pub fn wgs84(
        table: impl Into<String>,
        column: impl Into<String>,
        geometry_type: GeometryType,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            srid: 4326,
            geometry_type,
        }
    }
}

/// Connect/query/execute/close primitives over a single engine connection.
///
/// Implementations own at most one open connection. Opening a second one
/// without closing the first is an error, and closing is always safe.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use lokeshen_core::{BridgeError, DatabaseBridge, InitOptions, SqlValue, SqliteBridge};
///
/// # fn main() -> Result<(), BridgeError> {
/// let mut bridge = SqliteBridge::new();
/// bridge.init_database(Utf8Path::new(":memory:"), &InitOptions::default())?;
/// bridge.execute_statement("CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT)", &[])?;
/// let inserted = bridge.execute_statement(
///     "INSERT INTO notes (title) VALUES (?)",
///     &[SqlValue::from("Uhuru Park")],
/// )?;
/// assert_eq!(inserted.rows_affected, 1);
///
/// let result = bridge.execute_query("SELECT title AS Title FROM notes", &[])?;
/// assert_eq!(result.rows[0]["title"], SqlValue::from("Uhuru Park"));
/// bridge.close_database()?;
/// # Ok(())
/// # }
/// ```
pub trait DatabaseBridge: Send {
    /// Open (creating if absent) the database at `path`, or an in-memory
    /// database for `:memory:`.
    fn init_database(
        &mut self,
        path: &Utf8Path,
        options: &InitOptions,
    ) -> Result<InitResult, BridgeError>;

    /// Version string reported by the spatial engine.
    fn spatialite_version(&mut self) -> Result<String, BridgeError>;

    /// Run a read statement, binding `params` positionally.
    fn execute_query(&mut self, sql: &str, params: &[SqlValue])
    -> Result<QueryResult, BridgeError>;

    /// Run a write statement, binding `params` positionally.
    fn execute_statement(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, BridgeError>;

    /// Read a pragma such as `journal_mode` or `table_info(notes)`.
    fn execute_pragma_query(&mut self, pragma: &str) -> Result<QueryResult, BridgeError>;

    /// Create the spatial metadata catalog if it is missing.
    fn init_spatial_metadata(&mut self) -> Result<(), BridgeError>;

    /// Register a geometry column with the spatial metadata catalog.
    fn register_geometry_column(&mut self, column: &GeometryColumn) -> Result<(), BridgeError>;

    /// Create a spatial index over a registered geometry column.
    fn create_spatial_index(&mut self, table: &str, column: &str) -> Result<(), BridgeError>;

    /// Release the connection. Calling this with nothing open succeeds.
    fn close_database(&mut self) -> Result<CloseResult, BridgeError>;

    /// Path of the open connection, if any.
    fn database_path(&self) -> Option<&Utf8Path>;

    /// Whether a connection is open.
    fn is_open(&self) -> bool {
        self.database_path().is_some()
    }
}

//! Test doubles and fixtures shared by unit and behaviour tests.

use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    BridgeError, CloseResult, DatabaseBridge, GeometryColumn, InitOptions, InitResult,
    QueryResult, SqlValue, SqliteBridge, StatementResult,
};

/// Ward boundaries around central Nairobi as `(name, GeoJSON)` pairs.
///
/// The wards are axis-aligned boxes: `Nairobi Central` and `Kilimani` share
/// an edge, `Karura` is disjoint from both. [`NAIROBI_CBD`] lies inside
/// `Nairobi Central` only.
pub const WARD_FIXTURES: [(&str, &str); 3] = [
    (
        "Nairobi Central",
        r#"{"type":"MultiPolygon","coordinates":[[[[36.80,-1.30],[36.83,-1.30],[36.83,-1.27],[36.80,-1.27],[36.80,-1.30]]]]}"#,
    ),
    (
        "Kilimani",
        r#"{"type":"MultiPolygon","coordinates":[[[[36.77,-1.31],[36.80,-1.31],[36.80,-1.28],[36.77,-1.28],[36.77,-1.31]]]]}"#,
    ),
    (
        "Karura",
        r#"{"type":"MultiPolygon","coordinates":[[[[36.82,-1.25],[36.86,-1.25],[36.86,-1.22],[36.82,-1.22],[36.82,-1.25]]]]}"#,
    ),
];

/// Longitude and latitude of the Nairobi central business district.
pub const NAIROBI_CBD: (f64, f64) = (36.817_223, -1.286_389);

/// Calls observed by [`RecordingBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    /// `init_database` for the given path.
    Init(Utf8PathBuf),
    /// `close_database`, whether or not anything was open.
    Close,
}

/// Shared log of bridge calls, readable after the bridge has been moved.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BridgeCall>>>);

impl CallLog {
    fn push(&self, call: BridgeCall) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BridgeCall> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `init_database` calls minus `close_database` calls that
    /// released a connection.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.calls().iter().fold(0, |open, call| match call {
            BridgeCall::Init(_) => open + 1,
            BridgeCall::Close => open.saturating_sub(1),
        })
    }
}

/// [`SqliteBridge`] wrapper that records lifecycle calls.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    inner: SqliteBridge,
    log: CallLog,
}

impl RecordingBridge {
    /// Create a bridge and the log it writes to.
    #[must_use]
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                inner: SqliteBridge::new(),
                log: log.clone(),
            },
            log,
        )
    }
}

impl DatabaseBridge for RecordingBridge {
    fn init_database(
        &mut self,
        path: &Utf8Path,
        options: &InitOptions,
    ) -> Result<InitResult, BridgeError> {
        let result = self.inner.init_database(path, options)?;
        self.log.push(BridgeCall::Init(path.to_path_buf()));
        Ok(result)
    }

    fn spatialite_version(&mut self) -> Result<String, BridgeError> {
        self.inner.spatialite_version()
    }

    fn execute_query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult, BridgeError> {
        self.inner.execute_query(sql, params)
    }

    fn execute_statement(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, BridgeError> {
        self.inner.execute_statement(sql, params)
    }

    fn execute_pragma_query(&mut self, pragma: &str) -> Result<QueryResult, BridgeError> {
        self.inner.execute_pragma_query(pragma)
    }

    fn init_spatial_metadata(&mut self) -> Result<(), BridgeError> {
        self.inner.init_spatial_metadata()
    }

    fn register_geometry_column(&mut self, column: &GeometryColumn) -> Result<(), BridgeError> {
        self.inner.register_geometry_column(column)
    }

    fn create_spatial_index(&mut self, table: &str, column: &str) -> Result<(), BridgeError> {
        self.inner.create_spatial_index(table, column)
    }

    fn close_database(&mut self) -> Result<CloseResult, BridgeError> {
        let was_open = self.inner.is_open();
        let result = self.inner.close_database()?;
        if was_open {
            self.log.push(BridgeCall::Close);
        }
        Ok(result)
    }

    fn database_path(&self) -> Option<&Utf8Path> {
        self.inner.database_path()
    }
}

/// Bridge whose engine never initialises.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingBridge;

impl DatabaseBridge for FailingBridge {
    fn init_database(
        &mut self,
        _path: &Utf8Path,
        _options: &InitOptions,
    ) -> Result<InitResult, BridgeError> {
        Err(BridgeError::EngineInit {
            reason: "engine unavailable".to_owned(),
        })
    }

    fn spatialite_version(&mut self) -> Result<String, BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn execute_query(
        &mut self,
        _sql: &str,
        _params: &[SqlValue],
    ) -> Result<QueryResult, BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn execute_statement(
        &mut self,
        _sql: &str,
        _params: &[SqlValue],
    ) -> Result<StatementResult, BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn execute_pragma_query(&mut self, _pragma: &str) -> Result<QueryResult, BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn init_spatial_metadata(&mut self) -> Result<(), BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn register_geometry_column(&mut self, _column: &GeometryColumn) -> Result<(), BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn create_spatial_index(&mut self, _table: &str, _column: &str) -> Result<(), BridgeError> {
        Err(BridgeError::NoActiveConnection)
    }

    fn close_database(&mut self) -> Result<CloseResult, BridgeError> {
        Ok(CloseResult {
            success: true,
            message: "no database was open".to_owned(),
        })
    }

    fn database_path(&self) -> Option<&Utf8Path> {
        None
    }
}

/// Create `kenya_wards` on `bridge` and load [`WARD_FIXTURES`].
pub fn seed_wards(bridge: &mut dyn DatabaseBridge) -> Result<(), BridgeError> {
    bridge.execute_statement(
        "CREATE TABLE IF NOT EXISTS kenya_wards (id INTEGER PRIMARY KEY, ward TEXT NOT NULL)",
        &[],
    )?;
    bridge.register_geometry_column(&GeometryColumn::wgs84(
        "kenya_wards",
        "geom",
        crate::GeometryType::MultiPolygon,
    ))?;
    for (ward, geojson) in WARD_FIXTURES {
        bridge.execute_statement(
            "INSERT INTO kenya_wards (ward, geom) VALUES (?1, GeomFromGeoJSON(?2, 4326))",
            &[ward.into(), geojson.into()],
        )?;
    }
    Ok(())
}

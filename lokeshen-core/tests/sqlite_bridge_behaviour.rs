//! Behavioural tests for `SqliteBridge` using rstest-bdd.

use std::cell::RefCell;

use camino::Utf8PathBuf;
use lokeshen_core::{
    BridgeError, DatabaseBridge, InitOptions, QueryResult, SqlValue, SqliteBridge,
    test_support::{NAIROBI_CBD, seed_wards},
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

/// Shared state for bridge scenarios.
struct BridgeWorld {
    temp_dir: TempDir,
    bridge: RefCell<SqliteBridge>,
    error: RefCell<Option<BridgeError>>,
    srid_rows: RefCell<Option<QueryResult>>,
    contained: RefCell<Vec<String>>,
    nearby: RefCell<Vec<String>>,
}

impl BridgeWorld {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
            bridge: RefCell::new(SqliteBridge::new()),
            error: RefCell::new(None),
            srid_rows: RefCell::new(None),
            contained: RefCell::new(Vec::new()),
            nearby: RefCell::new(Vec::new()),
        }
    }

    fn database_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.temp_dir.path().join("nested/lokeshen.db"))
            .expect("temp dir should be UTF-8")
    }

    fn srid_catalog(&self) -> QueryResult {
        self.bridge
            .borrow_mut()
            .execute_query("SELECT srid, ref_sys_name FROM spatial_ref_sys ORDER BY srid", &[])
            .expect("read spatial_ref_sys")
    }

    fn ward_names(&self, sql: &str) -> Vec<String> {
        let (lon, lat) = NAIROBI_CBD;
        let result = self
            .bridge
            .borrow_mut()
            .execute_query(sql, &[lon.into(), lat.into()])
            .expect("spatial query should succeed");
        result
            .rows
            .iter()
            .filter_map(|row| row.get("ward").and_then(SqlValue::as_str).map(str::to_owned))
            .collect()
    }
}

#[fixture]
fn world() -> BridgeWorld {
    BridgeWorld::new()
}

#[given("a fresh SQLite bridge")]
fn given_fresh_bridge(world: &BridgeWorld) {
    assert!(!world.bridge.borrow().is_open());
}

#[given("a bridge opened on a file database")]
fn given_open_bridge(world: &BridgeWorld) {
    let path = world.database_path();
    let result = world
        .bridge
        .borrow_mut()
        .init_database(&path, &InitOptions::default())
        .expect("open file database");
    assert!(result.success);
    assert!(result.spatialite_version.is_some());
    world.srid_rows.replace(Some(world.srid_catalog()));
}

#[given("the Nairobi ward fixtures are loaded")]
fn given_wards(world: &BridgeWorld) {
    seed_wards(&mut *world.bridge.borrow_mut()).expect("seed ward fixtures");
}

#[when("I run a query without opening a database")]
fn when_query_unopened(world: &BridgeWorld) {
    let err = world
        .bridge
        .borrow_mut()
        .execute_query("SELECT 1", &[])
        .expect_err("query should fail");
    world.error.replace(Some(err));
}

#[when("I initialise the spatial metadata again")]
fn when_reinit_metadata(world: &BridgeWorld) {
    world
        .bridge
        .borrow_mut()
        .init_spatial_metadata()
        .expect("re-initialising metadata should succeed");
}

#[when("I run a statement against a missing table")]
fn when_bad_statement(world: &BridgeWorld) {
    let err = world
        .bridge
        .borrow_mut()
        .execute_statement("INSERT INTO missing_table (id) VALUES (?)", &[1.into()])
        .expect_err("statement should fail");
    world.error.replace(Some(err));
}

#[when("I look up the ward containing the Nairobi CBD")]
fn when_containment(world: &BridgeWorld) {
    let wards = world.ward_names(
        "SELECT ward FROM kenya_wards WHERE ST_Contains(geom, MakePoint(?1, ?2, 4326))",
    );
    world.contained.replace(wards);
}

#[when("I search for wards within zero distance of the Nairobi CBD")]
fn when_zero_distance(world: &BridgeWorld) {
    let wards = world.ward_names(
        "SELECT ward FROM kenya_wards WHERE PtDistWithin(geom, MakePoint(?1, ?2, 4326), 0)",
    );
    world.nearby.replace(wards);
}

#[then("the bridge reports that no connection is open")]
fn then_no_connection(world: &BridgeWorld) {
    let error = world.error.borrow();
    assert!(matches!(
        error.as_ref(),
        Some(BridgeError::NoActiveConnection)
    ));
}

#[then("the spatial reference catalog is unchanged")]
fn then_catalog_unchanged(world: &BridgeWorld) {
    let before = world
        .srid_rows
        .borrow()
        .clone()
        .expect("catalog snapshot taken when opening");
    assert_eq!(world.srid_catalog(), before);
}

#[then("the statement error names the SQL")]
fn then_error_has_context(world: &BridgeWorld) {
    let error = world.error.borrow();
    match error.as_ref() {
        Some(BridgeError::StatementExecution { sql, params, .. }) => {
            assert!(sql.contains("missing_table"));
            assert_eq!(params, &vec![SqlValue::Integer(1)]);
        }
        other => panic!("expected a statement error, got {other:?}"),
    }
}

#[then("a follow-up query still succeeds")]
fn then_connection_usable(world: &BridgeWorld) {
    let result = world
        .bridge
        .borrow_mut()
        .execute_query("SELECT 1 AS one", &[])
        .expect("connection should remain usable");
    assert_eq!(result.rows[0]["one"], SqlValue::Integer(1));
}

#[then("both lookups return only Nairobi Central")]
fn then_single_ward(world: &BridgeWorld) {
    let expected = vec!["Nairobi Central".to_owned()];
    assert_eq!(*world.contained.borrow(), expected);
    assert_eq!(*world.nearby.borrow(), expected);
}

#[scenario(path = "tests/features/sqlite_bridge.feature", index = 0)]
fn query_before_open(world: BridgeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_bridge.feature", index = 1)]
fn metadata_is_idempotent(world: BridgeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_bridge.feature", index = 2)]
fn failed_statement_keeps_connection(world: BridgeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_bridge.feature", index = 3)]
fn containment_matches_zero_distance(world: BridgeWorld) {
    let _ = world;
}

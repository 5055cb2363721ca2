//! Behaviour-driven step definitions driving the CLI command scenarios.

use super::helpers::{Workspace, output_json};
use super::*;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

/// Aggregates CLI scenario state so each step only needs a single world
/// argument.
struct CommandWorld {
    workspace: Workspace,
    outcome: RefCell<Option<Result<serde_json::Value, CliError>>>,
}

impl CommandWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            outcome: RefCell::new(None),
        }
    }

    fn base_dir(&self) -> String {
        self.workspace.root().as_str().to_owned()
    }

    /// Parse `argv` as a `lokeshen` invocation and run it without layering
    /// configuration files or environment variables.
    fn invoke(&self, argv: &[&str]) {
        let mut invocation = vec!["lokeshen".to_owned()];
        invocation.extend(argv.iter().map(|arg| (*arg).to_owned()));
        let mut output = Vec::new();
        let outcome = Cli::try_parse_from(invocation)
            .map_err(CliError::ArgumentParsing)
            .and_then(|cli| match cli.command {
                Command::Query(args) => {
                    crate::sql::execute_query(&args.try_into()?, &mut output)
                }
                Command::Exec(args) => {
                    crate::sql::execute_statement(&args.try_into()?, &mut output)
                }
                Command::Import(args) => {
                    crate::import::execute_import(&args.try_into()?, &mut output)
                }
                Command::Bootstrap(args) => {
                    let report = crate::bootstrap::execute_bootstrap(&args.try_into()?)?;
                    write_json(&mut output, &report)
                }
            })
            .map(|()| output_json(&output));
        self.outcome.replace(Some(outcome));
    }

    fn json(&self) -> serde_json::Value {
        self.outcome
            .borrow()
            .as_ref()
            .expect("command ran")
            .as_ref()
            .expect("command should succeed")
            .clone()
    }
}

#[fixture]
fn world() -> CommandWorld {
    CommandWorld::new()
}

#[given("a ward database on disk")]
fn ward_database(#[from(world)] world: &CommandWorld) {
    let path = world.workspace.target("wards.db").path();
    world.workspace.seed_wards_at(&path);
}

#[when("I run the query command for wards containing the CBD")]
fn query_cbd(#[from(world)] world: &CommandWorld) {
    let (lon, lat) = lokeshen_core::test_support::NAIROBI_CBD;
    let params = format!("[{lon}, {lat}]");
    let base_dir = world.base_dir();
    world.invoke(&[
        "query",
        "SELECT ward FROM kenya_wards WHERE ST_Contains(geom, MakePoint(?, ?, 4326))",
        "--database",
        "wards.db",
        "--base-dir",
        &base_dir,
        "--params",
        &params,
    ]);
}

#[when("I run the query command without a database name")]
fn query_without_database(#[from(world)] world: &CommandWorld) {
    world.invoke(&["query", "SELECT 1"]);
}

#[when("I run the exec command deleting every ward except Karura")]
fn exec_delete(#[from(world)] world: &CommandWorld) {
    let base_dir = world.base_dir();
    world.invoke(&[
        "exec",
        "DELETE FROM kenya_wards WHERE ward <> ?",
        "--database",
        "wards.db",
        "--base-dir",
        &base_dir,
        "--params",
        r#"["Karura"]"#,
    ]);
}

#[when("I run the bootstrap command for a new database")]
fn bootstrap_new(#[from(world)] world: &CommandWorld) {
    let base_dir = world.base_dir();
    world.invoke(&[
        "bootstrap",
        "--database",
        "app.db",
        "--directory",
        "SQLite",
        "--base-dir",
        &base_dir,
    ]);
}

#[then("the command prints only the \"Nairobi Central\" ward")]
fn prints_cbd_ward(#[from(world)] world: &CommandWorld) {
    let json = world.json();
    assert_eq!(json["row_count"], serde_json::json!(1));
    assert_eq!(json["rows"][0]["ward"], serde_json::json!("Nairobi Central"));
}

#[then("the CLI reports that the \"database\" flag is missing")]
fn reports_missing_database(#[from(world)] world: &CommandWorld) {
    let borrowed = world.outcome.borrow();
    let error = borrowed
        .as_ref()
        .expect("command ran")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingArgument { field, .. } => assert_eq!(*field, ARG_DATABASE),
        other => panic!("unexpected error {other:?}"),
    }
}

#[then("the command reports 2 affected rows")]
fn reports_two_rows(#[from(world)] world: &CommandWorld) {
    assert_eq!(world.json()["rows_affected"], serde_json::json!(2));
}

#[then("the command lists geometry columns for \"kenya_wards\" and \"notes\"")]
fn lists_geometry_columns(#[from(world)] world: &CommandWorld) {
    let json = world.json();
    let tables: Vec<_> = json["geometry_columns"]
        .as_array()
        .expect("geometry columns array")
        .iter()
        .map(|row| row["f_table_name"].clone())
        .collect();
    assert_eq!(
        tables,
        vec![serde_json::json!("kenya_wards"), serde_json::json!("notes")]
    );
    assert_eq!(
        json["path"],
        serde_json::json!(world.workspace.root().join("SQLite/app.db").as_str())
    );
}

macro_rules! register_command_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/cli_commands.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CommandWorld) {
            let _ = world;
        }
    };
}

register_command_scenario!(querying_wards, "querying wards that contain a point");
register_command_scenario!(rejecting_missing_database, "rejecting a query without a database");
register_command_scenario!(executing_writes, "executing a write statement");
register_command_scenario!(bootstrapping_schema, "bootstrapping a fresh database");

//! `query` and `exec` command implementations.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use lokeshen_core::{DatabaseBridge, SqlValue};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::database::DatabaseTarget;
use crate::{
    ARG_BASE_DIR, ARG_DATABASE, ARG_DIRECTORY, ARG_PARAMS, ARG_SPATIALITE, ARG_SQL, CliError,
    ENV_EXEC_DATABASE, ENV_EXEC_SQL, ENV_QUERY_DATABASE, ENV_QUERY_SQL, write_json,
};

/// CLI arguments for the `query` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "query",
    about = "Run a read statement",
    long_about = "Run a read statement against a database opened read-only \
                 and print the rows as JSON. Positional parameters are \
                 passed as a JSON array with --params."
)]
#[ortho_config(prefix = "LOKESHEN")]
pub(crate) struct QueryArgs {
    /// SQL text to run.
    #[arg(value_name = "sql")]
    #[serde(default)]
    pub(crate) sql: Option<String>,
    /// Logical database name, or `:memory:`.
    #[arg(long = ARG_DATABASE, value_name = "name")]
    #[serde(default)]
    pub(crate) database: Option<String>,
    /// Subdirectory of the base directory holding the database.
    #[arg(long = ARG_DIRECTORY, value_name = "dir")]
    #[serde(default)]
    pub(crate) directory: Option<String>,
    /// Base directory databases live under (default: current directory).
    #[arg(long = ARG_BASE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) base_dir: Option<Utf8PathBuf>,
    /// SpatiaLite library to load instead of the built-in geometry functions.
    #[arg(long = ARG_SPATIALITE, value_name = "library")]
    #[serde(default)]
    pub(crate) spatialite: Option<Utf8PathBuf>,
    /// JSON array of positional parameters, e.g. `[36.8, -1.29]`.
    #[arg(long = ARG_PARAMS, value_name = "json")]
    #[serde(default)]
    pub(crate) params: Option<String>,
}

/// CLI arguments for the `exec` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "exec",
    about = "Run a write statement",
    long_about = "Run a write or control statement and print the number of \
                 affected rows and the last inserted rowid as JSON."
)]
#[ortho_config(prefix = "LOKESHEN")]
pub(crate) struct ExecArgs {
    /// SQL text to run.
    #[arg(value_name = "sql")]
    #[serde(default)]
    pub(crate) sql: Option<String>,
    /// Logical database name, or `:memory:`.
    #[arg(long = ARG_DATABASE, value_name = "name")]
    #[serde(default)]
    pub(crate) database: Option<String>,
    /// Subdirectory of the base directory holding the database.
    #[arg(long = ARG_DIRECTORY, value_name = "dir")]
    #[serde(default)]
    pub(crate) directory: Option<String>,
    /// Base directory databases live under (default: current directory).
    #[arg(long = ARG_BASE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) base_dir: Option<Utf8PathBuf>,
    /// SpatiaLite library to load instead of the built-in geometry functions.
    #[arg(long = ARG_SPATIALITE, value_name = "library")]
    #[serde(default)]
    pub(crate) spatialite: Option<Utf8PathBuf>,
    /// JSON array of positional parameters.
    #[arg(long = ARG_PARAMS, value_name = "json")]
    #[serde(default)]
    pub(crate) params: Option<String>,
}

/// Resolved configuration for `query` and `exec`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SqlConfig {
    pub(crate) target: DatabaseTarget,
    pub(crate) sql: String,
    pub(crate) params: Vec<SqlValue>,
}

impl TryFrom<QueryArgs> for SqlConfig {
    type Error = CliError;

    fn try_from(args: QueryArgs) -> Result<Self, Self::Error> {
        let sql = args.sql.ok_or(CliError::MissingArgument {
            field: ARG_SQL,
            env: ENV_QUERY_SQL,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_QUERY_DATABASE,
        })?;
        Ok(Self {
            target: DatabaseTarget::new(database, args.directory, args.base_dir, args.spatialite),
            sql,
            params: parse_params(args.params.as_deref())?,
        })
    }
}

impl TryFrom<ExecArgs> for SqlConfig {
    type Error = CliError;

    fn try_from(args: ExecArgs) -> Result<Self, Self::Error> {
        let sql = args.sql.ok_or(CliError::MissingArgument {
            field: ARG_SQL,
            env: ENV_EXEC_SQL,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_EXEC_DATABASE,
        })?;
        Ok(Self {
            target: DatabaseTarget::new(database, args.directory, args.base_dir, args.spatialite),
            sql,
            params: parse_params(args.params.as_deref())?,
        })
    }
}

/// Decode a JSON array of scalars into bound parameters.
pub(crate) fn parse_params(raw: Option<&str>) -> Result<Vec<SqlValue>, CliError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|err| CliError::InvalidParams {
            reason: err.to_string(),
        })?;
    values
        .iter()
        .map(|value| {
            SqlValue::from_json(value).ok_or_else(|| CliError::InvalidParams {
                reason: format!("{value} is not a scalar"),
            })
        })
        .collect()
}

pub(crate) fn run_query(args: QueryArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = SqlConfig::try_from(merged)?;
    execute_query(&config, writer)
}

pub(crate) fn run_exec(args: ExecArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = SqlConfig::try_from(merged)?;
    execute_statement(&config, writer)
}

pub(crate) fn execute_query(config: &SqlConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    let mut bridge = config.target.open(true)?;
    let result = bridge.execute_query(&config.sql, &config.params)?;
    bridge.close_database()?;
    write_json(writer, &result)
}

pub(crate) fn execute_statement(
    config: &SqlConfig,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let mut bridge = config.target.open(false)?;
    let result = bridge.execute_statement(&config.sql, &config.params)?;
    bridge.close_database()?;
    write_json(writer, &result)
}

#[cfg(test)]
pub(crate) fn query_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<SqlConfig, CliError> {
    let merged = QueryArgs::merge_from_layers(layers).map_err(CliError::from)?;
    SqlConfig::try_from(merged)
}

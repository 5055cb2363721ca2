//! Command-line interface for inspecting and preparing Lokeshen databases.
#![forbid(unsafe_code)]

use std::io::Write;

use clap::{Parser, Subcommand};
use serde::Serialize;

mod bootstrap;
mod database;
mod error;
mod import;
mod sql;

pub use error::CliError;

use bootstrap::{BootstrapArgs, run_bootstrap};
use import::{ImportArgs, run_import};
use sql::{ExecArgs, QueryArgs, run_exec, run_query};

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_DIRECTORY: &str = "directory";
pub(crate) const ARG_BASE_DIR: &str = "base-dir";
pub(crate) const ARG_SPATIALITE: &str = "spatialite";
pub(crate) const ARG_PARAMS: &str = "params";
pub(crate) const ARG_SQL: &str = "sql";
pub(crate) const ARG_ASSET: &str = "asset";
pub(crate) const ARG_FORCE: &str = "force";

pub(crate) const ENV_QUERY_DATABASE: &str = "LOKESHEN_CMDS_QUERY_DATABASE";
pub(crate) const ENV_QUERY_SQL: &str = "LOKESHEN_CMDS_QUERY_SQL";
pub(crate) const ENV_EXEC_DATABASE: &str = "LOKESHEN_CMDS_EXEC_DATABASE";
pub(crate) const ENV_EXEC_SQL: &str = "LOKESHEN_CMDS_EXEC_SQL";
pub(crate) const ENV_IMPORT_DATABASE: &str = "LOKESHEN_CMDS_IMPORT_DATABASE";
pub(crate) const ENV_IMPORT_ASSET: &str = "LOKESHEN_CMDS_IMPORT_ASSET";
pub(crate) const ENV_BOOTSTRAP_DATABASE: &str = "LOKESHEN_CMDS_BOOTSTRAP_DATABASE";

/// Run the Lokeshen CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    dispatch(cli.command, &mut stdout)
}

fn dispatch(command: Command, writer: &mut dyn Write) -> Result<(), CliError> {
    match command {
        Command::Query(args) => run_query(args, writer),
        Command::Exec(args) => run_exec(args, writer),
        Command::Import(args) => run_import(args, writer),
        Command::Bootstrap(args) => run_bootstrap(args, writer),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "lokeshen",
    about = "Query, seed and bootstrap Lokeshen spatial databases",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a read statement and print its rows as JSON.
    Query(QueryArgs),
    /// Run a write statement and print the change count as JSON.
    Exec(ExecArgs),
    /// Seed a database file from a bundled asset.
    Import(ImportArgs),
    /// Create the ward and note schema with its geometry columns.
    Bootstrap(BootstrapArgs),
}

/// Pretty-print `value` as JSON followed by a newline.
pub(crate) fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerialiseOutput)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;

//! `bootstrap` command: create the application schema through a session.

use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use lokeshen_core::Row;
use lokeshen_data::{DatabaseProvider, SchemaBootstrap};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tokio::runtime::Builder;

use crate::database::DatabaseTarget;
use crate::{
    ARG_BASE_DIR, ARG_DATABASE, ARG_DIRECTORY, ARG_SPATIALITE, CliError, ENV_BOOTSTRAP_DATABASE,
    write_json,
};

/// CLI arguments for the `bootstrap` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "bootstrap",
    about = "Create the ward and note schema",
    long_about = "Mount a database session whose init hook creates the \
                 kenya_wards and notes tables, registers their geometry \
                 columns and enables spatial indexes. Safe to repeat."
)]
#[ortho_config(prefix = "LOKESHEN")]
pub(crate) struct BootstrapArgs {
    /// Logical database name.
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
}

impl TryFrom<BootstrapArgs> for DatabaseTarget {
    type Error = CliError;

    fn try_from(args: BootstrapArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_BOOTSTRAP_DATABASE,
        })?;
        Ok(Self::new(
            database,
            args.directory,
            args.base_dir,
            args.spatialite,
        ))
    }
}

/// Printed summary of a bootstrapped database.
#[derive(Debug, Serialize)]
pub(crate) struct BootstrapReport {
    pub(crate) path: Utf8PathBuf,
    pub(crate) spatialite_version: String,
    pub(crate) geometry_columns: Vec<Row>,
}

pub(crate) fn run_bootstrap(args: BootstrapArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let target = DatabaseTarget::try_from(merged)?;
    let report = execute_bootstrap(&target)?;
    write_json(writer, &report)
}

pub(crate) fn execute_bootstrap(target: &DatabaseTarget) -> Result<BootstrapReport, CliError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(async {
        let mut builder = DatabaseProvider::builder(target.name.clone())
            .base_directory(target.base_dir.clone())
            .spatial(target.spatial.clone())
            .on_init(Arc::new(SchemaBootstrap));
        if let Some(directory) = &target.directory {
            builder = builder.location(directory.clone());
        }
        let provider = builder.build()?;
        provider.mount().await?;
        let context = provider.context()?;
        let spatialite_version = context.spatialite_version().await?;
        let geometry_columns = context
            .execute_query(
                "SELECT f_table_name, f_geometry_column, geometry_type, srid, \
                 spatial_index_enabled FROM geometry_columns ORDER BY f_table_name",
                &[],
            )
            .await?
            .rows;
        provider.unmount().await?;
        Ok::<_, CliError>(BootstrapReport {
            path: provider.database_path().await,
            spatialite_version,
            geometry_columns,
        })
    })
}

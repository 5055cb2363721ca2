//! `import` command: seed a writable database from a bundled file.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use lokeshen_fs::{AssetDatabaseSource, BundleResolver, import_database_from_asset};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::database::DatabaseTarget;
use crate::{
    ARG_ASSET, ARG_BASE_DIR, ARG_DATABASE, ARG_DIRECTORY, ARG_FORCE, CliError,
    ENV_IMPORT_ASSET, ENV_IMPORT_DATABASE, write_json,
};

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "import",
    about = "Seed a database from a bundled asset",
    long_about = "Copy a bundled SQLite file into the writable database \
                 location. An existing database is kept unless --force is \
                 given."
)]
#[ortho_config(prefix = "LOKESHEN")]
pub(crate) struct ImportArgs {
    /// Path to the bundled database file.
    #[arg(long = ARG_ASSET, value_name = "path")]
    #[serde(default)]
    pub(crate) asset: Option<Utf8PathBuf>,
    /// Logical database name to seed.
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
    /// Replace an existing database.
    #[arg(long = ARG_FORCE, num_args = 0..=1, default_missing_value = "true")]
    #[serde(default)]
    pub(crate) force: Option<bool>,
}

/// Resolved `import` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) target: DatabaseTarget,
    pub(crate) asset: Utf8PathBuf,
    pub(crate) force: bool,
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let asset = args.asset.ok_or(CliError::MissingArgument {
            field: ARG_ASSET,
            env: ENV_IMPORT_ASSET,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_IMPORT_DATABASE,
        })?;
        Ok(Self {
            target: DatabaseTarget::new(database, args.directory, args.base_dir, None),
            asset,
            force: args.force.unwrap_or(false),
        })
    }
}

pub(crate) fn run_import(args: ImportArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = ImportConfig::try_from(merged)?;
    execute_import(&config, writer)
}

pub(crate) fn execute_import(config: &ImportConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    // The asset's own directory serves as the bundle.
    let root = config
        .asset
        .parent()
        .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
    let resolver = BundleResolver::new(root);
    let asset_id = config.asset.file_name().unwrap_or(config.asset.as_str());
    let source = AssetDatabaseSource::new(asset_id).with_force_overwrite(config.force);
    let result = import_database_from_asset(
        &config.target.name,
        &source,
        config.target.directory.as_deref(),
        &config.target.base_dir,
        &resolver,
    )?;
    if result.copied {
        info!("seeded {} from {}", result.path, config.asset);
    }
    write_json(writer, &result)
}

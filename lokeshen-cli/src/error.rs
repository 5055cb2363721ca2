//! Error types emitted by the Lokeshen CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use lokeshen_core::BridgeError;
use lokeshen_data::SessionError;
use lokeshen_fs::AssetImportError;
use thiserror::Error;

/// Errors emitted by the Lokeshen CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The `--params` value was not a JSON array of scalars.
    #[error("--params must be a JSON array of scalars: {reason}")]
    InvalidParams { reason: String },
    /// The database bridge rejected an operation.
    #[error(transparent)]
    Bridge(#[from] Box<BridgeError>),
    /// Seeding the database from its asset failed.
    #[error(transparent)]
    Import(#[from] Box<AssetImportError>),
    /// The database session failed.
    #[error(transparent)]
    Session(#[from] Box<SessionError>),
    /// Starting the async runtime failed.
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Serialising command output failed.
    #[error("failed to serialise output: {0}")]
    SerialiseOutput(#[source] serde_json::Error),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<BridgeError> for CliError {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(Box::new(err))
    }
}

impl From<AssetImportError> for CliError {
    fn from(err: AssetImportError) -> Self {
        Self::Import(Box::new(err))
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        Self::Session(Box::new(err))
    }
}

//! Errors raised by the session provider and its contexts.

use lokeshen_core::BridgeError;
use lokeshen_fs::AssetImportError;
use thiserror::Error;
use tokio::task::JoinError;

/// Failures surfaced by [`super::DatabaseProvider`] and
/// [`super::DatabaseContext`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Data access was attempted before the session was ready, or through a
    /// context issued for a session that has since been torn down.
    #[error("database context is not ready")]
    ContextNotReady,
    /// `use_suspense` and `on_error` were both configured.
    #[error("use_suspense and on_error are mutually exclusive failure strategies")]
    ConflictingErrorStrategies,
    /// An asset source was configured for an in-memory database.
    #[error("cannot seed the in-memory database from asset {asset_id:?}")]
    AssetWithMemoryDatabase {
        /// Identifier of the configured asset.
        asset_id: String,
    },
    /// The native bridge reported an error.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Seeding the database from its asset failed.
    #[error(transparent)]
    Import(#[from] AssetImportError),
    /// The caller-supplied initialisation hook failed.
    #[error("initialisation hook failed")]
    InitHook {
        /// Error returned by the hook.
        #[source]
        source: Box<SessionError>,
    },
    /// The most recent mount failed; the session stays unusable until it is
    /// mounted again.
    #[error("database session failed to initialise: {reason}")]
    InitFailed {
        /// Rendered cause of the failure.
        reason: String,
    },
    /// A blocking worker task panicked or was cancelled.
    #[error("database worker task failed")]
    Worker(#[from] JoinError),
    /// The transaction was already committed or rolled back.
    #[error("transaction has already finished")]
    TransactionFinished,
}

impl SessionError {
    /// The bridge error at the root of this failure, if any.
    #[must_use]
    pub fn bridge_error(&self) -> Option<&BridgeError> {
        match self {
            Self::Bridge(err) => Some(err),
            Self::InitHook { source } => source.bridge_error(),
            _ => None,
        }
    }
}

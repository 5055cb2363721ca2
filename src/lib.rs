//! Facade crate for the Lokeshen spatial database toolkit.
//!
//! This crate re-exports the SQL bridge and path helpers, and exposes the
//! session provider and data-access layer behind the `session` feature.

#![forbid(unsafe_code)]

pub use lokeshen_core::{
    BridgeError, CloseResult, DatabaseBridge, GeometryColumn, GeometryType, InitOptions,
    InitResult, QueryResult, Row, SpatialBackend, SqlValue, SqliteBridge, StatementKind,
    StatementResult, StoredGeometry,
};
pub use lokeshen_fs::{
    AssetDatabaseSource, AssetImportError, AssetResolver, BundleResolver, ImportResult,
    MEMORY_DATABASE, create_database_path, import_database_from_asset, is_memory_database,
};

#[cfg(feature = "session")]
pub use lokeshen_data::{
    DatabaseContext, DatabaseProvider, DatabaseProviderBuilder, InitHook, Model, ModelError,
    Page, PageRequest, QueryBuilder, SchemaBootstrap, SessionError, SessionState, Transaction,
    bootstrap_schema, init_hook,
};

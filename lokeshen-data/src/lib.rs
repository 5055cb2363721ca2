//! Session lifecycle and data access for Lokeshen databases.
//!
//! [`DatabaseProvider`] owns the single connection to a logical database and
//! hands out [`DatabaseContext`] handles once it is ready. [`Model`] and
//! [`QueryBuilder`] build CRUD, pagination and composed reads on top of a
//! context, and [`schema`] bootstraps the ward and note tables.

pub mod model;
pub mod query;
pub mod schema;
pub mod session;

pub use model::{Model, ModelError, Page, PageRequest};
pub use query::{BuiltQuery, Direction, Operator, QueryBuilder};
pub use schema::{SchemaBootstrap, bootstrap_schema};
pub use session::{
    DatabaseContext, DatabaseProvider, DatabaseProviderBuilder, ErrorHandler, InitHook,
    ProviderConfig, SessionError, SessionState, Transaction, init_hook,
};

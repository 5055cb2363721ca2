//! SQLite-backed implementation of [`crate::DatabaseBridge`].
//!
//! [`SqliteBridge`] owns one `rusqlite` connection. Spatial support is
//! attached when the connection opens: either a SpatiaLite extension is
//! loaded, or the built-in geometry function set in [`geometry`] is
//! registered on the connection.

pub mod geometry;
mod spatial;
mod sqlite;

pub use geometry::{BUILTIN_ENGINE_VERSION, GeometryError, StoredGeometry};
pub use sqlite::SqliteBridge;

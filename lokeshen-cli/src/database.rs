//! Database location options shared by every subcommand.

use camino::Utf8PathBuf;
use log::debug;
use lokeshen_core::{DatabaseBridge, InitOptions, SpatialBackend, SqliteBridge};
use lokeshen_fs::create_database_path;

use crate::CliError;

/// Where a command finds its database and which spatial engine it attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DatabaseTarget {
    /// Logical database name, or `:memory:`.
    pub(crate) name: String,
    /// Optional subdirectory below `base_dir`.
    pub(crate) directory: Option<String>,
    /// Directory databases live under.
    pub(crate) base_dir: Utf8PathBuf,
    /// Spatial engine attached on open.
    pub(crate) spatial: SpatialBackend,
}

impl DatabaseTarget {
    pub(crate) fn new(
        name: String,
        directory: Option<String>,
        base_dir: Option<Utf8PathBuf>,
        spatialite: Option<Utf8PathBuf>,
    ) -> Self {
        let spatial = spatialite.map_or(SpatialBackend::Builtin, |library| {
            SpatialBackend::Extension { library }
        });
        Self {
            name,
            directory,
            base_dir: base_dir.unwrap_or_else(|| Utf8PathBuf::from(".")),
            spatial,
        }
    }

    pub(crate) fn path(&self) -> Utf8PathBuf {
        create_database_path(&self.name, self.directory.as_deref(), &self.base_dir)
    }

    pub(crate) fn open(&self, read_only: bool) -> Result<SqliteBridge, CliError> {
        let path = self.path();
        let options = InitOptions::with_spatial(self.spatial.clone()).read_only(read_only);
        let mut bridge = SqliteBridge::new();
        let init = bridge.init_database(&path, &options)?;
        debug!(
            "opened {} (spatial engine {:?})",
            init.path, init.spatialite_version
        );
        Ok(bridge)
    }
}

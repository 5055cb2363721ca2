//! One-time seeding of a writable database from a bundled asset.

use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    create_database_path, ensure_parent_dir, is_memory_database, open_dir_and_file,
    open_utf8_file, regular_file_exists,
};

/// A bundled, read-only seed database.
///
/// The source is consumed once to populate the writable location and has no
/// relationship with the runtime connection afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDatabaseSource {
    /// Identifier understood by the [`AssetResolver`] in use.
    pub asset_id: String,
    /// Replace an existing destination file instead of keeping it.
    #[serde(default)]
    pub force_overwrite: bool,
}

impl AssetDatabaseSource {
    /// Describe an asset that is copied only when the destination is absent.
    #[must_use]
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            force_overwrite: false,
        }
    }

    /// Set whether an existing destination should be replaced.
    #[must_use]
    pub const fn with_force_overwrite(mut self, force_overwrite: bool) -> Self {
        self.force_overwrite = force_overwrite;
        self
    }
}

/// Outcome of [`import_database_from_asset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    /// Always `true` for a returned value; failures surface as errors.
    pub success: bool,
    /// Destination database path.
    pub path: Utf8PathBuf,
    /// Whether bytes were copied during this call.
    pub copied: bool,
}

/// Errors raised while importing a bundled database.
#[derive(Debug, Error)]
pub enum AssetImportError {
    /// The asset could not be materialised to a local readable file.
    #[error("asset {asset_id:?} is unavailable at {path:?}")]
    AssetUnavailable {
        /// Identifier of the requested asset.
        asset_id: String,
        /// Location the resolver looked at.
        path: Utf8PathBuf,
    },
    /// The asset id names a path outside the bundle directory.
    #[error("asset {asset_id:?} escapes the bundle directory")]
    AssetOutsideBundle {
        /// Identifier of the requested asset.
        asset_id: String,
    },
    /// The asset location could not be inspected.
    #[error("failed to inspect asset {asset_id:?} at {path:?}")]
    InspectAsset {
        /// Identifier of the requested asset.
        asset_id: String,
        /// Location the resolver looked at.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The destination could not be inspected.
    #[error("failed to inspect import destination {path:?}")]
    InspectDestination {
        /// Destination that failed inspection.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Copying the asset bytes failed.
    #[error("failed to copy asset from {from:?} to {to:?}")]
    Copy {
        /// Resolved asset file.
        from: Utf8PathBuf,
        /// Destination database path.
        to: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An in-memory database cannot be seeded from a file.
    #[error("cannot import an asset into the in-memory database {name:?}")]
    MemoryDestination {
        /// Logical database name that was requested.
        name: String,
    },
}

/// Materialise bundled assets as local readable files.
pub trait AssetResolver: Send + Sync {
    /// Return the local path holding the bytes of `asset_id`.
    fn resolve(&self, asset_id: &str) -> Result<Utf8PathBuf, AssetImportError>;
}

/// Resolves asset identifiers as relative paths inside a bundle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleResolver {
    root: Utf8PathBuf,
}

impl BundleResolver {
    /// Create a resolver rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the resolver reads assets from.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl AssetResolver for BundleResolver {
    fn resolve(&self, asset_id: &str) -> Result<Utf8PathBuf, AssetImportError> {
        let relative = Utf8Path::new(asset_id.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir))
        {
            return Err(AssetImportError::AssetOutsideBundle {
                asset_id: asset_id.to_owned(),
            });
        }
        let path = self.root.join(relative);
        match regular_file_exists(&path) {
            Ok(true) => Ok(path),
            Ok(false) => Err(AssetImportError::AssetUnavailable {
                asset_id: asset_id.to_owned(),
                path,
            }),
            Err(source) => Err(AssetImportError::InspectAsset {
                asset_id: asset_id.to_owned(),
                path,
                source,
            }),
        }
    }
}

/// Seed the writable copy of `name` from a bundled asset.
///
/// The destination is computed with [`create_database_path`]. When it
/// already exists and `force_overwrite` is false the call succeeds without
/// touching the file, so importing repeatedly leaves the first copy intact.
/// Bytes are written to a sibling temporary file and renamed into place.
pub fn import_database_from_asset(
    name: &str,
    source: &AssetDatabaseSource,
    directory: Option<&str>,
    base: &Utf8Path,
    resolver: &dyn AssetResolver,
) -> Result<ImportResult, AssetImportError> {
    if is_memory_database(name) {
        return Err(AssetImportError::MemoryDestination {
            name: name.to_owned(),
        });
    }

    let asset_path = resolver.resolve(&source.asset_id)?;
    let destination = create_database_path(name, directory, base);

    let exists = regular_file_exists(&destination).map_err(|source| {
        AssetImportError::InspectDestination {
            path: destination.clone(),
            source,
        }
    })?;
    if exists && !source.force_overwrite {
        debug!("keeping existing database at {destination}");
        return Ok(ImportResult {
            success: true,
            path: destination,
            copied: false,
        });
    }

    copy_file(&asset_path, &destination).map_err(|err| AssetImportError::Copy {
        from: asset_path.clone(),
        to: destination.clone(),
        source: err,
    })?;
    info!("imported asset {} into {destination}", source.asset_id);

    Ok(ImportResult {
        success: true,
        path: destination,
        copied: true,
    })
}

fn copy_file(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    ensure_parent_dir(to)?;
    let mut reader = open_utf8_file(from)?;
    let (dir, file_name) = open_dir_and_file(to)?;
    let staging = format!("{file_name}.import");

    let written = {
        let mut writer = dir.create(&staging)?;
        io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all())
    };
    if let Err(err) = written {
        dir.remove_file(&staging).ok();
        return Err(err);
    }
    dir.rename(&staging, &dir, &file_name)
}

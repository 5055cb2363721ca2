//! Test helpers for preparing scratch databases and capturing command output.

use camino::{Utf8Path, Utf8PathBuf};
use lokeshen_core::{DatabaseBridge, InitOptions, SqliteBridge, test_support::seed_wards};
use tempfile::TempDir;

use crate::database::DatabaseTarget;

/// A scratch base directory that is removed when dropped.
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn target(&self, name: &str) -> DatabaseTarget {
        DatabaseTarget::new(name.to_owned(), None, Some(self.root.clone()), None)
    }

    /// Create `path` holding the ward fixtures.
    pub(super) fn seed_wards_at(&self, path: &Utf8Path) {
        let mut bridge = SqliteBridge::new();
        bridge
            .init_database(path, &InitOptions::default())
            .expect("create ward database");
        seed_wards(&mut bridge).expect("seed wards");
        bridge.close_database().expect("close ward database");
    }
}

/// Decode JSON written by a command.
pub(super) fn output_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("command output should be JSON")
}

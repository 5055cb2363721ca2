//! Deterministic database path resolution.

use camino::{Utf8Path, Utf8PathBuf};

/// Sentinel name selecting an in-memory database that bypasses persistence.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Return whether `name` is the in-memory sentinel.
#[must_use]
pub fn is_memory_database(name: &str) -> bool {
    name == MEMORY_DATABASE
}

/// Compute the on-disk location of a logical database.
///
/// The result is `base/directory/name` with redundant slashes removed at
/// every join point, so the same arguments always produce the same string and
/// the output never contains doubled or trailing slashes. The in-memory
/// sentinel is returned unchanged. No I/O is performed.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use lokeshen_fs::create_database_path;
///
/// let base = Utf8Path::new("/data/app/");
/// let path = create_database_path("wards.db", Some("/SQLite/"), base);
/// assert_eq!(path.as_str(), "/data/app/SQLite/wards.db");
///
/// let memory = create_database_path(":memory:", Some("ignored"), base);
/// assert_eq!(memory.as_str(), ":memory:");
/// ```
#[must_use]
pub fn create_database_path(name: &str, directory: Option<&str>, base: &Utf8Path) -> Utf8PathBuf {
    if is_memory_database(name) {
        return Utf8PathBuf::from(MEMORY_DATABASE);
    }

    let absolute = base.as_str().starts_with('/');
    let segments = split_segments(base.as_str())
        .chain(directory.into_iter().flat_map(split_segments))
        .chain(split_segments(name));

    let mut joined = String::new();
    for segment in segments {
        if !joined.is_empty() || absolute {
            joined.push('/');
        }
        joined.push_str(segment);
    }
    if joined.is_empty() && absolute {
        joined.push('/');
    }
    Utf8PathBuf::from(joined)
}

fn split_segments(value: &str) -> impl Iterator<Item = &str> {
    value.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/docs", Some("SQLite"), "wards.db", "/docs/SQLite/wards.db")]
    #[case("/docs/", Some("SQLite/"), "wards.db", "/docs/SQLite/wards.db")]
    #[case("/docs/", Some("/SQLite"), "wards.db", "/docs/SQLite/wards.db")]
    #[case("/docs//", Some("//SQLite//"), "/wards.db", "/docs/SQLite/wards.db")]
    #[case("/docs", None, "notes.db", "/docs/notes.db")]
    #[case("/docs", Some(""), "notes.db", "/docs/notes.db")]
    #[case("/", Some("nested/dir"), "notes.db", "/nested/dir/notes.db")]
    #[case("relative", Some("dir"), "notes.db", "relative/dir/notes.db")]
    #[case("", None, "notes.db", "notes.db")]
    fn joins_segments_without_redundant_slashes(
        #[case] base: &str,
        #[case] directory: Option<&str>,
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        let path = create_database_path(name, directory, Utf8Path::new(base));
        assert_eq!(path.as_str(), expected);
        assert!(!path.as_str().contains("//"), "no doubled slashes");
        assert!(!path.as_str().ends_with('/'), "no trailing slash");
    }

    #[rstest]
    fn resolution_is_deterministic() {
        let base = Utf8Path::new("/var/mobile/Documents/");
        let first = create_database_path("kenya.db", Some("SQLite/"), base);
        let unrelated = create_database_path("other.db", None, base);
        let second = create_database_path("kenya.db", Some("SQLite/"), base);
        assert_eq!(first, second);
        assert_ne!(first, unrelated);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("SQLite"))]
    fn memory_sentinel_is_returned_unchanged(#[case] directory: Option<&str>) {
        let path = create_database_path(MEMORY_DATABASE, directory, Utf8Path::new("/docs"));
        assert_eq!(path.as_str(), MEMORY_DATABASE);
    }
}

//! Statement classification and identifier quoting.

use std::fmt;

/// How a SQL statement must be marshaled across the bridge.
///
/// Classification looks only at the leading keyword, after skipping
/// whitespace and comments.
///
/// # Examples
///
/// ```
/// use lokeshen_core::StatementKind;
///
/// assert_eq!(StatementKind::classify("select 1"), Some(StatementKind::Query));
/// assert_eq!(StatementKind::classify("PRAGMA journal_mode"), Some(StatementKind::Query));
/// assert_eq!(StatementKind::classify("PRAGMA journal_mode = WAL"), Some(StatementKind::Control));
/// assert_eq!(StatementKind::classify("INSERT INTO notes DEFAULT VALUES"), Some(StatementKind::Write));
/// assert_eq!(StatementKind::classify("  -- nothing\n"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Produces rows: `SELECT`, `WITH`, `VALUES`, `EXPLAIN`, `PRAGMA name`.
    Query,
    /// Changes data or schema; wrapped in an implicit transaction.
    Write,
    /// Transaction control, `VACUUM`, attachments and `PRAGMA name = value`;
    /// executed without an implicit transaction.
    Control,
}

impl StatementKind {
    /// Classify `sql`, returning `None` when it holds no statement.
    #[must_use]
    pub fn classify(sql: &str) -> Option<Self> {
        let rest = skip_trivia(sql);
        let keyword: String = rest
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .map(|ch| ch.to_ascii_uppercase())
            .collect();
        if keyword.is_empty() {
            return None;
        }

        let kind = match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" | "EXPLAIN" => Self::Query,
            "PRAGMA" if pragma_assigns(rest.get(keyword.len()..).unwrap_or_default()) => {
                Self::Control
            }
            "PRAGMA" => Self::Query,
            "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "VACUUM"
            | "ATTACH" | "DETACH" => Self::Control,
            _ => Self::Write,
        };
        Some(kind)
    }

    /// Whether statements of this kind produce rows.
    #[must_use]
    pub const fn returns_rows(self) -> bool {
        matches!(self, Self::Query)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Write => "write",
            Self::Control => "control",
        })
    }
}

/// Whether a pragma body sets a value: an `=` before any argument list.
pub(crate) fn pragma_assigns(body: &str) -> bool {
    body.split_once('(')
        .map_or(body, |(name, _)| name)
        .contains('=')
}

fn skip_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start_matches(|ch: char| ch.is_whitespace() || ch == '(' || ch == ';');
        if let Some(comment) = sql.strip_prefix("--") {
            sql = comment.split_once('\n').map_or("", |(_, rest)| rest);
        } else if let Some(comment) = sql.strip_prefix("/*") {
            sql = comment.split_once("*/").map_or("", |(_, rest)| rest);
        } else {
            return sql;
        }
    }
}

/// Whether `name` is a bare SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Quote a possibly qualified identifier such as `w.ward` or `notes.*`.
///
/// Returns `None` when any part is not a bare identifier; a trailing `*` is
/// allowed on its own or after a qualifier.
///
/// # Examples
///
/// ```
/// use lokeshen_core::quote_identifier;
///
/// assert_eq!(quote_identifier("w.ward").as_deref(), Some("\"w\".\"ward\""));
/// assert_eq!(quote_identifier("notes.*").as_deref(), Some("\"notes\".*"));
/// assert_eq!(quote_identifier("1; DROP TABLE notes"), None);
/// ```
#[must_use]
pub fn quote_identifier(name: &str) -> Option<String> {
    if name == "*" {
        return Some(name.to_owned());
    }
    let parts: Vec<&str> = name.split('.').collect();
    let last = parts.len().checked_sub(1)?;
    let mut quoted = Vec::with_capacity(parts.len());
    for (position, part) in parts.into_iter().enumerate() {
        if part == "*" && position == last && position > 0 {
            quoted.push(part.to_owned());
        } else if is_identifier(part) {
            quoted.push(format!("\"{part}\""));
        } else {
            return None;
        }
    }
    Some(quoted.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SELECT * FROM notes", StatementKind::Query)]
    #[case("  with recent AS (SELECT 1) SELECT * FROM recent", StatementKind::Query)]
    #[case("(SELECT 1)", StatementKind::Query)]
    #[case("-- leading comment\nSELECT 1", StatementKind::Query)]
    #[case("/* block */ select 1", StatementKind::Query)]
    #[case("PRAGMA table_info(notes)", StatementKind::Query)]
    #[case("pragma foreign_keys=ON", StatementKind::Control)]
    #[case("PRAGMA table_info('a=b')", StatementKind::Query)]
    #[case("PRAGMA main.user_version = 3", StatementKind::Control)]
    #[case("INSERT INTO notes (title) VALUES (?)", StatementKind::Write)]
    #[case("update notes SET title = ?", StatementKind::Write)]
    #[case("DELETE FROM notes", StatementKind::Write)]
    #[case("CREATE TABLE t (id INTEGER)", StatementKind::Write)]
    #[case("BEGIN", StatementKind::Control)]
    #[case("commit", StatementKind::Control)]
    #[case("ROLLBACK", StatementKind::Control)]
    #[case("VACUUM", StatementKind::Control)]
    fn classifies_leading_keyword(#[case] sql: &str, #[case] expected: StatementKind) {
        assert_eq!(StatementKind::classify(sql), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("-- only a comment")]
    #[case("/* unterminated")]
    #[case(";")]
    fn empty_statements_have_no_kind(#[case] sql: &str) {
        assert_eq!(StatementKind::classify(sql), None);
    }

    #[rstest]
    #[case("notes", true)]
    #[case("_private1", true)]
    #[case("1notes", false)]
    #[case("notes;", false)]
    #[case("", false)]
    #[case("kenya wards", false)]
    fn recognises_bare_identifiers(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_identifier(name), expected);
    }

    #[rstest]
    #[case("*", Some("*"))]
    #[case("title", Some("\"title\""))]
    #[case("n.title", Some("\"n\".\"title\""))]
    #[case("n.*", Some("\"n\".*"))]
    #[case("*.title", None)]
    #[case("n..title", None)]
    #[case("title\"", None)]
    fn quotes_qualified_identifiers(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(quote_identifier(name).as_deref(), expected);
    }
}

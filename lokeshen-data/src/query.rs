//! Fluent `SELECT` composition with bound leaf values.
//!
//! [`QueryBuilder::filter`] binds its value and quotes its field, so it is
//! the injection-safe path. Methods ending in `_unchecked` splice
//! caller-written SQL verbatim; builders that used any of them report it via
//! [`QueryBuilder::uses_unchecked_fragments`] so tests can assert that
//! application code stays on the safe path.

use std::fmt;

use lokeshen_core::{Row, SqlValue, quote_identifier};

use crate::{DatabaseContext, ModelError};

/// Comparison used by [`QueryBuilder::filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`; a `NULL` value becomes `IS NULL`.
    Eq,
    /// `<>`; a `NULL` value becomes `IS NOT NULL`.
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `LIKE`
    Like,
}

impl Operator {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Sort direction for [`QueryBuilder::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        })
    }
}

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    /// Parameterised SQL.
    pub sql: String,
    /// Values bound to the `?` placeholders, in order.
    pub params: Vec<SqlValue>,
}

/// Accumulates a `SELECT` and renders it once at [`QueryBuilder::build`].
///
/// # Examples
///
/// ```
/// use lokeshen_data::{Direction, Operator, QueryBuilder};
///
/// let query = QueryBuilder::new("notes")
///     .select(["id", "title"])
///     .filter("author", Operator::Eq, "wanjiru")
///     .order_by("created_at", Direction::Desc)
///     .limit(10)
///     .build()
///     .unwrap();
/// assert_eq!(
///     query.sql,
///     r#"SELECT "id", "title" FROM "notes" WHERE "author" = ? ORDER BY "created_at" DESC LIMIT ?"#
/// );
/// assert_eq!(query.params.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    unchecked: bool,
    invalid: Option<String>,
}

impl QueryBuilder {
    /// Start a query over `table`.
    pub fn new(table: &str) -> Self {
        let mut builder = Self {
            table: String::new(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            unchecked: false,
            invalid: None,
        };
        builder.table = builder.quote(table);
        builder
    }

    fn quote(&mut self, name: &str) -> String {
        quote_identifier(name).unwrap_or_else(|| {
            self.invalid.get_or_insert_with(|| name.to_owned());
            String::new()
        })
    }

    /// Select quoted columns, which may be qualified (`n.title`, `n.*`).
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for column in columns {
            let quoted = self.quote(column.as_ref());
            self.columns.push(quoted);
        }
        self
    }

    /// Select a raw expression such as `AsGeoJSON(geom) AS geojson`.
    #[must_use]
    pub fn select_unchecked(mut self, expression: impl Into<String>) -> Self {
        self.columns.push(expression.into());
        self.unchecked = true;
        self
    }

    /// Add `field <op> ?` with `value` bound, ANDed with other conditions.
    #[must_use]
    pub fn filter(mut self, field: &str, operator: Operator, value: impl Into<SqlValue>) -> Self {
        let field = self.quote(field);
        let value = value.into();
        let condition = match (operator, value.is_null()) {
            (Operator::Eq, true) => format!("{field} IS NULL"),
            (Operator::NotEq, true) => format!("{field} IS NOT NULL"),
            _ => {
                self.params.push(value);
                format!("{field} {} ?", operator.as_sql())
            }
        };
        self.conditions.push(condition);
        self
    }

    /// Add a raw condition such as
    /// `ST_Contains(geom, MakePoint(?, ?, 4326))`, ANDed with the others.
    /// `params` bind the fragment's own placeholders.
    #[must_use]
    pub fn where_unchecked(
        mut self,
        fragment: impl Into<String>,
        params: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.conditions.push(format!("({})", fragment.into()));
        self.params.extend(params);
        self.unchecked = true;
        self
    }

    /// Append a raw join clause such as
    /// `JOIN kenya_wards w ON ST_Contains(w.geom, notes.location)`.
    #[must_use]
    pub fn join_unchecked(mut self, clause: impl Into<String>) -> Self {
        self.joins.push(clause.into());
        self.unchecked = true;
        self
    }

    /// Order by a quoted column.
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        let column = self.quote(column);
        self.order.push(format!("{column} {direction}"));
        self
    }

    /// Return at most `limit` rows.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` rows.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether any `_unchecked` method contributed SQL.
    #[must_use]
    pub const fn uses_unchecked_fragments(&self) -> bool {
        self.unchecked
    }

    /// Render the SQL and collect its parameters.
    pub fn build(&self) -> Result<BuiltQuery, ModelError> {
        if let Some(value) = &self.invalid {
            return Err(ModelError::InvalidIdentifier {
                value: value.clone(),
            });
        }

        let columns = if self.columns.is_empty() {
            "*".to_owned()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }

        let mut params = self.params.clone();
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(limit.into());
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(offset.into());
                }
            }
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(offset.into());
            }
            (None, None) => {}
        }
        Ok(BuiltQuery { sql, params })
    }

    /// Build and run the query.
    pub async fn execute(&self, context: &DatabaseContext) -> Result<Vec<Row>, ModelError> {
        let query = self.build()?;
        let result = context.execute_query(&query.sql, &query.params).await?;
        Ok(result.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn selects_everything_by_default() {
        let query = QueryBuilder::new("notes").build().expect("valid query");
        assert_eq!(query.sql, r#"SELECT * FROM "notes""#);
        assert!(query.params.is_empty());
    }

    #[rstest]
    fn binds_filters_in_order() {
        let query = QueryBuilder::new("notes")
            .filter("author", Operator::Eq, "amina")
            .filter("score", Operator::Gte, 3)
            .offset(20)
            .build()
            .expect("valid query");
        assert_eq!(
            query.sql,
            r#"SELECT * FROM "notes" WHERE "author" = ? AND "score" >= ? LIMIT -1 OFFSET ?"#
        );
        assert_eq!(
            query.params,
            vec![
                SqlValue::from("amina"),
                SqlValue::Integer(3),
                SqlValue::Integer(20)
            ]
        );
    }

    #[rstest]
    #[case(Operator::Eq, r#""deleted_at" IS NULL"#)]
    #[case(Operator::NotEq, r#""deleted_at" IS NOT NULL"#)]
    fn null_equality_uses_is(#[case] operator: Operator, #[case] expected: &str) {
        let query = QueryBuilder::new("notes")
            .filter("deleted_at", operator, SqlValue::Null)
            .build()
            .expect("valid query");
        assert!(query.sql.ends_with(expected), "{}", query.sql);
        assert!(query.params.is_empty());
    }

    #[rstest]
    fn safe_builders_report_no_unchecked_fragments() {
        let builder = QueryBuilder::new("notes")
            .select(["n.id", "n.*"])
            .filter("n.title", Operator::Like, "%park%")
            .order_by("n.created_at", Direction::Asc)
            .limit(5);
        assert!(!builder.uses_unchecked_fragments());
    }

    #[rstest]
    fn unchecked_fragments_are_flagged_and_parenthesised() {
        let builder = QueryBuilder::new("notes")
            .select(["n.title"])
            .select_unchecked("w.ward")
            .join_unchecked("AS n JOIN kenya_wards w ON ST_Contains(w.geom, n.location)")
            .where_unchecked("PtDistWithin(n.location, MakePoint(?, ?, 4326), ?)", [
                SqlValue::Real(36.8),
                SqlValue::Real(-1.3),
                SqlValue::Real(0.01),
            ])
            .filter("n.author", Operator::Eq, "amina");
        assert!(builder.uses_unchecked_fragments());
        let query = builder.build().expect("valid query");
        assert_eq!(
            query.sql,
            "SELECT \"n\".\"title\", w.ward FROM \"notes\" \
             AS n JOIN kenya_wards w ON ST_Contains(w.geom, n.location) \
             WHERE (PtDistWithin(n.location, MakePoint(?, ?, 4326), ?)) AND \"n\".\"author\" = ?"
        );
        assert_eq!(query.params.len(), 4);
    }

    #[rstest]
    #[case(QueryBuilder::new("notes; DROP TABLE notes"))]
    #[case(QueryBuilder::new("notes").select(["title\""]))]
    #[case(QueryBuilder::new("notes").filter("1=1 OR title", Operator::Eq, 1))]
    #[case(QueryBuilder::new("notes").order_by("random()", Direction::Asc))]
    fn invalid_identifiers_fail_at_build(#[case] builder: QueryBuilder) {
        assert!(matches!(
            builder.build(),
            Err(ModelError::InvalidIdentifier { .. })
        ));
    }
}

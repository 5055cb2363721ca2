//! Generic table access over a [`DatabaseContext`].

use lokeshen_core::{Row, SqlValue, quote_identifier};
use log::debug;
use thiserror::Error;

use crate::query::{Direction, Operator, QueryBuilder};
use crate::{DatabaseContext, SessionError};

/// Rows returned by [`Model::find_all`] when no limit is given.
pub const DEFAULT_FIND_ALL_LIMIT: u32 = 100;
/// Page size used by [`PageRequest::default`].
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
/// Column used to order pages by default.
pub const DEFAULT_CURSOR_FIELD: &str = "created_at";

/// Failures surfaced by [`Model`] and [`QueryBuilder`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// The session or bridge failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// A freshly inserted row could not be read back.
    #[error("row {rowid} inserted into {table} could not be read back")]
    MissingAfterInsert {
        /// Target table.
        table: String,
        /// Rowid reported by the insert.
        rowid: i64,
    },
    /// `create` or `update` received no columns.
    #[error("no columns supplied for {table}")]
    EmptyRecord {
        /// Target table.
        table: String,
    },
    /// A table or column name was not a bare identifier.
    #[error("{value:?} is not a valid SQL identifier")]
    InvalidIdentifier {
        /// Rejected name.
        value: String,
    },
}

/// Parameters for [`Model::find_paginated`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Last cursor-field value already seen; `None` starts from the beginning.
    pub cursor: Option<SqlValue>,
    /// Maximum rows per page.
    pub limit: u32,
    /// Column rows are ordered and paged by.
    pub cursor_field: String,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
            cursor_field: DEFAULT_CURSOR_FIELD.to_owned(),
        }
    }
}

impl PageRequest {
    /// Continue after `cursor`.
    #[must_use]
    pub fn after(mut self, cursor: SqlValue) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Rows in cursor order.
    pub rows: Vec<Row>,
    /// Cursor for the next page, present when this page was full.
    pub next_cursor: Option<SqlValue>,
}

/// CRUD access to one table.
///
/// Conditions passed to [`Model::find`] are ANDed equality predicates; use
/// [`Model::query`] or [`Model::raw_query`] for anything richer.
#[derive(Debug, Clone)]
pub struct Model {
    context: DatabaseContext,
    table: String,
    primary_key: String,
}

impl Model {
    /// Access `table`, keyed by `id`.
    pub fn new(context: DatabaseContext, table: &str) -> Result<Self, ModelError> {
        identifier(table)?;
        Ok(Self {
            context,
            table: table.to_owned(),
            primary_key: "id".to_owned(),
        })
    }

    /// Use `column` as the primary key.
    pub fn with_primary_key(mut self, column: &str) -> Result<Self, ModelError> {
        identifier(column)?;
        self.primary_key = column.to_owned();
        Ok(self)
    }

    /// Table this model reads and writes.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Context queries run through.
    #[must_use]
    pub const fn context(&self) -> &DatabaseContext {
        &self.context
    }

    /// A builder over this table.
    #[must_use]
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new(&self.table)
    }

    /// Up to `limit` rows (default [`DEFAULT_FIND_ALL_LIMIT`]).
    pub async fn find_all(&self, limit: Option<u32>) -> Result<Vec<Row>, ModelError> {
        self.query()
            .limit(limit.unwrap_or(DEFAULT_FIND_ALL_LIMIT))
            .execute(&self.context)
            .await
    }

    /// The row whose primary key equals `id`.
    pub async fn find_by_id(&self, id: impl Into<SqlValue>) -> Result<Option<Row>, ModelError> {
        let rows = self
            .query()
            .filter(&self.primary_key, Operator::Eq, id)
            .limit(1)
            .execute(&self.context)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Rows matching every `column = value` pair in `conditions`.
    pub async fn find(&self, conditions: &Row) -> Result<Vec<Row>, ModelError> {
        conditions
            .iter()
            .fold(self.query(), |query, (column, value)| {
                query.filter(column, Operator::Eq, value.clone())
            })
            .execute(&self.context)
            .await
    }

    /// Insert `data` and return the row as stored, defaults included.
    pub async fn create(&self, data: &Row) -> Result<Row, ModelError> {
        if data.is_empty() {
            return Err(ModelError::EmptyRecord {
                table: self.table.clone(),
            });
        }
        let columns = data
            .keys()
            .map(|column| quoted(column))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quoted(&self.table)?,
            columns.join(", ")
        );
        let params: Vec<SqlValue> = data.values().cloned().collect();
        let inserted = self.context.execute_statement(&sql, &params).await?;

        let reread = format!("SELECT * FROM {} WHERE rowid = ?", quoted(&self.table)?);
        let row = self
            .context
            .execute_query(&reread, &[inserted.last_insert_id.into()])
            .await?
            .into_first();
        debug!("created row {} in {}", inserted.last_insert_id, self.table);
        row.ok_or_else(|| ModelError::MissingAfterInsert {
            table: self.table.clone(),
            rowid: inserted.last_insert_id,
        })
    }

    /// Apply `data` to the row keyed by `id` and return it re-read, or
    /// `None` when no such row exists afterwards.
    pub async fn update(
        &self,
        id: impl Into<SqlValue>,
        data: &Row,
    ) -> Result<Option<Row>, ModelError> {
        if data.is_empty() {
            return Err(ModelError::EmptyRecord {
                table: self.table.clone(),
            });
        }
        let id = id.into();
        let assignments = data
            .keys()
            .map(|column| quoted(column).map(|column| format!("{column} = ?")))
            .collect::<Result<Vec<_>, _>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quoted(&self.table)?,
            assignments.join(", "),
            quoted(&self.primary_key)?
        );
        let mut params: Vec<SqlValue> = data.values().cloned().collect();
        params.push(id.clone());
        self.context.execute_statement(&sql, &params).await?;

        // A changed primary key moves the row.
        let key = data.get(&self.primary_key).cloned().unwrap_or(id);
        self.find_by_id(key).await
    }

    /// Delete the row keyed by `id`; `true` when a row was removed.
    pub async fn delete(&self, id: impl Into<SqlValue>) -> Result<bool, ModelError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quoted(&self.table)?,
            quoted(&self.primary_key)?
        );
        let result = self.context.execute_statement(&sql, &[id.into()]).await?;
        Ok(result.rows_affected > 0)
    }

    /// Forward-only cursor pagination ordered by `request.cursor_field`.
    ///
    /// Rows sharing a cursor value across a page boundary are skipped, so the
    /// cursor field should be unique or strictly increasing.
    pub async fn find_paginated(&self, request: &PageRequest) -> Result<Page, ModelError> {
        let mut query = self.query();
        if let Some(cursor) = &request.cursor {
            query = query.filter(&request.cursor_field, Operator::Gt, cursor.clone());
        }
        let rows = query
            .order_by(&request.cursor_field, Direction::Asc)
            .limit(request.limit)
            .execute(&self.context)
            .await?;

        let full = u32::try_from(rows.len()).is_ok_and(|count| count >= request.limit);
        let next_cursor = if full && request.limit > 0 {
            let field = request.cursor_field.to_lowercase();
            rows.last().and_then(|row| row.get(&field)).cloned()
        } else {
            None
        };
        Ok(Page { rows, next_cursor })
    }

    /// Run arbitrary read SQL, typically spatial predicates the builder cannot
    /// express.
    pub async fn raw_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ModelError> {
        Ok(self.context.execute_query(sql, params).await?.rows)
    }
}

fn identifier(name: &str) -> Result<(), ModelError> {
    quoted(name).map(drop)
}

fn quoted(name: &str) -> Result<String, ModelError> {
    match quote_identifier(name) {
        Some(quoted) if !name.contains('*') => Ok(quoted),
        _ => Err(ModelError::InvalidIdentifier {
            value: name.to_owned(),
        }),
    }
}

// Storage collaborator boundary. The core only ever talks to storage
// through the `Storage` trait; `SqliteStorage` is the one engine shipped.

pub mod sql;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::expr::{Expr, OrderBy};
use crate::value::Value;
use std::sync::Arc;

/// Structural description of one column, declared or live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// Table referenced by a foreign key on this column.
    pub references: Option<String>,
}

/// Structural description of one table: its name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A row query over one table. `columns` are columns of `table` itself;
/// joins are implied by the columns the filter reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Option<Arc<Expr>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        Query {
            table: table.to_string(),
            columns,
            filter: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn has_joins(&self) -> bool {
        self.filter
            .as_ref()
            .map(|f| !f.joins().is_empty())
            .unwrap_or(false)
    }

    /// Whether the selected rows cannot be expressed by a plain `WHERE` on
    /// the table alone (joins or a row limit).
    pub fn needs_subquery(&self) -> bool {
        self.has_joins() || self.limit.is_some()
    }
}

/// A raw stored row: values are null, integer, real or text, in the order
/// of `Query::columns`.
pub type Row = Vec<Value>;

/// Everything the core needs from a relational storage engine.
///
/// Implementations must propagate their own failures unmodified and must
/// not retry. Values handed to writes may be any [`Value`]; the engine maps
/// them to its column representation.
pub trait Storage {
    /// Live structure of `table`, or `None` if it does not exist.
    fn describe_table(&self, table: &str) -> Result<Option<TableSchema>>;

    fn create_table(&self, table: &TableSchema) -> Result<()>;

    /// Drop `table` and its rows. Dropping a missing table is a no-op.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// DDL that would recreate `table` from scratch, for manual review.
    fn rebuild_script(&self, table: &TableSchema) -> String;

    /// Insert one row and return its generated identity.
    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<i64>;

    /// Apply `assignments` to every row `query` selects. Returns the number
    /// of rows changed.
    fn update(&self, query: &Query, assignments: &[(String, Value)]) -> Result<usize>;

    /// Delete every row `query` selects. Returns the number of rows removed.
    fn delete(&self, query: &Query) -> Result<usize>;

    fn select(&self, query: &Query) -> Result<Vec<Row>>;

    /// Number of rows `query` selects, without fetching them.
    fn count(&self, query: &Query) -> Result<u64>;
}

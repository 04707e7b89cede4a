//! Backend abstraction.
//!
//! Every component talks to the relational backend through [`Backend`], one
//! connection per invocation. Two implementations:
//! - [`SqlxBackend`]: MySQL or PostgreSQL over `sqlx`
//! - [`MemoryBackend`]: in-process tables with a statement log, used by the
//!   test suite and for rehearsing a workflow without a server

mod memory;
mod sql;

pub use memory::{MemoryBackend, Statement};
pub use sql::SqlxBackend;

use async_trait::async_trait;

use crate::catalog::{ForeignKey, TableDescriptor};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::predicate::Predicate;
use crate::value::Row;

/// Which rows and columns to read from a table.
#[derive(Debug, Clone, Default)]
pub struct RowSelection {
    /// Columns to return, in order. Empty means every column of the table.
    pub columns: Vec<String>,
    /// Sort columns, ascending.
    pub order_by: Vec<String>,
    pub filter: Option<Predicate>,
    pub limit: Option<u64>,
}

impl RowSelection {
    /// All columns, ordered by the table's key.
    pub fn ordered(table: &TableDescriptor) -> Self {
        Self {
            columns: table.column_names(),
            order_by: table.order_columns(),
            filter: None,
            limit: None,
        }
    }

    /// Only the key columns, ordered by the key.
    pub fn keys(table: &TableDescriptor) -> Self {
        let key = table.order_columns();
        Self {
            columns: key.clone(),
            order_by: key,
            filter: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Option<Predicate>) -> Self {
        self.filter = filter;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Administrative operations against a relational backend.
#[async_trait]
pub trait Backend: Send {
    fn dialect(&self) -> Dialect;

    async fn schema_exists(&mut self, schema: &str) -> Result<bool>;

    /// Schema names starting with `prefix`, sorted.
    async fn list_schemas(&mut self, prefix: &str) -> Result<Vec<String>>;

    /// Every base table in `schema`, sorted by name. Empty if the schema has none.
    async fn table_names(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Columns, primary key, foreign keys and current row count of a table.
    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<TableDescriptor>;

    async fn create_schema(&mut self, schema: &str) -> Result<()>;

    async fn drop_schema(&mut self, schema: &str) -> Result<()>;

    /// Create `dest.table` with the structure of `source.table`.
    async fn create_table_like(&mut self, source: &str, dest: &str, table: &str) -> Result<()>;

    /// Add a foreign key to `schema.table`; same-schema references resolve in `schema`.
    async fn add_foreign_key(&mut self, schema: &str, table: &str, fk: &ForeignKey) -> Result<()>;

    /// Read rows from `schema.table`, aligned with `selection.columns`.
    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &TableDescriptor,
        selection: &RowSelection,
    ) -> Result<Vec<Row>>;

    /// Insert rows in one transaction: either every row lands or none does.
    async fn insert_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;

    /// Rename a schema. Refuses when [`rename_blockers`](Self::rename_blockers)
    /// reports anything.
    async fn rename_schema(&mut self, from: &str, to: &str) -> Result<()>;

    /// Objects in `schema` that a rename would lose, e.g. `view v_sessions`.
    async fn rename_blockers(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Number of other non-idle connections working in `schema`.
    async fn active_connections(&mut self, schema: &str) -> Result<u64>;
}

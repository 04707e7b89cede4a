//! In-process backend.
//!
//! Keeps schemas and rows in memory and records every mutating statement, so
//! tests can assert exactly what a phase executed (and what it did not).

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;

use super::{Backend, RowSelection};
use crate::catalog::{ForeignKey, TableDescriptor};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};
use crate::value::{Row, Value, cmp_rows, format_key};

/// A mutating statement executed against a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSchema(String),
    DropSchema(String),
    CreateTable { schema: String, table: String },
    AddForeignKey { schema: String, table: String, name: String },
    Insert { schema: String, table: String, rows: u64 },
    RenameSchema { from: String, to: String },
}

#[derive(Debug, Clone)]
struct MemTable {
    descriptor: TableDescriptor,
    rows: Vec<Row>,
}

/// In-memory [`Backend`] with a statement log.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    dialect: Dialect,
    schemas: BTreeMap<String, BTreeMap<String, MemTable>>,
    /// Non-table objects per schema, e.g. `view v_sessions`.
    objects: BTreeMap<String, Vec<String>>,
    activity: HashMap<String, u64>,
    statements: Vec<Statement>,
    unreachable: bool,
    failing_renames: HashSet<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Seed an empty schema.
    pub fn add_schema(&mut self, schema: &str) -> &mut Self {
        self.schemas.entry(schema.to_string()).or_default();
        self
    }

    /// Seed a table with rows laid out as `descriptor.columns`.
    pub fn add_table(&mut self, schema: &str, descriptor: TableDescriptor, rows: Vec<Row>) -> &mut Self {
        let tables = self.schemas.entry(schema.to_string()).or_default();
        tables.insert(descriptor.name.clone(), MemTable { descriptor, rows });
        self
    }

    /// Seed a view, routine, trigger or event, described as `<kind> <name>`.
    pub fn add_object(&mut self, schema: &str, object: &str) -> &mut Self {
        self.objects
            .entry(schema.to_string())
            .or_default()
            .push(object.to_string());
        self
    }

    /// Simulate other clients with running queries in `schema`.
    pub fn set_active_connections(&mut self, schema: &str, count: u64) {
        self.activity.insert(schema.to_string(), count);
    }

    /// Make every subsequent call fail as if the server went away.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Make renaming `schema` fail.
    pub fn fail_rename_of(&mut self, schema: &str) {
        self.failing_renames.insert(schema.to_string());
    }

    /// Mutating statements executed so far, in order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains_key(schema)
    }

    /// Stored rows of a table, in insertion order.
    pub fn rows(&self, schema: &str, table: &str) -> Option<&[Row]> {
        self.schemas
            .get(schema)
            .and_then(|t| t.get(table))
            .map(|t| t.rows.as_slice())
    }

    /// Overwrite one cell, for staging discrepancies.
    pub fn set_cell(&mut self, schema: &str, table: &str, row: usize, column: &str, value: Value) -> Result<()> {
        let t = self.table_mut(schema, table)?;
        let idx = t
            .descriptor
            .column_index(column)
            .ok_or_else(|| MigrateError::Query(format!("unknown column `{}`", column)))?;
        let target = t
            .rows
            .get_mut(row)
            .ok_or_else(|| MigrateError::Query(format!("no row {} in `{}`", row, table)))?;
        target[idx] = value;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.unreachable {
            Err(MigrateError::Connection("memory backend marked unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn table(&self, schema: &str, table: &str) -> Result<&MemTable> {
        self.schemas
            .get(schema)
            .ok_or_else(|| MigrateError::SchemaNotFound(schema.to_string()))?
            .get(table)
            .ok_or_else(|| MigrateError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            })
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> Result<&mut MemTable> {
        self.schemas
            .get_mut(schema)
            .ok_or_else(|| MigrateError::SchemaNotFound(schema.to_string()))?
            .get_mut(table)
            .ok_or_else(|| MigrateError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            })
    }
}

fn project_key(row: &Row, positions: &[usize]) -> String {
    format_key(&positions.iter().map(|&i| row[i].clone()).collect::<Vec<_>>())
}

fn column_positions(descriptor: &TableDescriptor, columns: &[String]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            descriptor.column_index(c).ok_or_else(|| {
                MigrateError::Query(format!("unknown column `{}` in `{}`", c, descriptor.name))
            })
        })
        .collect()
}

#[async_trait]
impl Backend for MemoryBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        self.check()?;
        Ok(self.schemas.contains_key(schema))
    }

    async fn list_schemas(&mut self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .schemas
            .keys()
            .filter(|s| s.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn table_names(&mut self, schema: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .schemas
            .get(schema)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<TableDescriptor> {
        self.check()?;
        let t = self.table(schema, table)?;
        let mut descriptor = t.descriptor.clone();
        descriptor.row_count = t.rows.len() as u64;
        Ok(descriptor)
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        self.check()?;
        if self.schemas.contains_key(schema) {
            return Err(MigrateError::SchemaExists(schema.to_string()));
        }
        self.schemas.insert(schema.to_string(), BTreeMap::new());
        self.statements.push(Statement::CreateSchema(schema.to_string()));
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str) -> Result<()> {
        self.check()?;
        self.schemas.remove(schema);
        self.statements.push(Statement::DropSchema(schema.to_string()));
        Ok(())
    }

    async fn create_table_like(&mut self, source: &str, dest: &str, table: &str) -> Result<()> {
        self.check()?;
        let mut descriptor = self.table(source, table)?.descriptor.clone();
        descriptor.row_count = 0;
        // Like the SQL backends, only the table itself is copied.
        descriptor.foreign_keys.clear();
        let tables = self
            .schemas
            .get_mut(dest)
            .ok_or_else(|| MigrateError::SchemaNotFound(dest.to_string()))?;
        if tables.contains_key(table) {
            return Err(MigrateError::Query(format!(
                "table `{}`.`{}` already exists",
                dest, table
            )));
        }
        tables.insert(
            table.to_string(),
            MemTable {
                descriptor,
                rows: Vec::new(),
            },
        );
        self.statements.push(Statement::CreateTable {
            schema: dest.to_string(),
            table: table.to_string(),
        });
        Ok(())
    }

    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &TableDescriptor,
        selection: &RowSelection,
    ) -> Result<Vec<Row>> {
        self.check()?;
        let stored = self.table(schema, &table.name)?;
        let descriptor = &stored.descriptor;

        let mut rows: Vec<&Row> = stored
            .rows
            .iter()
            .filter(|r| {
                selection
                    .filter
                    .as_ref()
                    .is_none_or(|p| p.evaluate(descriptor, r))
            })
            .collect();

        let order = column_positions(descriptor, &selection.order_by)?;
        rows.sort_by(|a, b| {
            let ka: Vec<Value> = order.iter().map(|&i| a[i].clone()).collect();
            let kb: Vec<Value> = order.iter().map(|&i| b[i].clone()).collect();
            cmp_rows(&ka, &kb)
        });

        if let Some(limit) = selection.limit {
            rows.truncate(limit as usize);
        }

        let columns = if selection.columns.is_empty() {
            descriptor.column_names()
        } else {
            selection.columns.clone()
        };
        let projection = column_positions(descriptor, &columns)?;
        Ok(rows
            .into_iter()
            .map(|r| projection.iter().map(|&i| r[i].clone()).collect())
            .collect())
    }

    async fn add_foreign_key(&mut self, schema: &str, table: &str, fk: &ForeignKey) -> Result<()> {
        self.check()?;
        let target = self.table(fk.target_schema(schema), &fk.referenced_table)?;
        column_positions(&target.descriptor, &fk.referenced_columns)?;
        let t = self.table_mut(schema, table)?;
        column_positions(&t.descriptor, &fk.columns)?;
        if t.descriptor.foreign_keys.iter().any(|k| k.name == fk.name) {
            return Err(MigrateError::Query(format!(
                "duplicate foreign key `{}` on `{}`.`{}`",
                fk.name, schema, table
            )));
        }
        t.descriptor.foreign_keys.push(fk.clone());
        self.statements.push(Statement::AddForeignKey {
            schema: schema.to_string(),
            table: table.to_string(),
            name: fk.name.clone(),
        });
        Ok(())
    }

    async fn insert_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        self.check()?;
        let stored = self.table(schema, table)?;
        let descriptor = &stored.descriptor;
        let positions = column_positions(descriptor, columns)?;
        let key = descriptor.key_indices();
        let enforce_key = !descriptor.primary_key.is_empty();

        let mut seen: HashSet<String> = stored.rows.iter().map(|r| project_key(r, &key)).collect();

        let width = descriptor.columns.len();
        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            let mut full = vec![Value::Null; width];
            for (value, &pos) in row.iter().zip(&positions) {
                full[pos] = value.clone();
            }
            let k = project_key(&full, &key);
            if enforce_key && !seen.insert(k.clone()) {
                return Err(MigrateError::Query(format!(
                    "Duplicate entry {} for key 'PRIMARY' in `{}`.`{}`",
                    k, schema, table
                )));
            }
            staged.push(full);
        }

        for fk in &descriptor.foreign_keys {
            let target = self.table(fk.target_schema(schema), &fk.referenced_table)?;
            let target_idx = column_positions(&target.descriptor, &fk.referenced_columns)?;
            let mut known: HashSet<String> = target.rows.iter().map(|r| project_key(r, &target_idx)).collect();
            if fk.is_local() && fk.referenced_table == table {
                known.extend(staged.iter().map(|r| project_key(r, &target_idx)));
            }
            let own_idx = column_positions(descriptor, &fk.columns)?;
            for row in &staged {
                if own_idx.iter().any(|&i| row[i].is_null()) {
                    continue;
                }
                let k = project_key(row, &own_idx);
                if !known.contains(&k) {
                    return Err(MigrateError::Query(format!(
                        "Cannot add a child row {} to `{}`.`{}`: foreign key `{}` fails",
                        k, schema, table, fk.name
                    )));
                }
            }
        }

        let inserted = staged.len() as u64;
        self.table_mut(schema, table)?.rows.extend(staged);
        self.statements.push(Statement::Insert {
            schema: schema.to_string(),
            table: table.to_string(),
            rows: inserted,
        });
        Ok(inserted)
    }

    async fn rename_schema(&mut self, from: &str, to: &str) -> Result<()> {
        self.check()?;
        if self.failing_renames.contains(from) {
            return Err(MigrateError::Query(format!("rename of `{}` rejected", from)));
        }
        let blockers = self.rename_blockers(from).await?;
        if !blockers.is_empty() {
            return Err(MigrateError::Query(format!(
                "`{}` holds {}; they would be lost by the rename",
                from,
                blockers.join(", ")
            )));
        }
        if self.schemas.contains_key(to) {
            return Err(MigrateError::SchemaExists(to.to_string()));
        }
        let tables = self
            .schemas
            .remove(from)
            .ok_or_else(|| MigrateError::SchemaNotFound(from.to_string()))?;
        self.schemas.insert(to.to_string(), tables);
        if let Some(objects) = self.objects.remove(from) {
            self.objects.insert(to.to_string(), objects);
        }
        self.statements.push(Statement::RenameSchema {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    // Only MySQL moves tables one by one; a PostgreSQL schema rename keeps everything.
    async fn rename_blockers(&mut self, schema: &str) -> Result<Vec<String>> {
        self.check()?;
        if self.dialect == Dialect::Postgresql {
            return Ok(Vec::new());
        }
        Ok(self.objects.get(schema).cloned().unwrap_or_default())
    }

    async fn active_connections(&mut self, schema: &str) -> Result<u64> {
        self.check()?;
        Ok(self.activity.get(schema).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;

    fn subjects() -> TableDescriptor {
        TableDescriptor::new("subject").pk("id", "int").column("species", "varchar(32)")
    }

    fn seeded() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.add_table(
            "lab",
            subjects(),
            vec![
                vec![Value::Int(3), "rat".into()],
                vec![Value::Int(1), "mouse".into()],
                vec![Value::Int(2), "mouse".into()],
            ],
        );
        backend
    }

    #[tokio::test]
    async fn test_fetch_sorted_filtered_limited() {
        let mut backend = seeded();
        let table = subjects();
        let selection = RowSelection::ordered(&table)
            .filter(Some(Predicate::parse("species = 'mouse'").unwrap()))
            .limit(Some(1));
        let rows = backend.fetch_rows("lab", &table, &selection).await.unwrap();
        assert_eq!(rows, vec![vec![Value::Int(1), Value::from("mouse")]]);
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let mut backend = seeded();
        let cols = subjects().column_names();
        let rows = vec![vec![Value::Int(4), "frog".into()], vec![Value::Int(1), "dup".into()]];
        assert!(backend.insert_rows("lab", "subject", &cols, &rows).await.is_err());
        assert_eq!(backend.rows("lab", "subject").unwrap().len(), 3);
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let mut backend = seeded();
        let session = TableDescriptor::new("session")
            .pk("id", "int")
            .column("subject_id", "int")
            .foreign_key(ForeignKey::new("fk_subject", &["subject_id"], "subject", &["id"]));
        backend.add_table("lab", session, vec![]);
        let cols = vec!["id".to_string(), "subject_id".to_string()];

        let orphan = vec![vec![Value::Int(1), Value::Int(1)], vec![Value::Int(2), Value::Int(7)]];
        let err = backend.insert_rows("lab", "session", &cols, &orphan).await.unwrap_err();
        assert!(err.to_string().contains("fk_subject"));
        assert!(backend.rows("lab", "session").unwrap().is_empty());

        let ok = vec![vec![Value::Int(1), Value::Int(1)], vec![Value::Int(2), Value::Null]];
        assert_eq!(backend.insert_rows("lab", "session", &cols, &ok).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_table_like_drops_foreign_keys() {
        let mut backend = seeded();
        let session = TableDescriptor::new("session")
            .pk("id", "int")
            .foreign_key(ForeignKey::new("fk_subject", &["id"], "subject", &["id"]));
        backend.add_table("lab", session, vec![]);
        backend.add_schema("lab_v2");
        backend.create_table_like("lab", "lab_v2", "subject").await.unwrap();
        backend.create_table_like("lab", "lab_v2", "session").await.unwrap();
        assert!(backend.describe_table("lab_v2", "session").await.unwrap().foreign_keys.is_empty());

        let fk = ForeignKey::new("fk_subject", &["id"], "subject", &["id"]);
        backend.add_foreign_key("lab_v2", "session", &fk).await.unwrap();
        assert_eq!(
            backend.describe_table("lab_v2", "session").await.unwrap().foreign_keys,
            vec![fk.clone()]
        );
        assert!(backend.add_foreign_key("lab_v2", "session", &fk).await.is_err());
    }

    #[tokio::test]
    async fn test_rename_refuses_schema_with_views() {
        let mut backend = seeded();
        backend.add_object("lab", "view v_mice");
        assert_eq!(backend.rename_blockers("lab").await.unwrap(), vec!["view v_mice"]);
        assert!(backend.rename_schema("lab", "lab_old").await.is_err());
        assert!(backend.has_schema("lab"));

        let mut pg = MemoryBackend::with_dialect(Dialect::Postgresql);
        pg.add_schema("lab").add_object("lab", "view v_mice");
        pg.rename_schema("lab", "lab_old").await.unwrap();
        assert!(pg.has_schema("lab_old"));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let mut backend = seeded();
        backend.set_unreachable(true);
        let err = backend.table_names("lab").await.unwrap_err();
        assert!(matches!(err, MigrateError::Connection(_)));
    }

    #[tokio::test]
    async fn test_rename_logs_statement() {
        let mut backend = seeded();
        backend.rename_schema("lab", "lab_old").await.unwrap();
        assert!(backend.has_schema("lab_old"));
        assert!(!backend.has_schema("lab"));
        assert_eq!(
            backend.statements(),
            &[Statement::RenameSchema {
                from: "lab".into(),
                to: "lab_old".into()
            }]
        );
    }
}

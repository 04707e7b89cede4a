//! Catalog snapshots: table descriptors and column definitions.
//!
//! Descriptors are read from the backend's information schema each time a
//! component needs them and are never cached across phases.
//!
//! # Example
//! ```
//! use pipeline_migrate::catalog::TableDescriptor;
//!
//! let session = TableDescriptor::new("session")
//!     .pk("subject_id", "int")
//!     .pk("session_idx", "smallint")
//!     .column("session_date", "date");
//!
//! assert_eq!(session.primary_key, vec!["subject_id", "session_idx"]);
//! ```

use serde::Serialize;

/// Table definition with columns, key and row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_count: u64,
}

/// Column definition as declared in the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Full declared type, e.g. `int(10) unsigned` or `double precision`.
    pub column_type: String,
    pub nullable: bool,
    /// Column comment; the pipeline framework stores type markers here.
    pub comment: String,
}

/// Foreign-key constraint declared on a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    /// `None` when the referenced table lives in the same schema.
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl ForeignKey {
    /// Same-schema reference with the framework's default actions.
    pub fn new(name: &str, columns: &[&str], referenced_table: &str, referenced_columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_schema: None,
            referenced_table: referenced_table.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_update: "CASCADE".to_string(),
            on_delete: "RESTRICT".to_string(),
        }
    }

    /// Schema holding the referenced table, given the schema of the owning table.
    pub fn target_schema<'a>(&'a self, owner: &'a str) -> &'a str {
        self.referenced_schema.as_deref().unwrap_or(owner)
    }

    /// Whether the referenced table sits next to the owning table.
    pub fn is_local(&self) -> bool {
        self.referenced_schema.is_none()
    }

    /// Schema-independent description, e.g. `fk_subject(subject_id) -> subject(subject_id)`.
    pub fn signature(&self) -> String {
        let target = match &self.referenced_schema {
            Some(schema) => format!("{}.{}", schema, self.referenced_table),
            None => self.referenced_table.clone(),
        };
        format!(
            "{}({}) -> {}({})",
            self.name,
            self.columns.join(", "),
            target,
            self.referenced_columns.join(", ")
        )
    }
}

impl TableDescriptor {
    /// Create a new table descriptor.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            row_count: 0,
        }
    }

    /// Builder: add a nullable column.
    pub fn column(mut self, name: &str, column_type: &str) -> Self {
        self.columns.push(ColumnInfo::new(name, column_type));
        self
    }

    /// Builder: add a primary key column.
    pub fn pk(mut self, name: &str, column_type: &str) -> Self {
        let mut col = ColumnInfo::new(name, column_type);
        col.nullable = false;
        self.columns.push(col);
        self.primary_key.push(name.to_string());
        self
    }

    /// Builder: add a fully specified column.
    pub fn with_column(mut self, col: ColumnInfo) -> Self {
        self.columns.push(col);
        self
    }

    /// Builder: add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Same-schema tables this table references, excluding itself.
    pub fn parents(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.is_local() && fk.referenced_table != self.name)
            .map(|fk| fk.referenced_table.as_str())
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Columns that define a deterministic row order: the primary key, or
    /// every column when the table has none.
    pub fn order_columns(&self) -> Vec<String> {
        if self.primary_key.is_empty() {
            self.column_names()
        } else {
            self.primary_key.clone()
        }
    }

    /// Positions of [`order_columns`](Self::order_columns) within `columns`.
    pub fn key_indices(&self) -> Vec<usize> {
        self.order_columns()
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect()
    }
}

impl ColumnInfo {
    pub fn new(name: &str, column_type: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type: column_type.to_string(),
            nullable: true,
            comment: String::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
}

/// Table tier, inferred from the pipeline framework's naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableTier {
    Manual,
    Lookup,
    Imported,
    Computed,
    Part,
    Job,
}

impl TableTier {
    /// Classify a table by name.
    ///
    /// `~` marks job-queue tables, `#` lookup tables, `__` computed and `_`
    /// imported tables. A `__` after a master name marks a part table.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with('~') {
            return TableTier::Job;
        }
        let master = name.trim_start_matches(['#', '_']);
        if master.contains("__") {
            return TableTier::Part;
        }
        if name.starts_with('#') {
            TableTier::Lookup
        } else if name.starts_with("__") {
            TableTier::Computed
        } else if name.starts_with('_') {
            TableTier::Imported
        } else {
            TableTier::Manual
        }
    }
}

impl std::fmt::Display for TableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableTier::Manual => "manual",
            TableTier::Lookup => "lookup",
            TableTier::Imported => "imported",
            TableTier::Computed => "computed",
            TableTier::Part => "part",
            TableTier::Job => "job",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = TableDescriptor::new("trial")
            .pk("session_id", "int")
            .pk("trial_idx", "int")
            .column("duration", "double");

        assert_eq!(table.columns.len(), 3);
        assert!(!table.columns[0].nullable);
        assert!(table.columns[2].nullable);
        assert_eq!(table.key_indices(), vec![0, 1]);
    }

    #[test]
    fn test_order_columns_without_key() {
        let table = TableDescriptor::new("log").column("msg", "text").column("ts", "datetime");
        assert_eq!(table.order_columns(), vec!["msg", "ts"]);
    }

    #[test]
    fn test_foreign_key_parents() {
        let session = TableDescriptor::new("session")
            .pk("subject_id", "int")
            .pk("session_idx", "int")
            .foreign_key(ForeignKey::new("fk_subject", &["subject_id"], "subject", &["subject_id"]))
            .foreign_key(ForeignKey::new("fk_parent", &["session_idx"], "session", &["session_idx"]));
        assert_eq!(session.parents(), vec!["subject"]);
        assert_eq!(
            session.foreign_keys[0].signature(),
            "fk_subject(subject_id) -> subject(subject_id)"
        );
        assert_eq!(session.foreign_keys[0].target_schema("lab_v2"), "lab_v2");
    }

    #[test]
    fn test_tier_from_name() {
        assert_eq!(TableTier::from_name("subject"), TableTier::Manual);
        assert_eq!(TableTier::from_name("#stimulus_type"), TableTier::Lookup);
        assert_eq!(TableTier::from_name("_recording"), TableTier::Imported);
        assert_eq!(TableTier::from_name("__spike_sort"), TableTier::Computed);
        assert_eq!(TableTier::from_name("__spike_sort__unit"), TableTier::Part);
        assert_eq!(TableTier::from_name("~jobs"), TableTier::Job);
    }
}

//! Schema cloner: builds a destination schema with the source's table structures.

use serde::Serialize;

use crate::backend::Backend;
use crate::copy::{CopyOptions, CopyReport, copy_table_data};
use crate::error::{MigrateError, Result};
use crate::introspect::{ListingMode, dependency_order, list_tables};

/// What to do when the destination schema already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistingSchemaPolicy {
    /// Refuse before running any statement.
    #[default]
    Fail,
    /// Create only the tables the destination is missing.
    SkipExisting,
}

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Fill each newly created table from the source.
    pub copy_data: bool,
    pub on_existing: ExistingSchemaPolicy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloneReport {
    pub tables_created: Vec<String>,
    pub tables_skipped: Vec<String>,
    /// Foreign keys recreated in the destination, as `table.constraint`.
    pub foreign_keys_added: Vec<String>,
    pub copies: Vec<CopyReport>,
}

impl CloneReport {
    pub fn rows_copied(&self) -> u64 {
        self.copies.iter().map(|c| c.rows_copied).sum()
    }
}

/// Create `dest` with the same tables as `source`.
///
/// Tables are created in alphabetical order and filled parents first.
/// Foreign keys are added last, pointing at the destination's own tables.
/// Existing destination tables keep their rows: with
/// [`ExistingSchemaPolicy::SkipExisting`] they are reported in
/// `tables_skipped` and only receive foreign keys they lack.
pub async fn create_parallel_schema<B: Backend + ?Sized>(
    backend: &mut B,
    source: &str,
    dest: &str,
    options: &CloneOptions,
) -> Result<CloneReport> {
    if !backend.schema_exists(source).await? {
        return Err(MigrateError::SchemaNotFound(source.to_string()));
    }

    let existing = if backend.schema_exists(dest).await? {
        if options.on_existing == ExistingSchemaPolicy::Fail {
            return Err(MigrateError::SchemaExists(dest.to_string()));
        }
        list_tables(backend, dest, ListingMode::Structural).await?
    } else {
        backend.create_schema(dest).await?;
        Vec::new()
    };

    let mut report = CloneReport::default();
    let tables = list_tables(backend, source, ListingMode::Structural).await?;
    for table in &tables {
        if existing.contains(table) {
            tracing::debug!(dest, table = %table, "table already present");
            report.tables_skipped.push(table.clone());
            continue;
        }
        backend.create_table_like(source, dest, table).await?;
        report.tables_created.push(table.clone());
    }

    if options.copy_data {
        for table in dependency_order(backend, source, report.tables_created.clone()).await? {
            let copy = copy_table_data(backend, source, dest, &table, &CopyOptions::default()).await?;
            report.copies.push(copy);
        }
    }

    for table in &tables {
        let wanted = backend.describe_table(source, table).await?.foreign_keys;
        let present = backend.describe_table(dest, table).await?.foreign_keys;
        for fk in wanted.iter().filter(|fk| !present.iter().any(|p| p.name == fk.name)) {
            backend.add_foreign_key(dest, table, fk).await?;
            report.foreign_keys_added.push(format!("{}.{}", table, fk.name));
        }
    }

    tracing::info!(
        source,
        dest,
        created = report.tables_created.len(),
        skipped = report.tables_skipped.len(),
        foreign_keys = report.foreign_keys_added.len(),
        "cloned schema"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Statement};
    use crate::catalog::{ForeignKey, TableDescriptor};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn with_session(mut b: MemoryBackend) -> MemoryBackend {
        b.add_table(
            "lab",
            TableDescriptor::new("acquisition")
                .pk("subject_id", "int")
                .column("species", "varchar(16)")
                .foreign_key(ForeignKey::new("fk_subject", &["subject_id"], "subject", &["subject_id"]))
                .foreign_key(ForeignKey::new("fk_species", &["species"], "#species", &["name"])),
            vec![vec![Value::Int(2), Value::Null]],
        );
        b
    }

    fn lab() -> MemoryBackend {
        let mut b = MemoryBackend::new();
        b.add_table(
            "lab",
            TableDescriptor::new("subject").pk("subject_id", "int"),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        b.add_table("lab", TableDescriptor::new("~jobs").pk("key_hash", "char(32)"), vec![]);
        b.add_table("lab", TableDescriptor::new("#species").pk("name", "varchar(16)"), vec![]);
        b
    }

    #[tokio::test]
    async fn test_structure_only_clone() {
        let mut b = lab();
        let report = create_parallel_schema(&mut b, "lab", "lab_v2", &CloneOptions::default())
            .await
            .unwrap();

        let source_tables = list_tables(&mut b, "lab", ListingMode::Structural).await.unwrap();
        assert_eq!(report.tables_created, source_tables);
        for table in &source_tables {
            assert!(b.rows("lab_v2", table).unwrap().is_empty());
        }
        assert!(report.copies.is_empty());
    }

    #[tokio::test]
    async fn test_clone_with_data() {
        let mut b = lab();
        let options = CloneOptions {
            copy_data: true,
            ..CloneOptions::default()
        };
        let report = create_parallel_schema(&mut b, "lab", "lab_v2", &options).await.unwrap();
        assert_eq!(report.rows_copied(), 2);
        assert_eq!(b.rows("lab_v2", "subject").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_dest_fails_before_any_statement() {
        let mut b = lab();
        b.add_schema("lab_v2");
        let err = create_parallel_schema(&mut b, "lab", "lab_v2", &CloneOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaExists(_)));
        assert!(b.statements().is_empty());
    }

    #[tokio::test]
    async fn test_skip_existing_creates_only_missing() {
        let mut b = lab();
        b.add_table("lab_v2", TableDescriptor::new("subject").pk("subject_id", "int"), vec![]);
        let options = CloneOptions {
            copy_data: false,
            on_existing: ExistingSchemaPolicy::SkipExisting,
        };
        let report = create_parallel_schema(&mut b, "lab", "lab_v2", &options).await.unwrap();
        assert_eq!(report.tables_skipped, vec!["subject"]);
        assert_eq!(report.tables_created, vec!["#species", "~jobs"]);
        assert!(!b.statements().contains(&Statement::CreateSchema("lab_v2".into())));
    }

    #[tokio::test]
    async fn test_foreign_keys_follow_into_destination() {
        let mut b = with_session(lab());
        let options = CloneOptions {
            copy_data: true,
            ..CloneOptions::default()
        };
        let report = create_parallel_schema(&mut b, "lab", "lab_v2", &options).await.unwrap();
        assert_eq!(report.foreign_keys_added, vec!["acquisition.fk_subject", "acquisition.fk_species"]);
        // `acquisition` sorts first but is filled after the tables it references.
        let copied: Vec<&str> = report.copies.iter().map(|c| c.table.as_str()).collect();
        assert_eq!(copied, vec!["#species", "subject", "acquisition", "~jobs"]);

        let source = b.describe_table("lab", "acquisition").await.unwrap();
        let dest = b.describe_table("lab_v2", "acquisition").await.unwrap();
        assert_eq!(dest.foreign_keys, source.foreign_keys);
        assert_eq!(dest.foreign_keys[0].target_schema("lab_v2"), "lab_v2");
    }

    #[tokio::test]
    async fn test_rerun_adds_only_missing_foreign_keys() {
        let mut b = with_session(lab());
        b.add_schema("lab_v2");
        for table in ["#species", "acquisition", "subject", "~jobs"] {
            b.create_table_like("lab", "lab_v2", table).await.unwrap();
        }
        let fk = ForeignKey::new("fk_subject", &["subject_id"], "subject", &["subject_id"]);
        b.add_foreign_key("lab_v2", "acquisition", &fk).await.unwrap();

        let options = CloneOptions {
            copy_data: false,
            on_existing: ExistingSchemaPolicy::SkipExisting,
        };
        let report = create_parallel_schema(&mut b, "lab", "lab_v2", &options).await.unwrap();
        assert!(report.tables_created.is_empty());
        assert_eq!(report.foreign_keys_added, vec!["acquisition.fk_species"]);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let mut b = lab();
        let err = create_parallel_schema(&mut b, "nope", "nope_v2", &CloneOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaNotFound(_)));
    }
}

//! Schema introspection.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::backend::Backend;
use crate::catalog::{TableDescriptor, TableTier};
use crate::error::Result;

/// Which tables a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    /// Hide job-queue (`~`) and lookup/part-marker (`#`) tables.
    UserVisible,
    /// Tables whose rows are pipeline data: everything except job queues (`~`).
    Data,
    /// Every table, for structural comparison.
    Structural,
}

impl ListingMode {
    pub fn includes(&self, table: &str) -> bool {
        match self {
            ListingMode::Structural => true,
            ListingMode::UserVisible => !(table.starts_with('~') || table.starts_with('#')),
            ListingMode::Data => !table.starts_with('~'),
        }
    }
}

/// Table names in `schema`, alphabetical. A schema with no tables yields an
/// empty list.
pub async fn list_tables<B: Backend + ?Sized>(
    backend: &mut B,
    schema: &str,
    mode: ListingMode,
) -> Result<Vec<String>> {
    let tables: Vec<String> = backend
        .table_names(schema)
        .await?
        .into_iter()
        .filter(|t| mode.includes(t))
        .collect();
    tracing::debug!(schema, ?mode, count = tables.len(), "listed tables");
    Ok(tables)
}

/// Current descriptor of one table.
pub async fn describe_table<B: Backend + ?Sized>(
    backend: &mut B,
    schema: &str,
    table: &str,
) -> Result<TableDescriptor> {
    backend.describe_table(schema, table).await
}

/// Reorder `tables` so every table comes after the same-schema tables its
/// foreign keys reference. Ties stay alphabetical; tables caught in a cycle
/// are appended alphabetically.
pub async fn dependency_order<B: Backend + ?Sized>(
    backend: &mut B,
    schema: &str,
    tables: Vec<String>,
) -> Result<Vec<String>> {
    let wanted: BTreeSet<String> = tables.into_iter().collect();
    let mut pending: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for table in &wanted {
        let descriptor = backend.describe_table(schema, table).await?;
        let parents = descriptor
            .parents()
            .into_iter()
            .filter(|p| wanted.contains(*p))
            .map(str::to_string)
            .collect();
        pending.insert(table.clone(), parents);
    }

    let mut ordered = Vec::with_capacity(pending.len());
    while let Some(next) = pending
        .iter()
        .find(|(_, parents)| parents.is_empty())
        .map(|(name, _)| name.clone())
    {
        pending.remove(&next);
        for parents in pending.values_mut() {
            parents.remove(&next);
        }
        ordered.push(next);
    }
    if !pending.is_empty() {
        tracing::warn!(schema, tables = ?pending.keys().collect::<Vec<_>>(), "foreign key cycle");
        ordered.extend(pending.into_keys());
    }
    Ok(ordered)
}

/// One line of a schema summary.
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub tier: TableTier,
    pub row_count: u64,
}

/// Tier and row count for every structural table in `schema`.
pub async fn summarize_schema<B: Backend + ?Sized>(backend: &mut B, schema: &str) -> Result<Vec<TableSummary>> {
    let mut out = Vec::new();
    for name in list_tables(backend, schema, ListingMode::Structural).await? {
        let descriptor = backend.describe_table(schema, &name).await?;
        out.push(TableSummary {
            tier: TableTier::from_name(&name),
            row_count: descriptor.row_count,
            name,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalog::ForeignKey;
    use crate::error::MigrateError;
    use crate::value::Value;

    fn backend() -> MemoryBackend {
        let mut b = MemoryBackend::new();
        for name in ["session", "~jobs", "#stimulus", "_recording", "subject"] {
            b.add_table("lab", TableDescriptor::new(name).pk("id", "int"), vec![]);
        }
        b.add_table(
            "lab",
            TableDescriptor::new("__spikes").pk("id", "int"),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        b
    }

    #[tokio::test]
    async fn test_user_visible_hides_internal_tables() {
        let mut b = backend();
        let tables = list_tables(&mut b, "lab", ListingMode::UserVisible).await.unwrap();
        assert_eq!(tables, vec!["__spikes", "_recording", "session", "subject"]);
    }

    #[tokio::test]
    async fn test_structural_includes_everything() {
        let mut b = backend();
        let tables = list_tables(&mut b, "lab", ListingMode::Structural).await.unwrap();
        assert_eq!(tables.len(), 6);
        assert!(tables.contains(&"~jobs".to_string()));
        assert!(tables.contains(&"#stimulus".to_string()));
    }

    #[tokio::test]
    async fn test_data_mode_keeps_lookups() {
        let mut b = backend();
        let tables = list_tables(&mut b, "lab", ListingMode::Data).await.unwrap();
        assert_eq!(tables, vec!["#stimulus", "__spikes", "_recording", "session", "subject"]);
    }

    #[tokio::test]
    async fn test_dependency_order_puts_parents_first() {
        let mut b = MemoryBackend::new();
        b.add_table(
            "lab",
            TableDescriptor::new("#species").pk("name", "varchar(16)"),
            vec![],
        );
        b.add_table(
            "lab",
            TableDescriptor::new("animal")
                .pk("animal_id", "int")
                .column("species", "varchar(16)")
                .foreign_key(ForeignKey::new("fk_species", &["species"], "#species", &["name"])),
            vec![],
        );
        b.add_table(
            "lab",
            TableDescriptor::new("a_session")
                .pk("animal_id", "int")
                .foreign_key(ForeignKey::new("fk_animal", &["animal_id"], "animal", &["animal_id"])),
            vec![],
        );
        b.add_table("lab", TableDescriptor::new("rig").pk("rig_id", "int"), vec![]);

        let tables = list_tables(&mut b, "lab", ListingMode::Data).await.unwrap();
        assert_eq!(tables, vec!["#species", "a_session", "animal", "rig"]);
        let ordered = dependency_order(&mut b, "lab", tables).await.unwrap();
        assert_eq!(ordered, vec!["#species", "animal", "a_session", "rig"]);
    }

    #[tokio::test]
    async fn test_empty_and_unreachable() {
        let mut b = backend();
        b.add_schema("empty");
        assert!(list_tables(&mut b, "empty", ListingMode::Structural).await.unwrap().is_empty());

        b.set_unreachable(true);
        let err = list_tables(&mut b, "lab", ListingMode::UserVisible).await.unwrap_err();
        assert!(matches!(err, MigrateError::Connection(_)));
    }

    #[tokio::test]
    async fn test_summarize() {
        let mut b = backend();
        let summary = summarize_schema(&mut b, "lab").await.unwrap();
        let spikes = summary.iter().find(|s| s.name == "__spikes").unwrap();
        assert_eq!(spikes.tier, TableTier::Computed);
        assert_eq!(spikes.row_count, 2);
    }
}

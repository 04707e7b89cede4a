//! Compatibility verifier for target-version column conventions.
//!
//! The pipeline framework records a column's logical type as a marker at the
//! start of the column comment, e.g. `:uint32:trial number` or
//! `:<djblob>:raw trace`. Read-only.

use std::fmt;

use serde::Serialize;

use crate::backend::Backend;
use crate::catalog::{ColumnInfo, TableDescriptor};
use crate::error::{MigrateError, Result};
use crate::introspect::{ListingMode, list_tables};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityIssue {
    pub table: String,
    pub column: Option<String>,
    pub message: String,
}

impl fmt::Display for CompatibilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(c) => write!(f, "{}.{}: {}", self.table, c, self.message),
            None => write!(f, "{}: {}", self.table, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub issues: Vec<CompatibilityIssue>,
}

/// The `:...:` type marker at the start of a column comment, without colons.
fn type_marker(comment: &str) -> Option<&str> {
    let rest = comment.strip_prefix(':')?;
    let end = rest.find(':')?;
    Some(&rest[..end])
}

/// Core unsigned type replacing a legacy `<int type> unsigned` declaration.
fn unsigned_replacement(column_type: &str) -> Option<&'static str> {
    let ty = column_type.to_ascii_lowercase();
    if !ty.contains("unsigned") {
        return None;
    }
    let base = ty.split(['(', ' ']).next().unwrap_or_default();
    match base {
        "tinyint" => Some("uint8"),
        "smallint" => Some("uint16"),
        "mediumint" | "int" | "integer" => Some("uint32"),
        "bigint" => Some("uint64"),
        _ => None,
    }
}

fn is_blob(column_type: &str) -> bool {
    let ty = column_type.to_ascii_lowercase();
    matches!(ty.as_str(), "tinyblob" | "blob" | "mediumblob" | "longblob" | "bytea")
}

fn check_column(column: &ColumnInfo) -> Option<String> {
    let marker = type_marker(&column.comment);

    if marker.is_some_and(|m| m.starts_with("external")) {
        return Some("legacy external storage; use `<blob@store>`".to_string());
    }
    if marker.is_some_and(|m| m.starts_with("attach")) {
        return Some("legacy attachment; use `<attach@store>`".to_string());
    }
    if let Some(replacement) = unsigned_replacement(&column.column_type) {
        let declared = marker.is_some_and(|m| m.starts_with("uint"));
        if !declared {
            return Some(format!("`{}`; use {}", column.column_type, replacement));
        }
    }
    if is_blob(&column.column_type) && !marker.is_some_and(|m| m.starts_with('<')) {
        return Some("blob without codec; declare `<djblob>`".to_string());
    }
    None
}

/// Issues for one table.
pub fn check_table(table: &TableDescriptor) -> Vec<CompatibilityIssue> {
    let mut issues = Vec::new();
    if table.primary_key.is_empty() {
        issues.push(CompatibilityIssue {
            table: table.name.clone(),
            column: None,
            message: "no primary key".to_string(),
        });
    }
    for column in &table.columns {
        if let Some(message) = check_column(column) {
            issues.push(CompatibilityIssue {
                table: table.name.clone(),
                column: Some(column.name.clone()),
                message,
            });
        }
    }
    issues
}

/// Check every column of every table in `schema`.
pub async fn verify_schema_v20<B: Backend + ?Sized>(backend: &mut B, schema: &str) -> Result<CompatibilityReport> {
    if !backend.schema_exists(schema).await? {
        return Err(MigrateError::SchemaNotFound(schema.to_string()));
    }

    let mut issues = Vec::new();
    for name in list_tables(backend, schema, ListingMode::Structural).await? {
        let table = backend.describe_table(schema, &name).await?;
        issues.extend(check_table(&table));
    }

    tracing::info!(schema, issues = issues.len(), "verified compatibility");
    Ok(CompatibilityReport {
        compatible: issues.is_empty(),
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn messages(table: &TableDescriptor) -> Vec<String> {
        check_table(table).into_iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_type_marker() {
        assert_eq!(type_marker(":uint32:trial number"), Some("uint32"));
        assert_eq!(type_marker(":<djblob>:"), Some("<djblob>"));
        assert_eq!(type_marker("plain comment"), None);
        assert_eq!(type_marker(":unterminated"), None);
    }

    #[test]
    fn test_unsigned() {
        let legacy = TableDescriptor::new("trial").pk("trial_id", "int(10) unsigned");
        assert_eq!(messages(&legacy), vec!["trial.trial_id: `int(10) unsigned`; use uint32"]);

        let declared = TableDescriptor::new("trial")
            .with_column(ColumnInfo::new("trial_id", "int unsigned").not_null().comment(":uint32:"));
        let declared = TableDescriptor {
            primary_key: vec!["trial_id".into()],
            ..declared
        };
        assert!(check_table(&declared).is_empty());
    }

    #[test]
    fn test_legacy_storage_and_blobs() {
        let table = TableDescriptor::new("recording")
            .pk("id", "int")
            .with_column(ColumnInfo::new("raw", "binary(16)").comment(":external-raw:raw trace"))
            .with_column(ColumnInfo::new("notes", "binary(16)").comment(":attach:"))
            .with_column(ColumnInfo::new("waveform", "longblob"))
            .with_column(ColumnInfo::new("image", "longblob").comment(":<djblob>:"));
        let issues = check_table(&table);
        let flagged: Vec<_> = issues.iter().filter_map(|i| i.column.as_deref()).collect();
        assert_eq!(flagged, vec!["raw", "notes", "waveform"]);
        assert!(issues[0].message.contains("<blob@store>"));
        assert!(issues[1].message.contains("<attach@store>"));
        assert!(issues[2].message.contains("<djblob>"));
    }

    #[tokio::test]
    async fn test_verify_schema() {
        let mut b = MemoryBackend::new();
        b.add_table("lab", TableDescriptor::new("subject").pk("subject_id", "varchar(8)"), vec![]);
        let report = verify_schema_v20(&mut b, "lab").await.unwrap();
        assert!(report.compatible);

        b.add_table("lab", TableDescriptor::new("log").column("msg", "text"), vec![]);
        let report = verify_schema_v20(&mut b, "lab").await.unwrap();
        assert!(!report.compatible);
        assert_eq!(report.issues[0].to_string(), "log: no primary key");
        assert!(b.statements().is_empty());
    }
}

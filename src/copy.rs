//! Row copier: moves one table's rows from a source schema to a destination.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

use crate::backend::{Backend, RowSelection};
use crate::catalog::TableDescriptor;
use crate::error::{MigrateError, Result};
use crate::predicate::Predicate;
use crate::value::{Row, format_key};

/// Optional bounds on a table copy.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Copy at most this many rows, lowest keys first.
    pub limit: Option<u64>,
    /// Filter predicate over the source table's columns.
    pub where_clause: Option<String>,
}

/// Outcome of copying one table.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub table: String,
    pub rows_copied: u64,
    /// Selected rows left out because a row they reference was not copied.
    pub orphans_skipped: u64,
    #[serde(rename = "time_taken", serialize_with = "as_secs")]
    pub time_taken: Duration,
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Copy rows of `table` from `source_schema` into `dest_schema`.
///
/// Rows are selected in key order, so a given `limit` always picks the same
/// rows. The filter is validated before any data is read. A duplicate key,
/// either within the selection or against rows already in the destination,
/// fails the table before anything is inserted; the insert itself is a
/// single transaction.
pub async fn copy_table_data<B: Backend + ?Sized>(
    backend: &mut B,
    source_schema: &str,
    dest_schema: &str,
    table: &str,
    options: &CopyOptions,
) -> Result<CopyReport> {
    let started = Instant::now();

    let source = backend.describe_table(source_schema, table).await?;
    let dest = backend.describe_table(dest_schema, table).await?;

    let filter = match &options.where_clause {
        Some(clause) => Some(Predicate::parse_for(clause, &source)?),
        None => None,
    };

    let missing: Vec<&str> = source
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|c| !dest.has_column(c))
        .collect();
    if !missing.is_empty() {
        return Err(MigrateError::Verification(format!(
            "`{}`.`{}` lacks column(s) {}",
            dest_schema,
            table,
            missing.join(", ")
        )));
    }

    let selection = RowSelection::ordered(&source)
        .filter(filter)
        .limit(options.limit);
    let mut rows = backend.fetch_rows(source_schema, &source, &selection).await?;

    // A bounded or filtered sample can select rows whose parents were not
    // copied; the destination's foreign keys would reject them.
    let mut orphans_skipped = 0u64;
    for fk in &dest.foreign_keys {
        let Some(own_idx) = positions(&source, &fk.columns) else {
            continue;
        };
        let target_schema = fk.target_schema(dest_schema);
        let parent = backend.describe_table(target_schema, &fk.referenced_table).await?;
        let parent_keys = RowSelection {
            columns: fk.referenced_columns.clone(),
            ..RowSelection::default()
        };
        let mut known: HashSet<String> = backend
            .fetch_rows(target_schema, &parent, &parent_keys)
            .await?
            .iter()
            .map(|k| format_key(k))
            .collect();
        if fk.is_local() && fk.referenced_table == table {
            if let Some(ref_idx) = positions(&source, &fk.referenced_columns) {
                known.extend(rows.iter().map(|r| project(r, &ref_idx)));
            }
        }
        let before = rows.len();
        rows.retain(|r| own_idx.iter().any(|&i| r[i].is_null()) || known.contains(&project(r, &own_idx)));
        orphans_skipped += (before - rows.len()) as u64;
    }
    if orphans_skipped > 0 {
        tracing::warn!(table, dest_schema, orphans_skipped, "skipped rows whose parents were not copied");
    }

    // Key conflicts are detected up front so the failure names the row.
    if !source.primary_key.is_empty() {
        let key_idx = source.key_indices();
        let mut seen: HashSet<String> = if dest.row_count > 0 {
            backend
                .fetch_rows(dest_schema, &dest, &RowSelection::keys(&dest))
                .await?
                .iter()
                .map(|k| format_key(k))
                .collect()
        } else {
            HashSet::new()
        };
        for row in &rows {
            let key = project(row, &key_idx);
            if !seen.insert(key.clone()) {
                return Err(MigrateError::Conflict {
                    schema: dest_schema.to_string(),
                    table: table.to_string(),
                    key,
                });
            }
        }
    }

    let columns = source.column_names();
    let rows_copied = backend.insert_rows(dest_schema, table, &columns, &rows).await?;
    let report = CopyReport {
        table: table.to_string(),
        rows_copied,
        orphans_skipped,
        time_taken: started.elapsed(),
    };
    tracing::info!(
        table,
        source_schema,
        dest_schema,
        rows = report.rows_copied,
        secs = report.time_taken.as_secs_f64(),
        "copied table"
    );
    Ok(report)
}

fn positions(table: &TableDescriptor, columns: &[String]) -> Option<Vec<usize>> {
    columns.iter().map(|c| table.column_index(c)).collect()
}

fn project(row: &Row, idx: &[usize]) -> String {
    format_key(&idx.iter().map(|&i| row[i].clone()).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Statement};
    use crate::catalog::ForeignKey;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn trial() -> TableDescriptor {
        TableDescriptor::new("trial").pk("trial_id", "int").column("outcome", "varchar(16)")
    }

    fn backend(rows: usize) -> MemoryBackend {
        let mut b = MemoryBackend::new();
        // Seeded out of key order on purpose.
        let data = (0..rows)
            .rev()
            .map(|i| vec![Value::Int(i as i64), if i % 2 == 0 { "hit" } else { "miss" }.into()])
            .collect();
        b.add_table("prod", trial(), data);
        b.add_table("test", trial(), vec![]);
        b
    }

    fn keys(b: &MemoryBackend) -> Vec<Value> {
        b.rows("test", "trial").unwrap().iter().map(|r| r[0].clone()).collect()
    }

    #[tokio::test]
    async fn test_copy_all() {
        let mut b = backend(5);
        let report = copy_table_data(&mut b, "prod", "test", "trial", &CopyOptions::default())
            .await
            .unwrap();
        assert_eq!(report.rows_copied, 5);
        assert_eq!(b.rows("test", "trial").unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_limit_is_deterministic() {
        let options = CopyOptions {
            limit: Some(3),
            where_clause: None,
        };
        let mut first = backend(10);
        copy_table_data(&mut first, "prod", "test", "trial", &options).await.unwrap();
        let mut second = backend(10);
        copy_table_data(&mut second, "prod", "test", "trial", &options).await.unwrap();

        assert_eq!(keys(&first), vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
        assert_eq!(keys(&first), keys(&second));
    }

    #[tokio::test]
    async fn test_where_clause() {
        let mut b = backend(6);
        let options = CopyOptions {
            limit: None,
            where_clause: Some("outcome = 'hit'".into()),
        };
        let report = copy_table_data(&mut b, "prod", "test", "trial", &options).await.unwrap();
        assert_eq!(report.rows_copied, 3);
        assert_eq!(keys(&b), vec![Value::Int(0), Value::Int(2), Value::Int(4)]);
    }

    #[tokio::test]
    async fn test_invalid_where_fails_before_reading() {
        let mut b = backend(3);
        let options = CopyOptions {
            limit: None,
            where_clause: Some("mouse = 1".into()),
        };
        let err = copy_table_data(&mut b, "prod", "test", "trial", &options).await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidPredicate(_)));
        assert!(b.statements().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_names_row_and_copies_nothing() {
        let mut b = backend(3);
        b.add_table("test", trial(), vec![vec![Value::Int(1), "miss".into()]]);

        let err = copy_table_data(&mut b, "prod", "test", "trial", &CopyOptions::default())
            .await
            .unwrap_err();
        match err {
            MigrateError::Conflict { key, .. } => assert_eq!(key, "(1)"),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(b.rows("test", "trial").unwrap().len(), 1);
        assert!(!b.statements().iter().any(|s| matches!(s, Statement::Insert { .. })));
    }

    #[tokio::test]
    async fn test_limited_sample_skips_orphans() {
        let mut b = MemoryBackend::new();
        let subject = TableDescriptor::new("subject").pk("subject_id", "int");
        let session = TableDescriptor::new("session")
            .pk("session_id", "int")
            .column("subject_id", "int")
            .foreign_key(ForeignKey::new("fk_subject", &["subject_id"], "subject", &["subject_id"]));
        b.add_table("prod", subject.clone(), (1..=3).map(|i| vec![Value::Int(i)]).collect());
        b.add_table(
            "prod",
            session.clone(),
            vec![
                vec![Value::Int(1), Value::Int(3)],
                vec![Value::Int(2), Value::Int(1)],
                vec![Value::Int(3), Value::Null],
            ],
        );
        b.add_table("test", subject, vec![]);
        b.add_table("test", session, vec![]);

        let options = CopyOptions {
            limit: Some(2),
            where_clause: None,
        };
        copy_table_data(&mut b, "prod", "test", "subject", &options).await.unwrap();
        let options = CopyOptions {
            limit: None,
            where_clause: None,
        };
        let report = copy_table_data(&mut b, "prod", "test", "session", &options).await.unwrap();
        assert_eq!(report.rows_copied, 2);
        assert_eq!(report.orphans_skipped, 1);
        let kept: Vec<Value> = b.rows("test", "session").unwrap().iter().map(|r| r[0].clone()).collect();
        assert_eq!(kept, vec![Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let mut b = backend(1);
        let err = copy_table_data(&mut b, "prod", "test", "session", &CopyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::TableNotFound { .. }));
    }
}

//! Schema-level backup and restore.
//!
//! A backup is a full structure and data clone named
//! `<schema>_backup_<YYYYMMDD_HHMMSS>`.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use serde::Serialize;

use crate::backend::Backend;
use crate::clone::{CloneOptions, ExistingSchemaPolicy, create_parallel_schema};
use crate::error::{MigrateError, Result};

const BACKUP_INFIX: &str = "_backup_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub backup_name: String,
    pub tables_backed_up: usize,
    pub rows_copied: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub target: String,
    pub tables_restored: usize,
    pub rows_copied: u64,
}

/// Backup name for `schema` taken at `now`.
pub fn backup_name_for<Tz: TimeZone>(schema: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}{}", schema, BACKUP_INFIX, now.format(TIMESTAMP_FORMAT))
}

/// Split a backup name into its schema and timestamp.
pub fn parse_backup_name(name: &str) -> Result<(&str, NaiveDateTime)> {
    let invalid = || MigrateError::InvalidBackupName(name.to_string());
    let (schema, stamp) = name.rsplit_once(BACKUP_INFIX).ok_or_else(invalid)?;
    if schema.is_empty() || stamp.len() != 15 {
        return Err(invalid());
    }
    let taken = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    Ok((schema, taken))
}

fn full_copy() -> CloneOptions {
    CloneOptions {
        copy_data: true,
        on_existing: ExistingSchemaPolicy::Fail,
    }
}

/// Clone `schema` with its data into `backup_name`.
pub async fn backup_schema<B: Backend + ?Sized>(
    backend: &mut B,
    schema: &str,
    backup_name: &str,
) -> Result<BackupReport> {
    let (owner, _) = parse_backup_name(backup_name)?;
    if owner != schema {
        return Err(MigrateError::InvalidBackupName(backup_name.to_string()));
    }

    let report = create_parallel_schema(backend, schema, backup_name, &full_copy()).await?;
    tracing::info!(schema, backup_name, tables = report.tables_created.len(), "backup complete");
    Ok(BackupReport {
        backup_name: backup_name.to_string(),
        tables_backed_up: report.tables_created.len(),
        rows_copied: report.rows_copied(),
    })
}

/// Clone `backup_name` with its data into `target`, which must not exist.
pub async fn restore_schema<B: Backend + ?Sized>(
    backend: &mut B,
    backup_name: &str,
    target: &str,
) -> Result<RestoreReport> {
    parse_backup_name(backup_name)?;
    let report = create_parallel_schema(backend, backup_name, target, &full_copy()).await?;
    tracing::info!(backup_name, target, tables = report.tables_created.len(), "restore complete");
    Ok(RestoreReport {
        target: target.to_string(),
        tables_restored: report.tables_created.len(),
        rows_copied: report.rows_copied(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalog::TableDescriptor;
    use crate::value::Value;
    use chrono::Utc;

    #[test]
    fn test_backup_name() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 9).unwrap();
        let name = backup_name_for("my_pipeline", &now);
        assert_eq!(name, "my_pipeline_backup_20260307_140509");

        let (schema, taken) = parse_backup_name(&name).unwrap();
        assert_eq!(schema, "my_pipeline");
        assert_eq!(taken, now.naive_utc());
    }

    #[test]
    fn test_invalid_backup_names() {
        for name in ["my_pipeline", "my_pipeline_backup_2026", "_backup_20260307_140509", "x_backup_20261307_140509"] {
            assert!(
                matches!(parse_backup_name(name), Err(MigrateError::InvalidBackupName(_))),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let mut b = MemoryBackend::new();
        b.add_table(
            "lab",
            TableDescriptor::new("subject").pk("subject_id", "int"),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        b.add_table("lab", TableDescriptor::new("session").pk("session_id", "int"), vec![]);

        let backup = backup_schema(&mut b, "lab", "lab_backup_20260101_000000").await.unwrap();
        assert_eq!(backup.tables_backed_up, 2);
        assert_eq!(backup.rows_copied, 2);

        let err = restore_schema(&mut b, "lab_backup_20260101_000000", "lab").await.unwrap_err();
        assert!(matches!(err, MigrateError::SchemaExists(_)));

        let restored = restore_schema(&mut b, "lab_backup_20260101_000000", "lab_restored")
            .await
            .unwrap();
        assert_eq!(restored.tables_restored, 2);
        assert_eq!(b.rows("lab_restored", "subject").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backup_name_must_match_schema() {
        let mut b = MemoryBackend::new();
        b.add_schema("lab");
        let err = backup_schema(&mut b, "lab", "other_backup_20260101_000000").await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidBackupName(_)));
        assert!(b.statements().is_empty());
    }
}

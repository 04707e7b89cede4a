//! Operator utilities outside the phase workflow.

use serde::Serialize;

use crate::backend::Backend;
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct DropReport {
    pub prefix: String,
    pub dry_run: bool,
    /// Schemas dropped, or that would be dropped in a dry run.
    pub schemas: Vec<String>,
}

/// Drop every schema whose name starts with `prefix`.
///
/// With `dry_run` the matching schemas are only listed.
pub async fn drop_schemas<B: Backend + ?Sized>(backend: &mut B, prefix: &str, dry_run: bool) -> Result<DropReport> {
    if prefix.is_empty() {
        return Err(MigrateError::Config("refusing to drop schemas with an empty prefix".to_string()));
    }

    let schemas = backend.list_schemas(prefix).await?;
    if !dry_run {
        for schema in &schemas {
            backend.drop_schema(schema).await?;
            tracing::info!(schema = %schema, "dropped schema");
        }
    }
    Ok(DropReport {
        prefix: prefix.to_string(),
        dry_run,
        schemas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Statement};

    fn backend() -> MemoryBackend {
        let mut b = MemoryBackend::new();
        b.add_schema("tutorial_sessions").add_schema("tutorial_spikes").add_schema("lab");
        b
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let mut b = backend();
        let report = drop_schemas(&mut b, "tutorial_", true).await.unwrap();
        assert_eq!(report.schemas, vec!["tutorial_sessions", "tutorial_spikes"]);
        assert!(b.statements().is_empty());
    }

    #[tokio::test]
    async fn test_drop() {
        let mut b = backend();
        drop_schemas(&mut b, "tutorial_", false).await.unwrap();
        assert_eq!(
            b.statements(),
            &[
                Statement::DropSchema("tutorial_sessions".into()),
                Statement::DropSchema("tutorial_spikes".into()),
            ]
        );
        assert!(b.has_schema("lab"));
    }

    #[tokio::test]
    async fn test_empty_prefix_rejected() {
        let mut b = backend();
        assert!(drop_schemas(&mut b, "", false).await.is_err());
        assert!(b.has_schema("lab"));
    }
}

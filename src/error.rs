//! Error taxonomy for the migration workflow.

use thiserror::Error;

/// Errors raised by the migration components and the phase orchestrator.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Backend unreachable. Fatal.
    #[error("cannot reach backend: {0}")]
    Connection(String),

    /// Table or row mismatch detected while verifying a phase.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Cutover pre-flight check failed. No statement was executed.
    #[error("pre-flight check failed: {0}")]
    Preflight(String),

    /// Confirmation token did not match. Clean exit, nothing changed.
    #[error("aborted by operator")]
    OperatorAbort,

    #[error("schema `{0}` already exists")]
    SchemaExists(String),

    #[error("schema `{0}` does not exist")]
    SchemaNotFound(String),

    #[error("table `{schema}`.`{table}` does not exist")]
    TableNotFound { schema: String, table: String },

    /// Filter predicate failed to parse or names an unknown column.
    #[error("invalid filter predicate: {0}")]
    InvalidPredicate(String),

    /// Duplicate primary key; the table copy was not applied.
    #[error("duplicate primary key {key} for `{schema}`.`{table}`; nothing copied")]
    Conflict {
        schema: String,
        table: String,
        key: String,
    },

    #[error("invalid backup name `{0}`: expected <schema>_backup_<YYYYMMDD_HHMMSS>")]
    InvalidBackupName(String),

    /// A failure after the pre-cutover backup completed.
    #[error("cutover incomplete: {reason}\n  state: {state}\n  recovery: {recovery}")]
    CutoverIncomplete {
        reason: String,
        state: String,
        recovery: String,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Process exit code for this error. An operator abort is a clean exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrateError::OperatorAbort => 0,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for MigrateError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MigrateError::Connection(e.to_string()),
            other => MigrateError::Query(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::OperatorAbort.exit_code(), 0);
        assert_eq!(MigrateError::Preflight("busy".into()).exit_code(), 1);
        assert_eq!(MigrateError::Verification("rows".into()).exit_code(), 1);
        assert_eq!(MigrateError::Connection("down".into()).exit_code(), 1);
    }

    #[test]
    fn test_sqlx_error_mapping() {
        let err: MigrateError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, MigrateError::Connection(_)));

        let err: MigrateError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, MigrateError::Query(_)));
    }
}

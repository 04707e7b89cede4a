//! Parallel-schema migration for scientific data pipelines.
//!
//! A pipeline schema is migrated to a new framework version without touching
//! production until the very end:
//! backup, parallel-schema creation, data copy, validation, cutover.
//!
//! # Example
//! ```no_run
//! use pipeline_migrate::prelude::*;
//!
//! async fn rehearse(config: &Config) -> pipeline_migrate::Result<()> {
//!     let mut backend = SqlxBackend::connect(&config.connection).await?;
//!     let mut orchestrator = Orchestrator::new(&mut backend, &config.migration, StdinConfirm);
//!     orchestrator.run(Phase::Setup).await?;
//!     orchestrator.run(Phase::DataMigration).await?;
//!     orchestrator.run(Phase::Validation).await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod backend;
pub mod backup;
pub mod catalog;
pub mod clone;
pub mod compare;
pub mod compat;
pub mod config;
pub mod copy;
pub mod dialect;
pub mod error;
pub mod introspect;
pub mod notebooks;
pub mod phases;
pub mod predicate;
pub mod report;
pub mod value;

pub use error::{MigrateError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::{Backend, MemoryBackend, RowSelection, SqlxBackend};
    pub use crate::backup::{backup_name_for, backup_schema, restore_schema};
    pub use crate::catalog::{ColumnInfo, ForeignKey, TableDescriptor, TableTier};
    pub use crate::clone::{CloneOptions, ExistingSchemaPolicy, create_parallel_schema};
    pub use crate::compare::{ComparisonResult, Discrepancy, compare_query_results};
    pub use crate::compat::{CompatibilityReport, verify_schema_v20};
    pub use crate::config::Config;
    pub use crate::copy::{CopyOptions, CopyReport, copy_table_data};
    pub use crate::dialect::Dialect;
    pub use crate::error::{MigrateError, Result};
    pub use crate::introspect::{ListingMode, dependency_order, describe_table, list_tables};
    pub use crate::phases::{Confirm, Orchestrator, Phase, StdinConfirm};
    pub use crate::report::MigrationReport;
    pub use crate::value::{Row, Value};
}

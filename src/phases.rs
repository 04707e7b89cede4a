//! Phase orchestrator for the parallel-schema workflow.
//!
//! ```text
//! 1 setup -> 2 code update -> 3 data migration -> 4 validation -> 5 cutover
//! ```
//!
//! Each phase is started by the operator, re-reads the catalog, and can be
//! rerun. Only the cutover touches the production schema, and it runs its
//! gates (pre-flight, confirmation token, backup) before any rename.

use std::fmt;
use std::io::{BufRead, Write};

use chrono::Local;
use colored::*;

use crate::backend::Backend;
use crate::backup::{backup_name_for, backup_schema};
use crate::clone::{CloneOptions, ExistingSchemaPolicy, create_parallel_schema};
use crate::compare::compare_query_results;
use crate::compat::{CompatibilityReport, verify_schema_v20};
use crate::config::MigrationConfig;
use crate::copy::{CopyOptions, copy_table_data};
use crate::error::{MigrateError, Result};
use crate::introspect::{ListingMode, dependency_order, list_tables};
use crate::predicate::Predicate;
use crate::report::MigrationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Setup = 1,
    CodeUpdate = 2,
    DataMigration = 3,
    Validation = 4,
    Cutover = 5,
}

impl Phase {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Option<Phase> {
        Phase::try_from(self.number() + 1).ok()
    }
}

impl TryFrom<u8> for Phase {
    type Error = MigrateError;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Phase::Setup),
            2 => Ok(Phase::CodeUpdate),
            3 => Ok(Phase::DataMigration),
            4 => Ok(Phase::Validation),
            5 => Ok(Phase::Cutover),
            _ => Err(MigrateError::Config(format!("no phase {}; expected 1-5", n))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "Setup Parallel Schema",
            Phase::CodeUpdate => "Update Code",
            Phase::DataMigration => "Migrate Test Data",
            Phase::Validation => "Validate",
            Phase::Cutover => "Production Cutover",
        };
        write!(f, "Phase {}: {}", self.number(), name)
    }
}

/// Source of the operator's typed answer to the cutover prompt.
pub trait Confirm {
    fn ask(&mut self, prompt: &str) -> Result<String>;
}

impl<C: Confirm + ?Sized> Confirm for &mut C {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        (**self).ask(prompt)
    }
}

/// Prompts on stderr and reads one line from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        eprint!("{}", prompt);
        std::io::stderr().flush()?;
        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }
}

macro_rules! say {
    ($self:ident) => {
        if !$self.quiet {
            println!();
        }
    };
    ($self:ident, $($arg:tt)*) => {
        if !$self.quiet {
            println!($($arg)*);
        }
    };
}

/// Runs one phase at a time against a backend.
pub struct Orchestrator<'a, B: Backend + ?Sized, C: Confirm> {
    backend: &'a mut B,
    config: &'a MigrationConfig,
    confirm: C,
    quiet: bool,
    report: MigrationReport,
}

impl<'a, B: Backend + ?Sized, C: Confirm> Orchestrator<'a, B, C> {
    pub fn new(backend: &'a mut B, config: &'a MigrationConfig, confirm: C) -> Self {
        Self {
            backend,
            config,
            confirm,
            quiet: false,
            report: MigrationReport::default(),
        }
    }

    /// Suppress progress output (the cutover prompt is still shown).
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Report of the last phase run, including a failed one.
    pub fn report(&self) -> &MigrationReport {
        &self.report
    }

    pub async fn run(&mut self, phase: Phase) -> Result<&MigrationReport> {
        self.report = MigrationReport::new(phase.number());
        say!(self, "{}", format!("=== {} ===", phase).cyan().bold());
        tracing::info!(phase = phase.number(), "starting phase");

        match phase {
            Phase::Setup => self.setup().await?,
            Phase::CodeUpdate => self.code_update(),
            Phase::DataMigration => self.migrate_data().await?,
            Phase::Validation => self.validate().await?,
            Phase::Cutover => self.cutover().await?,
        }

        if let Some(next) = phase.next() {
            say!(self);
            say!(self, "{} {}", "Next:".cyan(), format!("--phase {} ({})", next.number(), next).yellow());
        }
        Ok(&self.report)
    }

    async fn setup(&mut self) -> Result<()> {
        let prod = self.config.prod_schema.as_str();
        let test = self.config.test_schema.as_str();
        say!(self, "Creating {} from {}...", test.yellow(), prod.yellow());

        let options = CloneOptions {
            copy_data: false,
            on_existing: ExistingSchemaPolicy::SkipExisting,
        };
        let cloned = create_parallel_schema(&mut *self.backend, prod, test, &options).await?;
        for table in &cloned.tables_created {
            say!(self, "  {} {}", "✓".green(), table);
        }
        for table in &cloned.tables_skipped {
            say!(self, "  {} {} {}", "•".dimmed(), table, "(already created)".dimmed());
        }
        if !cloned.foreign_keys_added.is_empty() {
            say!(self, "  {} {} foreign keys recreated", "✓".green(), cloned.foreign_keys_added.len());
        }
        self.report.tables_processed = cloned.tables_created;
        self.report.tables_skipped = cloned.tables_skipped;

        let source = list_tables(&mut *self.backend, prod, ListingMode::Structural).await?;
        let dest = list_tables(&mut *self.backend, test, ListingMode::Structural).await?;
        if source.len() != dest.len() {
            say!(self, "{} {} has {} tables, {} has {}", "✗".red(), prod, source.len(), test, dest.len());
            return Err(MigrateError::Verification(format!(
                "`{}` has {} tables but `{}` has {}",
                prod,
                source.len(),
                test,
                dest.len()
            )));
        }
        say!(self, "{} {} tables in both schemas", "✓".green(), source.len());
        Ok(())
    }

    fn code_update(&mut self) {
        let prod = &self.config.prod_schema;
        let test = &self.config.test_schema;
        say!(self, "Manual step: update the pipeline code.");
        say!(self);
        say!(self, "{}", "1. Schema connections".bold());
        say!(self, "   {} schema = dj.schema('{}')", "OLD:".red(), prod);
        say!(self, "   {} schema = dj.schema('{}')", "NEW:".green(), test);
        say!(self);
        say!(self, "{}", "2. Fetch API".bold());
        say!(self, "   {} table.fetch()", "OLD:".red());
        say!(self, "   {} table.to_arrays() or table.to_dicts()", "NEW:".green());
        say!(self);
        say!(self, "{}", "3. Type syntax".bold());
        say!(self, "   {} int unsigned -> {} uint32", "OLD:".red(), "NEW:".green());
        say!(self, "   {} external-store -> {} <blob@store>", "OLD:".red(), "NEW:".green());
        say!(self);
        say!(self, "See: {}", "https://docs.datajoint.com/how-to/migrate-to-v20".dimmed());
    }

    async fn migrate_data(&mut self) -> Result<()> {
        let prod = self.config.prod_schema.as_str();
        let test = self.config.test_schema.as_str();

        // Syntax errors fail the phase before any table is copied.
        let filter = match &self.config.where_clause {
            Some(clause) => Some(Predicate::parse(clause)?),
            None => None,
        };

        let tables = list_tables(&mut *self.backend, prod, ListingMode::Data).await?;
        let tables = dependency_order(&mut *self.backend, prod, tables).await?;
        say!(self, "Found {} tables to migrate", tables.len());

        for table in tables {
            let dest = self.backend.describe_table(test, &table).await?;
            if dest.row_count > 0 {
                say!(self, "  {} {} {}", "•".dimmed(), table, "(already migrated)".dimmed());
                self.report.tables_skipped.push(table);
                continue;
            }

            let where_clause = match &filter {
                Some(p) if p.columns().iter().all(|c| dest.has_column(c)) => self.config.where_clause.clone(),
                Some(p) if self.config.strict_where => {
                    let missing: Vec<&str> = p.columns().into_iter().filter(|c| !dest.has_column(c)).collect();
                    return Err(MigrateError::InvalidPredicate(format!(
                        "`{}` has no column(s) {}",
                        table,
                        missing.join(", ")
                    )));
                }
                Some(_) => {
                    say!(self, "  {} {} lacks the filter's columns; copying all rows", "!".yellow(), table);
                    tracing::warn!(table = %table, "copying unfiltered");
                    self.report.unfiltered_tables.push(table.clone());
                    None
                }
                None => None,
            };
            let options = CopyOptions {
                limit: self.config.copy_limit,
                where_clause,
            };
            let copy = copy_table_data(&mut *self.backend, prod, test, &table, &options).await?;
            say!(
                self,
                "  {} {}: {} rows in {:.2}s",
                "✓".green(),
                table,
                copy.rows_copied,
                copy.time_taken.as_secs_f64()
            );
            if copy.orphans_skipped > 0 {
                say!(
                    self,
                    "    {} {} rows skipped: referenced rows were not copied",
                    "!".yellow(),
                    copy.orphans_skipped
                );
            }
            self.report.record_copy(&copy);
        }

        say!(self, "{} Copied {} rows", "✓".green(), self.report.total_rows_copied());
        Ok(())
    }

    async fn validate(&mut self) -> Result<()> {
        let prod = self.config.prod_schema.as_str();
        let test = self.config.test_schema.as_str();
        let tolerance = self.config.tolerance;

        let tables = list_tables(&mut *self.backend, test, ListingMode::Data).await?;
        for table in tables {
            let result = compare_query_results(&mut *self.backend, prod, test, &table, tolerance).await?;
            self.report.tables_processed.push(table.clone());
            if result.matches {
                say!(self, "  {} {}: {} rows match", "✓".green(), table, result.row_count);
                continue;
            }
            say!(self, "  {} {}: validation failed", "✗".red(), table);
            for d in &result.discrepancies {
                say!(self, "    {}", d);
            }
            let hidden = result.total_discrepancies - result.discrepancies.len();
            if hidden > 0 {
                say!(self, "    {}", format!("... and {} more", hidden).dimmed());
            }
            self.report.mismatches.push(result);
        }

        say!(self);
        say!(self, "Verifying 2.0 compatibility...");
        let compat = verify_schema_v20(&mut *self.backend, test).await?;
        self.print_compat(&compat, "Schema is 2.0 compatible", "Some 2.0 features not enabled:");
        self.report.compatibility = Some(compat);

        if !self.report.mismatches.is_empty() {
            let names: Vec<&str> = self.report.mismatches.iter().map(|m| m.table.as_str()).collect();
            say!(self, "{}", "✗ Validation failed. Fix issues before proceeding.".red());
            return Err(MigrateError::Verification(format!(
                "{} table(s) differ: {}",
                names.len(),
                names.join(", ")
            )));
        }

        say!(self, "{}", "✓ All validation checks passed!".green());
        say!(self, "{}", "Phase 5 modifies production. Ensure:".yellow());
        say!(self, "  - a full database backup exists");
        say!(self, "  - all old-version clients are stopped");
        say!(self, "  - a maintenance window is scheduled");
        Ok(())
    }

    async fn preflight(&mut self) -> Result<()> {
        let prod = self.config.prod_schema.as_str();
        let test = self.config.test_schema.as_str();
        let old = format!("{}_old", prod);
        say!(self, "Pre-flight checks:");

        for schema in [prod, test] {
            if !self.backend.schema_exists(schema).await? {
                return Err(MigrateError::Preflight(format!("schema `{}` does not exist", schema)));
            }
        }
        if self.backend.schema_exists(&old).await? {
            return Err(MigrateError::Preflight(format!(
                "`{}` already exists; drop it or restore it before another cutover",
                old
            )));
        }

        for schema in [prod, test] {
            let blockers = self.backend.rename_blockers(schema).await?;
            if !blockers.is_empty() {
                say!(self, "{} {} holds {}", "✗".red(), schema, blockers.join(", "));
                return Err(MigrateError::Preflight(format!(
                    "`{}` holds {}, which a schema rename would drop; move them out first",
                    schema,
                    blockers.join(", ")
                )));
            }
        }

        let active = self.backend.active_connections(prod).await?;
        if active > 0 {
            say!(self, "{} Found {} active queries on {}", "✗".red(), active, prod);
            return Err(MigrateError::Preflight(format!(
                "{} active queries on `{}`; stop all clients before proceeding",
                active, prod
            )));
        }
        say!(self, "  {} No active queries", "✓".green());
        Ok(())
    }

    async fn cutover(&mut self) -> Result<()> {
        self.preflight().await?;

        let prod = self.config.prod_schema.clone();
        let test = self.config.test_schema.clone();
        let old = format!("{}_old", prod);
        let token = self.config.confirmation_token.clone();

        eprintln!();
        eprintln!("{}", "!!! WARNING: This will modify production !!!".red().bold());
        eprintln!("This will rename {} -> {}", prod, old);
        eprintln!("           and {} -> {}", test, prod);
        let answer = self.confirm.ask(&format!("\nType '{}' to proceed: ", token))?;
        if answer != token {
            eprintln!("{}", "Aborted".yellow());
            return Err(MigrateError::OperatorAbort);
        }

        say!(self);
        say!(self, "1. Creating backup...");
        let backup_name = backup_name_for(&prod, &Local::now());
        let backup = backup_schema(&mut *self.backend, &prod, &backup_name).await?;
        say!(self, "  {} Backed up {} tables to {}", "✓".green(), backup.tables_backed_up, backup_name);
        self.report.backup_name = Some(backup_name.clone());

        say!(self, "2. Renaming schemas...");
        if let Err(e) = self.backend.rename_schema(&prod, &old).await {
            say!(self, "{} Cutover failed: {}", "✗".red(), e);
            return Err(MigrateError::CutoverIncomplete {
                reason: e.to_string(),
                state: format!("backup `{}` complete; `{}` and `{}` unchanged", backup_name, prod, test),
                recovery: format!("fix the cause and rerun --phase 5; drop `{}` if it is not needed", backup_name),
            });
        }
        say!(self, "  {} Renamed {} -> {}", "✓".green(), prod, old);

        if let Err(e) = self.backend.rename_schema(&test, &prod).await {
            say!(self, "{} Cutover failed: {}", "✗".red(), e);
            return Err(MigrateError::CutoverIncomplete {
                reason: e.to_string(),
                state: format!("`{}` renamed to `{}`; `{}` untouched; no schema named `{}`", prod, old, test, prod),
                recovery: format!(
                    "rename `{}` back to `{}`, or restore `{}` into `{}`",
                    old, prod, backup_name, prod
                ),
            });
        }
        say!(self, "  {} Renamed {} -> {}", "✓".green(), test, prod);
        self.report.tables_processed = list_tables(&mut *self.backend, &prod, ListingMode::Structural).await?;

        say!(self, "3. Verifying cutover...");
        let compat = verify_schema_v20(&mut *self.backend, &prod).await?;
        self.print_compat(&compat, "Production schema verified", "Some issues found:");
        self.report.compatibility = Some(compat);

        say!(self);
        say!(self, "{}", "✓ Cutover complete!".green().bold());
        say!(self, "Backup location: {}", backup_name.yellow());
        say!(self, "Old production: {} (can be dropped after verification)", old.yellow());
        Ok(())
    }

    fn print_compat(&self, compat: &CompatibilityReport, ok: &str, warn: &str) {
        if compat.compatible {
            say!(self, "  {} {}", "✓".green(), ok);
            return;
        }
        say!(self, "  {} {}", "!".yellow(), warn.yellow());
        for issue in &compat.issues {
            say!(self, "    {}", issue);
        }
        tracing::warn!(issues = compat.issues.len(), "compatibility issues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_numbers() {
        assert_eq!(Phase::try_from(3).unwrap(), Phase::DataMigration);
        assert!(Phase::try_from(0).is_err());
        assert!(Phase::try_from(6).is_err());
        assert_eq!(Phase::Validation.next(), Some(Phase::Cutover));
        assert_eq!(Phase::Cutover.next(), None);
        assert_eq!(Phase::Setup.to_string(), "Phase 1: Setup Parallel Schema");
    }
}

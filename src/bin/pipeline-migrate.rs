//! pipeline-migrate - parallel-schema migration CLI.
//!
//! ```bash
//! pipeline-migrate migrate --phase 1
//! pipeline-migrate migrate --phase 3 --limit 1000 --where "session_date >= '2024-01-01'"
//! pipeline-migrate migrate --phase 4 --json
//! pipeline-migrate drop-schemas --prefix tutorial_ --dry-run
//! pipeline-migrate --backend postgresql notebooks --timeout 900
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_migrate::admin::drop_schemas;
use pipeline_migrate::backup::{backup_name_for, backup_schema, restore_schema};
use pipeline_migrate::config::Config;
use pipeline_migrate::dialect::Dialect;
use pipeline_migrate::introspect::summarize_schema;
use pipeline_migrate::notebooks::run_notebooks;
use pipeline_migrate::phases::{Orchestrator, Phase, StdinConfirm};
use pipeline_migrate::{MigrateError, backend::SqlxBackend};

#[derive(Parser)]
#[command(name = "pipeline-migrate")]
#[command(author, version, about = "Parallel-schema migration for scientific data pipelines", long_about = None)]
struct Cli {
    /// Configuration file (default: ./pipeline-migrate.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database backend: mysql or postgresql
    #[arg(long, global = true, env = "DJ_BACKEND")]
    backend: Option<Dialect>,

    #[arg(long, global = true, env = "DJ_HOST")]
    host: Option<String>,

    #[arg(long, global = true, env = "DJ_PORT")]
    port: Option<u16>,

    #[arg(long, global = true, env = "DJ_USER")]
    user: Option<String>,

    #[arg(long, global = true, env = "DJ_PASS", hide_env_values = true)]
    password: Option<String>,

    /// Use TLS for the backend connection
    #[arg(long, global = true, env = "DJ_USE_TLS", value_parser = clap::builder::BoolishValueParser::new())]
    use_tls: Option<bool>,

    /// Database holding the schemas (PostgreSQL only)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one phase of the parallel-schema workflow
    Migrate {
        /// 1 setup, 2 code update, 3 data migration, 4 validation, 5 cutover
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        phase: u8,

        #[arg(long)]
        prod_schema: Option<String>,

        #[arg(long)]
        test_schema: Option<String>,

        /// Maximum absolute difference for numeric values to compare equal
        #[arg(long)]
        tolerance: Option<f64>,

        /// Copy at most this many rows per table (phase 3)
        #[arg(long)]
        limit: Option<u64>,

        /// Filter predicate for copied rows (phase 3)
        #[arg(long = "where")]
        where_clause: Option<String>,

        /// Fail when a table lacks a column named in --where instead of copying it whole
        #[arg(long)]
        strict_where: bool,

        /// Print the phase report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List a schema's tables with tier and row count
    Inspect {
        /// Defaults to the production schema
        #[arg(long)]
        schema: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Back up a schema under a timestamped name
    Backup {
        /// Defaults to the production schema
        #[arg(long)]
        schema: Option<String>,
    },

    /// Restore a backup into a schema that does not exist yet
    Restore {
        /// Backup schema, e.g. my_pipeline_backup_20260101_120000
        #[arg(long)]
        backup: String,

        #[arg(long)]
        target: String,
    },

    /// Drop every schema whose name starts with a prefix
    DropSchemas {
        #[arg(long, default_value = "tutorial_")]
        prefix: String,

        /// Only list the schemas that would be dropped
        #[arg(long)]
        dry_run: bool,
    },

    /// Execute tutorial and how-to notebooks against the backend
    Notebooks {
        /// Seconds allowed per notebook
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        base_path: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    let conn = &mut config.connection;
    if let Some(backend) = cli.backend {
        conn.backend = backend;
    }
    if let Some(host) = &cli.host {
        conn.host = host.clone();
    }
    if cli.port.is_some() {
        conn.port = cli.port;
    }
    if cli.user.is_some() {
        conn.user = cli.user.clone();
    }
    if cli.password.is_some() {
        conn.password = cli.password.clone();
    }
    if let Some(use_tls) = cli.use_tls {
        conn.use_tls = use_tls;
    }
    if let Some(database) = &cli.database {
        conn.database = database.clone();
    }

    match &cli.command {
        Commands::Migrate {
            prod_schema,
            test_schema,
            tolerance,
            limit,
            where_clause,
            strict_where,
            ..
        } => {
            let m = &mut config.migration;
            if let Some(s) = prod_schema {
                m.prod_schema = s.clone();
            }
            if let Some(s) = test_schema {
                m.test_schema = s.clone();
            }
            if let Some(t) = tolerance {
                m.tolerance = *t;
            }
            if limit.is_some() {
                m.copy_limit = *limit;
            }
            if where_clause.is_some() {
                m.where_clause = where_clause.clone();
            }
            if *strict_where {
                m.strict_where = true;
            }
        }
        Commands::Notebooks { timeout, base_path } => {
            if let Some(t) = timeout {
                config.notebooks.timeout_secs = *t;
            }
            if let Some(p) = base_path {
                config.notebooks.base_path = p.clone();
            }
        }
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    if let Commands::Notebooks { .. } = cli.command {
        let summary = run_notebooks(&config.notebooks, &config.connection).await?;
        if !summary.all_passed() {
            anyhow::bail!("{} notebook(s) failed", summary.failed.len());
        }
        return Ok(());
    }

    let mut backend = SqlxBackend::connect(&config.connection).await?;

    match cli.command {
        Commands::Migrate { phase, json, .. } => {
            let phase = Phase::try_from(phase)?;
            let mut orchestrator = Orchestrator::new(&mut backend, &config.migration, StdinConfirm).quiet(json);
            let result = orchestrator.run(phase).await.map(|_| ());
            if json {
                println!("{}", serde_json::to_string_pretty(orchestrator.report())?);
            }
            result?;
        }
        Commands::Inspect { schema, json } => {
            let schema = schema.unwrap_or_else(|| config.migration.prod_schema.clone());
            let summary = summarize_schema(&mut backend, &schema).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{} {}", "Schema:".cyan().bold(), schema.yellow());
                for table in &summary {
                    println!("  {:<40} {:<10} {:>12}", table.name, table.tier.to_string().dimmed(), table.row_count);
                }
                println!("{} {} tables", "Total:".cyan(), summary.len());
            }
        }
        Commands::Backup { schema } => {
            let schema = schema.unwrap_or_else(|| config.migration.prod_schema.clone());
            let name = backup_name_for(&schema, &chrono::Local::now());
            let report = backup_schema(&mut backend, &schema, &name).await?;
            println!(
                "{} Backed up {} tables ({} rows) to {}",
                "✓".green(),
                report.tables_backed_up,
                report.rows_copied,
                name.yellow()
            );
        }
        Commands::Restore { backup, target } => {
            let report = restore_schema(&mut backend, &backup, &target).await?;
            println!(
                "{} Restored {} tables ({} rows) into {}",
                "✓".green(),
                report.tables_restored,
                report.rows_copied,
                target.yellow()
            );
        }
        Commands::DropSchemas { prefix, dry_run } => {
            let report = drop_schemas(&mut backend, &prefix, dry_run).await?;
            if report.schemas.is_empty() {
                println!("No schemas found with prefix '{}'", prefix);
            }
            for schema in &report.schemas {
                if dry_run {
                    println!("  {} {}", "would drop".yellow(), schema);
                } else {
                    println!("  {} {}", "✓ dropped".green(), schema);
                }
            }
        }
        Commands::Notebooks { .. } => {}
    }
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_migrate=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let code = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")
        .and_then(|rt| rt.block_on(run(cli)))
    {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<MigrateError>() {
            Some(MigrateError::OperatorAbort) => 0,
            Some(e) => {
                eprintln!("{} {}", "✗".red(), e);
                e.exit_code()
            }
            None => {
                eprintln!("{} {:#}", "Error:".red().bold(), err);
                1
            }
        },
    };
    std::process::exit(code);
}

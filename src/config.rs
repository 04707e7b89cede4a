//! Configuration.
//!
//! Loaded from TOML (`--config`, `./pipeline-migrate.toml`, or the user
//! config directory), then overridden by CLI flags and `DJ_*` environment
//! variables. The resulting [`Config`] is passed explicitly into every
//! component; there is no global connection state.
//!
//! ```toml
//! [connection]
//! backend = "postgresql"
//! host = "db.lab.internal"
//! user = "pipeline"
//!
//! [migration]
//! prod_schema = "ephys"
//! test_schema = "ephys_v20"
//! tolerance = 1e-9
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// File name searched in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pipeline-migrate.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub migration: MigrationConfig,
    pub notebooks: NotebookConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub backend: Dialect,
    pub host: String,
    /// Defaults to the backend's standard port.
    pub port: Option<u16>,
    /// Defaults to `root` (MySQL) or `postgres` (PostgreSQL).
    pub user: Option<String>,
    pub password: Option<String>,
    /// Database holding the schemas (PostgreSQL only).
    pub database: String,
    pub use_tls: bool,
    pub connect_timeout_secs: u64,
}

/// Parallel-schema workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub prod_schema: String,
    pub test_schema: String,
    /// Maximum absolute difference for numeric values to count as equal.
    pub tolerance: f64,
    /// Copy at most this many rows per table during data migration.
    pub copy_limit: Option<u64>,
    /// Filter predicate applied to every table copied during data migration.
    pub where_clause: Option<String>,
    /// Fail instead of copying a table unfiltered when it lacks a column the
    /// filter names.
    pub strict_where: bool,
    /// Token the operator must type to start the cutover.
    pub confirmation_token: String,
}

/// Notebook execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    pub base_path: PathBuf,
    /// Directories under `base_path` searched recursively for `.ipynb` files.
    pub search_dirs: Vec<PathBuf>,
    pub timeout_secs: u64,
    /// Extra wall-clock allowance for the runner's own startup.
    pub overhead_secs: u64,
    /// Runner program; invoked as `<runner> nbconvert --to notebook --execute --inplace ...`.
    pub runner: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: Dialect::Mysql,
            host: "127.0.0.1".to_string(),
            port: None,
            user: None,
            password: None,
            database: "postgres".to_string(),
            use_tls: false,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            prod_schema: "my_pipeline".to_string(),
            test_schema: "my_pipeline_v20".to_string(),
            tolerance: 1e-6,
            copy_limit: None,
            where_clause: None,
            strict_where: false,
            confirmation_token: "MIGRATE".to_string(),
        }
    }
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            search_dirs: vec![PathBuf::from("src/tutorials"), PathBuf::from("src/how-to")],
            timeout_secs: 600,
            overhead_secs: 60,
            runner: "jupyter".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.backend.default_port())
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or_else(|| self.backend.default_user())
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `DJ_*` variables describing this connection, for child processes.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("DJ_BACKEND".to_string(), self.backend.to_string()),
            ("DJ_HOST".to_string(), self.host.clone()),
            ("DJ_PORT".to_string(), self.port().to_string()),
            ("DJ_USER".to_string(), self.user().to_string()),
            ("DJ_PASS".to_string(), self.password().to_string()),
            ("DJ_USE_TLS".to_string(), self.use_tls.to_string()),
        ]
    }
}

impl NotebookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Hard wall-clock bound for one runner process.
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + self.overhead_secs)
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))
    }

    /// Load from an explicit path, or the first default location that exists.
    ///
    /// An explicit path must exist; missing default files fall back to
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(MigrateError::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => default_locations().into_iter().find(|p| p.exists()),
        };

        match candidate {
            Some(p) => {
                tracing::debug!(path = %p.display(), "loading config");
                let content = std::fs::read_to_string(&p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject settings no phase could run with.
    pub fn validate(&self) -> Result<()> {
        let m = &self.migration;
        if m.prod_schema.is_empty() || m.test_schema.is_empty() {
            return Err(MigrateError::Config("schema names must not be empty".to_string()));
        }
        if m.prod_schema == m.test_schema {
            return Err(MigrateError::Config(format!(
                "production and test schema are both `{}`",
                m.prod_schema
            )));
        }
        if m.tolerance.is_nan() || m.tolerance < 0.0 {
            return Err(MigrateError::Config(format!(
                "tolerance must be a non-negative number, got {}",
                m.tolerance
            )));
        }
        if m.confirmation_token.is_empty() {
            return Err(MigrateError::Config("confirmation token must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("pipeline-migrate").join("config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.port(), 3306);
        assert_eq!(config.connection.user(), "root");
        assert_eq!(config.migration.confirmation_token, "MIGRATE");
        assert_eq!(config.notebooks.process_timeout(), Duration::from_secs(660));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [connection]
            backend = "postgresql"
            host = "db"

            [migration]
            prod_schema = "ephys"
            test_schema = "ephys_v20"
            copy_limit = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.backend, Dialect::Postgresql);
        assert_eq!(config.connection.port(), 5432);
        assert_eq!(config.connection.user(), "postgres");
        assert_eq!(config.migration.copy_limit, Some(1000));
        assert_eq!(config.migration.tolerance, 1e-6);
    }

    #[test]
    fn test_validate_rejects_same_schema() {
        let mut config = Config::default();
        config.migration.test_schema = config.migration.prod_schema.clone();
        assert!(config.validate().is_err());
        config.migration.test_schema = "x".into();
        config.migration.tolerance = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_vars() {
        let config = ConnectionConfig {
            password: Some("tutorial".into()),
            ..ConnectionConfig::default()
        };
        let vars = config.env_vars();
        assert!(vars.contains(&("DJ_PASS".to_string(), "tutorial".to_string())));
        assert!(vars.contains(&("DJ_PORT".to_string(), "3306".to_string())));
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let err = Config::load(Some(Path::new("/nonexistent/pipeline-migrate.toml"))).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}

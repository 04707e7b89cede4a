//! Notebook runner.
//!
//! Executes every notebook under the configured search directories through
//! an external runner (`jupyter nbconvert` by default), one process at a
//! time, each bounded by a wall-clock timeout. The backend connection is
//! handed to the notebooks through `DJ_*` environment variables.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use colored::*;
use serde::Serialize;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::{ConnectionConfig, NotebookConfig};
use crate::error::{MigrateError, Result};

const CHECKPOINT_DIR: &str = ".ipynb_checkpoints";
const ERROR_TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct NotebookFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotebookSummary {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<NotebookFailure>,
}

impl NotebookSummary {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// All `.ipynb` files under `base/<dir>` for each search directory, sorted,
/// skipping checkpoint copies. Missing directories are ignored.
pub fn find_notebooks(base: &Path, search_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut notebooks: Vec<PathBuf> = search_dirs
        .iter()
        .map(|d| base.join(d))
        .filter(|d| d.is_dir())
        .flat_map(|d| {
            WalkDir::new(d)
                .into_iter()
                .filter_entry(|e| e.file_name() != CHECKPOINT_DIR)
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "ipynb"))
                .collect::<Vec<_>>()
        })
        .collect();
    notebooks.sort();
    notebooks
}

fn error_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Execute one notebook in place. `Err` carries the failure text.
pub async fn execute_notebook(
    path: &Path,
    config: &NotebookConfig,
    env: &[(String, String)],
) -> std::result::Result<(), String> {
    let mut cmd = Command::new(&config.runner);
    cmd.arg("nbconvert")
        .args(["--to", "notebook", "--execute", "--inplace"])
        .arg("--ExecutePreprocessor.timeout")
        .arg(config.timeout_secs.to_string())
        .arg(path)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(notebook = %path.display(), runner = %config.runner, "executing notebook");
    let child = cmd.spawn().map_err(|e| e.to_string())?;
    match tokio::time::timeout(config.process_timeout(), child.wait_with_output()).await {
        Err(_) => Err(format!("Timeout after {} seconds", config.timeout_secs)),
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(String::from_utf8_lossy(&output.stderr).into_owned()),
    }
}

/// Execute every notebook found under `config.base_path` and print a summary.
///
/// Finding no notebooks is an error.
pub async fn run_notebooks(config: &NotebookConfig, connection: &ConnectionConfig) -> Result<NotebookSummary> {
    let backend = connection.backend.to_string().to_uppercase();
    let rule = "=".repeat(60);
    println!("{}", rule);
    println!("{}", format!("Executing notebooks against {}", backend).cyan().bold());
    println!("{}", rule);

    let env = connection.env_vars();
    println!("Backend configuration:");
    for (k, v) in env.iter().filter(|(k, _)| k != "DJ_PASS" && k != "DJ_USE_TLS") {
        println!("  {}: {}", k, v);
    }

    let notebooks = find_notebooks(&config.base_path, &config.search_dirs);
    println!();
    println!("Found {} notebooks to execute", notebooks.len());
    if notebooks.is_empty() {
        return Err(MigrateError::Config(format!(
            "no notebooks found under {}",
            config.base_path.display()
        )));
    }

    let mut summary = NotebookSummary::default();
    let total = notebooks.len();
    for (i, notebook) in notebooks.into_iter().enumerate() {
        let rel = notebook
            .strip_prefix(&config.base_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| notebook.clone());
        print!("{} {}... ", format!("[{}/{}]", i + 1, total).cyan(), rel.display());
        std::io::stdout().flush()?;
        match execute_notebook(&notebook, config, &env).await {
            Ok(()) => {
                println!("{}", "OK".green());
                summary.succeeded.push(rel);
            }
            Err(error) => {
                println!("{}", "FAILED".red());
                summary.failed.push(NotebookFailure { path: rel, error });
            }
        }
    }

    println!();
    println!("{}", rule);
    println!("{}", format!("SUMMARY ({})", backend).bold());
    println!("{}", rule);
    println!("  Successful: {}", summary.succeeded.len());
    println!("  Failed: {}", summary.failed.len());
    if summary.all_passed() {
        println!();
        println!("{}", format!("All notebooks executed successfully against {}!", backend).green());
    } else {
        println!();
        println!("{}", "Failed notebooks:".red());
        for failure in &summary.failed {
            println!("  - {}", failure.path.display());
            for line in error_tail(&failure.error).lines() {
                println!("      {}", line.dimmed());
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
    }

    #[test]
    fn test_find_notebooks() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        touch(&base.join("src/tutorials/02-queries.ipynb"));
        touch(&base.join("src/tutorials/01-basics.ipynb"));
        touch(&base.join("src/tutorials/.ipynb_checkpoints/01-basics-checkpoint.ipynb"));
        touch(&base.join("src/how-to/advanced/blobs.ipynb"));
        touch(&base.join("src/how-to/notes.md"));
        touch(&base.join("other/ignored.ipynb"));

        let config = NotebookConfig::default();
        let found: Vec<PathBuf> = find_notebooks(base, &config.search_dirs)
            .into_iter()
            .map(|p| p.strip_prefix(base).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            vec![
                PathBuf::from("src/how-to/advanced/blobs.ipynb"),
                PathBuf::from("src/tutorials/01-basics.ipynb"),
                PathBuf::from("src/tutorials/02-queries.ipynb"),
            ]
        );
    }

    #[test]
    fn test_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_notebooks(dir.path(), &NotebookConfig::default().search_dirs).is_empty());
    }

    #[test]
    fn test_error_tail() {
        let stderr = "a\nb\nc\nd\ne\nf\ng\n";
        assert_eq!(error_tail(stderr), "c\nd\ne\nf\ng");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_exit_status() {
        let ok = NotebookConfig {
            runner: "true".into(),
            ..NotebookConfig::default()
        };
        assert!(execute_notebook(Path::new("nb.ipynb"), &ok, &[]).await.is_ok());

        let failing = NotebookConfig {
            runner: "false".into(),
            ..NotebookConfig::default()
        };
        assert!(execute_notebook(Path::new("nb.ipynb"), &failing, &[]).await.is_err());

        let missing = NotebookConfig {
            runner: "definitely-not-a-notebook-runner".into(),
            ..NotebookConfig::default()
        };
        assert!(execute_notebook(Path::new("nb.ipynb"), &missing, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_no_notebooks_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = NotebookConfig {
            base_path: dir.path().to_path_buf(),
            ..NotebookConfig::default()
        };
        let err = run_notebooks(&config, &ConnectionConfig::default()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}

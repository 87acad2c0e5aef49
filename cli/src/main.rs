//! polyglot - query language servers from the command line.
//!
//! A thin front end over [`polyglot_lsp::LspManager`]: parse one command,
//! run it against the configured servers, print the result as JSON on
//! stdout, then shut every server down. Logs go to stderr.

mod args;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use polyglot_lsp::{Diagnostic, LspConfig, LspManager};

use crate::args::{Cli, Command};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries the JSON result; keep logs off it.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("polyglot").join("config.toml"))
}

/// Explicit `--config`, else the user config file if present, else the
/// built-in server table.
fn load_config(explicit: Option<&Path>) -> Result<LspConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => path,
            None => return Ok(LspConfig::with_default_servers()),
        },
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: LspConfig =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    tracing::info!(path = %path.display(), servers = config.servers().len(), "Loaded config");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let Cli {
        config,
        root,
        command,
    } = Cli::parse();
    let config = load_config(config.as_deref())?;
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let manager = LspManager::new(config, &root).context("creating LSP manager")?;

    let result = run(&manager, command).await;
    manager.stop_all().await;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(manager: &LspManager, command: Command) -> Result<Value> {
    if let Some(file) = command.file() {
        require_language(manager, file)?;
    }
    let value = match command {
        Command::Symbols { file } => serde_json::to_value(manager.document_symbols(&file).await?)?,
        Command::Hover {
            file,
            line,
            character,
        } => serde_json::to_value(manager.hover(&file, line, character).await?)?,
        Command::Definition {
            file,
            line,
            character,
        } => serde_json::to_value(manager.definition(&file, line, character).await?)?,
        Command::References {
            file,
            line,
            character,
            no_declaration,
        } => {
            let refs = manager
                .references(&file, line, character, !no_declaration)
                .await?;
            serde_json::to_value(refs)?
        }
        Command::Rename {
            file,
            line,
            character,
            new_name,
        } => {
            let edit = manager.rename(&file, line, character, &new_name).await?;
            json!({ "edits": edit.edit_count(), "workspace_edit": edit })
        }
        Command::Completion {
            file,
            line,
            character,
        } => serde_json::to_value(manager.completion(&file, line, character).await?)?,
        Command::Diagnostics { file, wait_ms } => {
            collect_diagnostics(manager, &file, Duration::from_millis(wait_ms)).await?
        }
        Command::Status => serde_json::to_value(manager.statuses())?,
    };
    Ok(value)
}

/// Unsupported files are silently empty in the library; on the command
/// line that is more likely a typo than intent.
fn require_language(manager: &LspManager, file: &Path) -> Result<()> {
    if manager.language_for_path(file).is_none() {
        anyhow::bail!("no language server configured for {}", file.display());
    }
    Ok(())
}

async fn collect_diagnostics(
    manager: &LspManager,
    file: &Path,
    wait: Duration,
) -> Result<Value> {
    let received: Arc<Mutex<Vec<(String, Vec<Diagnostic>)>>> = Arc::default();
    let sink = received.clone();
    manager.set_diagnostic_handler(move |uri, diagnostics| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((uri.to_string(), diagnostics.to_vec()));
    });

    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        manager.workspace_root().join(file)
    };
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    manager
        .open_file(&path, &String::from_utf8_lossy(&bytes))
        .await?;
    tokio::time::sleep(wait).await;

    let received = received
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let published: Vec<Value> = received
        .into_iter()
        .map(|(uri, diagnostics)| {
            let lines: Vec<String> = diagnostics
                .iter()
                .map(|d| d.display_with_path(&path))
                .collect();
            json!({ "uri": uri, "diagnostics": diagnostics, "lines": lines })
        })
        .collect();
    Ok(Value::Array(published))
}

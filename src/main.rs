//! # Luminex Host
//!
//! Extension host process for the Luminex editor.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the host against a project
//! cargo run -- --workspace path/to/project
//!
//! # Feed it editor notifications, one JSON array per line
//! echo '["BufEnter", 1]' | cargo run -- -vv
//! ```
//!
//! ## Workspace notifications
//!
//! Lines whose name starts with `workspace/` update the workspace instead of
//! firing an event. They are what drive event-triggered activation:
//!
//! ```text
//! ["workspace/didOpen", {"bufnr": 1, "uri": "file:///src/main.go", "languageId": "go"}]
//! ["workspace/didClose", 1]
//! ["workspace/addFolders", "/src/other"]
//! ["workspace/addRuntimePaths", "/opt/luminex/ext"]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use luminex_core::{
    HostConfig, LogNotifier, NotifyWatcher, TextDocument, Workspace, WorkspaceFolder,
};
use luminex_events::Dispatcher;
use luminex_extension::{Collaborators, ExtensionManager, FileExtensionStore, NativeRegistry};

/// Luminex extension host
#[derive(Parser, Debug)]
#[command(name = "luminex-host")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace directory to open
    #[arg(short, long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// A line of stdin that is not a notification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum LineError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("expected a JSON array")]
    NotArray,

    #[error("first element must be the event name")]
    MissingName,

    #[error("unknown workspace notification: {0}")]
    UnknownMethod(String),

    #[error("invalid arguments for {method}: {reason}")]
    InvalidArgs { method: String, reason: String },
}

/// Prefix of notifications that update the workspace.
const WORKSPACE_PREFIX: &str = "workspace/";

/// A document the editor opened.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenedDocument {
    bufnr: u32,
    uri: String,
    language_id: String,
    /// Defaults to the language id
    filetype: Option<String>,
}

impl From<OpenedDocument> for TextDocument {
    fn from(opened: OpenedDocument) -> Self {
        let filetype = opened
            .filetype
            .unwrap_or_else(|| opened.language_id.clone());
        TextDocument::new(opened.bufnr, opened.uri, opened.language_id, filetype)
    }
}

/// Parses `["EventName", arg1, ...]`. Blank lines yield `None`.
fn parse_line(line: &str) -> Result<Option<(String, Vec<Value>)>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).map_err(|e| LineError::Json(e.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(LineError::NotArray);
    };
    if items.is_empty() {
        return Err(LineError::MissingName);
    }
    match items.remove(0) {
        Value::String(name) => Ok(Some((name, items))),
        _ => Err(LineError::MissingName),
    }
}

fn argument<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, LineError> {
    serde_json::from_value(value).map_err(|e| LineError::InvalidArgs {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn paths(method: &str, args: Vec<Value>) -> Result<Vec<PathBuf>, LineError> {
    args.into_iter().map(|arg| argument(method, arg)).collect()
}

/// Applies a `workspace/*` notification. Returns false for any other name.
fn apply_workspace(workspace: &Workspace, name: &str, args: Vec<Value>) -> Result<bool, LineError> {
    let Some(method) = name.strip_prefix(WORKSPACE_PREFIX) else {
        return Ok(false);
    };
    let first = || {
        args.first().cloned().ok_or_else(|| LineError::InvalidArgs {
            method: name.to_string(),
            reason: "missing argument".to_string(),
        })
    };

    match method {
        "didOpen" => {
            let opened: OpenedDocument = argument(name, first()?)?;
            workspace.open_document(opened.into());
        }
        "didClose" => workspace.close_document(argument(name, first()?)?),
        "addFolders" => {
            let folders = paths(name, args)?
                .iter()
                .map(WorkspaceFolder::from_path)
                .collect();
            workspace.add_folders(folders);
        }
        "addRuntimePaths" => workspace.add_runtime_paths(paths(name, args)?),
        _ => return Err(LineError::UnknownMethod(name.to_string())),
    }
    Ok(true)
}

fn log_level(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true),
        )
        .init();
}

/// Applies every notification read from stdin, in arrival order.
async fn pump(dispatcher: &Dispatcher, workspace: &Workspace) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let (name, args) = match parse_line(&line) {
            Ok(Some(notification)) => notification,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed line");
                continue;
            }
        };
        if name.starts_with(WORKSPACE_PREFIX) {
            if let Err(e) = apply_workspace(workspace, &name, args) {
                tracing::warn!(error = %e, "Dropping workspace notification");
            }
        } else if let Err(e) = dispatcher.fire_raw(&name, args).await {
            tracing::warn!(event = %name, error = %e, "Dropping notification");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HostConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HostConfig::load(),
    };
    setup_logging(&log_level(args.verbose, &config.log.level));

    tracing::info!("Starting Luminex host v{}", env!("CARGO_PKG_VERSION"));

    let workspace = Arc::new(match &args.workspace {
        Some(dir) => Workspace::open(dir)
            .with_context(|| format!("Failed to open workspace {}", dir.display()))?,
        None => Workspace::new(),
    });
    let root = config.extensions.root.clone();
    let store = tokio::task::spawn_blocking(move || FileExtensionStore::open(&root))
        .await
        .context("Extension store task failed")?
        .context("Failed to open extension store")?;
    let dispatcher = Dispatcher::from_config(&config.events);

    let manager = ExtensionManager::new(
        config.extensions.clone(),
        dispatcher.clone(),
        Collaborators {
            workspace: workspace.clone(),
            store: Arc::new(store),
            loader: Arc::new(NativeRegistry::new()),
            notifier: Arc::new(LogNotifier),
            watcher: Arc::new(NotifyWatcher),
        },
    );

    manager.load_installed_extensions().await;
    if let Err(e) = manager.load_file_extensions().await {
        tracing::error!(error = %e, "Failed to load single-file extensions");
    }
    manager.activate_extensions().await;
    tracing::info!(extensions = ?manager.loaded_extensions(), "Host running");

    let result = pump(&dispatcher, &workspace).await;

    manager.shutdown().await;
    tracing::info!("Luminex host stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use luminex_core::{WorkspaceEvent, WorkspaceHost};
    use proptest::prelude::*;

    #[test]
    fn test_parse_line() {
        let (name, args) = parse_line(r#"["CursorMoved", 1, [3, 4]]"#).unwrap().unwrap();
        assert_eq!(name, "CursorMoved");
        assert_eq!(args, vec![Value::from(1), serde_json::json!([3, 4])]);

        let (name, args) = parse_line(" [\"ready\"] \n").unwrap().unwrap();
        assert_eq!(name, "ready");
        assert!(args.is_empty());

        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(matches!(parse_line("[1, 2"), Err(LineError::Json(_))));
        assert_eq!(parse_line(r#"{"event": "ready"}"#), Err(LineError::NotArray));
        assert_eq!(parse_line("[]"), Err(LineError::MissingName));
        assert_eq!(parse_line("[7, 1]"), Err(LineError::MissingName));
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["luminex-host", "--workspace", "/src/app", "-vv"]);
        assert_eq!(args.workspace, Some(PathBuf::from("/src/app")));
        assert_eq!(args.verbose, 2);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, "warn"), "warn");
        assert_eq!(log_level(1, "warn"), "info");
        assert_eq!(log_level(5, "warn"), "trace");
    }

    #[test]
    fn test_workspace_notifications() {
        let workspace = Workspace::new();
        let (name, args) = parse_line(
            r#"["workspace/didOpen", {"bufnr": 3, "uri": "sftp://host/a.go", "languageId": "go"}]"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(apply_workspace(&workspace, &name, args), Ok(true));
        let documents = workspace.documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].bufnr, 3);
        assert_eq!(documents[0].filetype, "go");
        assert_eq!(documents[0].scheme(), "sftp");

        let (name, args) = parse_line(r#"["workspace/addFolders", "/src/a", "/src/b"]"#)
            .unwrap()
            .unwrap();
        assert_eq!(apply_workspace(&workspace, &name, args), Ok(true));
        assert_eq!(workspace.folders().len(), 2);

        let (name, args) = parse_line(r#"["workspace/didClose", 3]"#).unwrap().unwrap();
        assert_eq!(apply_workspace(&workspace, &name, args), Ok(true));
        assert!(workspace.documents().is_empty());

        assert_eq!(apply_workspace(&workspace, "BufEnter", vec![Value::from(1)]), Ok(false));
    }

    #[tokio::test]
    async fn test_workspace_notifications_are_broadcast() {
        let workspace = Workspace::new();
        let mut events = workspace.subscribe();
        let (name, args) = parse_line(r#"["workspace/addRuntimePaths", "/opt/ext"]"#)
            .unwrap()
            .unwrap();
        assert_eq!(apply_workspace(&workspace, &name, args), Ok(true));

        match events.recv().await.unwrap() {
            WorkspaceEvent::RuntimePathAdded(paths) => {
                assert_eq!(paths, vec![PathBuf::from("/opt/ext")])
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_workspace_notification_errors() {
        let workspace = Workspace::new();
        assert_eq!(
            apply_workspace(&workspace, "workspace/rename", Vec::new()),
            Err(LineError::UnknownMethod("workspace/rename".to_string()))
        );
        assert!(matches!(
            apply_workspace(&workspace, "workspace/didOpen", Vec::new()),
            Err(LineError::InvalidArgs { .. })
        ));
        assert!(matches!(
            apply_workspace(&workspace, "workspace/didOpen", vec![serde_json::json!({"bufnr": 1})]),
            Err(LineError::InvalidArgs { .. })
        ));
        assert!(matches!(
            apply_workspace(&workspace, "workspace/addFolders", vec![Value::from(7)]),
            Err(LineError::InvalidArgs { .. })
        ));
        assert!(workspace.documents().is_empty());
    }

    proptest! {
        #[test]
        fn parse_line_never_panics(line in ".*") {
            let _ = parse_line(&line);
        }
    }
}

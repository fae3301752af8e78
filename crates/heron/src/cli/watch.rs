// cli/watch.rs - `heron watch` subcommand
//
// Keeps a session open over a workspace, follows changes on disk and prints
// diagnostics of every file as it is re-linted.

use std::path::PathBuf;
use std::sync::Arc;

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};
use url::Url;

use crate::session::DiagnosticsPublisher;
use crate::watcher::{self, WorkspaceWatcher};

#[derive(Debug)]
pub struct WatchArgs {
    pub path: PathBuf,
    pub settings: Option<PathBuf>,
}

/// Expected usage: `heron watch <path> [--settings <file.json>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<WatchArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut settings: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                settings = Some(PathBuf::from(args.next().ok_or("--settings requires a file")?));
            }
            other if other.starts_with('-') => return Err(format!("Unknown flag: '{}'", other)),
            _ if path.is_some() => {
                return Err("Multiple paths provided; expected exactly one".to_string())
            }
            _ => path = Some(PathBuf::from(arg)),
        }
    }
    let path = path.ok_or_else(|| "Missing required <path> argument".to_string())?;
    Ok(WatchArgs { path, settings })
}

/// Prints diagnostics as `path:line:col: severity: message`
#[derive(Debug, Default)]
pub struct ConsolePublisher;

impl DiagnosticsPublisher for ConsolePublisher {
    fn publish(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        for line in format_diagnostics(uri, &diagnostics) {
            println!("{}", line);
        }
    }
}

fn format_diagnostics(uri: &Url, diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics
        .iter()
        .map(|d| {
            let severity = match d.severity {
                Some(DiagnosticSeverity::ERROR) => "error",
                Some(DiagnosticSeverity::WARNING) => "warning",
                Some(DiagnosticSeverity::INFORMATION) => "info",
                _ => "hint",
            };
            format!(
                "{}:{}:{}: {}: {}",
                uri.path(),
                d.range.start.line + 1,
                d.range.start.character + 1,
                severity,
                d.message
            )
        })
        .collect()
}

/// Run until interrupted
pub async fn run_watch(args: &WatchArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.settings.as_deref())?;
    let (session, root) = super::open_session(&args.path, config, Arc::new(ConsolePublisher)).await?;

    // Files are only linted once opened; report the initial state of every file
    for uri in session.files().all(false) {
        if let Ok(compiled) = session.latest_compiled_version(&uri).await {
            let diagnostics: Vec<Diagnostic> =
                compiled.diagnostics().into_iter().map(|d| d.diagnostic).collect();
            ConsolePublisher.publish(&uri, diagnostics);
        }
    }

    let (_watcher, rx) = WorkspaceWatcher::new(&[root])?;
    let forwarding = tokio::spawn(watcher::forward(session.clone(), rx));
    println!("Watching {} (Ctrl-C to stop)", args.path.display());

    tokio::signal::ctrl_c().await?;
    forwarding.abort();
    session.settle().await?;
    Ok(())
}

//! Command line entry points that drive the analysis core without an editor.

pub mod index_stats;
pub mod symbols;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::analyzer::OutlineAnalyzerFactory;
use crate::config::{parse_settings, HeronConfig};
use crate::session::{DiagnosticsPublisher, Session};

/// Load settings from a JSON file shaped like the editor's `heron` section
pub fn load_config(settings: Option<&Path>) -> anyhow::Result<HeronConfig> {
    let Some(path) = settings else {
        return Ok(HeronConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read settings file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(parse_settings(&value))
}

/// Start a session over `root` with the outline analyzer and wait until the
/// startup pass and its index rebuild are done
pub async fn open_session(
    root: &Path,
    config: HeronConfig,
    publisher: Arc<dyn DiagnosticsPublisher>,
) -> anyhow::Result<(Session, PathBuf)> {
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Could not resolve {}", root.display()))?;
    let session = Session::from_config(config, Arc::new(OutlineAnalyzerFactory), publisher)?;
    let summary = session.initialize(vec![root.clone()]).await?;
    session.settle().await?;
    log::info!(
        "Initialized {}: {} compiled, {} failed",
        root.display(),
        summary.compiled,
        summary.failed.len()
    );
    Ok((session, root))
}

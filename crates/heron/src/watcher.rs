//
// watcher.rs
//
// Turns file system notifications into watched-file events for a session
//

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tower_lsp::lsp_types::{FileChangeType, FileEvent};
use url::Url;

use crate::config::HeronConfig;
use crate::error::HeronResult;
use crate::session::Session;

/// Keeps the underlying OS watches alive; dropping it stops event delivery
pub struct WorkspaceWatcher {
    _watcher: RecommendedWatcher,
}

impl WorkspaceWatcher {
    /// Watch `roots` recursively. Batches of events arrive on the returned
    /// receiver, one batch per OS notification.
    pub fn new(roots: &[PathBuf]) -> HeronResult<(Self, mpsc::UnboundedReceiver<Vec<FileEvent>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let events = file_events(&event);
                    if !events.is_empty() {
                        let _ = tx.send(events);
                    }
                }
                Err(e) => log::warn!("File watcher error: {}", e),
            }
        })?;
        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            log::info!("Watching {}", root.display());
        }
        Ok((Self { _watcher: watcher }, rx))
    }
}

/// Feed watcher batches into `session` until the watcher is dropped
pub async fn forward(session: Session, mut rx: mpsc::UnboundedReceiver<Vec<FileEvent>>) {
    while let Some(mut batch) = rx.recv().await {
        // Coalesce whatever queued up behind this batch
        while let Ok(more) = rx.try_recv() {
            batch.extend(more);
        }
        let batch = relevant(batch, session.config());
        if batch.is_empty() {
            continue;
        }
        log::trace!("Forwarding {} file event(s)", batch.len());
        if let Err(e) = session.did_change_watched_files(batch).await {
            log::warn!("Failed to apply file events: {}", e);
        }
    }
}

fn relevant(batch: Vec<FileEvent>, config: &HeronConfig) -> Vec<FileEvent> {
    batch
        .into_iter()
        .filter(|event| {
            event.uri.to_file_path().is_ok_and(|path| {
                let skipped = path.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .is_some_and(|name| config.is_excluded_dir(name))
                });
                !skipped
                    && (config.is_source_file(&path)
                        || config.is_auxiliary_source(&path)
                        || config.is_build_descriptor(&path))
            })
        })
        .collect()
}

fn file_events(event: &notify::Event) -> Vec<FileEvent> {
    let typ = match event.kind {
        EventKind::Create(_) => FileChangeType::CREATED,
        EventKind::Remove(_) => FileChangeType::DELETED,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileChangeType::DELETED,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileChangeType::CREATED,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            let mut events = Vec::new();
            if let Some(from) = event.paths.first().and_then(|p| Url::from_file_path(p).ok()) {
                events.push(FileEvent::new(from, FileChangeType::DELETED));
            }
            if let Some(to) = event.paths.get(1).and_then(|p| Url::from_file_path(p).ok()) {
                events.push(FileEvent::new(to, FileChangeType::CREATED));
            }
            return events;
        }
        EventKind::Modify(_) => FileChangeType::CHANGED,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter_map(|p| Url::from_file_path(p).ok())
        .map(|uri| FileEvent::new(uri, typ))
        .collect()
}

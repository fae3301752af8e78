//
// session.rs
//
// The analysis session: one per server instance, owning every component
//

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexSet;
use tower_lsp::lsp_types::{
    Diagnostic, FileChangeType, FileEvent, TextDocumentContentChangeEvent,
};
use url::Url;

use crate::analysis_cache::{AnalysisCache, CompileSummary, CompiledFile, IndexSink};
use crate::analyzer::{
    Analyzer, AnalyzerFactory, AnalyzerInputs, AnalyzerSlot, BindingContext, FileDiagnostic,
    ParsedFile,
};
use crate::classpath::{self, BuildTool, ClasspathCache, ProjectClasspath};
use crate::config::HeronConfig;
use crate::declaration::Declaration;
use crate::error::{HeronError, HeronResult};
use crate::file_store::FileStore;
use crate::index::{SymbolIndex, SymbolQuery};
use crate::scheduler::{
    CancelCheck, Debouncer, IndexQueue, InteractiveQueue, WorkerHandle, WorkerQueue,
    INDEX_WORKER, INTERACTIVE_WORKER,
};
use crate::store::Database;
use crate::workspace::{self, SourceKind};

/// Receives diagnostics for open files
pub trait DiagnosticsPublisher: Send + Sync {
    fn publish(&self, uri: &Url, diagnostics: Vec<Diagnostic>);
}

/// Publisher that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl DiagnosticsPublisher for NullPublisher {
    fn publish(&self, _uri: &Url, _diagnostics: Vec<Diagnostic>) {}
}

/// Forwards declaration changes to the index worker
struct IndexWriter {
    queue: WorkerHandle<SymbolIndex>,
    enabled: bool,
}

impl IndexSink for IndexWriter {
    fn submit(&self, removed: Vec<Declaration>, added: Vec<Declaration>) {
        if !self.enabled || (removed.is_empty() && added.is_empty()) {
            return;
        }
        let _ = self.queue.submit(move |index: &mut SymbolIndex| {
            if let Err(e) = index.update(&removed, &added) {
                log::warn!("Symbol index update failed, batch abandoned: {}", e);
            }
        });
    }

    fn rebuild(&self, all: Vec<Declaration>) {
        if !self.enabled {
            return;
        }
        let _ = self.queue.submit(move |index: &mut SymbolIndex| {
            if let Err(e) = index.rebuild_all(&all) {
                log::warn!("Symbol index rebuild failed: {}", e);
            }
        });
    }
}

/// Everything a running session consists of.
///
/// Wrapped in an `Arc` so debounced tasks can reach it; they hold a `Weak`
/// and give up once the session is gone.
struct SessionInner {
    config: HeronConfig,
    files: FileStore,
    cache: Arc<AnalysisCache>,
    index: SymbolIndex,
    classpath: ClasspathCache,
    factory: Arc<dyn AnalyzerFactory>,
    publisher: Arc<dyn DiagnosticsPublisher>,
    interactive: InteractiveQueue,
    index_queue: IndexQueue,
    debouncer: Debouncer,
    roots: Mutex<BTreeSet<PathBuf>>,
    /// Inputs of the current analyzer; held while the dependency set is reloaded
    inputs: tokio::sync::Mutex<AnalyzerInputs>,
    lint_todo: Mutex<IndexSet<Url>>,
    lint_count: AtomicUsize,
}

/// Entry point of the analysis core.
///
/// File notifications are synchronous and only update text; analysis runs on
/// the interactive worker and is awaited by callers. Cloning is cheap and
/// every clone drives the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    pub fn new(
        config: HeronConfig,
        db: Database,
        build_tool: Arc<dyn BuildTool>,
        factory: Arc<dyn AnalyzerFactory>,
        publisher: Arc<dyn DiagnosticsPublisher>,
    ) -> HeronResult<Self> {
        let index = SymbolIndex::new(db.clone());
        let index_queue: IndexQueue = WorkerQueue::spawn(INDEX_WORKER, index.clone())?;
        let writer = IndexWriter {
            queue: index_queue.handle(),
            enabled: config.index_enabled,
        };
        let cache = Arc::new(AnalysisCache::new(Arc::new(writer), config.codegen_enabled));
        let files = FileStore::new(cache.clone(), &config);
        let interactive: InteractiveQueue =
            WorkerQueue::spawn(INTERACTIVE_WORKER, AnalyzerSlot::NotReady)?;
        let debouncer = Debouncer::new(config.debounce())?;

        log::info!(
            "Session created (index {}, codegen {}, debounce {:?})",
            if config.index_enabled { "on" } else { "off" },
            if config.codegen_enabled { "on" } else { "off" },
            config.debounce()
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                files,
                cache,
                index,
                classpath: ClasspathCache::new(db, build_tool),
                factory,
                publisher,
                interactive,
                index_queue,
                debouncer,
                roots: Mutex::new(BTreeSet::new()),
                inputs: tokio::sync::Mutex::new(AnalyzerInputs::default()),
                lint_todo: Mutex::new(IndexSet::new()),
                lint_count: AtomicUsize::new(0),
                config,
            }),
        })
    }

    /// Session with the store and build tool described by `config`
    pub fn from_config(
        config: HeronConfig,
        factory: Arc<dyn AnalyzerFactory>,
        publisher: Arc<dyn DiagnosticsPublisher>,
    ) -> HeronResult<Self> {
        let db = Database::open(&config.storage)?;
        let build_tool = classpath::build_tool_from_config(&config);
        Self::new(config, db, build_tool, factory, publisher)
    }

    pub fn config(&self) -> &HeronConfig {
        &self.inner.config
    }

    pub fn files(&self) -> &FileStore {
        &self.inner.files
    }

    pub fn index(&self) -> &SymbolIndex {
        &self.inner.index
    }

    pub fn classpath_cache(&self) -> &ClasspathCache {
        &self.inner.classpath
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        lock(&self.inner.roots).iter().cloned().collect()
    }

    /// Number of completed lint passes
    pub fn lint_count(&self) -> usize {
        self.inner.lint_count.load(Ordering::SeqCst)
    }

    pub async fn is_ready(&self) -> HeronResult<bool> {
        self.inner.interactive.submit(|slot: &mut AnalyzerSlot| slot.is_ready()).await
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Startup: resolve dependencies of `roots`, load their sources and run
    /// the one compile and index pass.
    pub async fn initialize(&self, roots: Vec<PathBuf>) -> HeronResult<CompileSummary> {
        lock(&self.inner.roots).extend(roots);
        let mut current = self.inner.inputs.lock().await;
        let next = self.inner.load_roots().await;
        let summary = self.inner.replace_analyzer(&next, Pass::Initial).await?;
        *current = next;
        drop(current);
        self.inner.lint_pending();
        Ok(summary)
    }

    /// Start tracking `root`. Recompiles everything when the dependency set
    /// changed, otherwise only compiles what is new.
    pub async fn add_workspace_root(&self, root: PathBuf) -> HeronResult<CompileSummary> {
        log::info!("Adding workspace root {}", root.display());
        lock(&self.inner.roots).insert(root);
        self.inner.reload().await
    }

    /// Stop tracking `root`; files below it that are not open are forgotten
    pub async fn remove_workspace_root(&self, root: &Path) -> HeronResult<CompileSummary> {
        log::info!("Removing workspace root {}", root.display());
        lock(&self.inner.roots).remove(root);
        let removed = self.inner.files.remove_unopened_under(root);
        log::info!("Forgot {} file(s) under {}", removed.len(), root.display());
        self.inner.reload().await
    }

    /// Re-resolve dependencies and recompile everything if they changed
    pub async fn reload_classpath(&self) -> HeronResult<CompileSummary> {
        self.inner.reload().await
    }

    /// Wait until pending lint passes and queued index writes are done
    pub async fn settle(&self) -> HeronResult<()> {
        self.inner.debouncer.wait_idle().await;
        self.inner.interactive.submit(|_: &mut AnalyzerSlot| ()).await?;
        self.inner.index_queue.submit(|_: &mut SymbolIndex| ()).await?;
        Ok(())
    }

    // ── file notifications ─────────────────────────────────────────────

    pub fn did_open(&self, uri: &Url, text: &str, version: i32) {
        self.inner.files.open(uri, text, version);
        self.inner.lint(uri.clone(), LintTiming::Now);
    }

    pub fn did_change(&self, uri: &Url, version: i32, changes: &[TextDocumentContentChangeEvent]) {
        if self.inner.files.edit(uri, version, changes) {
            self.inner.lint(uri.clone(), LintTiming::Later);
        }
    }

    pub fn did_save(&self, uri: &Url) {
        if self.inner.config.codegen_enabled {
            let cache = self.inner.cache.clone();
            let target = uri.clone();
            let _ = self.inner.interactive.submit(move |slot: &mut AnalyzerSlot| {
                if let Err(e) = slot.analyzer().and_then(|a| cache.save(a, &target)) {
                    log::warn!("Could not generate code for {}: {}", target, e);
                }
            });
        }
        self.inner.lint(uri.clone(), LintTiming::Now);
    }

    pub fn did_close(&self, uri: &Url) {
        self.inner.files.close(uri);
        lock(&self.inner.lint_todo).shift_remove(uri);
        self.inner.publisher.publish(uri, Vec::new());
    }

    /// Register an ephemeral file; `did_close` discards it again
    pub fn put_temporary(&self, uri: &Url, text: &str) {
        self.inner.files.put_temporary(uri, text);
    }

    /// Disk changes reported by the editor or a file watcher
    pub async fn did_change_watched_files(&self, changes: Vec<FileEvent>) -> HeronResult<()> {
        let mut dependencies_changed = false;
        for change in changes {
            let Ok(path) = change.uri.to_file_path() else {
                continue;
            };
            if self.inner.config.is_build_descriptor(&path)
                || self.inner.config.is_auxiliary_source(&path)
            {
                log::info!("Dependency-relevant file changed: {}", path.display());
                dependencies_changed = true;
                continue;
            }
            if !self.inner.config.is_source_file(&path) || !self.inner.is_under_root(&path) {
                continue;
            }

            let files = &self.inner.files;
            match change.typ {
                FileChangeType::CREATED => files.created_on_disk(&change.uri),
                FileChangeType::CHANGED => files.changed_on_disk(&change.uri),
                FileChangeType::DELETED => files.deleted_on_disk(&change.uri),
                _ => continue,
            }
            if files.contains(&change.uri) {
                self.inner.lint(change.uri, LintTiming::Later);
            }
        }

        if dependencies_changed {
            self.reload_classpath().await?;
        }
        Ok(())
    }

    // ── analysis ────────────────────────────────────────────────────────

    pub fn content(&self, uri: &Url) -> HeronResult<String> {
        self.inner.files.content(uri)
    }

    pub async fn parsed_file(&self, uri: &Url) -> HeronResult<Arc<ParsedFile>> {
        let uri = uri.clone();
        self.inner
            .with_analyzer(move |cache, analyzer| cache.parsed_file(analyzer, &uri))
            .await
    }

    /// Compile result matching the current content
    pub async fn current_version(&self, uri: &Url) -> HeronResult<CompiledFile> {
        let uri = uri.clone();
        self.inner
            .with_analyzer(move |cache, analyzer| cache.current_version(analyzer, &uri))
            .await
    }

    /// Last compile result, possibly older than the content
    pub async fn latest_compiled_version(&self, uri: &Url) -> HeronResult<CompiledFile> {
        let uri = uri.clone();
        self.inner
            .with_analyzer(move |cache, analyzer| cache.latest_compiled_version(analyzer, &uri))
            .await
    }

    pub async fn compile_files(&self, uris: Vec<Url>) -> HeronResult<Arc<dyn BindingContext>> {
        self.inner
            .with_analyzer(move |cache, analyzer| cache.compile_files(analyzer, &uris))
            .await
    }

    pub async fn compile_all_files(&self) -> HeronResult<CompileSummary> {
        self.inner
            .with_analyzer(|cache, analyzer| Ok(cache.compile_all_files(analyzer)))
            .await
    }

    pub async fn save_all_files(&self) -> HeronResult<usize> {
        self.inner
            .with_analyzer(|cache, analyzer| Ok(cache.save_all_files(analyzer)))
            .await
    }

    pub async fn refresh_all(&self) -> HeronResult<CompileSummary> {
        self.inner
            .with_analyzer(|cache, analyzer| Ok(cache.refresh_all(analyzer)))
            .await
    }

    /// Search the symbol index
    pub fn query(&self, query: &SymbolQuery) -> HeronResult<Vec<Declaration>> {
        self.inner.index.query(query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Compile everything, then build the index in one go
    Initial,
    /// Drop every result and start over
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LintTiming {
    Now,
    Later,
}

impl SessionInner {
    async fn with_analyzer<R, F>(&self, f: F) -> HeronResult<R>
    where
        F: FnOnce(&AnalysisCache, &mut dyn Analyzer) -> HeronResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let cache = self.cache.clone();
        self.interactive
            .submit(move |slot: &mut AnalyzerSlot| f(&cache, slot.analyzer()?))
            .await?
    }

    fn is_under_root(&self, path: &Path) -> bool {
        lock(&self.roots).iter().any(|root| path.starts_with(root))
    }

    /// Resolve dependencies of every root and register the sources found
    /// there. Returns the inputs the analyzer should be built from.
    async fn load_roots(&self) -> AnalyzerInputs {
        let roots: Vec<PathBuf> = lock(&self.roots).iter().cloned().collect();
        let mut inputs = AnalyzerInputs::default();
        let mut primary_dirs = Vec::new();
        let mut auxiliary_dirs = Vec::new();

        for root in &roots {
            let resolved: ProjectClasspath = self
                .classpath
                .resolve(root, self.config.fetch_sources)
                .await;
            primary_dirs.extend(workspace::source_dirs(root, &resolved, SourceKind::Primary));
            auxiliary_dirs.extend(workspace::source_dirs(root, &resolved, SourceKind::Auxiliary));
            inputs.classpath.extend(resolved);
        }

        inputs.auxiliary_sources = workspace::scan(&auxiliary_dirs, &self.config, SourceKind::Auxiliary);
        let uris = workspace::scan_uris(&primary_dirs, &self.config);
        let loaded = self.files.load_all_from_disk(&uris);
        log::info!(
            "Loaded {} new source file(s) from {} root(s); {} classpath entries, {} auxiliary sources",
            loaded,
            roots.len(),
            inputs.classpath.entries.len(),
            inputs.auxiliary_sources.len()
        );
        inputs
    }

    async fn reload(&self) -> HeronResult<CompileSummary> {
        let mut current = self.inputs.lock().await;
        let next = self.load_roots().await;
        let ready = self.interactive.submit(|slot: &mut AnalyzerSlot| slot.is_ready()).await?;

        let summary = if !ready {
            self.replace_analyzer(&next, Pass::Initial).await?
        } else if *current != next {
            log::info!("Dependency set changed, recompiling the workspace");
            self.replace_analyzer(&next, Pass::Refresh).await?
        } else {
            self.with_analyzer(|cache, analyzer| Ok(cache.compile_all_files(analyzer)))
                .await?
        };
        *current = next;
        Ok(summary)
    }

    async fn replace_analyzer(&self, inputs: &AnalyzerInputs, pass: Pass) -> HeronResult<CompileSummary> {
        let analyzer = self
            .factory
            .instantiate(inputs)
            .map_err(|e| HeronError::AnalyzerInit(e.to_string()))?;
        let cache = self.cache.clone();
        self.interactive
            .submit(move |slot: &mut AnalyzerSlot| {
                slot.replace(analyzer);
                let analyzer = slot.analyzer()?;
                Ok(match pass {
                    Pass::Refresh => cache.refresh_all(analyzer),
                    Pass::Initial => cache.initial_pass(analyzer),
                })
            })
            .await?
    }

    /// Queue `uri` for linting, now (open, save) or once edits settle (change)
    fn lint(self: &Arc<Self>, uri: Url, timing: LintTiming) {
        lock(&self.lint_todo).insert(uri);
        let session = Arc::downgrade(self);
        let task = move |cancel: CancelCheck| run_lint(session, cancel);
        match timing {
            LintTiming::Now => self.debouncer.submit_immediately(task),
            LintTiming::Later => self.debouncer.schedule(task),
        }
    }

    /// Lint whatever queued up while the analyzer was not ready
    fn lint_pending(self: &Arc<Self>) {
        let first = lock(&self.lint_todo).first().cloned();
        if let Some(uri) = first {
            self.lint(uri, LintTiming::Now);
        }
    }

    fn publish(&self, uris: &[Url], diagnostics: Vec<FileDiagnostic>) {
        if !self.config.diagnostics_enabled {
            return;
        }
        let mut by_file: HashMap<&Url, Vec<Diagnostic>> =
            uris.iter().map(|uri| (uri, Vec::new())).collect();
        for d in diagnostics {
            if let Some(list) = by_file.get_mut(&d.uri) {
                list.push(d.diagnostic);
            }
        }
        for uri in uris {
            if !self.files.is_open(uri) {
                continue;
            }
            let diagnostics = by_file.remove(uri).unwrap_or_default();
            log::trace!("Publishing {} diagnostic(s) for {}", diagnostics.len(), uri);
            self.publisher.publish(uri, diagnostics);
        }
    }
}

async fn run_lint(session: Weak<SessionInner>, cancel: CancelCheck) {
    let Some(session) = session.upgrade() else {
        return;
    };
    let uris: Vec<Url> = {
        let mut todo = lock(&session.lint_todo);
        let uris = todo.iter().filter(|uri| session.cache.contains(uri)).cloned().collect();
        todo.clear();
        uris
    };
    if uris.is_empty() {
        return;
    }

    let targets = uris.clone();
    let result = session
        .with_analyzer(move |cache, analyzer| {
            let bound = cache.compile_files(analyzer, &targets)?;
            Ok(bound.diagnostics())
        })
        .await;

    let requeue = |session: &SessionInner| lock(&session.lint_todo).extend(uris.iter().cloned());
    match result {
        Ok(_) if cancel.is_cancelled() => {
            // The newer pass may already have drained the queue
            log::trace!("Lint of {} file(s) superseded, requeueing", uris.len());
            requeue(&session);
            session.lint(uris[0].clone(), LintTiming::Later);
        }
        Ok(diagnostics) => {
            session.publish(&uris, diagnostics);
            session.lint_count.fetch_add(1, Ordering::SeqCst);
        }
        Err(HeronError::AnalyzerNotReady) => {
            log::trace!("Analyzer not ready, deferring lint of {} file(s)", uris.len());
            requeue(&session);
        }
        Err(e) => log::warn!("Lint failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::DeclarationKind;
    use crate::test_utils::{
        write_source, CountingAnalyzerFactory, RecordingPublisher, StaticBuildTool,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use tower_lsp::lsp_types::{Position, Range};

    struct Fixture {
        session: Session,
        publisher: Arc<RecordingPublisher>,
        factory: CountingAnalyzerFactory,
        build_tool: Arc<StaticBuildTool>,
        dir: TempDir,
    }

    fn fixture_with(config: HeronConfig, build_tool: StaticBuildTool) -> Fixture {
        fixture_with_factory(config, build_tool, CountingAnalyzerFactory::default())
    }

    fn fixture_with_factory(
        config: HeronConfig,
        build_tool: StaticBuildTool,
        factory: CountingAnalyzerFactory,
    ) -> Fixture {
        let publisher = Arc::new(RecordingPublisher::default());
        let build_tool = Arc::new(build_tool);
        let session = Session::new(
            config,
            Database::in_memory().unwrap(),
            build_tool.clone(),
            Arc::new(factory.clone()),
            publisher.clone(),
        )
        .unwrap();
        Fixture {
            session,
            publisher,
            factory,
            build_tool,
            dir: TempDir::new().unwrap(),
        }
    }

    fn fixture() -> Fixture {
        let config = HeronConfig {
            diagnostics_debounce_ms: 20,
            ..HeronConfig::default()
        };
        fixture_with(config, StaticBuildTool::new(""))
    }

    fn replace_all(text: &str) -> Vec<TextDocumentContentChangeEvent> {
        vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_string(),
        }]
    }

    fn query(session: &Session, prefix: &str) -> Vec<Declaration> {
        session.query(&SymbolQuery::prefix(prefix)).unwrap()
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let fx = fixture();
        let uri = write_source(fx.dir.path(), "A.kt", "fun f() {}");
        fx.session.put_temporary(&uri, "fun f() {}");
        assert!(!fx.session.is_ready().await.unwrap());
        let err = fx.session.current_version(&uri).await.unwrap_err();
        assert!(matches!(err, HeronError::AnalyzerNotReady));
    }

    #[tokio::test]
    async fn test_initialize_compiles_and_indexes_once() {
        let fx = fixture();
        write_source(fx.dir.path(), "src/A.kt", "fun alpha() {}");
        write_source(fx.dir.path(), "src/B.kt", "class Beta");

        let summary = fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        fx.session.settle().await.unwrap();

        assert_eq!(summary.compiled, 2);
        assert_eq!(fx.factory.probe.instances.load(Ordering::SeqCst), 1);
        assert_eq!(fx.factory.probe.compiles.load(Ordering::SeqCst), 2);
        assert_eq!(fx.session.index().count().unwrap(), 2);
        assert_eq!(query(&fx.session, "alp").len(), 1);
    }

    #[tokio::test]
    async fn test_open_lints_and_publishes() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let uri = write_source(fx.dir.path(), "Broken.kt", "fun f() {");

        fx.session.did_open(&uri, "fun f() {", 1);
        fx.session.settle().await.unwrap();

        let diagnostics = fx.publisher.last_for(&uri).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Expecting '}'");
        assert_eq!(fx.session.lint_count(), 1);
    }

    #[tokio::test]
    async fn test_edit_burst_lints_once() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let uri = write_source(fx.dir.path(), "A.kt", "fun a0() {}");
        fx.session.did_open(&uri, "fun a0() {}", 1);
        fx.session.settle().await.unwrap();
        let lints_before = fx.session.lint_count();

        for version in 2..12 {
            fx.session
                .did_change(&uri, version, &replace_all(&format!("fun a{version}() {{}}")));
        }
        fx.session.settle().await.unwrap();

        assert_eq!(fx.session.lint_count(), lints_before + 1);
        assert_eq!(query(&fx.session, "a").len(), 1);
        assert_eq!(query(&fx.session, "a11").len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_lint_still_publishes() {
        let config = HeronConfig {
            diagnostics_debounce_ms: 20,
            ..HeronConfig::default()
        };
        let factory = CountingAnalyzerFactory::slow_on("SLOW", Duration::from_millis(300));
        let fx = fixture_with_factory(config, StaticBuildTool::new(""), factory);
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let slow = write_source(fx.dir.path(), "A.kt", "// SLOW\nfun a() {");
        let quick = write_source(fx.dir.path(), "B.kt", "fun b() {");

        fx.session.did_open(&slow, "// SLOW\nfun a() {", 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Supersedes the pass still compiling A and takes only B off the queue
        fx.session.did_open(&quick, "fun b() {", 1);
        fx.session.settle().await.unwrap();

        assert!(fx.publisher.last_for(&slow).is_some_and(|d| !d.is_empty()));
        assert_eq!(fx.publisher.last_for(&quick).map(|d| d.len()), Some(1));
    }

    #[tokio::test]
    async fn test_compile_files_with_repeated_uri() {
        let fx = fixture();
        let uri = write_source(fx.dir.path(), "A.kt", "fun f() {}");
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        // Edited without a lint so both entries find the file stale
        fx.session.files().open(&uri, "fun g() {}", 5);

        fx.session.compile_files(vec![uri.clone(), uri.clone()]).await.unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(query(&fx.session, "g").len(), 1);
        assert!(query(&fx.session, "f").is_empty());
    }

    #[tokio::test]
    async fn test_rename_updates_index() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let uri = write_source(fx.dir.path(), "A.kt", "fun f() {}");

        fx.session.did_open(&uri, "fun f() {}", 1);
        fx.session.settle().await.unwrap();
        let found = query(&fx.session, "f");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, DeclarationKind::Function);

        fx.session.did_change(
            &uri,
            2,
            &[TextDocumentContentChangeEvent {
                range: Some(Range::new(Position::new(0, 4), Position::new(0, 5))),
                range_length: None,
                text: "g".to_string(),
            }],
        );
        fx.session.settle().await.unwrap();
        assert!(query(&fx.session, "f").is_empty());
        assert_eq!(query(&fx.session, "g").len(), 1);
    }

    #[tokio::test]
    async fn test_close_clears_diagnostics() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let uri = write_source(fx.dir.path(), "A.kt", "fun f() {}");
        fx.session.did_open(&uri, "fun f() {", 1);
        fx.session.settle().await.unwrap();
        fx.session.did_close(&uri);
        assert_eq!(fx.publisher.last_for(&uri), Some(Vec::new()));
        // Back to disk content
        assert_eq!(fx.session.content(&uri).unwrap(), "fun f() {}");
    }

    #[tokio::test]
    async fn test_lint_before_initialize_is_deferred() {
        let fx = fixture();
        let uri = write_source(fx.dir.path(), "A.kt", "fun f() {");
        fx.session.did_open(&uri, "fun f() {", 1);
        fx.session.settle().await.unwrap();
        assert!(fx.publisher.published().is_empty());

        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(fx.publisher.last_for(&uri).map(|d| d.len()), Some(1));
    }

    #[tokio::test]
    async fn test_build_descriptor_change_reinstantiates() {
        let fx = fixture();
        let jar = fx.dir.path().join("lib.jar");
        std::fs::write(&jar, b"").unwrap();
        write_source(fx.dir.path(), "A.kt", "fun a() {}");
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(fx.factory.probe.instances.load(Ordering::SeqCst), 1);

        // Unchanged descriptor: nothing happens
        let descriptor = write_source(fx.dir.path(), "build.gradle.kts", "");
        fx.session
            .did_change_watched_files(vec![FileEvent::new(descriptor.clone(), FileChangeType::CHANGED)])
            .await
            .unwrap();
        assert_eq!(fx.factory.probe.instances.load(Ordering::SeqCst), 1);

        fx.build_tool
            .set_listing(format!("heron-dependency {}\n", jar.display()), 2);
        fx.session
            .did_change_watched_files(vec![FileEvent::new(descriptor, FileChangeType::CHANGED)])
            .await
            .unwrap();
        fx.session.settle().await.unwrap();

        assert_eq!(fx.factory.probe.instances.load(Ordering::SeqCst), 2);
        let inputs = fx.factory.probe.inputs.lock().unwrap().clone();
        assert_eq!(inputs[1].classpath.entries.len(), 1);
        assert_eq!(query(&fx.session, "a").len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_build_tool_still_analyzes() {
        let fx = fixture_with(HeronConfig::default(), StaticBuildTool::unavailable());
        write_source(fx.dir.path(), "A.kt", "fun a() {}");
        let summary = fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(summary.compiled, 1);
        assert_eq!(fx.build_tool.calls(), 1);
        assert_eq!(query(&fx.session, "a").len(), 1);
    }

    #[tokio::test]
    async fn test_workspace_roots_come_and_go() {
        let fx = fixture();
        let other = TempDir::new().unwrap();
        write_source(fx.dir.path(), "A.kt", "fun first() {}");
        write_source(other.path(), "B.kt", "fun second() {}");
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();

        fx.session.add_workspace_root(other.path().to_path_buf()).await.unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(query(&fx.session, "second").len(), 1);
        assert_eq!(fx.session.roots().len(), 2);

        fx.session.remove_workspace_root(other.path()).await.unwrap();
        fx.session.settle().await.unwrap();
        assert!(query(&fx.session, "second").is_empty());
        assert_eq!(query(&fx.session, "first").len(), 1);
    }

    #[tokio::test]
    async fn test_disk_events_keep_index_current() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();

        let uri = write_source(fx.dir.path(), "New.kt", "class Fresh");
        fx.session
            .did_change_watched_files(vec![FileEvent::new(uri.clone(), FileChangeType::CREATED)])
            .await
            .unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(query(&fx.session, "Fresh").len(), 1);

        std::fs::remove_file(uri.to_file_path().unwrap()).unwrap();
        fx.session
            .did_change_watched_files(vec![FileEvent::new(uri, FileChangeType::DELETED)])
            .await
            .unwrap();
        fx.session.settle().await.unwrap();
        assert!(query(&fx.session, "Fresh").is_empty());
    }

    #[tokio::test]
    async fn test_index_disabled() {
        let config = HeronConfig {
            index_enabled: false,
            diagnostics_debounce_ms: 10,
            ..HeronConfig::default()
        };
        let fx = fixture_with(config, StaticBuildTool::new(""));
        write_source(fx.dir.path(), "A.kt", "fun a() {}");
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        fx.session.settle().await.unwrap();
        assert_eq!(fx.session.index().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_temporary_file_is_analyzed_but_not_indexed() {
        let fx = fixture();
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let scratch = Url::parse("file:///scratch/Eval.kt").unwrap();
        fx.session.put_temporary(&scratch, "val probe = 1");
        let compiled = fx.session.current_version(&scratch).await.unwrap();
        assert_eq!(compiled.declarations().len(), 1);
        fx.session.settle().await.unwrap();
        assert!(query(&fx.session, "probe").is_empty());
        fx.session.did_close(&scratch);
        assert!(!fx.session.files().contains(&scratch));
    }

    #[tokio::test]
    async fn test_settle_waits_for_debounce() {
        let config = HeronConfig {
            diagnostics_debounce_ms: 100,
            ..HeronConfig::default()
        };
        let fx = fixture_with(config, StaticBuildTool::new(""));
        fx.session.initialize(vec![fx.dir.path().to_path_buf()]).await.unwrap();
        let uri = write_source(fx.dir.path(), "A.kt", "fun a() {}");
        fx.session.did_open(&uri, "fun a() {}", 1);
        fx.session.did_change(&uri, 2, &replace_all("fun b() {}"));
        let start = std::time::Instant::now();
        fx.session.settle().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(query(&fx.session, "b").len(), 1);
    }
}

//! Fakes and fixtures shared by unit tests, integration tests and benches.

pub mod fixture_workspace;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tower_lsp::lsp_types::Diagnostic;
use url::Url;

use crate::analysis_cache::IndexSink;
use crate::analyzer::{
    Analyzer, AnalyzerFactory, AnalyzerInputs, BindingContext, CompileOutput, ModuleContext,
    OutlineAnalyzer, ParsedFile, SyntaxTree,
};
use crate::classpath::BuildTool;
use crate::declaration::Declaration;
use crate::session::DiagnosticsPublisher;

/// Observations shared between a [`CountingAnalyzer`] and the test
#[derive(Debug, Default)]
pub struct AnalyzerProbe {
    pub parses: AtomicUsize,
    pub compiles: AtomicUsize,
    pub instances: AtomicUsize,
    pub targets: Mutex<Vec<Url>>,
    pub generated: Mutex<Vec<Url>>,
    pub removed_output: Mutex<Vec<Url>>,
    pub inputs: Mutex<Vec<AnalyzerInputs>>,
}

/// Outline analyzer that records every call. Compiling fails when a target
/// contains the configured marker, and stalls when one contains the slow one.
#[derive(Debug)]
pub struct CountingAnalyzer {
    inner: OutlineAnalyzer,
    probe: Arc<AnalyzerProbe>,
    fail_marker: Option<String>,
    slow: Option<(String, Duration)>,
}

impl Default for CountingAnalyzer {
    fn default() -> Self {
        Self {
            inner: OutlineAnalyzer::default(),
            probe: Arc::new(AnalyzerProbe::default()),
            fail_marker: None,
            slow: None,
        }
    }
}

impl CountingAnalyzer {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn with_external(external: Vec<Declaration>) -> Self {
        Self {
            inner: OutlineAnalyzer::with_external(external),
            ..Self::default()
        }
    }

    pub fn probe(&self) -> Arc<AnalyzerProbe> {
        self.probe.clone()
    }

    pub fn parse_count(&self) -> usize {
        self.probe.parses.load(Ordering::SeqCst)
    }

    pub fn compile_count(&self) -> usize {
        self.probe.compiles.load(Ordering::SeqCst)
    }

    pub fn compiled_targets(&self) -> Vec<Url> {
        self.probe.targets.lock().unwrap().clone()
    }

    pub fn clear_targets(&self) {
        self.probe.targets.lock().unwrap().clear();
    }

    pub fn generated(&self) -> Vec<Url> {
        self.probe.generated.lock().unwrap().clone()
    }

    pub fn removed_output(&self) -> Vec<Url> {
        self.probe.removed_output.lock().unwrap().clone()
    }
}

impl Analyzer for CountingAnalyzer {
    fn parse(&mut self, text: &str, path: &Path) -> anyhow::Result<Box<dyn SyntaxTree>> {
        self.probe.parses.fetch_add(1, Ordering::SeqCst);
        self.inner.parse(text, path)
    }

    fn compile(
        &mut self,
        targets: &[Arc<ParsedFile>],
        context: &[Arc<ParsedFile>],
    ) -> anyhow::Result<CompileOutput> {
        self.probe.compiles.fetch_add(1, Ordering::SeqCst);
        self.probe
            .targets
            .lock()
            .unwrap()
            .extend(targets.iter().map(|f| f.uri.clone()));
        if let Some(marker) = &self.fail_marker {
            if let Some(file) = targets.iter().find(|f| f.text.contains(marker.as_str())) {
                anyhow::bail!("internal compiler error in {}", file.uri);
            }
        }
        if let Some((marker, delay)) = &self.slow {
            if targets.iter().any(|f| f.text.contains(marker.as_str())) {
                std::thread::sleep(*delay);
            }
        }
        self.inner.compile(targets, context)
    }

    fn generate_code(
        &mut self,
        _module: &dyn ModuleContext,
        _bound: &dyn BindingContext,
        files: &[Arc<ParsedFile>],
    ) -> anyhow::Result<()> {
        self.probe
            .generated
            .lock()
            .unwrap()
            .extend(files.iter().map(|f| f.uri.clone()));
        Ok(())
    }

    fn remove_generated_code(&mut self, files: &[Arc<ParsedFile>]) -> anyhow::Result<()> {
        self.probe
            .removed_output
            .lock()
            .unwrap()
            .extend(files.iter().map(|f| f.uri.clone()));
        Ok(())
    }
}

/// Factory handing out [`CountingAnalyzer`]s that all report to one probe
#[derive(Debug, Default, Clone)]
pub struct CountingAnalyzerFactory {
    pub probe: Arc<AnalyzerProbe>,
    slow: Option<(String, Duration)>,
}

impl CountingAnalyzerFactory {
    /// Analyzers that take `delay` to compile any file containing `marker`
    pub fn slow_on(marker: &str, delay: Duration) -> Self {
        Self {
            slow: Some((marker.to_string(), delay)),
            ..Self::default()
        }
    }
}

impl AnalyzerFactory for CountingAnalyzerFactory {
    fn instantiate(&self, inputs: &AnalyzerInputs) -> anyhow::Result<Box<dyn Analyzer>> {
        self.probe.instances.fetch_add(1, Ordering::SeqCst);
        self.probe.inputs.lock().unwrap().push(inputs.clone());
        Ok(Box::new(CountingAnalyzer {
            inner: OutlineAnalyzer::new(inputs),
            probe: self.probe.clone(),
            fail_marker: None,
            slow: self.slow.clone(),
        }))
    }
}

/// Index sink remembering what it was sent
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<(Vec<Declaration>, Vec<Declaration>)>>,
    rebuilds: Mutex<Vec<Vec<Declaration>>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<(Vec<Declaration>, Vec<Declaration>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn rebuilds(&self) -> Vec<Vec<Declaration>> {
        self.rebuilds.lock().unwrap().clone()
    }
}

impl IndexSink for RecordingSink {
    fn submit(&self, removed: Vec<Declaration>, added: Vec<Declaration>) {
        self.updates.lock().unwrap().push((removed, added));
    }

    fn rebuild(&self, all: Vec<Declaration>) {
        self.rebuilds.lock().unwrap().push(all);
    }
}

/// Publisher remembering every publication
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(Url, Vec<Diagnostic>)>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(Url, Vec<Diagnostic>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn last_for(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == uri)
            .map(|(_, d)| d.clone())
    }
}

impl DiagnosticsPublisher for RecordingPublisher {
    fn publish(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        self.published
            .lock()
            .unwrap()
            .push((uri.clone(), diagnostics));
    }
}

/// Logger keeping every warning and error in memory
pub struct WarningLog {
    records: Mutex<Vec<String>>,
}

static WARNINGS: WarningLog = WarningLog {
    records: Mutex::new(Vec::new()),
};

impl log::Log for WarningLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

impl WarningLog {
    /// Messages logged so far that contain `needle`
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.contains(needle))
            .cloned()
            .collect()
    }
}

/// Install the in-memory logger for this test binary. Every test shares it,
/// so assertions should match on something unique to the test.
pub fn capture_warnings() -> &'static WarningLog {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&WARNINGS).is_ok() {
            log::set_max_level(log::LevelFilter::Warn);
        }
    });
    &WARNINGS
}

/// Build tool answering with a fixed listing and counting invocations
#[derive(Debug)]
pub struct StaticBuildTool {
    pub listing: Mutex<String>,
    pub version: Mutex<Option<i64>>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StaticBuildTool {
    pub fn new(listing: impl Into<String>) -> Self {
        Self {
            listing: Mutex::new(listing.into()),
            version: Mutex::new(Some(1)),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Build tool that is not installed
    pub fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_listing(&self, listing: impl Into<String>, version: i64) {
        *self.listing.lock().unwrap() = listing.into();
        *self.version.lock().unwrap() = Some(version);
    }
}

#[async_trait]
impl BuildTool for StaticBuildTool {
    fn name(&self) -> &str {
        "static"
    }

    fn descriptor_version(&self, _root: &Path) -> Option<i64> {
        *self.version.lock().unwrap()
    }

    async fn dependency_listing(&self, _root: &Path, _with_sources: bool) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("build tool not found on PATH");
        }
        Ok(self.listing.lock().unwrap().clone())
    }
}

/// Write `content` to `dir/relative`, creating parents, and return its URI
pub fn write_source(dir: &Path, relative: &str, content: &str) -> Url {
    let path: PathBuf = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    Url::from_file_path(&path).unwrap()
}

/// Test URI under a fake project root
pub fn test_uri(name: &str) -> Url {
    Url::parse(&format!("file:///project/src/{name}")).unwrap()
}

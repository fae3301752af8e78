//
// analysis_cache.rs
//
// Parse and compile state of every workspace file
//

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexSet;
use url::Url;

use crate::analyzer::{
    Analyzer, BindingContext, CompositeBindingContext, FileDiagnostic, ModuleContext, ParsedFile,
};
use crate::declaration::Declaration;
use crate::error::{HeronError, HeronResult};
use crate::file_store::SourceListener;
use crate::perf::TimingGuard;

/// Compile result of one file
#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub uri: Url,
    pub parsed: Arc<ParsedFile>,
    pub bound: Arc<dyn BindingContext>,
    pub module: Arc<dyn ModuleContext>,
}

impl CompiledFile {
    pub fn text(&self) -> &str {
        &self.parsed.text
    }

    pub fn declarations(&self) -> Vec<Declaration> {
        self.module.declarations(&self.parsed)
    }

    pub fn diagnostics(&self) -> Vec<FileDiagnostic> {
        self.bound
            .diagnostics()
            .into_iter()
            .filter(|d| d.uri == self.uri)
            .collect()
    }
}

/// Immutable state of one file at one point in time. Every change produces a
/// new record; holders of an old one keep a consistent view.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub uri: Url,
    pub content: Arc<str>,
    pub temporary: bool,
    pub parsed: Option<Arc<ParsedFile>>,
    pub compiled: Option<CompiledFile>,
    /// Last version code was generated for
    pub last_saved: Option<Arc<ParsedFile>>,
}

impl SourceRecord {
    fn new(uri: Url, content: Arc<str>, temporary: bool) -> Self {
        Self {
            uri,
            content,
            temporary,
            parsed: None,
            compiled: None,
            last_saved: None,
        }
    }

    /// Parsed tree matches the content
    pub fn is_parsed(&self) -> bool {
        self.parsed
            .as_ref()
            .is_some_and(|p| same_text(&p.text, &self.content))
    }

    /// Compile result matches the content
    pub fn is_compiled(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|c| same_text(&c.parsed.text, &self.content))
    }

    fn compiled_declarations(&self) -> Vec<Declaration> {
        self.compiled
            .as_ref()
            .map(CompiledFile::declarations)
            .unwrap_or_default()
    }
}

fn same_text(a: &Arc<str>, b: &Arc<str>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

/// Where declaration changes go
pub trait IndexSink: Send + Sync {
    /// Incremental update: `removed` are the declarations of the previous
    /// compile result, `added` those of the new one
    fn submit(&self, removed: Vec<Declaration>, added: Vec<Declaration>);

    /// Replace the whole index
    fn rebuild(&self, all: Vec<Declaration>);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndex;

impl IndexSink for NoIndex {
    fn submit(&self, _removed: Vec<Declaration>, _added: Vec<Declaration>) {}
    fn rebuild(&self, _all: Vec<Declaration>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexMode {
    Incremental,
    Deferred,
}

/// Outcome of compiling many files one at a time
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompileSummary {
    pub compiled: usize,
    pub failed: Vec<Url>,
}

/// Parse and compile results of every known file.
///
/// Content arrives through [`SourceListener`] from the file store. Everything
/// that touches the analyzer takes `&mut dyn Analyzer`, which only the
/// interactive worker can hand out.
pub struct AnalysisCache {
    records: RwLock<HashMap<Url, Arc<SourceRecord>>>,
    sink: Arc<dyn IndexSink>,
    codegen_enabled: bool,
    /// Records removed from the workspace that still have generated code
    orphans: Mutex<Vec<Arc<ParsedFile>>>,
}

impl AnalysisCache {
    pub fn new(sink: Arc<dyn IndexSink>, codegen_enabled: bool) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sink,
            codegen_enabled,
            orphans: Mutex::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Url, Arc<SourceRecord>>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Url, Arc<SourceRecord>>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the record for `uri`
    pub fn record(&self, uri: &Url) -> HeronResult<Arc<SourceRecord>> {
        self.read()
            .get(uri)
            .cloned()
            .ok_or_else(|| HeronError::UnknownFile(uri.clone()))
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.read().contains_key(uri)
    }

    pub fn content(&self, uri: &Url) -> HeronResult<Arc<str>> {
        Ok(self.record(uri)?.content.clone())
    }

    pub fn all(&self, include_temporary: bool) -> Vec<Url> {
        let mut uris: Vec<Url> = self
            .read()
            .values()
            .filter(|r| include_temporary || !r.temporary)
            .map(|r| r.uri.clone())
            .collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Declarations of every compiled non-temporary file plus the external
    /// declarations of the dependency set
    pub fn declarations(&self) -> Vec<Declaration> {
        collect_declarations(&self.read())
    }

    /// Parse `uri` unless its parse tree already matches its content
    pub fn parse_if_changed(
        &self,
        analyzer: &mut dyn Analyzer,
        uri: &Url,
    ) -> HeronResult<Arc<ParsedFile>> {
        let record = self.record(uri)?;
        if let Some(parsed) = &record.parsed {
            if same_text(&parsed.text, &record.content) {
                return Ok(parsed.clone());
            }
        }

        let path = uri
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(uri.path()));
        let tree = analyzer
            .parse(&record.content, &path)
            .map_err(|e| HeronError::Analysis {
                uri: uri.clone(),
                message: e.to_string(),
            })?;
        let parsed = Arc::new(ParsedFile {
            uri: uri.clone(),
            text: record.content.clone(),
            tree,
        });

        let mut records = self.write();
        if let Some(current) = records.get_mut(uri) {
            if same_text(&current.content, &record.content) {
                let mut next = SourceRecord::clone(current);
                next.parsed = Some(parsed.clone());
                *current = Arc::new(next);
            }
        }
        log::trace!("Parsed {}", uri);
        Ok(parsed)
    }

    pub fn parsed_file(&self, analyzer: &mut dyn Analyzer, uri: &Url) -> HeronResult<Arc<ParsedFile>> {
        self.parse_if_changed(analyzer, uri)
    }

    /// Compile result reflecting the present content of `uri`, compiling if needed
    pub fn current_version(
        &self,
        analyzer: &mut dyn Analyzer,
        uri: &Url,
    ) -> HeronResult<CompiledFile> {
        self.compile_files(analyzer, std::slice::from_ref(uri))?;
        self.compiled(uri)
    }

    /// Last compile result of `uri`, compiling only if it never was
    pub fn latest_compiled_version(
        &self,
        analyzer: &mut dyn Analyzer,
        uri: &Url,
    ) -> HeronResult<CompiledFile> {
        self.parse_if_changed(analyzer, uri)?;
        if let Some(compiled) = self.record(uri)?.compiled.clone() {
            return Ok(compiled);
        }
        self.current_version(analyzer, uri)
    }

    fn compiled(&self, uri: &Url) -> HeronResult<CompiledFile> {
        self.record(uri)?
            .compiled
            .clone()
            .ok_or_else(|| HeronError::Analysis {
                uri: uri.clone(),
                message: "no compile result".to_string(),
            })
    }

    /// Bring `uris` up to date and return one binding context covering all of
    /// them. Files whose compile result still matches their content are not
    /// compiled again; their existing results are combined with the fresh one.
    pub fn compile_files(
        &self,
        analyzer: &mut dyn Analyzer,
        uris: &[Url],
    ) -> HeronResult<Arc<dyn BindingContext>> {
        self.compile_with(analyzer, uris, IndexMode::Incremental)
    }

    fn compile_with(
        &self,
        analyzer: &mut dyn Analyzer,
        uris: &[Url],
        mode: IndexMode,
    ) -> HeronResult<Arc<dyn BindingContext>> {
        self.remove_orphaned_output(analyzer);

        // A file named twice is compiled once and reaches the index once
        let uris: IndexSet<&Url> = uris.iter().collect();
        let mut reused: Vec<Arc<dyn BindingContext>> = Vec::new();
        let mut stale: Vec<(Arc<SourceRecord>, Arc<ParsedFile>)> = Vec::new();
        for uri in uris {
            let before = self.record(uri)?;
            let parsed = self.parse_if_changed(analyzer, uri)?;
            match &before.compiled {
                Some(compiled) if same_text(&compiled.parsed.text, &parsed.text) => {
                    reused.push(compiled.bound.clone());
                }
                _ => stale.push((before, parsed)),
            }
        }

        if stale.is_empty() {
            return Ok(combine(reused));
        }

        let _timer = TimingGuard::new("compile_files");
        let targets: Vec<Arc<ParsedFile>> = stale.iter().map(|(_, p)| p.clone()).collect();
        let context = self.context(analyzer);
        let output = analyzer.compile(&targets, &context).map_err(|e| {
            let uri = targets[0].uri.clone();
            HeronError::Analysis {
                uri,
                message: e.to_string(),
            }
        })?;

        {
            let mut records = self.write();
            for (before, parsed) in &stale {
                let Some(current) = records.get_mut(&parsed.uri) else {
                    log::trace!("{} was removed while compiling", parsed.uri);
                    continue;
                };
                let still_current = current
                    .parsed
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(p, parsed));
                if !still_current {
                    log::trace!("Discarding compile result of {}: reparsed meanwhile", parsed.uri);
                    continue;
                }

                let compiled = CompiledFile {
                    uri: parsed.uri.clone(),
                    parsed: parsed.clone(),
                    bound: output.bound.clone(),
                    module: output.module.clone(),
                };
                let added = compiled.declarations();
                let mut next = SourceRecord::clone(current);
                next.compiled = Some(compiled);
                let temporary = next.temporary;
                *current = Arc::new(next);

                // Submitted under the lock so a concurrent removal of this
                // file reaches the index after this update
                if mode == IndexMode::Incremental && !temporary {
                    self.sink.submit(before.compiled_declarations(), added);
                }
            }
        }

        log::trace!(
            "Compiled {} file(s), reused {} result(s)",
            stale.len(),
            reused.len()
        );
        reused.push(output.bound);
        Ok(combine(reused))
    }

    /// Every non-temporary file, parsed
    fn context(&self, analyzer: &mut dyn Analyzer) -> Vec<Arc<ParsedFile>> {
        self.all(false)
            .iter()
            .filter_map(|uri| match self.parse_if_changed(analyzer, uri) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    log::warn!("Leaving {} out of the compile context: {}", uri, e);
                    None
                }
            })
            .collect()
    }

    /// Compile every non-temporary file, one at a time. A file that fails to
    /// compile is logged and skipped.
    pub fn compile_all_files(&self, analyzer: &mut dyn Analyzer) -> CompileSummary {
        self.compile_each(analyzer, IndexMode::Incremental)
    }

    fn compile_each(&self, analyzer: &mut dyn Analyzer, mode: IndexMode) -> CompileSummary {
        let _timer = TimingGuard::new("compile_all_files");
        let mut summary = CompileSummary::default();
        for uri in self.all(false) {
            match self.compile_with(analyzer, std::slice::from_ref(&uri), mode) {
                Ok(_) => summary.compiled += 1,
                Err(HeronError::UnknownFile(_)) => {}
                Err(e) => {
                    log::warn!("Could not compile {}: {}", uri, e);
                    summary.failed.push(uri);
                }
            }
        }
        summary
    }

    /// Compile everything once and replace the index with the result
    pub fn initial_pass(&self, analyzer: &mut dyn Analyzer) -> CompileSummary {
        let summary = self.compile_each(analyzer, IndexMode::Deferred);
        self.rebuild_index();
        log::info!(
            "Compiled {} file(s) ({} failed)",
            summary.compiled,
            summary.failed.len()
        );
        summary
    }

    /// Throw away all parse and compile state, then run the initial pass
    /// again. Needed whenever the analyzer was replaced.
    pub fn refresh_all(&self, analyzer: &mut dyn Analyzer) -> CompileSummary {
        {
            let mut records = self.write();
            for record in records.values_mut() {
                let mut next = SourceRecord::clone(record);
                next.parsed = None;
                next.compiled = None;
                *record = Arc::new(next);
            }
        }
        log::info!("Refreshing all source files");
        self.initial_pass(analyzer)
    }

    fn rebuild_index(&self) {
        let records = self.read();
        self.sink.rebuild(collect_declarations(&records));
    }

    /// Generate code for `uri` if codegen is enabled
    pub fn save(&self, analyzer: &mut dyn Analyzer, uri: &Url) -> HeronResult<()> {
        if !self.codegen_enabled {
            return Ok(());
        }
        let compiled = self.current_version(analyzer, uri)?;
        let previous = self.record(uri)?.last_saved.clone();

        let analysis_error = |e: anyhow::Error| HeronError::Analysis {
            uri: uri.clone(),
            message: e.to_string(),
        };
        if let Some(previous) = previous {
            analyzer
                .remove_generated_code(&[previous])
                .map_err(analysis_error)?;
        }
        analyzer
            .generate_code(
                compiled.module.as_ref(),
                compiled.bound.as_ref(),
                std::slice::from_ref(&compiled.parsed),
            )
            .map_err(analysis_error)?;

        let mut records = self.write();
        if let Some(current) = records.get_mut(uri) {
            let mut next = SourceRecord::clone(current);
            next.last_saved = Some(compiled.parsed.clone());
            *current = Arc::new(next);
        }
        log::trace!("Generated code for {}", uri);
        Ok(())
    }

    /// Generate code for every non-temporary file, logging failures
    pub fn save_all_files(&self, analyzer: &mut dyn Analyzer) -> usize {
        if !self.codegen_enabled {
            return 0;
        }
        let mut saved = 0;
        for uri in self.all(false) {
            match self.save(analyzer, &uri) {
                Ok(()) => saved += 1,
                Err(e) => log::warn!("Could not generate code for {}: {}", uri, e),
            }
        }
        saved
    }

    fn remove_orphaned_output(&self, analyzer: &mut dyn Analyzer) {
        let orphans = std::mem::take(&mut *self.orphans.lock().unwrap_or_else(|e| e.into_inner()));
        if orphans.is_empty() {
            return;
        }
        if let Err(e) = analyzer.remove_generated_code(&orphans) {
            log::warn!("Could not remove generated code of deleted files: {}", e);
        }
    }
}

fn combine(mut parts: Vec<Arc<dyn BindingContext>>) -> Arc<dyn BindingContext> {
    if parts.len() == 1 {
        if let Some(only) = parts.pop() {
            return only;
        }
    }
    Arc::new(CompositeBindingContext::new(parts))
}

fn collect_declarations(records: &HashMap<Url, Arc<SourceRecord>>) -> Vec<Declaration> {
    let mut out = Vec::new();
    let mut external_done = false;
    let mut uris: Vec<&Url> = records.keys().collect();
    uris.sort();
    for uri in uris {
        let record = &records[uri];
        if record.temporary {
            continue;
        }
        let Some(compiled) = &record.compiled else {
            continue;
        };
        out.extend(compiled.declarations());
        if !external_done {
            out.extend(compiled.module.external_declarations());
            external_done = true;
        }
    }
    out
}

impl SourceListener for AnalysisCache {
    fn put(&self, uri: &Url, content: Arc<str>, temporary: bool) {
        let mut records = self.write();
        match records.get_mut(uri) {
            Some(current) => {
                if same_text(&current.content, &content) && current.temporary == temporary {
                    return;
                }
                let mut next = SourceRecord::clone(current);
                next.content = content;
                next.temporary = temporary;
                *current = Arc::new(next);
            }
            None => {
                records.insert(
                    uri.clone(),
                    Arc::new(SourceRecord::new(uri.clone(), content, temporary)),
                );
            }
        }
    }

    fn remove(&self, uri: &Url) {
        let mut records = self.write();
        let Some(record) = records.remove(uri) else {
            return;
        };
        if !record.temporary && record.compiled.is_some() {
            self.sink.submit(record.compiled_declarations(), Vec::new());
        }
        if let Some(saved) = record.last_saved.clone() {
            self.orphans
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(saved);
        }
    }
}

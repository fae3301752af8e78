//! Contract between the analysis core and the analyzer that parses and binds
//! source files.
//!
//! The analyzer is not safe for concurrent use. It is only ever reached
//! through an [`AnalyzerSlot`] owned by the interactive worker, and every
//! engine-bound operation of the analysis cache takes `&mut dyn Analyzer`.

pub mod outline;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tower_lsp::lsp_types::Diagnostic;
use url::Url;

use crate::classpath::ProjectClasspath;
use crate::declaration::Declaration;
use crate::error::{HeronError, HeronResult};

pub use outline::{OutlineAnalyzer, OutlineAnalyzerFactory};

/// Analyzer-specific syntax tree; opaque to the core
pub trait SyntaxTree: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// A parsed version of one file.
///
/// The `Arc<ParsedFile>` identity is what the cache compares to decide whether
/// a compile result still belongs to the current parse.
#[derive(Debug)]
pub struct ParsedFile {
    pub uri: Url,
    pub text: Arc<str>,
    pub tree: Box<dyn SyntaxTree>,
}

impl ParsedFile {
    pub fn tree<T: SyntaxTree>(&self) -> Option<&T> {
        self.tree.as_any().downcast_ref::<T>()
    }
}

#[derive(Debug, Clone)]
pub struct FileDiagnostic {
    pub uri: Url,
    pub diagnostic: Diagnostic,
}

/// Semantic result of one compilation unit
pub trait BindingContext: Send + Sync + fmt::Debug {
    fn diagnostics(&self) -> Vec<FileDiagnostic>;

    /// Look up a declaration visible in this unit by fully qualified name
    fn resolve(&self, fq_name: &str) -> Option<Declaration>;

    fn diagnostics_for(&self, uri: &Url) -> Vec<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .filter(|d| &d.uri == uri)
            .map(|d| d.diagnostic)
            .collect()
    }
}

/// Cross-file project view produced alongside a binding context
pub trait ModuleContext: Send + Sync + fmt::Debug {
    /// Package-level declarations contributed by `file`
    fn declarations(&self, file: &ParsedFile) -> Vec<Declaration>;

    /// Declarations coming from the dependency set rather than workspace sources
    fn external_declarations(&self) -> Vec<Declaration> {
        Vec::new()
    }
}

pub struct CompileOutput {
    pub bound: Arc<dyn BindingContext>,
    pub module: Arc<dyn ModuleContext>,
}

pub trait Analyzer: Send {
    fn parse(&mut self, text: &str, path: &Path) -> anyhow::Result<Box<dyn SyntaxTree>>;

    /// Bind `targets` using `context` (the whole live file set) for cross-file resolution
    fn compile(
        &mut self,
        targets: &[Arc<ParsedFile>],
        context: &[Arc<ParsedFile>],
    ) -> anyhow::Result<CompileOutput>;

    fn generate_code(
        &mut self,
        _module: &dyn ModuleContext,
        _bound: &dyn BindingContext,
        _files: &[Arc<ParsedFile>],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn remove_generated_code(&mut self, _files: &[Arc<ParsedFile>]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Everything an analyzer instance is built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerInputs {
    pub classpath: ProjectClasspath,
    pub auxiliary_sources: BTreeSet<PathBuf>,
}

/// Creates analyzer instances; called again whenever the dependency set changes
pub trait AnalyzerFactory: Send + Sync {
    fn instantiate(&self, inputs: &AnalyzerInputs) -> anyhow::Result<Box<dyn Analyzer>>;
}

/// The analyzer as owned by the interactive worker
#[derive(Default)]
pub enum AnalyzerSlot {
    #[default]
    NotReady,
    Ready(Box<dyn Analyzer>),
}

impl AnalyzerSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, AnalyzerSlot::Ready(_))
    }

    pub fn analyzer(&mut self) -> HeronResult<&mut dyn Analyzer> {
        match self {
            AnalyzerSlot::Ready(analyzer) => Ok(analyzer.as_mut()),
            AnalyzerSlot::NotReady => Err(HeronError::AnalyzerNotReady),
        }
    }

    pub fn replace(&mut self, analyzer: Box<dyn Analyzer>) {
        *self = AnalyzerSlot::Ready(analyzer);
    }
}

/// Several binding contexts viewed as one.
///
/// Lookups go through every part, so unchanged files keep their existing
/// results instead of being rebound.
#[derive(Debug, Default)]
pub struct CompositeBindingContext {
    parts: Vec<Arc<dyn BindingContext>>,
}

impl CompositeBindingContext {
    pub fn new(parts: impl IntoIterator<Item = Arc<dyn BindingContext>>) -> Self {
        let mut unique: Vec<Arc<dyn BindingContext>> = Vec::new();
        for part in parts {
            if !unique.iter().any(|p| same_context(p, &part)) {
                unique.push(part);
            }
        }
        Self { parts: unique }
    }

    pub fn parts(&self) -> &[Arc<dyn BindingContext>] {
        &self.parts
    }
}

fn same_context(a: &Arc<dyn BindingContext>, b: &Arc<dyn BindingContext>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl BindingContext for CompositeBindingContext {
    fn diagnostics(&self) -> Vec<FileDiagnostic> {
        self.parts.iter().flat_map(|p| p.diagnostics()).collect()
    }

    fn resolve(&self, fq_name: &str) -> Option<Declaration> {
        self.parts.iter().find_map(|p| p.resolve(fq_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::DeclarationKind;

    #[derive(Debug)]
    struct FixedContext {
        names: Vec<&'static str>,
    }

    impl BindingContext for FixedContext {
        fn diagnostics(&self) -> Vec<FileDiagnostic> {
            Vec::new()
        }

        fn resolve(&self, fq_name: &str) -> Option<Declaration> {
            self.names
                .iter()
                .find(|n| **n == fq_name)
                .map(|n| Declaration::new(*n, DeclarationKind::Function))
        }
    }

    #[test]
    fn test_composite_resolves_across_parts() {
        let a: Arc<dyn BindingContext> = Arc::new(FixedContext { names: vec!["a.f"] });
        let b: Arc<dyn BindingContext> = Arc::new(FixedContext { names: vec!["b.g"] });
        let composite = CompositeBindingContext::new([a, b]);
        assert!(composite.resolve("a.f").is_some());
        assert!(composite.resolve("b.g").is_some());
        assert!(composite.resolve("c.h").is_none());
    }

    #[test]
    fn test_composite_deduplicates_shared_parts() {
        let shared: Arc<dyn BindingContext> = Arc::new(FixedContext { names: vec![] });
        let composite = CompositeBindingContext::new([shared.clone(), shared.clone(), shared]);
        assert_eq!(composite.parts().len(), 1);
    }

    #[test]
    fn test_slot_not_ready() {
        let mut slot = AnalyzerSlot::default();
        assert!(!slot.is_ready());
        assert!(matches!(slot.analyzer(), Err(HeronError::AnalyzerNotReady)));
    }
}

//
// analyzer/outline.rs
//
// Line-oriented outline analyzer for Kotlin sources
//
// Recognizes package-level and member declarations, tracks brace nesting and
// reports unbalanced braces and conflicting declarations. It does not type
// check; it gives the core a real analyzer for the CLI and for tests.
//

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};
use url::Url;

use super::{
    Analyzer, AnalyzerFactory, AnalyzerInputs, BindingContext, CompileOutput, FileDiagnostic,
    ModuleContext, ParsedFile, SyntaxTree,
};
use crate::declaration::{Declaration, DeclarationKind, Visibility};

const DIAGNOSTIC_SOURCE: &str = "heron";

fn declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:@[\w.]+(?:\([^)]*\))?\s+)*(?P<mods>(?:(?:public|private|protected|internal|open|abstract|final|data|sealed|inline|value|override|suspend|enum|annotation|inner|const|lateinit|external|operator|infix|tailrec|expect|actual|companion)\s+)*)(?P<kw>fun|val|var|class|interface|object|typealias|constructor)\b(?P<rest>.*)$",
        )
        .expect("declaration regex is valid")
    })
}

fn callable_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<recv>[A-Za-z_][\w.]*(?:<[^=(]*>)?\??)\.)?(?P<name>[A-Za-z_]\w*|`[^`]+`)")
            .expect("callable name regex is valid")
    })
}

fn type_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z_]\w*|`[^`]+`)").expect("type name regex is valid")
    })
}

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*package\s+(?P<name>[A-Za-z_][\w.]*)\s*;?").expect("package regex is valid")
    })
}

/// One declaration found by the outline pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineItem {
    pub name: String,
    pub kind: DeclarationKind,
    pub visibility: Visibility,
    pub receiver: Option<String>,
    /// Enclosing class names, outermost first; empty for package-level items
    pub containers: Vec<String>,
    pub range: Range,
}

impl OutlineItem {
    pub fn is_top_level(&self) -> bool {
        self.containers.is_empty()
    }

    fn fq_name(&self, package: Option<&str>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(pkg) = package {
            parts.push(pkg);
        }
        parts.extend(self.containers.iter().map(String::as_str));
        parts.push(&self.name);
        parts.join(".")
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutlineTree {
    pub package: Option<String>,
    pub items: Vec<OutlineItem>,
    pub syntax_errors: Vec<(Range, String)>,
}

impl SyntaxTree for OutlineTree {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl OutlineTree {
    pub fn parse(text: &str) -> Self {
        OutlineParser::default().run(text)
    }

    /// Declarations of this file, package-level ones only when `top_level_only`
    pub fn declarations(&self, uri: &Url, top_level_only: bool) -> Vec<Declaration> {
        self.items
            .iter()
            .filter(|item| !top_level_only || item.is_top_level())
            .map(|item| {
                Declaration::new(item.fq_name(self.package.as_deref()), item.kind)
                    .with_visibility(item.visibility)
                    .with_receiver(item.receiver.clone())
                    .with_location(uri.clone(), item.range)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Class(String),
    Body,
}

#[derive(Default)]
struct OutlineParser {
    tree: OutlineTree,
    frames: Vec<Frame>,
    in_block_comment: bool,
}

impl OutlineParser {
    fn run(mut self, text: &str) -> OutlineTree {
        let mut last_line = 0u32;
        let mut last_col = 0u32;
        for (line_no, raw_line) in text.lines().enumerate() {
            let line_no = line_no as u32;
            let code = self.strip_comments(raw_line);
            last_line = line_no;
            last_col = utf16_len(raw_line);

            let declared = if self.in_local_scope() {
                None
            } else {
                self.declaration(&code, line_no)
            };
            self.track_braces(&code, line_no, declared);
        }

        if !self.frames.is_empty() {
            let pos = Position::new(last_line, last_col);
            self.tree
                .syntax_errors
                .push((Range::new(pos, pos), "Expecting '}'".to_string()));
        }
        self.tree
    }

    fn in_local_scope(&self) -> bool {
        matches!(self.frames.last(), Some(Frame::Body))
    }

    fn containers(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Frame::Class(name) => Some(name.clone()),
                Frame::Body => None,
            })
            .collect()
    }

    /// Blank out comments and string literal contents, keeping columns intact
    fn strip_comments(&mut self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut chars = line.chars().peekable();
        let mut in_string = false;
        while let Some(c) = chars.next() {
            if self.in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    self.in_block_comment = false;
                    out.push_str("  ");
                } else {
                    out.push(' ');
                }
                continue;
            }
            if in_string {
                match c {
                    '\\' => {
                        out.push(' ');
                        if chars.next().is_some() {
                            out.push(' ');
                        }
                    }
                    '"' => {
                        in_string = false;
                        out.push('"');
                    }
                    _ => out.push(' '),
                }
                continue;
            }
            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    self.in_block_comment = true;
                    out.push_str("  ");
                }
                '"' => {
                    in_string = true;
                    out.push('"');
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn declaration(&mut self, code: &str, line_no: u32) -> Option<Frame> {
        if self.frames.is_empty() && self.tree.package.is_none() {
            if let Some(caps) = package_regex().captures(code) {
                self.tree.package = Some(caps["name"].to_string());
                return None;
            }
        }

        let caps = declaration_regex().captures(code)?;
        let mods: Vec<&str> = caps["mods"].split_whitespace().collect();
        let mut keyword = caps.name("kw")?.as_str();
        let rest_match = caps.name("rest")?;
        let mut rest_start = rest_match.start();
        let mut rest = rest_match.as_str();

        // `fun interface Foo`
        if keyword == "fun" && rest.trim_start().starts_with("interface") {
            let skip = rest.len() - rest.trim_start().len() + "interface".len();
            rest_start += skip;
            rest = &rest[skip..];
            keyword = "interface";
        }

        let visibility = if mods.contains(&"private") {
            Visibility::Private
        } else if mods.contains(&"protected") {
            Visibility::Protected
        } else if mods.contains(&"internal") {
            Visibility::Internal
        } else {
            Visibility::Public
        };

        let trimmed = rest.trim_start();
        let offset = rest_start + (rest.len() - trimmed.len());

        let (name, receiver, name_start, kind) = match keyword {
            "fun" | "val" | "var" => {
                let generic_len = generic_prefix_len(trimmed);
                let after_generic = &trimmed[generic_len..];
                let lead = after_generic.len() - after_generic.trim_start().len();
                let candidate = after_generic.trim_start();
                let caps = callable_name_regex().captures(candidate)?;
                let name_match = caps.name("name")?;
                let kind = if keyword == "fun" {
                    DeclarationKind::Function
                } else {
                    DeclarationKind::Property
                };
                (
                    name_match.as_str().to_string(),
                    caps.name("recv").map(|r| r.as_str().to_string()),
                    offset + generic_len + lead + name_match.start(),
                    kind,
                )
            }
            "class" | "interface" | "object" => match type_name_regex().captures(trimmed) {
                Some(caps) => {
                    let name_match = caps.name("name")?;
                    (
                        name_match.as_str().to_string(),
                        None,
                        offset + name_match.start(),
                        DeclarationKind::Class,
                    )
                }
                None if keyword == "object" && mods.contains(&"companion") => (
                    "Companion".to_string(),
                    None,
                    caps.name("kw")?.start(),
                    DeclarationKind::Class,
                ),
                None => return None,
            },
            "typealias" => {
                let caps = type_name_regex().captures(trimmed)?;
                let name_match = caps.name("name")?;
                (
                    name_match.as_str().to_string(),
                    None,
                    offset + name_match.start(),
                    DeclarationKind::TypeAlias,
                )
            }
            "constructor" => {
                let owner = match self.frames.last() {
                    Some(Frame::Class(name)) => name.clone(),
                    _ => return None,
                };
                (owner, None, caps.name("kw")?.start(), DeclarationKind::Constructor)
            }
            _ => return None,
        };

        let name = name.trim_matches('`').to_string();
        let start_col = utf16_len(&code[..name_start.min(code.len())]);
        let range = Range::new(
            Position::new(line_no, start_col),
            Position::new(line_no, start_col + utf16_len(&name)),
        );

        let frame = if kind == DeclarationKind::Class {
            Frame::Class(name.clone())
        } else {
            Frame::Body
        };

        self.tree.items.push(OutlineItem {
            name,
            kind,
            visibility,
            receiver,
            containers: self.containers(),
            range,
        });
        Some(frame)
    }

    fn track_braces(&mut self, code: &str, line_no: u32, mut declared: Option<Frame>) {
        let mut col = 0u32;
        for c in code.chars() {
            match c {
                '{' => {
                    let frame = declared.take().unwrap_or(Frame::Body);
                    self.frames.push(frame);
                }
                '}' => {
                    if self.frames.pop().is_none() {
                        let range = Range::new(
                            Position::new(line_no, col),
                            Position::new(line_no, col + 1),
                        );
                        self.tree
                            .syntax_errors
                            .push((range, "Unexpected '}'".to_string()));
                    }
                }
                _ => {}
            }
            col += c.len_utf16() as u32;
        }
    }
}

/// Length of a leading `<...>` type parameter list, 0 if there is none
fn generic_prefix_len(text: &str) -> usize {
    if !text.starts_with('<') {
        return 0;
    }
    let mut depth = 0usize;
    for (idx, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    0
}

fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

/// Binding result of one outline compilation
#[derive(Debug, Default)]
pub struct OutlineBindingContext {
    diagnostics: Vec<FileDiagnostic>,
    symbols: HashMap<String, Declaration>,
}

impl BindingContext for OutlineBindingContext {
    fn diagnostics(&self) -> Vec<FileDiagnostic> {
        self.diagnostics.clone()
    }

    fn resolve(&self, fq_name: &str) -> Option<Declaration> {
        self.symbols.get(fq_name).cloned()
    }
}

#[derive(Debug, Default)]
pub struct OutlineModule {
    external: Vec<Declaration>,
}

impl ModuleContext for OutlineModule {
    fn declarations(&self, file: &ParsedFile) -> Vec<Declaration> {
        file.tree::<OutlineTree>()
            .map(|tree| tree.declarations(&file.uri, true))
            .unwrap_or_default()
    }

    fn external_declarations(&self) -> Vec<Declaration> {
        self.external.clone()
    }
}

/// Analyzer producing [`OutlineTree`]s
#[derive(Debug, Default)]
pub struct OutlineAnalyzer {
    external: Vec<Declaration>,
}

impl OutlineAnalyzer {
    pub fn new(inputs: &AnalyzerInputs) -> Self {
        let external = inputs
            .auxiliary_sources
            .iter()
            .filter_map(|path| auxiliary_declaration(path))
            .collect();
        Self { external }
    }

    /// Analyzer whose dependency set declares `external`
    pub fn with_external(external: Vec<Declaration>) -> Self {
        Self { external }
    }

    fn diagnostics_for(
        &self,
        file: &ParsedFile,
        tree: &OutlineTree,
        owners: &HashMap<(String, Option<String>), Vec<(Url, DeclarationKind)>>,
    ) -> Vec<FileDiagnostic> {
        let mut out: Vec<FileDiagnostic> = tree
            .syntax_errors
            .iter()
            .map(|(range, message)| FileDiagnostic {
                uri: file.uri.clone(),
                diagnostic: diagnostic(*range, DiagnosticSeverity::ERROR, message.clone()),
            })
            .collect();

        for decl in tree.declarations(&file.uri, true) {
            // Functions may be overloaded; other kinds must be unique
            if decl.kind == DeclarationKind::Function {
                continue;
            }
            let key = (decl.fq_name.clone(), decl.extension_receiver_type.clone());
            let conflicting = owners
                .get(&key)
                .map(|list| list.iter().filter(|(_, k)| *k != DeclarationKind::Function).count())
                .unwrap_or(0);
            if conflicting > 1 {
                if let Some(location) = decl.location {
                    out.push(FileDiagnostic {
                        uri: file.uri.clone(),
                        diagnostic: diagnostic(
                            location.range,
                            DiagnosticSeverity::ERROR,
                            format!("Conflicting declarations: {}", decl.fq_name),
                        ),
                    });
                }
            }
        }
        out
    }
}

fn diagnostic(range: Range, severity: DiagnosticSeverity, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message,
        ..Default::default()
    }
}

/// Class declared by an auxiliary (Java) source, named after its file
fn auxiliary_declaration(path: &Path) -> Option<Declaration> {
    let stem = path.file_stem()?.to_str()?;
    let content = std::fs::read_to_string(path).ok()?;
    let package = content
        .lines()
        .find_map(|line| package_regex().captures(line).map(|c| c["name"].to_string()));
    let fq_name = match package {
        Some(pkg) => format!("{pkg}.{stem}"),
        None => stem.to_string(),
    };
    Some(Declaration::new(fq_name, DeclarationKind::Class))
}

impl Analyzer for OutlineAnalyzer {
    fn parse(&mut self, text: &str, _path: &Path) -> anyhow::Result<Box<dyn SyntaxTree>> {
        Ok(Box::new(OutlineTree::parse(text)))
    }

    fn compile(
        &mut self,
        targets: &[Arc<ParsedFile>],
        context: &[Arc<ParsedFile>],
    ) -> anyhow::Result<CompileOutput> {
        // Targets shadow their context entries
        let target_uris: BTreeSet<&Url> = targets.iter().map(|f| &f.uri).collect();
        let files: Vec<&Arc<ParsedFile>> = targets
            .iter()
            .chain(context.iter().filter(|f| !target_uris.contains(&f.uri)))
            .collect();

        let mut symbols: HashMap<String, Declaration> = self
            .external
            .iter()
            .map(|d| (d.fq_name.clone(), d.clone()))
            .collect();
        let mut owners: HashMap<(String, Option<String>), Vec<(Url, DeclarationKind)>> =
            HashMap::new();

        for file in &files {
            let tree = file.tree::<OutlineTree>().ok_or_else(|| {
                anyhow::anyhow!("{} was not parsed by the outline analyzer", file.uri)
            })?;
            for decl in tree.declarations(&file.uri, true) {
                owners
                    .entry((decl.fq_name, decl.extension_receiver_type))
                    .or_default()
                    .push((file.uri.clone(), decl.kind));
            }
            for decl in tree.declarations(&file.uri, false) {
                symbols.entry(decl.fq_name.clone()).or_insert(decl);
            }
        }

        let mut diagnostics = Vec::new();
        for file in targets {
            if let Some(tree) = file.tree::<OutlineTree>() {
                diagnostics.extend(self.diagnostics_for(file, tree, &owners));
            }
        }

        log::trace!(
            "Outline compile: {} target(s), {} context file(s), {} symbol(s)",
            targets.len(),
            files.len(),
            symbols.len()
        );

        Ok(CompileOutput {
            bound: Arc::new(OutlineBindingContext {
                diagnostics,
                symbols,
            }),
            module: Arc::new(OutlineModule {
                external: self.external.clone(),
            }),
        })
    }
}

/// Builds [`OutlineAnalyzer`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlineAnalyzerFactory;

impl AnalyzerFactory for OutlineAnalyzerFactory {
    fn instantiate(&self, inputs: &AnalyzerInputs) -> anyhow::Result<Box<dyn Analyzer>> {
        log::info!(
            "Instantiating outline analyzer ({} classpath entries, {} auxiliary sources)",
            inputs.classpath.entries.len(),
            inputs.auxiliary_sources.len()
        );
        Ok(Box::new(OutlineAnalyzer::new(inputs)))
    }
}

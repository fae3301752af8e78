//
// config.rs
//
// Configuration for the analysis core
//

use std::path::PathBuf;
use std::time::Duration;

/// Where the persisted index and classpath cache live
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageLocation {
    /// Per-user cache directory (XDG on unix, in-memory elsewhere)
    #[default]
    UserCache,
    /// Explicit database file
    File(PathBuf),
    /// Keep everything in memory; nothing survives a restart
    InMemory,
}

/// Analysis core configuration
#[derive(Debug, Clone)]
pub struct HeronConfig {
    /// Delay before a burst of edits is linted, in milliseconds
    pub diagnostics_debounce_ms: u64,
    /// Whether diagnostics are computed at all
    pub diagnostics_enabled: bool,
    /// Whether compiled output is generated when files are saved
    pub codegen_enabled: bool,
    /// Whether declarations are written to the symbol index
    pub index_enabled: bool,
    /// Location of the persisted store
    pub storage: StorageLocation,
    /// Command printing the dependency listing of a workspace root
    pub build_command: Option<Vec<String>>,
    /// Timeout for a single build tool invocation
    pub build_timeout_secs: u64,
    /// Whether source artifacts are requested together with compiled ones
    pub fetch_sources: bool,
    /// File extensions treated as analyzable source files
    pub source_extensions: Vec<String>,
    /// File extensions of auxiliary sources handed to the analyzer as a path set
    pub auxiliary_extensions: Vec<String>,
    /// File names whose modification marks a change of the dependency set
    pub build_descriptors: Vec<String>,
    /// Directory names skipped when scanning a workspace root
    pub excluded_dirs: Vec<String>,
}

impl Default for HeronConfig {
    fn default() -> Self {
        Self {
            diagnostics_debounce_ms: 250,
            diagnostics_enabled: true,
            codegen_enabled: false,
            index_enabled: true,
            storage: StorageLocation::UserCache,
            build_command: None,
            build_timeout_secs: 60,
            fetch_sources: false,
            source_extensions: vec!["kt".to_string(), "kts".to_string()],
            auxiliary_extensions: vec!["java".to_string()],
            build_descriptors: vec![
                "build.gradle".to_string(),
                "build.gradle.kts".to_string(),
                "settings.gradle".to_string(),
                "settings.gradle.kts".to_string(),
                "pom.xml".to_string(),
            ],
            excluded_dirs: vec![
                "build".to_string(),
                "target".to_string(),
                "out".to_string(),
                "bin".to_string(),
                "node_modules".to_string(),
            ],
        }
    }
}

impl HeronConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.diagnostics_debounce_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn is_source_file(&self, path: &std::path::Path) -> bool {
        has_extension(path, &self.source_extensions)
    }

    pub fn is_auxiliary_source(&self, path: &std::path::Path) -> bool {
        has_extension(path, &self.auxiliary_extensions)
    }

    pub fn is_build_descriptor(&self, path: &std::path::Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.build_descriptors.iter().any(|d| d == name))
            .unwrap_or(false)
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        name.starts_with('.') || self.excluded_dirs.iter().any(|d| d == name)
    }
}

fn has_extension(path: &std::path::Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e == ext))
        .unwrap_or(false)
}

/// Build a [`HeronConfig`] from client settings.
///
/// Settings use the nested layout editors send in `initializationOptions` and
/// `workspace/didChangeConfiguration`:
///
/// ```
/// use serde_json::json;
/// let settings = json!({
///     "diagnostics": { "enabled": true, "debounceTime": 100 },
///     "codegen": { "enabled": true },
///     "index": { "enabled": false },
///     "storage": { "path": ":memory:" },
///     "build": { "command": ["./gradlew", "-q", "heronClasspath"], "timeoutSecs": 120 }
/// });
/// let cfg = heron::config::parse_settings(&settings);
/// assert_eq!(cfg.diagnostics_debounce_ms, 100);
/// assert!(cfg.codegen_enabled);
/// assert!(!cfg.index_enabled);
/// ```
///
/// Missing sections keep their defaults.
pub fn parse_settings(settings: &serde_json::Value) -> HeronConfig {
    let mut config = HeronConfig::default();

    if let Some(diagnostics) = settings.get("diagnostics") {
        if let Some(v) = diagnostics.get("enabled").and_then(|v| v.as_bool()) {
            config.diagnostics_enabled = v;
        }
        if let Some(v) = diagnostics.get("debounceTime").and_then(|v| v.as_u64()) {
            config.diagnostics_debounce_ms = v;
        }
    }

    if let Some(v) = settings
        .get("codegen")
        .and_then(|c| c.get("enabled"))
        .and_then(|v| v.as_bool())
    {
        config.codegen_enabled = v;
    }

    if let Some(v) = settings
        .get("index")
        .and_then(|c| c.get("enabled"))
        .and_then(|v| v.as_bool())
    {
        config.index_enabled = v;
    }

    if let Some(path) = settings
        .get("storage")
        .and_then(|s| s.get("path"))
        .and_then(|v| v.as_str())
    {
        config.storage = match path {
            "" => StorageLocation::UserCache,
            ":memory:" => StorageLocation::InMemory,
            p if p.contains('\0') => StorageLocation::UserCache,
            p => StorageLocation::File(PathBuf::from(p)),
        };
    }

    if let Some(build) = settings.get("build") {
        if let Some(command) = build.get("command").and_then(|v| v.as_array()) {
            let argv: Vec<String> = command
                .iter()
                .filter_map(|p| p.as_str())
                .filter(|s| !s.is_empty() && !s.contains('\0'))
                .map(str::to_string)
                .collect();
            config.build_command = if argv.is_empty() { None } else { Some(argv) };
        }
        if let Some(v) = build.get("timeoutSecs").and_then(|v| v.as_u64()) {
            config.build_timeout_secs = v.max(1);
        }
        if let Some(v) = build.get("fetchSources").and_then(|v| v.as_bool()) {
            config.fetch_sources = v;
        }
        if let Some(list) = build.get("descriptors").and_then(|v| v.as_array()) {
            config.build_descriptors = string_list(list);
        }
    }

    if let Some(sources) = settings.get("sources") {
        if let Some(list) = sources.get("extensions").and_then(|v| v.as_array()) {
            config.source_extensions = extension_list(list);
        }
        if let Some(list) = sources.get("excludedDirs").and_then(|v| v.as_array()) {
            config.excluded_dirs = string_list(list);
        }
    }

    log::info!("Configuration loaded from settings:");
    log::info!("  diagnostics_enabled: {}", config.diagnostics_enabled);
    log::info!("  diagnostics_debounce_ms: {}", config.diagnostics_debounce_ms);
    log::info!("  codegen_enabled: {}", config.codegen_enabled);
    log::info!("  index_enabled: {}", config.index_enabled);
    log::info!("  storage: {:?}", config.storage);
    log::info!("  build_command: {:?}", config.build_command);
    log::info!("  build_timeout_secs: {}", config.build_timeout_secs);
    log::info!("  fetch_sources: {}", config.fetch_sources);
    log::info!("  source_extensions: {:?}", config.source_extensions);

    config
}

fn string_list(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extensions are accepted with or without the dot
fn extension_list(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim_start_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// classpath/build_tool.rs - Build tool interface for dependency listings
//
// The build tool is asked for a line-oriented listing of the dependencies and
// source directories of one workspace root:
//
//   heron-dependency /home/u/.gradle/caches/.../kotlin-stdlib-1.9.0.jar
//   heron-dependency /home/u/.gradle/caches/.../kotlin-stdlib-1.9.0-sources.jar
//   heron-sourcedir-kotlin /work/app/src/main/kotlin
//   heron-sourcedir-java /work/app/src/main/java
//
// How the listing is produced (Gradle init script, Maven plugin, ...) is up to
// the configured command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{ClasspathEntry, ProjectClasspath};

const TAG_DEPENDENCY: &str = "heron-dependency";
const TAG_KOTLIN_SOURCE_DIR: &str = "heron-sourcedir-kotlin";
const TAG_JAVA_SOURCE_DIR: &str = "heron-sourcedir-java";

/// Environment variable telling the listing command to include source artifacts
pub const FETCH_SOURCES_ENV: &str = "HERON_FETCH_SOURCES";

#[async_trait]
pub trait BuildTool: Send + Sync {
    fn name(&self) -> &str;

    /// Monotonic marker of the root's build configuration; `None` when the
    /// root has nothing the result could be cached against.
    fn descriptor_version(&self, root: &Path) -> Option<i64>;

    /// Raw `<tag> <path>` listing for `root`
    async fn dependency_listing(&self, root: &Path, with_sources: bool) -> Result<String>;
}

/// Workspace without build integration: resolves to nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBuildTool;

#[async_trait]
impl BuildTool for NoBuildTool {
    fn name(&self) -> &str {
        "none"
    }

    fn descriptor_version(&self, _root: &Path) -> Option<i64> {
        None
    }

    async fn dependency_listing(&self, _root: &Path, _with_sources: bool) -> Result<String> {
        Ok(String::new())
    }
}

/// Runs a configured command in the workspace root and reads its listing
#[derive(Debug, Clone)]
pub struct CommandBuildTool {
    argv: Vec<String>,
    timeout: Duration,
    descriptors: Vec<String>,
}

impl CommandBuildTool {
    /// Returns `None` when `argv` is empty
    pub fn new(argv: Vec<String>, timeout: Duration, descriptors: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            argv,
            timeout,
            descriptors,
        })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

#[async_trait]
impl BuildTool for CommandBuildTool {
    fn name(&self) -> &str {
        self.program()
    }

    fn descriptor_version(&self, root: &Path) -> Option<i64> {
        descriptor_version(root, &self.descriptors)
    }

    async fn dependency_listing(&self, root: &Path, with_sources: bool) -> Result<String> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .current_dir(root)
            .env(FETCH_SOURCES_ENV, if with_sources { "1" } else { "0" })
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn build tool '{}': {e}", self.program()))?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| anyhow!("Failed to run build tool: {e}"))?,
            Err(_) => {
                return Err(anyhow!(
                    "Build tool '{}' timed out after {:?}",
                    self.program(),
                    self.timeout
                ));
            }
        };

        log::info!(
            "Build tool '{}' finished in {:?} for {}",
            self.program(),
            start.elapsed(),
            root.display()
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Build tool failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Newest modification time (ms since epoch) among the descriptors present in `root`
pub fn descriptor_version(root: &Path, descriptors: &[String]) -> Option<i64> {
    descriptors
        .iter()
        .filter_map(|name| std::fs::metadata(root.join(name)).ok())
        .filter_map(|meta| meta.modified().ok())
        .filter_map(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .max()
}

/// Parse a dependency listing.
///
/// Lines that do not have exactly two fields, carry an unknown tag or name a
/// path that does not exist are skipped. `-sources.jar` artifacts are attached
/// to the compiled artifact with the same base name.
pub fn parse_listing(listing: &str) -> ProjectClasspath {
    let mut classpath = ProjectClasspath::default();
    let mut compiled: Vec<PathBuf> = Vec::new();
    let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();

    for line in listing.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [tag, path] = fields.as_slice() else {
            continue;
        };
        let path = PathBuf::from(path);
        if !path.exists() {
            log::trace!("Ignoring missing path in dependency listing: {}", path.display());
            continue;
        }

        match *tag {
            TAG_DEPENDENCY => {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some(base) = file_name.strip_suffix("-sources.jar") {
                    sources.insert(base.to_string(), path.clone());
                } else if file_name.ends_with(".jar") {
                    compiled.push(path);
                }
            }
            TAG_KOTLIN_SOURCE_DIR => {
                classpath.kotlin_source_dirs.insert(path);
            }
            TAG_JAVA_SOURCE_DIR => {
                classpath.java_source_dirs.insert(path);
            }
            _ => {}
        }
    }

    for jar in compiled {
        let source_jar = jar
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".jar"))
            .and_then(|base| sources.get(base).cloned());
        classpath.entries.insert(ClasspathEntry {
            compiled_jar: jar,
            source_jar,
        });
    }

    classpath
}

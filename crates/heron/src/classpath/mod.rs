// classpath/mod.rs - Resolved dependency cache
//
// Resolving a classpath means running the build tool, which can take tens of
// seconds. Results are persisted per workspace root together with the build
// descriptor version they were computed for, and reused for as long as that
// version has not moved.

pub mod build_tool;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::HeronConfig;
use crate::error::HeronResult;
use crate::store::schema::MAX_PATH_LENGTH;
use crate::store::Database;

pub use build_tool::{BuildTool, CommandBuildTool, NoBuildTool};

/// One resolved dependency
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClasspathEntry {
    pub compiled_jar: PathBuf,
    pub source_jar: Option<PathBuf>,
}

/// Dependencies and source directories of a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectClasspath {
    pub entries: BTreeSet<ClasspathEntry>,
    pub kotlin_source_dirs: BTreeSet<PathBuf>,
    pub java_source_dirs: BTreeSet<PathBuf>,
}

impl ProjectClasspath {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.kotlin_source_dirs.is_empty() && self.java_source_dirs.is_empty()
    }

    pub fn extend(&mut self, other: ProjectClasspath) {
        self.entries.extend(other.entries);
        self.kotlin_source_dirs.extend(other.kotlin_source_dirs);
        self.java_source_dirs.extend(other.java_source_dirs);
    }

    pub fn includes_sources(&self) -> bool {
        self.entries.iter().any(|e| e.source_jar.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheMetadata {
    includes_sources: bool,
    build_descriptor_version: Option<i64>,
}

/// Persisted cache in front of a [`BuildTool`]
#[derive(Clone)]
pub struct ClasspathCache {
    db: Database,
    build_tool: Arc<dyn BuildTool>,
}

impl ClasspathCache {
    pub fn new(db: Database, build_tool: Arc<dyn BuildTool>) -> Self {
        Self { db, build_tool }
    }

    pub fn build_tool(&self) -> &Arc<dyn BuildTool> {
        &self.build_tool
    }

    /// Dependencies of `root`
    pub async fn get(&self, root: &Path) -> ProjectClasspath {
        self.resolve(root, false).await
    }

    /// Dependencies of `root` including source artifacts
    pub async fn get_with_sources(&self, root: &Path) -> ProjectClasspath {
        self.resolve(root, true).await
    }

    /// Cached classpath when still valid, otherwise a fresh resolution.
    ///
    /// A cached result is valid while its descriptor version is at least the
    /// current one and, when `with_sources` is set, it was resolved with
    /// sources. Resolution failures degrade to an empty classpath.
    pub async fn resolve(&self, root: &Path, with_sources: bool) -> ProjectClasspath {
        let current = self.build_tool.descriptor_version(root);

        match self.cached(root, with_sources, current) {
            Ok(Some(classpath)) => {
                log::info!(
                    "Using cached classpath for {} ({} entries)",
                    root.display(),
                    classpath.entries.len()
                );
                return classpath;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Could not read classpath cache for {}: {}", root.display(), e),
        }

        log::info!(
            "Resolving classpath for {} with '{}'",
            root.display(),
            self.build_tool.name()
        );
        let classpath = match self.build_tool.dependency_listing(root, with_sources).await {
            Ok(listing) => build_tool::parse_listing(&listing),
            Err(e) => {
                log::warn!("Could not resolve classpath for {}: {}", root.display(), e);
                return ProjectClasspath::default();
            }
        };

        if current.is_some() {
            if let Err(e) = self.store(root, &classpath, with_sources, current) {
                log::warn!("Could not cache classpath for {}: {}", root.display(), e);
            }
        }
        classpath
    }

    /// Drop whatever is cached for `root`
    pub fn invalidate(&self, root: &Path) -> HeronResult<()> {
        let key = root_key(root);
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            delete_root(&tx, &key)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn metadata(&self, key: &str) -> HeronResult<Option<CacheMetadata>> {
        self.db.with_connection(|conn| {
            let meta = conn
                .query_row(
                    "SELECT includes_sources, build_descriptor_version FROM classpath_metadata WHERE root = ?1",
                    params![key],
                    |row| {
                        Ok(CacheMetadata {
                            includes_sources: row.get(0)?,
                            build_descriptor_version: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(meta)
        })
    }

    fn cached(
        &self,
        root: &Path,
        with_sources: bool,
        current: Option<i64>,
    ) -> HeronResult<Option<ProjectClasspath>> {
        let Some(current) = current else {
            return Ok(None);
        };
        let key = root_key(root);
        let Some(meta) = self.metadata(&key)? else {
            return Ok(None);
        };
        if meta.build_descriptor_version.unwrap_or(0) < current {
            log::info!("Build configuration of {} changed, classpath cache is stale", root.display());
            return Ok(None);
        }
        if with_sources && !meta.includes_sources {
            return Ok(None);
        }

        self.db.with_connection(|conn| {
            let mut classpath = ProjectClasspath::default();
            let mut stmt = conn.prepare_cached(
                "SELECT compiled_jar, source_jar FROM classpath_entries WHERE root = ?1",
            )?;
            let rows = stmt.query_map(params![key], |row| {
                Ok(ClasspathEntry {
                    compiled_jar: PathBuf::from(row.get::<_, String>(0)?),
                    source_jar: row.get::<_, Option<String>>(1)?.map(PathBuf::from),
                })
            })?;
            for row in rows {
                classpath.entries.insert(row?);
            }

            let mut stmt = conn.prepare_cached(
                "SELECT path, language FROM classpath_source_dirs WHERE root = ?1",
            )?;
            let rows = stmt.query_map(params![key], |row| {
                Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (path, language) = row?;
                match language.as_str() {
                    "java" => classpath.java_source_dirs.insert(path),
                    _ => classpath.kotlin_source_dirs.insert(path),
                };
            }
            Ok(Some(classpath))
        })
    }

    fn store(
        &self,
        root: &Path,
        classpath: &ProjectClasspath,
        with_sources: bool,
        version: Option<i64>,
    ) -> HeronResult<()> {
        let key = root_key(root);
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            delete_root(&tx, &key)?;
            tx.execute(
                "INSERT INTO classpath_metadata(root, includes_sources, build_descriptor_version) VALUES(?1, ?2, ?3)",
                params![key, with_sources, version],
            )?;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO classpath_entries(root, compiled_jar, source_jar) VALUES(?1, ?2, ?3)",
                )?;
                for entry in &classpath.entries {
                    let compiled = entry.compiled_jar.to_string_lossy();
                    let source = entry.source_jar.as_ref().map(|p| p.to_string_lossy().to_string());
                    if compiled.len() > MAX_PATH_LENGTH
                        || source.as_ref().is_some_and(|s| s.len() > MAX_PATH_LENGTH)
                    {
                        log::warn!("Excluding classpath entry {} since its path is too long", compiled);
                        continue;
                    }
                    insert.execute(params![key, compiled.as_ref(), source])?;
                }

                let mut insert_dir = tx.prepare_cached(
                    "INSERT INTO classpath_source_dirs(root, path, language) VALUES(?1, ?2, ?3)",
                )?;
                let dirs = classpath
                    .kotlin_source_dirs
                    .iter()
                    .map(|p| (p, "kotlin"))
                    .chain(classpath.java_source_dirs.iter().map(|p| (p, "java")));
                for (path, language) in dirs {
                    let path = path.to_string_lossy();
                    if path.len() > MAX_PATH_LENGTH {
                        continue;
                    }
                    insert_dir.execute(params![key, path.as_ref(), language])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn root_key(root: &Path) -> String {
    root.to_string_lossy().to_string()
}

fn delete_root(tx: &rusqlite::Transaction<'_>, key: &str) -> HeronResult<()> {
    tx.execute("DELETE FROM classpath_entries WHERE root = ?1", params![key])?;
    tx.execute("DELETE FROM classpath_source_dirs WHERE root = ?1", params![key])?;
    tx.execute("DELETE FROM classpath_metadata WHERE root = ?1", params![key])?;
    Ok(())
}

/// Build tool selected by `config`
pub fn build_tool_from_config(config: &HeronConfig) -> Arc<dyn BuildTool> {
    match config
        .build_command
        .clone()
        .and_then(|argv| CommandBuildTool::new(argv, config.build_timeout(), config.build_descriptors.clone()))
    {
        Some(tool) => Arc::new(tool),
        None => Arc::new(NoBuildTool),
    }
}

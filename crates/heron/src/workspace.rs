//
// workspace.rs
//
// Discovery of source files under workspace roots
//

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use url::Url;
use walkdir::{DirEntry, WalkDir};

use crate::classpath::ProjectClasspath;
use crate::config::HeronConfig;

/// Which files a scan collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Files the analysis cache tracks
    Primary,
    /// Files handed to the analyzer as a path set only
    Auxiliary,
}

/// Directories to scan for `kind` files below `root`: those the build tool
/// listed for it, or the root itself when it listed none.
pub fn source_dirs(root: &Path, classpath: &ProjectClasspath, kind: SourceKind) -> Vec<PathBuf> {
    let listed = match kind {
        SourceKind::Primary => &classpath.kotlin_source_dirs,
        SourceKind::Auxiliary => &classpath.java_source_dirs,
    };
    let dirs: Vec<PathBuf> = listed
        .iter()
        .filter(|dir| dir.starts_with(root))
        .cloned()
        .collect();
    if dirs.is_empty() {
        vec![root.to_path_buf()]
    } else {
        dirs
    }
}

/// Every `kind` file below `dirs`, skipping hidden and build output directories
pub fn scan(dirs: &[PathBuf], config: &HeronConfig, kind: SourceKind) -> BTreeSet<PathBuf> {
    let mut found = BTreeSet::new();
    for dir in dirs {
        log::info!("Scanning folder: {}", dir.display());
        let walker = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry, config));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::trace!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let wanted = match kind {
                SourceKind::Primary => config.is_source_file(path),
                SourceKind::Auxiliary => config.is_auxiliary_source(path),
            };
            if wanted {
                found.insert(path.to_path_buf());
            }
        }
    }
    found
}

/// File URIs of every primary source below `dirs`
pub fn scan_uris(dirs: &[PathBuf], config: &HeronConfig) -> Vec<Url> {
    scan(dirs, config, SourceKind::Primary)
        .into_iter()
        .filter_map(|path| Url::from_file_path(&path).ok())
        .collect()
}

fn is_excluded(entry: &DirEntry, config: &HeronConfig) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| config.is_excluded_dir(name))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn test_scan_skips_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        let kept = touch(dir.path(), "src/main/kotlin/App.kt");
        let script = touch(dir.path(), "build.gradle.kts");
        touch(dir.path(), "build/generated/Gen.kt");
        touch(dir.path(), ".gradle/cache/Cached.kt");
        touch(dir.path(), "src/main/java/Util.java");
        touch(dir.path(), "README.md");

        let found = scan(&[dir.path().to_path_buf()], &HeronConfig::default(), SourceKind::Primary);
        let expected: BTreeSet<PathBuf> = [kept, script].into_iter().collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_scan_auxiliary_sources() {
        let dir = TempDir::new().unwrap();
        let java = touch(dir.path(), "src/main/java/Util.java");
        touch(dir.path(), "src/main/kotlin/App.kt");
        let found = scan(&[dir.path().to_path_buf()], &HeronConfig::default(), SourceKind::Auxiliary);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![java]);
    }

    #[test]
    fn test_source_dirs_fall_back_to_root() {
        let root = PathBuf::from("/work/app");
        let mut classpath = ProjectClasspath::default();
        assert_eq!(source_dirs(&root, &classpath, SourceKind::Primary), vec![root.clone()]);

        classpath.kotlin_source_dirs.insert(root.join("src/main/kotlin"));
        classpath.kotlin_source_dirs.insert(PathBuf::from("/elsewhere/src"));
        assert_eq!(
            source_dirs(&root, &classpath, SourceKind::Primary),
            vec![root.join("src/main/kotlin")]
        );
        assert_eq!(source_dirs(&root, &classpath, SourceKind::Auxiliary), vec![root]);
    }
}

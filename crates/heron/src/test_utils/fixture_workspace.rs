//! Deterministic fixture workspace generator for benchmarks and tests.
//!
//! Generates synthetic Kotlin-style workspaces with a controlled number of
//! packages, files and declarations. No randomness: the same configuration
//! always produces byte-identical files.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub packages: usize,
    pub functions_per_file: usize,
    pub classes_per_file: usize,
    /// Whether every file declares an extension function on `String`
    pub extensions: bool,
}

impl FixtureConfig {
    /// 10 files in 2 packages
    pub fn small() -> Self {
        Self {
            file_count: 10,
            packages: 2,
            functions_per_file: 5,
            classes_per_file: 1,
            extensions: true,
        }
    }

    /// 50 files in 5 packages
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            packages: 5,
            functions_per_file: 10,
            classes_per_file: 2,
            extensions: true,
        }
    }

    /// 200 files in 10 packages
    pub fn large() -> Self {
        Self {
            file_count: 200,
            packages: 10,
            functions_per_file: 20,
            classes_per_file: 3,
            extensions: true,
        }
    }

    /// Top-level declarations the workspace contributes to the index
    pub fn declaration_count(&self) -> usize {
        self.file_count
            * (self.functions_per_file + self.classes_per_file + usize::from(self.extensions))
    }
}

/// Package of file `index`
pub fn package_of(index: usize, config: &FixtureConfig) -> String {
    format!("fixture.pkg{}", index % config.packages.max(1))
}

/// Relative path of file `index`
pub fn file_name(index: usize) -> String {
    format!("src/File{}.kt", index)
}

/// Generate the content of a single file deterministically.
pub fn generate_file_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    writeln!(content, "package {}", package_of(index, config)).unwrap();
    content.push('\n');

    for class_i in 0..config.classes_per_file {
        writeln!(content, "class Model{}x{}(val id: Int) {{", index, class_i).unwrap();
        writeln!(content, "    fun describe(): String = \"model $id\"").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    for func_i in 0..config.functions_per_file {
        writeln!(content, "fun compute{}x{}(x: Int, y: Int = {}): Int {{", index, func_i, func_i + 1).unwrap();
        writeln!(content, "    val result = x + y * {}", func_i + 1).unwrap();
        writeln!(content, "    return result").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    if config.extensions {
        writeln!(content, "fun String.shout{}(): String = uppercase()", index).unwrap();
    }

    content
}

/// Create a temporary fixture workspace from the given configuration.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    std::fs::create_dir_all(dir.join("src")).expect("Failed to create fixture src directory");
    for i in 0..config.file_count {
        let content = generate_file_content(i, config);
        let filename = file_name(i);
        std::fs::write(dir.join(&filename), &content)
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::outline::OutlineTree;
    use url::Url;

    #[test]
    fn test_file_count_matches_config() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let files = std::fs::read_dir(workspace.path().join("src"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "kt").unwrap_or(false))
            .count();
        assert_eq!(files, config.file_count);
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        for i in 0..config.file_count {
            assert_eq!(generate_file_content(i, &config), generate_file_content(i, &config));
        }
    }

    #[test]
    fn test_generated_files_outline_cleanly() {
        let config = FixtureConfig::small();
        let uri = Url::parse("file:///fixture/File0.kt").unwrap();
        let mut total = 0;
        for i in 0..config.file_count {
            let tree = OutlineTree::parse(&generate_file_content(i, &config));
            assert!(tree.syntax_errors.is_empty(), "file {} has syntax errors", i);
            total += tree.declarations(&uri, true).len();
        }
        assert_eq!(total, config.declaration_count());
    }
}

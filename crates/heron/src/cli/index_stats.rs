// cli/index_stats.rs - `heron index` subcommand
//
// Loads a workspace the way a session does at startup and reports how long
// each pass takes.
//
// Phases measured:
//   1. scan      - discovering source files under the root
//   2. classpath - resolving the dependency set (cached or via the build tool)
//   3. load      - reading sources into the file store
//   4. compile   - parsing and binding every file once
//   5. index     - rebuilding the declaration index

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis_cache::{AnalysisCache, NoIndex};
use crate::analyzer::{AnalyzerFactory, AnalyzerInputs, OutlineAnalyzerFactory};
use crate::classpath::{self, ClasspathCache};
use crate::config::HeronConfig;
use crate::file_store::FileStore;
use crate::index::SymbolIndex;
use crate::perf::TimingGuard;
use crate::store::Database;
use crate::workspace::{self, SourceKind};

/// Parsed arguments for the `index` subcommand.
#[derive(Debug)]
pub struct IndexStatsArgs {
    pub path: PathBuf,
    pub csv: bool,
    pub settings: Option<PathBuf>,
}

/// Result of running a single phase.
pub struct PhaseResult {
    pub name: &'static str,
    pub duration: Duration,
    pub detail: String,
}

/// Parse `index` arguments from the remaining CLI args.
///
/// Expected usage: `heron index <path> [--csv] [--settings <file.json>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<IndexStatsArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut csv = false;
    let mut settings: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--csv" => csv = true,
            "--settings" => {
                let file = args
                    .next()
                    .ok_or_else(|| "--settings requires a file".to_string())?;
                settings = Some(PathBuf::from(file));
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if path.is_some() {
                    return Err("Multiple paths provided; expected exactly one".to_string());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| "Missing required <path> argument".to_string())?;
    if !path.is_dir() {
        return Err(format!("Not a directory: {}", path.display()));
    }

    Ok(IndexStatsArgs { path, csv, settings })
}

/// Run every phase against `args.path`
pub async fn run_index_stats(args: &IndexStatsArgs) -> anyhow::Result<Vec<PhaseResult>> {
    let config = super::load_config(args.settings.as_deref())?;
    let root = std::fs::canonicalize(&args.path)?;
    let db = Database::open(&config.storage)?;
    let mut results = Vec::new();

    let (uris, elapsed) = timed("index:scan", || {
        workspace::scan_uris(&[root.clone()], &config)
    });
    results.push(PhaseResult {
        name: "scan",
        duration: elapsed,
        detail: format!("{} source files", uris.len()),
    });

    let cache = ClasspathCache::new(db.clone(), classpath::build_tool_from_config(&config));
    let start = Instant::now();
    let resolved = cache.resolve(&root, config.fetch_sources).await;
    results.push(PhaseResult {
        name: "classpath",
        duration: start.elapsed(),
        detail: format!(
            "{} entries via {}, {} source dirs",
            resolved.entries.len(),
            cache.build_tool().name(),
            resolved.kotlin_source_dirs.len() + resolved.java_source_dirs.len()
        ),
    });
    let inputs = inputs_for(&root, resolved, &config);

    let analysis = Arc::new(AnalysisCache::new(Arc::new(NoIndex), false));
    let files = FileStore::new(analysis.clone(), &config);
    let (loaded, elapsed) = timed("index:load", || files.load_all_from_disk(&uris));
    results.push(PhaseResult {
        name: "load",
        duration: elapsed,
        detail: format!("{} files loaded", loaded),
    });

    let mut analyzer = OutlineAnalyzerFactory.instantiate(&inputs)?;
    let (summary, elapsed) = timed("index:compile", || analysis.initial_pass(analyzer.as_mut()));
    results.push(PhaseResult {
        name: "compile",
        duration: elapsed,
        detail: format!("{} compiled, {} failed", summary.compiled, summary.failed.len()),
    });

    let declarations = analysis.declarations();
    let index = SymbolIndex::new(db);
    let (written, elapsed) = timed("index:rebuild", || index.rebuild_all(&declarations));
    results.push(PhaseResult {
        name: "index",
        duration: elapsed,
        detail: format!("{} declarations", written?),
    });

    Ok(results)
}

fn inputs_for(root: &Path, resolved: classpath::ProjectClasspath, config: &HeronConfig) -> AnalyzerInputs {
    let auxiliary = workspace::source_dirs(root, &resolved, SourceKind::Auxiliary);
    AnalyzerInputs {
        auxiliary_sources: workspace::scan(&auxiliary, config, SourceKind::Auxiliary),
        classpath: resolved,
    }
}

fn timed<R>(name: &'static str, f: impl FnOnce() -> R) -> (R, Duration) {
    let guard = TimingGuard::new(name);
    let result = f();
    (result, guard.elapsed())
}

/// Print phase results in human-readable format.
pub fn print_results(results: &[PhaseResult]) {
    println!("=== Heron Index Stats ===\n");
    for result in results {
        println!(
            "  {:<12} {:>10.2?}   ({})",
            result.name, result.duration, result.detail
        );
    }

    if results.len() > 1 {
        let total: Duration = results.iter().map(|r| r.duration).sum();
        println!("\n  {:<12} {:>10.2?}", "TOTAL", total);
    }
    println!();
}

/// Print phase results in CSV format.
pub fn print_results_csv(results: &[PhaseResult]) {
    println!("phase,duration_ms,detail");
    for result in results {
        println!(
            "{},{:.3},\"{}\"",
            result.name,
            result.duration.as_secs_f64() * 1000.0,
            result.detail.replace('"', "\"\"")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_workspace::{create_fixture_workspace, FixtureConfig};

    #[test]
    fn test_parse_args_basic() {
        let mut args = vec![".".to_string()].into_iter();
        let result = parse_args(&mut args).unwrap();
        assert_eq!(result.path, PathBuf::from("."));
        assert!(!result.csv);
        assert!(result.settings.is_none());
    }

    #[test]
    fn test_parse_args_all_flags() {
        let mut args = vec![
            ".".to_string(),
            "--csv".to_string(),
            "--settings".to_string(),
            "heron.json".to_string(),
        ]
        .into_iter();
        let result = parse_args(&mut args).unwrap();
        assert!(result.csv);
        assert_eq!(result.settings, Some(PathBuf::from("heron.json")));
    }

    #[test]
    fn test_parse_args_rejects_unknown_flag() {
        let mut args = vec![".".to_string(), "--fast".to_string()].into_iter();
        assert!(parse_args(&mut args).unwrap_err().contains("--fast"));
    }

    #[test]
    fn test_parse_args_missing_path() {
        let mut args = Vec::<String>::new().into_iter();
        assert!(parse_args(&mut args).is_err());
    }

    #[tokio::test]
    async fn test_runs_every_phase_on_fixture() {
        let fixture = FixtureConfig::small();
        let workspace = create_fixture_workspace(&fixture);
        let settings = workspace.path().join("heron.json");
        std::fs::write(&settings, r#"{"storage": {"path": ":memory:"}}"#).unwrap();

        let args = IndexStatsArgs {
            path: workspace.path().to_path_buf(),
            csv: false,
            settings: Some(settings),
        };
        let results = run_index_stats(&args).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["scan", "classpath", "load", "compile", "index"]);
        assert_eq!(results[0].detail, format!("{} source files", fixture.file_count));
        assert_eq!(
            results[4].detail,
            format!("{} declarations", fixture.declaration_count())
        );
    }
}

//! End-to-end behavior of a session over real files on disk.
//!
//! Run with: `cargo test -p heron --features test-support --test session_scenarios`

use std::sync::atomic::Ordering;
use std::sync::Arc;

use heron::analyzer::OutlineAnalyzerFactory;
use heron::classpath::ClasspathCache;
use heron::declaration::DeclarationKind;
use heron::index::SymbolQuery;
use heron::store::Database;
use heron::test_utils::fixture_workspace::{write_fixture_workspace, FixtureConfig};
use heron::test_utils::{
    capture_warnings, write_source, CountingAnalyzerFactory, RecordingPublisher, StaticBuildTool,
};
use heron::{HeronConfig, NullPublisher, Session};
use tempfile::TempDir;
use tower_lsp::lsp_types::TextDocumentContentChangeEvent;

fn config() -> HeronConfig {
    HeronConfig {
        diagnostics_debounce_ms: 25,
        ..HeronConfig::default()
    }
}

fn whole(text: &str) -> Vec<TextDocumentContentChangeEvent> {
    vec![TextDocumentContentChangeEvent {
        range: None,
        range_length: None,
        text: text.to_string(),
    }]
}

fn names(session: &Session, prefix: &str) -> Vec<String> {
    session
        .query(&SymbolQuery::prefix(prefix))
        .unwrap()
        .into_iter()
        .map(|d| d.fq_name)
        .collect()
}

#[tokio::test]
async fn rename_function_moves_index_entry() {
    let dir = TempDir::new().unwrap();
    let uri = write_source(dir.path(), "A.kt", "fun f() {}");
    let session = Session::new(
        config(),
        Database::in_memory().unwrap(),
        Arc::new(StaticBuildTool::new("")),
        Arc::new(OutlineAnalyzerFactory),
        Arc::new(NullPublisher),
    )
    .unwrap();
    session.initialize(vec![dir.path().to_path_buf()]).await.unwrap();

    session.did_open(&uri, "fun f() {}", 1);
    session.settle().await.unwrap();
    let found = session.query(&SymbolQuery::prefix("f")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, DeclarationKind::Function);

    session.did_change(&uri, 2, &whole("fun g() {}"));
    session.settle().await.unwrap();
    assert!(names(&session, "f").is_empty());
    assert_eq!(names(&session, "g"), vec!["g"]);
}

#[tokio::test]
async fn editing_b_does_not_recompile_a() {
    let dir = TempDir::new().unwrap();
    let a = write_source(dir.path(), "A.kt", "package app\n\nfun useHelper() = helper()");
    let b = write_source(dir.path(), "B.kt", "package app\n\nfun helper() = 1");
    let factory = CountingAnalyzerFactory::default();
    let session = Session::new(
        config(),
        Database::in_memory().unwrap(),
        Arc::new(StaticBuildTool::new("")),
        Arc::new(factory.clone()),
        Arc::new(NullPublisher),
    )
    .unwrap();
    session.initialize(vec![dir.path().to_path_buf()]).await.unwrap();
    let a_before = session.latest_compiled_version(&a).await.unwrap();
    factory.probe.targets.lock().unwrap().clear();

    session.did_open(&b, "package app\n\nfun helper() = 2", 1);
    session.settle().await.unwrap();
    assert_eq!(*factory.probe.targets.lock().unwrap(), vec![b.clone()]);

    // A's snapshot is still the one from startup
    let a_after = session.latest_compiled_version(&a).await.unwrap();
    assert!(Arc::ptr_eq(&a_before.parsed, &a_after.parsed));

    // Asking for both only compiles what is stale
    factory.probe.targets.lock().unwrap().clear();
    session.compile_files(vec![a.clone(), b.clone()]).await.unwrap();
    assert!(factory.probe.targets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_build_tool_degrades_to_empty_classpath() {
    let warnings = capture_warnings();
    let dir = TempDir::new().unwrap();
    let tool = Arc::new(StaticBuildTool::unavailable());
    let cache = ClasspathCache::new(Database::in_memory().unwrap(), tool.clone());

    let classpath = cache.get(dir.path()).await;
    assert!(classpath.is_empty());
    assert_eq!(tool.calls(), 1);
    let logged = warnings.matching(&dir.path().display().to_string());
    assert_eq!(logged.len(), 1);
    assert!(logged[0].starts_with("Could not resolve classpath for"));
    assert!(logged[0].contains("build tool not found on PATH"));

    // Failures are not cached
    let again = cache.get_with_sources(dir.path()).await;
    assert!(again.is_empty());
    assert_eq!(tool.calls(), 2);

    // The rest of the session keeps working without dependencies
    write_source(dir.path(), "A.kt", "class Standalone");
    let session = Session::new(
        config(),
        Database::in_memory().unwrap(),
        tool,
        Arc::new(OutlineAnalyzerFactory),
        Arc::new(NullPublisher),
    )
    .unwrap();
    let summary = session.initialize(vec![dir.path().to_path_buf()]).await.unwrap();
    session.settle().await.unwrap();
    assert_eq!(summary.compiled, 1);
    assert_eq!(names(&session, "Stand"), vec!["Standalone"]);
}

#[tokio::test]
async fn classpath_is_resolved_once_per_descriptor_version() {
    let dir = TempDir::new().unwrap();
    let tool = Arc::new(StaticBuildTool::new(""));
    let cache = ClasspathCache::new(Database::in_memory().unwrap(), tool.clone());
    cache.get(dir.path()).await;
    cache.get(dir.path()).await;
    assert_eq!(tool.calls(), 1);

    tool.set_listing("", 2);
    cache.get(dir.path()).await;
    assert_eq!(tool.calls(), 2);
}

#[tokio::test]
async fn edit_burst_publishes_once() {
    let dir = TempDir::new().unwrap();
    let uri = write_source(dir.path(), "A.kt", "fun a() {}");
    let publisher = Arc::new(RecordingPublisher::default());
    let session = Session::new(
        HeronConfig {
            diagnostics_debounce_ms: 80,
            ..HeronConfig::default()
        },
        Database::in_memory().unwrap(),
        Arc::new(StaticBuildTool::new("")),
        Arc::new(OutlineAnalyzerFactory),
        publisher.clone(),
    )
    .unwrap();
    session.initialize(vec![dir.path().to_path_buf()]).await.unwrap();
    session.did_open(&uri, "fun a() {}", 1);
    session.settle().await.unwrap();
    let published_before = publisher.published().len();

    for version in 2..=20 {
        let text = if version == 20 { "fun a() {".to_string() } else { format!("fun a{version}() {{}}") };
        session.did_change(&uri, version, &whole(&text));
    }
    session.settle().await.unwrap();

    assert_eq!(publisher.published().len(), published_before + 1);
    assert_eq!(publisher.last_for(&uri).map(|d| d.len()), Some(1));
}

#[tokio::test]
async fn persisted_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache").join("heron.db");
    let workspace = dir.path().join("ws");
    let fixture = FixtureConfig::small();
    write_fixture_workspace(&workspace, &fixture);

    let open = || {
        Session::new(
            config(),
            Database::open_file(&db_path).unwrap(),
            Arc::new(StaticBuildTool::new("")),
            Arc::new(OutlineAnalyzerFactory),
            Arc::new(NullPublisher),
        )
        .unwrap()
    };

    let first = open();
    first.initialize(vec![workspace.clone()]).await.unwrap();
    first.settle().await.unwrap();
    assert_eq!(first.index().count().unwrap(), fixture.declaration_count());
    drop(first);

    let factory = CountingAnalyzerFactory::default();
    let second = Session::new(
        config(),
        Database::open_file(&db_path).unwrap(),
        Arc::new(StaticBuildTool::new("")),
        Arc::new(factory.clone()),
        Arc::new(NullPublisher),
    )
    .unwrap();
    // Readable before the startup pass runs
    assert_eq!(second.index().count().unwrap(), fixture.declaration_count());
    second.initialize(vec![workspace]).await.unwrap();
    second.settle().await.unwrap();
    assert_eq!(second.index().count().unwrap(), fixture.declaration_count());
    assert_eq!(factory.probe.instances.load(Ordering::SeqCst), 1);
}

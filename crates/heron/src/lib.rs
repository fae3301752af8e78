// lib.rs - Incremental analysis core for a Kotlin language server.
//
// A `Session` ties the pieces together: the `FileStore` holds what the editor
// and the disk say about each file, the `AnalysisCache` keeps parse and
// compile results in step with that text, the `SymbolIndex` persists
// top-level declarations, and the `ClasspathCache` remembers the resolved
// dependency set per workspace root. The binary in main.rs drives a session
// from the command line.

pub mod analysis_cache;
pub mod analyzer;
pub mod classpath;
pub mod cli;
pub mod config;
pub mod declaration;
pub mod error;
pub mod file_store;
pub mod index;
pub mod perf;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod watcher;
pub mod workspace;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use config::HeronConfig;
pub use error::{HeronError, HeronResult};
pub use session::{DiagnosticsPublisher, NullPublisher, Session};

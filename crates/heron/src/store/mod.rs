//! Persisted state: the SQLite database shared by the symbol index and the
//! classpath cache.

pub mod database;
pub mod schema;

pub use database::Database;

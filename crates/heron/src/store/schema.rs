//! SQLite schema for the symbol index and the classpath cache.
//!
//! A store whose recorded version differs from [`SCHEMA_VERSION`] is not
//! migrated: it is discarded and rebuilt, since everything in it can be
//! recomputed from the workspace.

/// Bump whenever a table definition below changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Longest persisted fully qualified name
pub const MAX_FQNAME_LENGTH: usize = 255;
/// Longest persisted short name
pub const MAX_SHORT_NAME_LENGTH: usize = 80;
/// Longest persisted location URI
pub const MAX_URI_LENGTH: usize = 511;
/// Longest persisted classpath path
pub const MAX_PATH_LENGTH: usize = 2047;

/// DDL statements, safe to replay on an initialized database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_meta (
        version INTEGER NOT NULL
    );",
    // ── symbol index ────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        line INTEGER NOT NULL,
        character INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS ranges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_position INTEGER NOT NULL REFERENCES positions(id),
        end_position INTEGER NOT NULL REFERENCES positions(id)
    );",
    "CREATE TABLE IF NOT EXISTS locations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uri TEXT NOT NULL,
        range_id INTEGER NOT NULL REFERENCES ranges(id)
    );",
    "CREATE TABLE IF NOT EXISTS symbols (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fq_name TEXT NOT NULL,
        short_name TEXT NOT NULL,
        kind INTEGER NOT NULL,
        visibility INTEGER NOT NULL,
        extension_receiver_type TEXT,
        location_id INTEGER REFERENCES locations(id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_symbols_fq_name ON symbols(fq_name);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_short_name ON symbols(short_name);",
    // ── classpath cache ─────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS classpath_metadata (
        root TEXT PRIMARY KEY,
        includes_sources INTEGER NOT NULL,
        build_descriptor_version INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS classpath_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT NOT NULL,
        compiled_jar TEXT NOT NULL,
        source_jar TEXT
    );",
    "CREATE TABLE IF NOT EXISTS classpath_source_dirs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT NOT NULL,
        path TEXT NOT NULL,
        language TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_classpath_entries_root ON classpath_entries(root);",
    "CREATE INDEX IF NOT EXISTS idx_classpath_source_dirs_root ON classpath_source_dirs(root);",
];

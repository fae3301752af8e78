//
// store/database.rs
//
// SQLite connection shared by the symbol index and the classpath cache
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::StorageLocation;
use crate::error::{HeronError, HeronResult};
use crate::store::schema::{SCHEMA_STATEMENTS, SCHEMA_VERSION};

const DB_FILENAME: &str = "heron.db";

/// Handle to the persisted store.
///
/// Cloning is cheap; all clones share one connection. Every logical update
/// runs inside a single transaction on that connection, so readers never
/// observe a half-applied batch.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open the store for `location`, falling back to memory when no user
    /// cache directory is available.
    pub fn open(location: &StorageLocation) -> HeronResult<Self> {
        match location {
            StorageLocation::InMemory => Self::in_memory(),
            StorageLocation::File(path) => Self::open_file(path),
            StorageLocation::UserCache => match user_cache_path() {
                Some(path) => Self::open_file(&path),
                None => {
                    log::warn!("No user cache directory available, keeping the index in memory");
                    Self::in_memory()
                }
            },
        }
    }

    pub fn in_memory() -> HeronResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Open (or create) a database file, rebuilding it when its schema
    /// version does not match.
    pub fn open_file(path: &Path) -> HeronResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match Connection::open(path).map_err(HeronError::from).and_then(|conn| {
            let version = stored_version(&conn)?;
            Ok((conn, version))
        }) {
            Ok((conn, None)) => conn,
            Ok((conn, Some(version))) if version == SCHEMA_VERSION => conn,
            Ok((conn, Some(version))) => {
                log::info!(
                    "Database {} has schema version {} (expected {}), rebuilding",
                    path.display(),
                    version,
                    SCHEMA_VERSION
                );
                drop(conn);
                recreate(path)?
            }
            Err(e) => {
                log::warn!("Could not read database {}: {}, rebuilding", path.display(), e);
                recreate(path)?
            }
        };

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        initialize(&conn)?;
        log::info!("Opened database {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// File backing this store; `None` when it lives in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> HeronResult<R>,
    ) -> HeronResult<R> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| HeronError::Database("connection lock poisoned".to_string()))?;
        f(&mut conn)
    }

    pub fn schema_version(&self) -> HeronResult<Option<i32>> {
        self.with_connection(|conn| stored_version(conn))
    }
}

/// Per-user database location
#[cfg(unix)]
pub fn user_cache_path() -> Option<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("heron").ok()?;
    dirs.place_cache_file(DB_FILENAME).ok()
}

#[cfg(not(unix))]
pub fn user_cache_path() -> Option<PathBuf> {
    None
}

fn stored_version(conn: &Connection) -> HeronResult<Option<i32>> {
    let has_meta: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta')",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(None);
    }
    let version = conn
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version)
}

fn initialize(conn: &Connection) -> HeronResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    for statement in SCHEMA_STATEMENTS {
        conn.execute_batch(statement)?;
    }
    if stored_version(conn)?.is_none() {
        conn.execute(
            "INSERT INTO schema_meta(version) VALUES(?1)",
            params![SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

fn recreate(path: &Path) -> HeronResult<Connection> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(PathBuf::from(file)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Connection::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_has_current_version() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), Some(SCHEMA_VERSION));
        assert!(db.path().is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("heron.db");
        {
            let db = Database::open_file(&path).unwrap();
            db.with_connection(|conn| {
                conn.execute(
                    "INSERT INTO classpath_metadata(root, includes_sources, build_descriptor_version) VALUES('/p', 0, 7)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open_file(&path).unwrap();
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM classpath_metadata", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_version_mismatch_rebuilds_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heron.db");
        {
            let db = Database::open_file(&path).unwrap();
            db.with_connection(|conn| {
                conn.execute(
                    "INSERT INTO classpath_metadata(root, includes_sources) VALUES('/p', 1)",
                    [],
                )?;
                conn.execute("UPDATE schema_meta SET version = ?1", params![SCHEMA_VERSION + 1])?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open_file(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), Some(SCHEMA_VERSION));
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM classpath_metadata", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_garbage_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heron.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();
        let db = Database::open_file(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_open_in_memory_location() {
        let db = Database::open(&StorageLocation::InMemory).unwrap();
        assert!(db.path().is_none());
    }
}

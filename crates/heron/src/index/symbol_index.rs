//
// index/symbol_index.rs
//
// Persisted declaration index with incremental add/remove batches
//

use rusqlite::{params, Transaction};
use tower_lsp::lsp_types::{Position, Range};
use url::Url;

use crate::declaration::{Declaration, DeclarationKind, Location, Visibility};
use crate::error::HeronResult;
use crate::store::schema::{MAX_FQNAME_LENGTH, MAX_SHORT_NAME_LENGTH, MAX_URI_LENGTH};
use crate::store::Database;

/// Default number of rows returned by a query
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Parameters of a short-name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolQuery {
    pub prefix: String,
    /// Exact receiver type; `None` matches only non-extension declarations
    pub receiver_type: Option<String>,
    pub limit: usize,
    /// Raw LIKE pattern appended to the escaped prefix
    pub suffix: String,
    /// Match the prefix anywhere in the short name
    pub substring: bool,
}

impl SymbolQuery {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            receiver_type: None,
            limit: DEFAULT_QUERY_LIMIT,
            suffix: "%".to_string(),
            substring: false,
        }
    }

    pub fn with_receiver(mut self, receiver_type: impl Into<String>) -> Self {
        self.receiver_type = Some(receiver_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn substring(mut self) -> Self {
        self.substring = true;
        self
    }

    fn pattern(&self) -> String {
        let lead = if self.substring { "%" } else { "" };
        format!("{}{}{}", lead, escape_like(&self.prefix), self.suffix)
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Persisted index of every declaration in the workspace.
///
/// Writes arrive from the index worker; reads may come from any thread. Each
/// write is one transaction, so queries see either the batch before or after
/// an update, never a mix.
#[derive(Debug, Clone)]
pub struct SymbolIndex {
    db: Database,
}

impl SymbolIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace the whole index with `declarations`
    pub fn rebuild_all(&self, declarations: &[Declaration]) -> HeronResult<usize> {
        log::info!("Updating full symbol index...");
        let count = self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM symbols", [])?;
            prune_orphans(&tx)?;
            for decl in declarations.iter().filter(|d| persistable(d)) {
                insert(&tx, decl)?;
            }
            let count = count_rows(&tx)?;
            tx.commit()?;
            Ok(count)
        })?;
        log::info!("Updated full symbol index! ({} symbol(s))", count);
        Ok(count)
    }

    /// Remove every row matching a declaration of `removed`, then add `added`.
    ///
    /// `removed` must be the declarations of the previous snapshot of the
    /// changed files, so a fresh declaration with the same key is never lost.
    pub fn update(&self, removed: &[Declaration], added: &[Declaration]) -> HeronResult<usize> {
        log::trace!(
            "Updating symbol index (-{} +{})",
            removed.len(),
            added.len()
        );
        let count = self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut delete = tx.prepare_cached(
                    "DELETE FROM symbols WHERE fq_name = ?1 AND extension_receiver_type IS ?2",
                )?;
                for decl in removed.iter().filter(|d| persistable(d)) {
                    let (fq_name, receiver) = decl.key();
                    delete.execute(params![fq_name, receiver])?;
                }
            }
            prune_orphans(&tx)?;
            for decl in added.iter().filter(|d| persistable(d)) {
                insert(&tx, decl)?;
            }
            let count = count_rows(&tx)?;
            tx.commit()?;
            Ok(count)
        })?;
        log::info!("Updated symbol index! ({} symbol(s))", count);
        Ok(count)
    }

    pub fn query(&self, query: &SymbolQuery) -> HeronResult<Vec<Declaration>> {
        let pattern = query.pattern();
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT s.fq_name, s.short_name, s.kind, s.visibility, s.extension_receiver_type,
                        l.uri, sp.line, sp.character, ep.line, ep.character
                 FROM symbols s
                 LEFT JOIN locations l ON l.id = s.location_id
                 LEFT JOIN ranges r ON r.id = l.range_id
                 LEFT JOIN positions sp ON sp.id = r.start_position
                 LEFT JOIN positions ep ON ep.id = r.end_position
                 WHERE s.short_name LIKE ?1 ESCAPE '\\'
                   AND s.extension_receiver_type IS ?2
                 ORDER BY s.short_name, s.fq_name
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![pattern, query.receiver_type, query.limit as i64],
                row_to_declaration,
            )?;
            let mut out = Vec::new();
            for row in rows {
                if let Some(decl) = row? {
                    out.push(decl);
                }
            }
            Ok(out)
        })
    }

    /// All rows with exactly this fully qualified name
    pub fn lookup(&self, fq_name: &str) -> HeronResult<Vec<Declaration>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT s.fq_name, s.short_name, s.kind, s.visibility, s.extension_receiver_type,
                        l.uri, sp.line, sp.character, ep.line, ep.character
                 FROM symbols s
                 LEFT JOIN locations l ON l.id = s.location_id
                 LEFT JOIN ranges r ON r.id = l.range_id
                 LEFT JOIN positions sp ON sp.id = r.start_position
                 LEFT JOIN positions ep ON ep.id = r.end_position
                 WHERE s.fq_name = ?1",
            )?;
            let rows = stmt.query_map(params![fq_name], row_to_declaration)?;
            let mut out = Vec::new();
            for row in rows {
                if let Some(decl) = row? {
                    out.push(decl);
                }
            }
            Ok(out)
        })
    }

    pub fn count(&self) -> HeronResult<usize> {
        self.db.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }
}

fn persistable(decl: &Declaration) -> bool {
    let uri_len = decl.location.as_ref().map(|l| l.uri.as_str().len()).unwrap_or(0);
    let receiver_len = decl.extension_receiver_type.as_ref().map(|r| r.len()).unwrap_or(0);
    let fits = decl.fq_name.len() <= MAX_FQNAME_LENGTH
        && decl.short_name.len() <= MAX_SHORT_NAME_LENGTH
        && receiver_len <= MAX_FQNAME_LENGTH
        && uri_len <= MAX_URI_LENGTH;
    if !fits {
        log::warn!(
            "Excluding symbol {} from index since its name is too long",
            decl.fq_name
        );
    }
    fits
}

fn insert(tx: &Transaction<'_>, decl: &Declaration) -> HeronResult<()> {
    let location_id = match &decl.location {
        Some(location) => Some(insert_location(tx, location)?),
        None => None,
    };
    tx.prepare_cached(
        "INSERT INTO symbols(fq_name, short_name, kind, visibility, extension_receiver_type, location_id)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        decl.fq_name,
        decl.short_name,
        decl.kind.raw_value(),
        decl.visibility.raw_value(),
        decl.extension_receiver_type,
        location_id
    ])?;
    Ok(())
}

fn insert_location(tx: &Transaction<'_>, location: &Location) -> HeronResult<i64> {
    let mut position = tx.prepare_cached("INSERT INTO positions(line, character) VALUES(?1, ?2)")?;
    position.execute(params![location.range.start.line, location.range.start.character])?;
    let start = tx.last_insert_rowid();
    position.execute(params![location.range.end.line, location.range.end.character])?;
    let end = tx.last_insert_rowid();

    tx.prepare_cached("INSERT INTO ranges(start_position, end_position) VALUES(?1, ?2)")?
        .execute(params![start, end])?;
    let range_id = tx.last_insert_rowid();

    tx.prepare_cached("INSERT INTO locations(uri, range_id) VALUES(?1, ?2)")?
        .execute(params![location.uri.as_str(), range_id])?;
    Ok(tx.last_insert_rowid())
}

fn prune_orphans(tx: &Transaction<'_>) -> HeronResult<()> {
    tx.execute_batch(
        "DELETE FROM locations WHERE id NOT IN
            (SELECT location_id FROM symbols WHERE location_id IS NOT NULL);
         DELETE FROM ranges WHERE id NOT IN (SELECT range_id FROM locations);
         DELETE FROM positions WHERE id NOT IN
            (SELECT start_position FROM ranges UNION SELECT end_position FROM ranges);",
    )?;
    Ok(())
}

fn count_rows(tx: &Transaction<'_>) -> HeronResult<usize> {
    let count: i64 = tx.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
    Ok(count as usize)
}

fn row_to_declaration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Declaration>> {
    let kind = DeclarationKind::from_raw(row.get(2)?);
    let visibility = Visibility::from_raw(row.get(3)?);
    let (Some(kind), Some(visibility)) = (kind, visibility) else {
        return Ok(None);
    };

    let uri: Option<String> = row.get(5)?;
    let location = match (
        uri.and_then(|u| Url::parse(&u).ok()),
        row.get::<_, Option<u32>>(6)?,
        row.get::<_, Option<u32>>(7)?,
        row.get::<_, Option<u32>>(8)?,
        row.get::<_, Option<u32>>(9)?,
    ) {
        (Some(uri), Some(sl), Some(sc), Some(el), Some(ec)) => Some(Location {
            uri,
            range: Range::new(Position::new(sl, sc), Position::new(el, ec)),
        }),
        _ => None,
    };

    Ok(Some(Declaration {
        fq_name: row.get(0)?,
        short_name: row.get(1)?,
        kind,
        visibility,
        extension_receiver_type: row.get(4)?,
        location,
    }))
}

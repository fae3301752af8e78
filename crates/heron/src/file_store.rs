//
// file_store.rs
//
// Source text of every workspace file, open or not
//

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use ropey::Rope;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent};
use url::Url;

use crate::config::HeronConfig;
use crate::error::{HeronError, HeronResult};

/// Version of files read from disk rather than sent by the editor
pub const UNVERSIONED: i32 = -1;

/// Receives every text change, in order per URI
pub trait SourceListener: Send + Sync {
    fn put(&self, uri: &Url, content: Arc<str>, temporary: bool);
    fn remove(&self, uri: &Url);
}

#[derive(Debug, Clone)]
struct SourceFile {
    text: Rope,
    version: i32,
    temporary: bool,
    open: bool,
}

impl SourceFile {
    fn content(&self) -> Arc<str> {
        Arc::from(self.text.to_string())
    }
}

/// Holds the text of every known file and pushes each mutation to the
/// analysis cache.
///
/// All mutations of one URI go through its map entry, and the listener is
/// called while that entry is held, so the listener sees changes to a file in
/// the order they were applied.
pub struct FileStore {
    files: DashMap<Url, SourceFile>,
    listener: Arc<dyn SourceListener>,
    source_extensions: Vec<String>,
}

impl FileStore {
    pub fn new(listener: Arc<dyn SourceListener>, config: &HeronConfig) -> Self {
        Self {
            files: DashMap::new(),
            listener,
            source_extensions: config.source_extensions.clone(),
        }
    }

    /// Editor opened `uri`; its buffer becomes authoritative
    pub fn open(&self, uri: &Url, content: &str, version: i32) {
        let file = SourceFile {
            text: Rope::from_str(&normalize_line_endings(content)),
            version,
            temporary: false,
            open: true,
        };
        self.replace(uri, file);
        log::trace!("Opened {} at version {}", uri, version);
    }

    /// Register an ephemeral file, e.g. an expression evaluated at the cursor
    pub fn put_temporary(&self, uri: &Url, content: &str) {
        let file = SourceFile {
            text: Rope::from_str(&normalize_line_endings(content)),
            version: UNVERSIONED,
            temporary: true,
            open: true,
        };
        self.replace(uri, file);
    }

    fn replace(&self, uri: &Url, file: SourceFile) {
        match self.files.entry(uri.clone()) {
            Entry::Occupied(mut entry) => {
                self.listener.put(uri, file.content(), file.temporary);
                entry.insert(file);
            }
            Entry::Vacant(entry) => {
                self.listener.put(uri, file.content(), file.temporary);
                entry.insert(file);
            }
        }
    }

    /// Apply `changes` in order. Returns false when the edit was dropped,
    /// either because the file is unknown or `version` is not newer than the
    /// stored one.
    pub fn edit(&self, uri: &Url, version: i32, changes: &[TextDocumentContentChangeEvent]) -> bool {
        let Some(mut file) = self.files.get_mut(uri) else {
            log::warn!("Ignoring edit to unknown file {}", uri);
            return false;
        };
        if version <= file.version {
            log::warn!(
                "Ignoring stale edit to {}: version {} is not newer than {}",
                uri,
                version,
                file.version
            );
            return false;
        }

        for change in changes {
            apply_change(&mut file.text, change);
        }
        file.version = version;
        self.listener.put(uri, file.content(), file.temporary);
        true
    }

    /// Editor closed `uri`. Temporary files disappear, everything else falls
    /// back to its disk content, or disappears when it is gone from disk.
    pub fn close(&self, uri: &Url) {
        let Entry::Occupied(mut entry) = self.files.entry(uri.clone()) else {
            return;
        };
        if !entry.get().open {
            return;
        }
        if entry.get().temporary {
            self.listener.remove(uri);
            entry.remove();
            return;
        }

        match read_from_disk(uri) {
            Ok(content) => {
                let file = entry.get_mut();
                file.text = Rope::from_str(&content);
                file.version = UNVERSIONED;
                file.open = false;
                self.listener.put(uri, file.content(), false);
            }
            Err(e) => {
                log::trace!("Closed {} is no longer on disk ({}), forgetting it", uri, e);
                self.listener.remove(uri);
                entry.remove();
            }
        }
    }

    pub fn created_on_disk(&self, uri: &Url) {
        self.changed_on_disk(uri);
    }

    /// Reload `uri` from disk unless the editor has it open
    pub fn changed_on_disk(&self, uri: &Url) {
        if !self.is_source(uri) {
            return;
        }
        match self.files.entry(uri.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().open {
                    return;
                }
                match read_from_disk(uri) {
                    Ok(content) => {
                        let file = entry.get_mut();
                        file.text = Rope::from_str(&content);
                        self.listener.put(uri, file.content(), false);
                    }
                    Err(e) => log::warn!("Could not read changed file {}: {}", uri, e),
                }
            }
            Entry::Vacant(entry) => match read_from_disk(uri) {
                Ok(content) => {
                    self.listener.put(uri, Arc::from(content.as_str()), false);
                    entry.insert(SourceFile {
                        text: Rope::from_str(&content),
                        version: UNVERSIONED,
                        temporary: false,
                        open: false,
                    });
                }
                Err(e) => log::warn!("Could not read new file {}: {}", uri, e),
            },
        }
    }

    /// Forget `uri` unless the editor still has it open
    pub fn deleted_on_disk(&self, uri: &Url) {
        if !self.is_source(uri) {
            return;
        }
        if let Entry::Occupied(entry) = self.files.entry(uri.clone()) {
            if entry.get().open {
                return;
            }
            self.listener.remove(uri);
            entry.remove();
        }
    }

    /// Register a file found on disk. Files that are already known are left alone.
    pub fn load_from_disk(&self, uri: &Url) -> bool {
        if self.files.contains_key(uri) {
            return false;
        }
        self.changed_on_disk(uri);
        self.files.contains_key(uri)
    }

    /// Register many files found on disk, reading them in parallel
    pub fn load_all_from_disk(&self, uris: &[Url]) -> usize {
        uris.par_iter().filter(|uri| self.load_from_disk(uri)).count()
    }

    /// Forget every file under `root` the editor does not have open
    pub fn remove_unopened_under(&self, root: &Path) -> Vec<Url> {
        let candidates: Vec<Url> = self
            .files
            .iter()
            .filter(|entry| !entry.value().open)
            .filter(|entry| {
                entry
                    .key()
                    .to_file_path()
                    .map(|path| path.starts_with(root))
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for uri in candidates {
            if let Entry::Occupied(entry) = self.files.entry(uri.clone()) {
                if !entry.get().open {
                    self.listener.remove(&uri);
                    entry.remove();
                    removed.push(uri);
                }
            }
        }
        removed
    }

    /// Current text of `uri`.
    ///
    /// Asking for a file that was never registered is a caller bug.
    pub fn content(&self, uri: &Url) -> HeronResult<String> {
        let file = self.files.get(uri);
        debug_assert!(file.is_some(), "content requested for unknown file {}", uri);
        file.map(|f| f.text.to_string())
            .ok_or_else(|| HeronError::UnknownFile(uri.clone()))
    }

    /// Known files in URI order
    pub fn all(&self, include_temporary: bool) -> Vec<Url> {
        let mut uris: Vec<Url> = self
            .files
            .iter()
            .filter(|entry| include_temporary || !entry.value().temporary)
            .map(|entry| entry.key().clone())
            .collect();
        uris.sort();
        uris
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.files.contains_key(uri)
    }

    pub fn is_open(&self, uri: &Url) -> bool {
        self.files.get(uri).map(|f| f.open).unwrap_or(false)
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.files.get(uri).map(|f| f.version)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn is_source(&self, uri: &Url) -> bool {
        let path = uri.path();
        self.source_extensions
            .iter()
            .any(|ext| path.rsplit_once('.').is_some_and(|(_, e)| e == ext))
    }
}

fn read_from_disk(uri: &Url) -> std::io::Result<String> {
    let path = uri.to_file_path().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("not a file URI: {uri}"))
    })?;
    let content = std::fs::read_to_string(path)?;
    Ok(normalize_line_endings(&content).into_owned())
}

fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Apply one LSP content change to `text`. A change without a range replaces
/// the whole document. Out-of-range positions are clamped.
fn apply_change(text: &mut Rope, change: &TextDocumentContentChangeEvent) {
    let replacement = normalize_line_endings(&change.text);
    let Some(range) = change.range else {
        *text = Rope::from_str(&replacement);
        return;
    };
    let start = position_to_char(text, range.start);
    let end = position_to_char(text, range.end).max(start);
    text.remove(start..end);
    text.insert(start, &replacement);
}

/// Char index of an LSP position (UTF-16 column)
fn position_to_char(text: &Rope, position: Position) -> usize {
    let line = position.line as usize;
    if line >= text.len_lines() {
        return text.len_chars();
    }
    let line_start = text.line_to_char(line);
    let target = position.character as usize;

    let mut utf16 = 0;
    let mut chars = 0;
    for ch in text.line(line).chars() {
        if utf16 >= target || ch == '\n' {
            break;
        }
        utf16 += ch.len_utf16();
        chars += 1;
    }
    line_start + chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower_lsp::lsp_types::Range;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Put(String, String, bool),
        Remove(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl SourceListener for Recorder {
        fn put(&self, uri: &Url, content: Arc<str>, temporary: bool) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Put(uri.to_string(), content.to_string(), temporary));
        }

        fn remove(&self, uri: &Url) {
            self.events.lock().unwrap().push(Event::Remove(uri.to_string()));
        }
    }

    fn store() -> (FileStore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (FileStore::new(recorder.clone(), &HeronConfig::default()), recorder)
    }

    fn full(text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_string(),
        }
    }

    fn patch(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(sl, sc), Position::new(el, ec))),
            range_length: None,
            text: text.to_string(),
        }
    }

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///project/{name}")).unwrap()
    }

    #[test]
    fn test_open_and_edit() {
        let (store, recorder) = store();
        let a = uri("A.kt");
        store.open(&a, "fun f() {}", 1);
        assert!(store.edit(&a, 2, &[patch(0, 4, 0, 5, "g")]));
        assert_eq!(store.content(&a).unwrap(), "fun g() {}");
        assert_eq!(store.version(&a), Some(2));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            Event::Put(a.to_string(), "fun g() {}".to_string(), false)
        );
    }

    #[test]
    fn test_stale_edit_is_dropped() {
        let (store, recorder) = store();
        let a = uri("A.kt");
        store.open(&a, "one", 1);
        assert!(store.edit(&a, 3, &[full("three")]));
        assert!(!store.edit(&a, 2, &[full("two")]));
        assert!(!store.edit(&a, 3, &[full("three again")]));
        assert_eq!(store.content(&a).unwrap(), "three");
        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_edit_unknown_file_is_ignored() {
        let (store, _) = store();
        assert!(!store.edit(&uri("Nope.kt"), 1, &[full("x")]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_multiline_and_utf16_patches() {
        let (store, _) = store();
        let a = uri("A.kt");
        store.open(&a, "val s = \"😀x\"\nfun f() {}\n", 1);
        // The emoji spans two UTF-16 code units
        assert!(store.edit(&a, 2, &[patch(0, 11, 0, 12, "y")]));
        assert_eq!(store.content(&a).unwrap(), "val s = \"😀y\"\nfun f() {}\n");
        assert!(store.edit(&a, 3, &[patch(0, 13, 1, 3, "\nval")]));
        assert_eq!(store.content(&a).unwrap(), "val s = \"😀y\"\nval f() {}\n");
    }

    #[test]
    fn test_changes_apply_in_order() {
        let (store, _) = store();
        let a = uri("A.kt");
        store.open(&a, "abc", 1);
        store.edit(&a, 2, &[patch(0, 0, 0, 1, "x"), patch(0, 3, 0, 3, "!")]);
        assert_eq!(store.content(&a).unwrap(), "xbc!");
    }

    #[test]
    fn test_out_of_range_patch_is_clamped() {
        let (store, _) = store();
        let a = uri("A.kt");
        store.open(&a, "ab\ncd", 1);
        store.edit(&a, 2, &[patch(0, 99, 0, 99, "X")]);
        assert_eq!(store.content(&a).unwrap(), "abX\ncd");
        store.edit(&a, 3, &[patch(7, 0, 9, 0, "!")]);
        assert_eq!(store.content(&a).unwrap(), "abX\ncd!");
    }

    #[test]
    fn test_crlf_is_normalized() {
        let (store, _) = store();
        let a = uri("A.kt");
        store.open(&a, "a\r\nb\r\n", 1);
        assert_eq!(store.content(&a).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_temporary_files() {
        let (store, recorder) = store();
        let a = uri("A.kt");
        let tmp = uri("Scratch.kt");
        store.open(&a, "", 1);
        store.put_temporary(&tmp, "1 + 1");
        assert_eq!(store.all(false), vec![a.clone()]);
        assert_eq!(store.all(true).len(), 2);

        store.close(&tmp);
        assert!(!store.contains(&tmp));
        assert_eq!(
            recorder.events.lock().unwrap().last(),
            Some(&Event::Remove(tmp.to_string()))
        );
    }

    #[test]
    fn test_close_reverts_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A.kt");
        std::fs::write(&path, "fun disk() {}").unwrap();
        let a = Url::from_file_path(&path).unwrap();

        let (store, _) = store();
        store.open(&a, "fun buffer() {}", 4);
        store.close(&a);
        assert!(!store.is_open(&a));
        assert_eq!(store.content(&a).unwrap(), "fun disk() {}");
        assert_eq!(store.version(&a), Some(UNVERSIONED));
    }

    #[test]
    fn test_close_forgets_file_gone_from_disk() {
        let (store, _) = store();
        let a = uri("Missing.kt");
        store.open(&a, "fun f() {}", 1);
        store.close(&a);
        assert!(!store.contains(&a));
    }

    #[test]
    fn test_disk_events_respect_open_buffers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A.kt");
        std::fs::write(&path, "fun disk() {}").unwrap();
        let a = Url::from_file_path(&path).unwrap();

        let (store, _) = store();
        store.open(&a, "fun buffer() {}", 1);
        store.changed_on_disk(&a);
        assert_eq!(store.content(&a).unwrap(), "fun buffer() {}");
        store.deleted_on_disk(&a);
        assert!(store.contains(&a));

        store.close(&a);
        std::fs::write(&path, "fun changed() {}").unwrap();
        store.changed_on_disk(&a);
        assert_eq!(store.content(&a).unwrap(), "fun changed() {}");
        store.deleted_on_disk(&a);
        assert!(!store.contains(&a));
    }

    #[test]
    fn test_disk_events_ignore_non_sources() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let (store, _) = store();
        store.created_on_disk(&Url::from_file_path(&path).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_all_and_remove_under_root() {
        let dir = TempDir::new().unwrap();
        let mut uris = Vec::new();
        for name in ["A.kt", "B.kt", "C.kt"] {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("fun {}() {{}}", name.to_lowercase())).unwrap();
            uris.push(Url::from_file_path(&path).unwrap());
        }
        let (store, _) = store();
        assert_eq!(store.load_all_from_disk(&uris), 3);
        assert_eq!(store.load_all_from_disk(&uris), 0);

        store.open(&uris[0], "fun open() {}", 1);
        let removed = store.remove_unopened_under(dir.path());
        assert_eq!(removed.len(), 2);
        assert_eq!(store.all(false), vec![uris[0].clone()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Only edits newer than everything applied so far change the content
        #[test]
        fn prop_stale_edits_never_apply(versions in prop::collection::vec(0i32..20, 1..30)) {
            let (store, _) = store();
            let a = uri("A.kt");
            store.open(&a, "v0", 0);

            let mut newest = 0;
            let mut expected = "v0".to_string();
            for v in versions {
                let text = format!("v{v}");
                let applied = store.edit(&a, v, &[full(&text)]);
                prop_assert_eq!(applied, v > newest);
                if v > newest {
                    newest = v;
                    expected = text;
                }
                prop_assert_eq!(store.content(&a).unwrap(), expected.clone());
            }
        }
    }
}

// Key-value persistence for bindings and playheads.
//
// The engine never decides where state lives; it hands JSON strings to a
// `StateStore` under fixed keys:
//
//   whip:bindings             the binding list (binding.rs serde shape)
//   whip:playheads:<vizId>    one visualization's playhead list
//
// `MemoryStore` keeps everything in a map (tests, embedding). `JsonFileStore`
// keeps the same map in one pretty-printed JSON object on disk and rewrites
// the whole file on every change; the state is small and changes rarely.

use crate::error::EngineResult;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const BINDINGS_KEY: &str = "whip:bindings";

pub fn playheads_key(visualization_id: &str) -> String {
    format!("whip:playheads:{visualization_id}")
}

pub trait StateStore {
    fn load(&self, key: &str) -> EngineResult<Option<String>>;
    fn save(&mut self, key: &str, value: &str) -> EngineResult<()>;
    fn remove(&mut self, key: &str) -> EngineResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> EngineResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// A `StateStore` backed by a single JSON object file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open `path`, reading existing entries. A missing file starts empty.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let entries = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            BTreeMap::new()
        };
        Ok(JsonFileStore {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> EngineResult<()> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "state written");
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> EngineResult<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_basics() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load(BINDINGS_KEY).unwrap(), None);
        store.save(BINDINGS_KEY, "[]").unwrap();
        assert_eq!(store.load(BINDINGS_KEY).unwrap().as_deref(), Some("[]"));
        store.remove(BINDINGS_KEY).unwrap();
        assert_eq!(store.keys().count(), 0);
    }

    #[test]
    fn playheads_key_format() {
        assert_eq!(playheads_key("chart"), "whip:playheads:chart");
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.save(&playheads_key("v"), r#"[{"id":"p"}]"#).unwrap();
            store.save(BINDINGS_KEY, "[]").unwrap();
        }
        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.load(BINDINGS_KEY).unwrap().as_deref(), Some("[]"));
        store.remove(BINDINGS_KEY).unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.load(BINDINGS_KEY).unwrap(), None);
        assert!(store.load(&playheads_key("v")).unwrap().is_some());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}

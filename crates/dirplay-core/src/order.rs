//! Persisted track order and its merge with freshly discovered paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Storage key of the persisted order. The value is a JSON array of paths.
pub const ORDER_KEY: &str = "audio-player-order-v1";

/// Client-local string key-value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()>;
}

/// Key-value pairs kept in one JSON object on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so readers see either the old or the new file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!("store {:?} is not a JSON object, ignoring it: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        let mut map = self.read_all();
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store. Counts writes so callers can check when persistence
/// actually happened.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let mut store = Self::default();
        store.entries.insert(key.to_string(), value.into());
        store
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }
}

/// Reads and writes the persisted order under [`ORDER_KEY`].
#[derive(Debug, Clone)]
pub struct OrderStore<S> {
    store: S,
}

impl<S: KeyValueStore> OrderStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Last saved order. Missing or malformed data reads as empty.
    pub fn load(&self) -> Vec<String> {
        let Some(raw) = self.store.get(ORDER_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(order) => order,
            Err(e) => {
                warn!("ignoring malformed persisted order: {}", e);
                Vec::new()
            }
        }
    }

    /// Overwrite the stored order.
    pub fn save(&mut self, order: &[String]) -> anyhow::Result<()> {
        let json = serde_json::to_string(order)?;
        self.store.set(ORDER_KEY, json)?;
        debug!("saved order of {} paths", order.len());
        Ok(())
    }
}

/// Combine a persisted order with the set of paths found by a crawl.
///
/// Persisted paths that were discovered again come first, in persisted
/// order. Stale entries are dropped. Newly discovered paths follow, sorted.
pub fn merge_order(discovered: &BTreeSet<String>, persisted: &[String]) -> Vec<String> {
    let mut emitted = HashSet::new();
    let mut merged: Vec<String> = persisted
        .iter()
        .filter(|p| discovered.contains(*p) && emitted.insert(p.as_str()))
        .cloned()
        .collect();

    // BTreeSet iterates in lexicographic order already.
    merged.extend(
        discovered
            .iter()
            .filter(|p| !emitted.contains(p.as_str()))
            .cloned(),
    );
    merged
}

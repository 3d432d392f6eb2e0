//! Durable configuration entries.
//!
//! A config entry is what a completed setup flow leaves behind: the backend
//! base URL and the printers chosen for it. Entries are kept in creation order
//! and written to `entries.json` in the state directory after every change.

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::integrations::ams::PrinterRecord;

/// File name of the entry store inside the state directory
pub const ENTRIES_FILE: &str = "entries.json";

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("Failed to access entry store {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to (de)serialize entry store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("An entry for {0} is already configured")]
    AlreadyConfigured(String),

    #[error("Unknown config entry: {0}")]
    NotFound(String),
}

/// Persisted data of one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub base_url: String,
    pub printers: Vec<PrinterRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub data: EntryData,
}

/// Printer ids persisted by `entries`, skipping the entry `exclude`
pub fn used_ids(entries: &[ConfigEntry], exclude: Option<&str>) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|e| Some(e.entry_id.as_str()) != exclude)
        .flat_map(|e| e.data.printers.iter().map(|p| p.id.clone()))
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entries: Vec<ConfigEntry>,
}

/// Config entries of one domain, optionally backed by a JSON file
#[derive(Debug)]
pub struct EntryStore {
    domain: String,
    path: Option<PathBuf>,
    entries: Vec<ConfigEntry>,
}

impl EntryStore {
    /// Open (or create) the store at `path`
    pub fn open(domain: &str, path: impl AsRef<Path>) -> Result<Self, EntryError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<StoreFile>(&contents)?.entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(EntryError::Io(path, e)),
        };
        debug!("Loaded {} config entries from {}", entries.len(), path.display());

        Ok(Self {
            domain: domain.to_string(),
            path: Some(path),
            entries,
        })
    }

    /// Store that is never written to disk
    pub fn in_memory(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            path: None,
            entries: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn find_by_base_url(&self, base_url: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.data.base_url == base_url)
    }

    /// Snapshot of the printer ids persisted by all entries except `exclude`.
    pub fn used_ids(&self, exclude: Option<&str>) -> BTreeSet<String> {
        used_ids(&self.entries, exclude)
    }

    /// Add a new entry. Entries are unique per base URL.
    pub fn add(&mut self, title: String, data: EntryData) -> Result<ConfigEntry, EntryError> {
        if self.find_by_base_url(&data.base_url).is_some() {
            return Err(EntryError::AlreadyConfigured(data.base_url));
        }

        let entry = ConfigEntry {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            domain: self.domain.clone(),
            title,
            data,
        };
        self.entries.push(entry.clone());
        self.save()?;
        Ok(entry)
    }

    /// Replace the data of an existing entry
    pub fn update_data(
        &mut self,
        entry_id: &str,
        data: EntryData,
    ) -> Result<ConfigEntry, EntryError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        entry.data = data;
        let updated = entry.clone();
        self.save()?;
        Ok(updated)
    }

    pub fn remove(&mut self, entry_id: &str) -> Result<ConfigEntry, EntryError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        let removed = self.entries.remove(idx);
        self.save()?;
        Ok(removed)
    }

    fn save(&self) -> Result<(), EntryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = StoreFile {
            entries: self.entries.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        // Write to a sibling file first so a crash never leaves a truncated store.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|e| EntryError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, path).map_err(|e| EntryError::Io(path.clone(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(base_url: &str, ids: &[&str]) -> EntryData {
        EntryData {
            base_url: base_url.to_string(),
            printers: ids.iter().map(|id| PrinterRecord::new(*id, *id)).collect(),
        }
    }

    #[test]
    fn test_add_rejects_duplicate_base_url() {
        let mut store = EntryStore::in_memory("ams_monitoring");
        store.add("a".to_string(), data("http://a", &["P1"])).unwrap();

        let err = store
            .add("again".to_string(), data("http://a", &["P2"]))
            .unwrap_err();
        assert!(matches!(err, EntryError::AlreadyConfigured(url) if url == "http://a"));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_used_ids_excludes_entry() {
        let mut store = EntryStore::in_memory("ams_monitoring");
        let a = store.add("a".to_string(), data("http://a", &["P1", "P2"])).unwrap();
        store.add("b".to_string(), data("http://b", &["P1_2"])).unwrap();

        let all: Vec<_> = store.used_ids(None).into_iter().collect();
        assert_eq!(all, vec!["P1", "P1_2", "P2"]);

        let others: Vec<_> = store.used_ids(Some(&a.entry_id)).into_iter().collect();
        assert_eq!(others, vec!["P1_2"]);
    }

    #[test]
    fn test_update_and_remove() {
        let mut store = EntryStore::in_memory("ams_monitoring");
        let a = store.add("a".to_string(), data("http://a", &["P1"])).unwrap();

        let updated = store.update_data(&a.entry_id, data("http://a", &["P3"])).unwrap();
        assert_eq!(updated.data.printers[0].id, "P3");

        store.remove(&a.entry_id).unwrap();
        assert!(store.entries().is_empty());
        assert!(matches!(
            store.remove(&a.entry_id),
            Err(EntryError::NotFound(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(ENTRIES_FILE);

        let entry = {
            let mut store = EntryStore::open("ams_monitoring", &path).unwrap();
            assert!(store.entries().is_empty());
            store
                .add("Bambu AMS Monitoring (http://a)".to_string(), data("http://a", &["P1"]))
                .unwrap()
        };

        let store = EntryStore::open("ams_monitoring", &path).unwrap();
        assert_eq!(store.entries(), &[entry]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(ENTRIES_FILE);
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            EntryStore::open("ams_monitoring", &path),
            Err(EntryError::Serialize(_))
        ));
    }
}

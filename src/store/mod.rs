// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Durable cycle-count storage
//!
//! Cycle counters are the only state that must survive a restart. They
//! live in one small JSON file mapping machine id to count, rewritten
//! in full on every completed cycle and at shutdown - no partial or
//! append updates, so a torn write can never leave a half-merged file.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Whole-file JSON store for per-machine cycle counters
#[derive(Debug, Clone)]
pub struct CycleStore {
    path: PathBuf,
}

impl CycleStore {
    /// Create a store backed by the given file path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Backing file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load saved counters.
    ///
    /// Fails soft: a missing file means a fresh deployment, and an
    /// unreadable or unparseable one is logged and treated the same
    /// way. Startup never aborts over this file.
    pub fn load(&self) -> HashMap<String, u64> {
        if !self.path.exists() {
            info!("No previous cycle counts found, starting fresh");
            return HashMap::new();
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Could not read cycle counts from {:?}: {}", self.path, e);
                return HashMap::new();
            }
        };

        match serde_json::from_str::<HashMap<String, u64>>(&content) {
            Ok(counts) => {
                info!("Loaded cycle counts: {:?}", counts);
                counts
            }
            Err(e) => {
                warn!("Could not parse cycle counts in {:?}: {}", self.path, e);
                HashMap::new()
            }
        }
    }

    /// Overwrite the file with the complete counter mapping
    pub fn persist(&self, counts: &HashMap<String, u64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(counts)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("writing cycle counts to {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = CycleStore::new(dir.path().join("machine_cycles.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = CycleStore::new(dir.path().join("machine_cycles.json"));

        let mut counts = HashMap::new();
        counts.insert("WM-01".to_string(), 17u64);
        counts.insert("WM-02".to_string(), 0u64);
        store.persist(&counts).unwrap();

        assert_eq!(store.load(), counts);
    }

    #[test]
    fn test_persist_overwrites_whole_file() {
        let dir = TempDir::new().unwrap();
        let store = CycleStore::new(dir.path().join("machine_cycles.json"));

        let mut first = HashMap::new();
        first.insert("WM-01".to_string(), 1u64);
        first.insert("WM-99".to_string(), 9u64);
        store.persist(&first).unwrap();

        // A later snapshot without WM-99 must not leave it behind
        let mut second = HashMap::new();
        second.insert("WM-01".to_string(), 2u64);
        store.persist(&second).unwrap();

        assert_eq!(store.load(), second);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machine_cycles.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = CycleStore::new(path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_persist_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let store = CycleStore::new(dir.path().join("nested/data/machine_cycles.json"));
        store.persist(&HashMap::new()).unwrap();
        assert!(store.path().exists());
    }
}

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::persist::{self, IndexPaths};
use crate::semantic::{FlatVectorIndex, VectorIndex};
use crate::store::TextIndex;
use anyhow::Context;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything that belongs to one index id.
#[derive(Clone)]
pub struct IndexHandle {
    pub text: Arc<TextIndex>,
    pub vectors: Arc<dyn VectorIndex>,
}

/// Process-scoped owner of every open index under a data directory.
pub struct IndexRegistry {
    data_dir: PathBuf,
    config: IndexConfig,
    indexes: RwLock<HashMap<String, IndexHandle>>,
}

/// Index ids double as file names: ASCII alphanumerics, `-` and `_` only.
pub fn validate_index_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Validation("index id must not be empty".into()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::Validation(format!(
            "index id {id:?} may only contain ASCII letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

impl IndexRegistry {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: IndexConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.fuzzy.cutoff) {
            return Err(Error::Validation(format!("fuzzy cutoff {} is outside [0, 1]", config.fuzzy.cutoff)));
        }
        Ok(Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            config,
            indexes: RwLock::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path { &self.data_dir }

    /// Open every index that has a snapshot in the data directory. Returns the
    /// number of indexes opened.
    pub fn open_existing(&self) -> Result<usize> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir.display()))?;
        let entries = fs::read_dir(&self.data_dir)
            .with_context(|| format!("reading data dir {}", self.data_dir.display()))?;
        let mut opened = 0;
        for entry in entries {
            let entry = entry.context("listing data dir")?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(persist::index_name_from_snapshot) else { continue };
            if validate_index_id(name).is_err() {
                tracing::warn!(file = ?file_name, "ignoring snapshot with an invalid index name");
                continue;
            }
            self.create(name)?;
            opened += 1;
        }
        tracing::info!(data_dir = %self.data_dir.display(), opened, "opened existing indexes");
        Ok(opened)
    }

    /// Open (or create) the index `id`. Idempotent.
    pub fn create(&self, id: &str) -> Result<IndexHandle> {
        validate_index_id(id)?;
        if let Some(handle) = self.indexes.read().get(id) {
            return Ok(handle.clone());
        }
        let mut indexes = self.indexes.write();
        let handle = indexes
            .entry(id.to_string())
            .or_insert_with(|| {
                let paths = IndexPaths::new(&self.data_dir, id);
                let vectors = FlatVectorIndex::open(paths.vectors());
                IndexHandle {
                    text: Arc::new(TextIndex::open(paths, self.config)),
                    vectors: Arc::new(vectors),
                }
            })
            .clone();
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Result<IndexHandle> {
        self.indexes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("index {id:?}")))
    }

    /// Forget the index and delete its files. Handles still held elsewhere
    /// can no longer write to disk.
    pub fn drop_index(&self, id: &str) -> Result<()> {
        let handle = self
            .indexes
            .write()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("index {id:?}")))?;
        handle.vectors.detach();
        handle.text.destroy()?;
        tracing::info!(index = id, "index dropped");
        Ok(())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.indexes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_path_like_ids() {
        assert!(validate_index_id("products_2024-v1").is_ok());
        assert!(matches!(validate_index_id("../etc"), Err(Error::Validation(_))));
        assert!(matches!(validate_index_id(""), Err(Error::Validation(_))));
    }

    #[test]
    fn unknown_index_is_not_found() {
        let dir = tempdir().unwrap();
        let reg = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
        assert!(matches!(reg.get("missing"), Err(Error::NotFound(_))));
        assert!(matches!(reg.drop_index("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn reopens_indexes_from_disk() {
        let dir = tempdir().unwrap();
        {
            let reg = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
            let handle = reg.create("fruit").unwrap();
            handle.text.add_document("1", "red apple").unwrap();
        }
        let reg = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
        assert_eq!(reg.open_existing().unwrap(), 1);
        assert_eq!(reg.ids(), vec!["fruit".to_string()]);
        assert_eq!(reg.get("fruit").unwrap().text.len(), 1);
    }

    #[test]
    fn drop_removes_files() {
        let dir = tempdir().unwrap();
        let reg = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
        let handle = reg.create("tmp").unwrap();
        handle.text.add_document("1", "x").unwrap();
        let snapshot = handle.text.paths().snapshot();
        assert!(snapshot.exists());
        reg.drop_index("tmp").unwrap();
        assert!(!snapshot.exists());
        assert!(reg.get("tmp").is_err());
    }

    #[tokio::test]
    async fn dropped_index_stays_dropped() {
        let dir = tempdir().unwrap();
        let reg = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
        let handle = reg.create("gone").unwrap();
        handle.text.add_document("1", "red apple").unwrap();
        handle.vectors.upsert("1", vec![1.0, 0.0]).await.unwrap();
        let paths = handle.text.paths().clone();
        let leftover = paths.snapshot().with_extension("tmp");
        fs::write(&leftover, b"half written").unwrap();

        reg.drop_index("gone").unwrap();
        assert!(!leftover.exists());

        // a request that fetched the handle before the drop finishes late
        assert!(matches!(handle.text.add_document("2", "green car"), Err(Error::NotFound(_))));
        assert!(matches!(handle.text.remove_document("1"), Err(Error::NotFound(_))));
        handle.vectors.upsert("2", vec![0.0, 1.0]).await.unwrap();
        assert!(handle.text.boolean_search("red").is_empty());
        for path in [paths.snapshot(), paths.cache(), paths.vectors()] {
            assert!(!path.exists(), "{} came back", path.display());
        }

        let reopened = IndexRegistry::new(dir.path(), IndexConfig::default()).unwrap();
        assert_eq!(reopened.open_existing().unwrap(), 0);
        let fresh = reopened.create("gone").unwrap();
        assert!(fresh.text.is_empty());
        assert!(fresh.vectors.is_empty());
    }
}

//! The catalog of live datasets.
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dataset::{Dataset, DatasetMetadata, validate_id};
use crate::errors::{DatasvcError, Result};
use crate::format;
use crate::storage::persist::DatasetStorage;
use crate::table::TabularTable;

/// Where the table for a new dataset comes from.
#[derive(Debug)]
pub enum DatasetSource {
    /// Raw file contents, decoded using the format named by the metadata's
    /// type.
    Upload { bytes: Bytes },
    /// An already built table, e.g. inline rows or a query result.
    Table(TabularTable),
}

/// Changes to a dataset's descriptive metadata. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Live datasets in insertion order.
    entries: IndexMap<String, Arc<Dataset>>,
    /// Ids of deleted datasets. These can't be reused.
    retired: HashSet<String>,
}

impl State {
    fn check_available(&self, id: &str) -> Result<()> {
        if self.entries.contains_key(id) || self.retired.contains(id) {
            return Err(DatasvcError::DuplicateId { id: id.to_string() });
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<&Arc<Dataset>> {
        self.entries
            .get(id)
            .ok_or_else(|| DatasvcError::NotFound { id: id.to_string() })
    }
}

/// Registry of datasets.
///
/// All mutations are serialized through a single lock, and a dataset is
/// persisted before it becomes visible. A failed create leaves neither a
/// registry entry nor a stored record.
#[derive(Debug)]
pub struct DatasetRegistry {
    storage: Arc<DatasetStorage>,
    state: Mutex<State>,
}

impl DatasetRegistry {
    /// Create an empty registry, ignoring anything already in storage.
    pub fn new(storage: Arc<DatasetStorage>) -> DatasetRegistry {
        DatasetRegistry {
            storage,
            state: Mutex::new(State::default()),
        }
    }

    /// Open a registry, restoring every persisted dataset.
    ///
    /// Tables are read lazily on first access.
    pub async fn open(storage: Arc<DatasetStorage>) -> Result<DatasetRegistry> {
        let headers = storage.list_persisted().await?;

        let mut state = State::default();
        for header in headers {
            let id = header.meta.id.clone();
            let dataset = Dataset::unloaded(header.meta, header.created_at, storage.clone());
            state.entries.insert(id, Arc::new(dataset));
        }
        info!(datasets = state.entries.len(), "opened dataset registry");

        Ok(DatasetRegistry {
            storage,
            state: Mutex::new(state),
        })
    }

    pub fn storage(&self) -> &Arc<DatasetStorage> {
        &self.storage
    }

    /// List metadata for all datasets in insertion order.
    pub async fn list(&self) -> Vec<DatasetMetadata> {
        let state = self.state.lock().await;
        state.entries.values().map(|d| d.metadata()).collect()
    }

    /// Create and persist a new dataset.
    pub async fn create(
        &self,
        meta: DatasetMetadata,
        source: DatasetSource,
    ) -> Result<Arc<Dataset>> {
        validate_id(&meta.id)?;
        // Fail fast before decoding. Checked again under the lock below.
        self.ensure_available(&meta.id).await?;

        let table = match source {
            DatasetSource::Upload { bytes } => format::decode(&meta.dataset_type, &bytes)?,
            DatasetSource::Table(table) => table,
        };

        let mut state = self.state.lock().await;
        state.check_available(&meta.id)?;

        let created_at = Utc::now();
        self.storage.persist(&meta, created_at, &table).await?;

        info!(
            id = %meta.id,
            dataset_type = %meta.dataset_type,
            columns = table.num_columns(),
            rows = table.num_rows(),
            "created dataset"
        );

        let id = meta.id.clone();
        let dataset = Arc::new(Dataset::loaded(
            meta,
            created_at,
            Arc::new(table),
            self.storage.clone(),
        ));
        state.entries.insert(id, dataset.clone());

        Ok(dataset)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Dataset>> {
        let state = self.state.lock().await;
        state.get(id).cloned()
    }

    /// Delete a dataset and its stored record.
    ///
    /// Queries still running against the dataset fail at their next check.
    /// The id can't be used again.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let dataset = state.get(id)?.clone();

        DatasetStorage::drop(&self.storage, id).await?;
        dataset.mark_gone().await;

        state.entries.shift_remove(id);
        state.retired.insert(id.to_string());
        info!(%id, "deleted dataset");

        Ok(())
    }

    /// Update a dataset's name or description.
    ///
    /// The updated record is persisted before the change is visible.
    pub async fn update_metadata(
        &self,
        id: &str,
        update: MetadataUpdate,
    ) -> Result<DatasetMetadata> {
        let state = self.state.lock().await;
        let dataset = state.get(id)?;

        let mut meta = dataset.metadata();
        if let Some(name) = update.name {
            meta.name = name;
        }
        if let Some(description) = update.description {
            meta.description = description;
        }

        self.storage
            .persist_metadata(&meta, dataset.created_at())
            .await?;
        dataset.set_metadata(meta.clone());
        debug!(%id, name = %meta.name, "updated dataset metadata");

        Ok(meta)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.entries.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check that an id isn't used by a live dataset and wasn't retired.
    pub async fn ensure_available(&self, id: &str) -> Result<()> {
        self.state.lock().await.check_available(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::Scalar;

    fn meta(id: &str, dataset_type: &str) -> DatasetMetadata {
        DatasetMetadata {
            id: id.to_string(),
            name: id.to_string(),
            dataset_type: dataset_type.to_string(),
            description: String::new(),
        }
    }

    fn registry() -> DatasetRegistry {
        DatasetRegistry::new(Arc::new(DatasetStorage::in_memory()))
    }

    fn upload(s: &str) -> DatasetSource {
        DatasetSource::Upload {
            bytes: Bytes::from(s.to_string()),
        }
    }

    #[tokio::test]
    async fn create_and_list_in_order() {
        let registry = registry();
        registry.create(meta("b", "csv"), upload("x\n1\n")).await.unwrap();
        registry.create(meta("a", "csv"), upload("x\n2\n")).await.unwrap();

        let ids: Vec<_> = registry.list().await.into_iter().map(|m| m.id).collect();
        assert_eq!(vec!["b", "a"], ids);
        assert_eq!(2, registry.len().await);
    }

    #[tokio::test]
    async fn duplicate_id() {
        let registry = registry();
        registry.create(meta("d1", "csv"), upload("x\n1\n")).await.unwrap();
        let err = registry
            .create(meta("d1", "csv"), upload("y\n2\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasvcError::DuplicateId { id } if id == "d1"));

        // Original untouched.
        let table = registry.get("d1").await.unwrap().table().await.unwrap();
        assert_eq!(&["x".to_string()], table.columns());
    }

    #[tokio::test]
    async fn failed_decode_leaves_nothing() {
        let registry = registry();
        let err = registry
            .create(meta("d1", "csv"), upload("a,b\n1\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasvcError::MalformedInput { .. }));

        let err = registry
            .create(meta("d2", "xlsx"), upload("a\n1\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasvcError::UnsupportedFormat { .. }));

        assert!(registry.is_empty().await);
        assert!(!registry.storage().exists("d1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_retires_id() {
        let registry = registry();
        let dataset = registry
            .create(meta("d1", "csv"), upload("x\n1\n"))
            .await
            .unwrap();

        registry.delete("d1").await.unwrap();
        assert!(dataset.is_gone());
        assert!(!registry.contains("d1").await);
        assert!(!registry.storage().exists("d1").await.unwrap());

        let err = registry.get("d1").await.unwrap_err();
        assert!(matches!(err, DatasvcError::NotFound { .. }));
        let err = registry.delete("d1").await.unwrap_err();
        assert!(matches!(err, DatasvcError::NotFound { .. }));

        let err = registry
            .create(meta("d1", "csv"), upload("x\n1\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasvcError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn update_metadata_persists() {
        let storage = Arc::new(DatasetStorage::in_memory());
        let registry = DatasetRegistry::new(storage.clone());
        let table = TabularTable::try_new(vec!["a".to_string()], vec![vec![Scalar::Int(1)]]).unwrap();
        registry
            .create(meta("d1", "inline"), DatasetSource::Table(table))
            .await
            .unwrap();

        let updated = registry
            .update_metadata(
                "d1",
                MetadataUpdate {
                    name: Some("Renamed".to_string()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!("Renamed", updated.name);
        assert_eq!("d1", updated.id);

        let persisted = storage.load("d1").await.unwrap();
        assert_eq!(updated, persisted.meta);
    }

    #[tokio::test]
    async fn open_restores_persisted() {
        let storage = Arc::new(DatasetStorage::in_memory());
        {
            let registry = DatasetRegistry::new(storage.clone());
            registry.create(meta("first", "csv"), upload("x\n1\n")).await.unwrap();
            registry.create(meta("second", "tsv"), upload("y\tz\n1\t2\n")).await.unwrap();
        }

        let registry = DatasetRegistry::open(storage).await.unwrap();
        let ids: Vec<_> = registry.list().await.into_iter().map(|m| m.id).collect();
        assert_eq!(vec!["first", "second"], ids);

        let table = registry.get("second").await.unwrap().table().await.unwrap();
        assert_eq!(&[vec![Scalar::Int(1), Scalar::Int(2)]], table.rows());
    }

    #[tokio::test]
    async fn invalid_id() {
        let err = registry()
            .create(meta("", "csv"), upload("x\n1\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasvcError::InvalidId { .. }));
    }
}

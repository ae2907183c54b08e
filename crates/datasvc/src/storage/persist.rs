use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{PersistedDataset, PersistedHeader, FORMAT_VERSION};
use crate::config::StorageConfig;
use crate::dataset::DatasetMetadata;
use crate::errors::{DatasvcError, Result};
use crate::table::TabularTable;

/// Persistent storage for datasets.
///
/// Each dataset is two JSON objects: its table and a small metadata record.
/// The table is written first and the metadata record last, so a dataset is
/// only visible once both are in place. Every object is written to a
/// temporary path owned by this process before being renamed into its
/// visible path, so a reader never sees a partially written object.
#[derive(Debug, Clone)]
pub struct DatasetStorage {
    process_id: Uuid,
    store: Arc<dyn ObjectStore>,
}

impl DatasetStorage {
    pub fn new(process_id: Uuid, store: Arc<dyn ObjectStore>) -> DatasetStorage {
        DatasetStorage { process_id, store }
    }

    /// Storage backed by memory only.
    pub fn in_memory() -> DatasetStorage {
        Self::new(Uuid::new_v4(), Arc::new(InMemory::new()))
    }

    /// Storage rooted at a directory on the local filesystem.
    ///
    /// The directory is created if it doesn't exist.
    pub fn local(data_dir: impl AsRef<Path>) -> Result<DatasetStorage> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|e| {
            DatasvcError::Internal(format!(
                "failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        let store = LocalFileSystem::new_with_prefix(data_dir)?;
        Ok(Self::new(Uuid::new_v4(), Arc::new(store)))
    }

    pub fn from_config(config: &StorageConfig) -> Result<DatasetStorage> {
        match config {
            StorageConfig::Memory => Ok(Self::in_memory()),
            StorageConfig::Local { data_dir } => Self::local(data_dir),
        }
    }

    /// Write a dataset, replacing any existing record for the id.
    pub async fn persist(
        &self,
        meta: &DatasetMetadata,
        created_at: DateTime<Utc>,
        table: &TabularTable,
    ) -> Result<()> {
        let bs = serde_json::to_vec(table)?;
        self.put_atomic(&meta.id, super::TABLE_OBJECT, &super::table_path(&meta.id), bs)
            .await?;

        if let Err(e) = self.persist_metadata(meta, created_at).await {
            if let Err(cleanup) = self.delete_if_exists(&super::table_path(&meta.id)).await {
                warn!(id = %meta.id, %cleanup, "failed to remove orphaned dataset table");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Write only the metadata record of a dataset whose table is already
    /// stored.
    pub async fn persist_metadata(
        &self,
        meta: &DatasetMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Record<'a> {
            format_version: u32,
            created_at: DateTime<Utc>,
            meta: &'a DatasetMetadata,
        }

        let bs = serde_json::to_vec(&Record {
            format_version: FORMAT_VERSION,
            created_at,
            meta,
        })?;
        self.put_atomic(&meta.id, super::META_OBJECT, &super::meta_path(&meta.id), bs)
            .await
    }

    /// Read a dataset's metadata and table.
    pub async fn load(&self, id: &str) -> Result<PersistedDataset> {
        let header = self.load_header(id).await?;
        let bs = match self.store.get(&super::table_path(id)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(DatasvcError::Internal(format!(
                    "dataset '{id}' has a metadata record but no table"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let table: TabularTable = serde_json::from_slice(&bs)?;

        Ok(PersistedDataset {
            format_version: header.format_version,
            created_at: header.created_at,
            meta: header.meta,
            table,
        })
    }

    /// Read only a dataset's metadata record.
    pub async fn load_header(&self, id: &str) -> Result<PersistedHeader> {
        match self.store.get(&super::meta_path(id)).await {
            Ok(result) => parse_header(&result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(DatasvcError::NotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a dataset. Removing a missing dataset is not an error.
    ///
    /// The metadata record goes first so a partially removed dataset is
    /// never visible.
    pub async fn drop(&self, id: &str) -> Result<()> {
        self.delete_if_exists(&super::meta_path(id)).await?;
        self.delete_if_exists(&super::table_path(id)).await
    }

    /// Check if a visible record exists for the id.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        match self.store.head(&super::meta_path(id)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List the metadata records of all visible datasets, ordered by creation
    /// time. Tables are not read.
    pub async fn list_persisted(&self) -> Result<Vec<PersistedHeader>> {
        let prefix = super::datasets_prefix();
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut headers = Vec::new();
        for object in objects {
            if !super::is_meta_object(&object.location) {
                continue;
            }
            let bs = self.store.get(&object.location).await?.bytes().await?;
            headers.push(parse_header(&bs)?);
        }

        headers.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.meta.id.cmp(&b.meta.id))
        });

        Ok(headers)
    }

    async fn put_atomic(
        &self,
        id: &str,
        object: &str,
        visible_path: &ObjectPath,
        bs: Vec<u8>,
    ) -> Result<()> {
        let tmp_path = super::tmp_path(id, object, &self.process_id);
        debug!(%id, %tmp_path, bytes = bs.len(), "writing dataset object");

        self.store
            .put(&tmp_path, PutPayload::from(Bytes::from(bs)))
            .await?;

        if let Err(e) = self.store.rename(&tmp_path, visible_path).await {
            if let Err(cleanup) = self.store.delete(&tmp_path).await {
                warn!(%id, %cleanup, "failed to remove temporary dataset object");
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete_if_exists(&self, path: &ObjectPath) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_header(bs: &[u8]) -> Result<PersistedHeader> {
    let header: PersistedHeader = serde_json::from_slice(bs)?;
    check_version(&header.meta.id, header.format_version)?;
    Ok(header)
}

fn check_version(id: &str, version: u32) -> Result<()> {
    if version != FORMAT_VERSION {
        return Err(DatasvcError::Internal(format!(
            "unsupported record version {version} for dataset '{id}', expected {FORMAT_VERSION}"
        )));
    }
    Ok(())
}

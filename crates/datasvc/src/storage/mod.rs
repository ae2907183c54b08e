//! Persistent dataset storage.
pub mod persist;

use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::DatasetMetadata;
use crate::table::TabularTable;

/// Version of the persisted record layout.
pub const FORMAT_VERSION: u32 = 1;

/// Prefix all visible dataset records live under.
const DATASETS_PREFIX: &str = "datasets";

/// Prefix for in-progress writes.
const TMP_PREFIX: &str = "tmp";

/// Object holding a dataset's metadata. Its presence makes the dataset
/// visible.
const META_OBJECT: &str = "meta.json";

/// Object holding a dataset's table.
const TABLE_OBJECT: &str = "table.json";

/// Get the visible path of a dataset's metadata record.
///
/// Path format: 'datasets/<id>/meta.json'
///
/// The id is percent-encoded as a single path segment, so ids containing
/// slashes or dots can't escape their directory.
pub fn meta_path(id: &str) -> ObjectPath {
    ObjectPath::from_iter([DATASETS_PREFIX, id, META_OBJECT])
}

/// Get the visible path of a dataset's table.
///
/// Path format: 'datasets/<id>/table.json'
pub fn table_path(id: &str) -> ObjectPath {
    ObjectPath::from_iter([DATASETS_PREFIX, id, TABLE_OBJECT])
}

/// Get a temporary path for writing one of a dataset's objects from this
/// process.
///
/// Path format: 'tmp/<process_id>/<id>/<object>'
///
/// Temporary objects live outside of the 'datasets/' prefix so a prefix scan
/// over visible records never sees them.
pub fn tmp_path(id: &str, object: &str, process_id: &Uuid) -> ObjectPath {
    let process_id = process_id.to_string();
    ObjectPath::from_iter([TMP_PREFIX, process_id.as_str(), id, object])
}

pub fn datasets_prefix() -> ObjectPath {
    ObjectPath::from(DATASETS_PREFIX)
}

pub(crate) fn is_meta_object(path: &ObjectPath) -> bool {
    path.filename() == Some(META_OBJECT)
}

/// Everything persisted for a single dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedDataset {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub meta: DatasetMetadata,
    pub table: TabularTable,
}

/// The metadata record of a dataset, stored apart from its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHeader {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub meta: DatasetMetadata,
}

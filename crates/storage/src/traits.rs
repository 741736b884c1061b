use chrono::{DateTime, Utc};

use devcat_core::{BaseRecord, DeviceId, EntryId, GroupId, NewOverride, OverrideEntry, Scope};

use crate::error::StorageError;

/// Predicates over the override log. Substring matches are case-insensitive;
/// `None` means "don't filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Matches editor id or editor name.
    pub editor: Option<String>,
    pub field: Option<String>,
    /// Matches the vendor of the targeted device's base record.
    pub vendor: Option<String>,
    pub scope: Option<Scope>,
    pub device_id: Option<DeviceId>,
    pub validated: Option<bool>,
    /// Inclusive lower bound on `changed_at`.
    pub changed_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `changed_at`.
    pub changed_before: Option<DateTime<Utc>>,
}

/// An override joined with display context from its device's base record.
/// Context is `None` when the device has left the catalog feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub entry: OverrideEntry,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub device_group_id: Option<GroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_devices: u64,
    pub vendors: u64,
    pub total_overrides: u64,
}

/// Read side of the canonical device dataset. `put_record` exists for the
/// catalog feed loader; the override engine never calls it.
pub trait BaseCatalog {
    fn put_record(&mut self, record: &BaseRecord) -> Result<(), StorageError>;

    fn get_record(&self, device_id: &DeviceId) -> Result<Option<BaseRecord>, StorageError>;

    /// Every record in the catalog, ordered by device id.
    fn list_records(&self) -> Result<Vec<BaseRecord>, StorageError>;

    fn list_records_by_group(&self, group_id: &GroupId) -> Result<Vec<BaseRecord>, StorageError>;

    fn catalog_stats(&self) -> Result<CatalogStats, StorageError>;
}

/// Append-only override log. Rows are never updated; `delete` removes a row
/// outright and is the only way an entry stops participating in resolution.
pub trait OverrideLog {
    /// Persist an entry and return it with its freshly assigned id.
    /// Ids are strictly increasing and never reused.
    fn append(&mut self, entry: &NewOverride) -> Result<OverrideEntry, StorageError>;

    fn get_entry(&self, id: EntryId) -> Result<Option<OverrideEntry>, StorageError>;

    /// Every entry that targeted `device_id`, whatever its scope.
    fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<OverrideEntry>, StorageError>;

    /// Group-scope entries recorded against `group_id`.
    fn list_by_group(&self, group_id: &GroupId) -> Result<Vec<OverrideEntry>, StorageError>;

    /// Entries matching `filter`, newest first. No size limit at this layer.
    fn list_all(&self, filter: &ChangeFilter) -> Result<Vec<ChangeRow>, StorageError>;

    /// Returns false when no entry has that id.
    fn delete(&mut self, id: EntryId) -> Result<bool, StorageError>;

    fn entry_count(&self) -> Result<u64, StorageError>;
}

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod resolve;

pub use audit::{DailyCount, Page};
pub use catalog::{CatalogFilter, GroupSummary};
pub use config::{AuditConfig, DatabaseConfig, EngineConfig, LoggingConfig};
pub use error::EngineError;
pub use resolve::{
    EffectiveRecord, GroupVariants, Mode, ResolveOptions, ResolvedField, ValueSource,
};

use std::collections::btree_map::{BTreeMap, Entry};

use tracing::{debug, info, warn};

use devcat_core::{
    coerce::coerce, BaseRecord, Clock, DeviceId, EntryId, FieldDescriptor, FieldRegistry,
    GroupId, NewOverride, OverrideEntry, Scope,
};
use devcat_storage::{
    BaseCatalog, CatalogStats, ChangeFilter, ChangeRow, OverrideLog, SqliteStorage, StorageError,
};

/// One editor's change to one field, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRequest {
    pub device_id: DeviceId,
    pub field_name: String,
    pub new_value: String,
    pub scope: Scope,
    pub is_validated: bool,
    pub editor_id: String,
    pub editor_name: String,
    pub note: Option<String>,
}

impl OverrideRequest {
    pub fn new(
        device_id: impl Into<DeviceId>,
        field_name: &str,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            field_name: field_name.to_string(),
            new_value: new_value.into(),
            scope: Scope::Device,
            is_validated: false,
            editor_id: String::new(),
            editor_name: String::new(),
            note: None,
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn validated(mut self, is_validated: bool) -> Self {
        self.is_validated = is_validated;
        self
    }

    pub fn editor(mut self, id: &str, name: &str) -> Self {
        self.editor_id = id.to_string();
        self.editor_name = name.to_string();
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

pub struct Engine {
    storage: SqliteStorage,
    registry: Box<dyn FieldRegistry>,
    clock: Box<dyn Clock>,
    audit: AuditConfig,
}

impl Engine {
    pub fn new(
        storage: SqliteStorage,
        registry: Box<dyn FieldRegistry>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            registry,
            clock,
            audit: AuditConfig::default(),
        }
    }

    /// Install logging with `config.logging.filter` unless a subscriber is
    /// already set, then open the store named by `config.database.path`.
    pub fn open(
        config: &EngineConfig,
        registry: Box<dyn FieldRegistry>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        if logging::init_logging(&config.logging.filter)? {
            debug!(filter = %config.logging.filter, "Installed log subscriber");
        }
        let storage = if config.is_in_memory() {
            SqliteStorage::open_in_memory()?
        } else {
            SqliteStorage::open(&config.database.path)?
        };
        info!(path = %config.database.path, "Opened catalog store");
        Ok(Self::new(storage, registry, clock).with_audit_config(config.audit.clone()))
    }

    pub fn with_audit_config(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn registry(&self) -> &dyn FieldRegistry {
        self.registry.as_ref()
    }

    pub fn field_descriptors(&self) -> Vec<FieldDescriptor> {
        self.registry.descriptors().into_iter().cloned().collect()
    }

    fn require_device(&self, device_id: &DeviceId) -> Result<BaseRecord, EngineError> {
        self.storage
            .get_record(device_id)?
            .ok_or_else(|| EngineError::DeviceNotFound(device_id.clone()))
    }

    /// Device-targeted and group-scope entries that may apply to `base`.
    fn load_candidates(
        &self,
        base: &BaseRecord,
    ) -> Result<(Vec<OverrideEntry>, Vec<OverrideEntry>), EngineError> {
        let device = self.storage.list_by_device(&base.device_id)?;
        let group = self.storage.list_by_group(&base.group_id)?;
        Ok((device, group))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Validate and append one override. The stored value is the canonical
    /// form of the coerced input; blank input is accepted as "no opinion".
    pub fn submit_override(
        &mut self,
        request: OverrideRequest,
    ) -> Result<OverrideEntry, EngineError> {
        let base = self.require_device(&request.device_id)?;
        let field = request.field_name.as_str();

        let descriptor = self
            .registry
            .check_editable(field)
            .map_err(|e| EngineError::from_submission(field, e))?;
        let typed = coerce(descriptor, &request.new_value)
            .map_err(|e| EngineError::from_submission(field, e))?;

        let (device_entries, group_entries) = self.load_candidates(&base)?;
        let previous = resolve::resolve_field(
            field,
            Some(descriptor),
            &base,
            &device_entries,
            &group_entries,
            &ResolveOptions::effective(),
        );

        let new = NewOverride {
            device_id: base.device_id.clone(),
            group_id: base.group_id.clone(),
            field_name: request.field_name.clone(),
            new_value: typed.to_canonical(),
            is_validated: request.is_validated,
            scope: request.scope,
            changed_at: self.clock.now(),
            editor_id: request.editor_id,
            editor_name: request.editor_name,
            note: request.note,
            previous_value: Some(previous.text),
        };
        let stored = self.storage.append(&new)?;

        info!(
            entry_id = %stored.id,
            device_id = %stored.device_id(),
            group_id = %stored.group_id(),
            field = stored.field_name(),
            scope = stored.scope().as_str(),
            validated = stored.is_validated(),
            "Override recorded"
        );
        Ok(stored)
    }

    /// Delete an override so resolution falls back to the next candidate.
    /// Nothing is written to record the revert itself. A row that fails its
    /// checksum is still deleted.
    pub fn revert_change(&mut self, entry_id: EntryId) -> Result<(), EngineError> {
        let entry = match self.storage.get_entry(entry_id) {
            Ok(entry) => entry,
            Err(StorageError::Corrupt { id }) => {
                warn!(entry_id = %id, "Reverting override row that failed its checksum");
                None
            }
            Err(e) => return Err(e.into()),
        };
        if !self.storage.delete(entry_id)? {
            return Err(EngineError::EntryNotFound(entry_id));
        }

        match entry {
            Some(entry) => info!(
                entry_id = %entry.id,
                device_id = %entry.device_id(),
                field = entry.field_name(),
                scope = entry.scope().as_str(),
                "Override reverted"
            ),
            None => info!(entry_id = %entry_id, "Override reverted"),
        }
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    pub fn resolve_field(
        &self,
        device_id: &DeviceId,
        field_name: &str,
        options: impl Into<ResolveOptions>,
    ) -> Result<ResolvedField, EngineError> {
        let base = self.require_device(device_id)?;
        let descriptor = self.registry.describe(field_name);
        if descriptor.is_none() && base.get(field_name).is_none() {
            return Err(EngineError::InvalidField {
                field: field_name.to_string(),
                reason: "unknown field".to_string(),
            });
        }
        let (device_entries, group_entries) = self.load_candidates(&base)?;
        Ok(resolve::resolve_field(
            field_name,
            descriptor,
            &base,
            &device_entries,
            &group_entries,
            &options.into(),
        ))
    }

    pub fn get_effective_record(
        &self,
        device_id: &DeviceId,
        options: impl Into<ResolveOptions>,
    ) -> Result<EffectiveRecord, EngineError> {
        let base = self.require_device(device_id)?;
        let (device_entries, group_entries) = self.load_candidates(&base)?;
        let options = options.into();
        let record = resolve::resolve_record(
            &base,
            self.registry.as_ref(),
            &device_entries,
            &group_entries,
            &options,
        );
        debug!(
            device_id = %device_id,
            mode = options.mode.as_str(),
            overridden = record.overridden_fields().count(),
            "Resolved effective record"
        );
        Ok(record)
    }

    /// Every device currently in `group_id`, resolved. An unknown or empty
    /// group yields no devices.
    pub fn get_group_variants(
        &self,
        group_id: &GroupId,
        options: impl Into<ResolveOptions>,
    ) -> Result<GroupVariants, EngineError> {
        let options = options.into();
        let records = self.storage.list_records_by_group(group_id)?;
        let group_entries = self.storage.list_by_group(group_id)?;

        let mut devices = Vec::with_capacity(records.len());
        for base in &records {
            let device_entries = self.storage.list_by_device(&base.device_id)?;
            devices.push(resolve::resolve_record(
                base,
                self.registry.as_ref(),
                &device_entries,
                &group_entries,
                &options,
            ));
        }
        debug!(group_id = %group_id, variants = devices.len(), "Resolved group variants");
        Ok(resolve::group_variants(group_id.clone(), devices))
    }

    /// Every device in the catalog, resolved. Group-scope entries are read
    /// once per group.
    fn resolve_catalog(
        &self,
        options: &ResolveOptions,
    ) -> Result<Vec<EffectiveRecord>, EngineError> {
        let mut group_entries: BTreeMap<GroupId, Vec<OverrideEntry>> = BTreeMap::new();
        let records = self.storage.list_records()?;
        let mut resolved = Vec::with_capacity(records.len());
        for base in &records {
            let group = match group_entries.entry(base.group_id.clone()) {
                Entry::Occupied(cached) => cached.into_mut(),
                Entry::Vacant(slot) => slot.insert(self.storage.list_by_group(&base.group_id)?),
            };
            let device = self.storage.list_by_device(&base.device_id)?;
            resolved.push(resolve::resolve_record(
                base,
                self.registry.as_ref(),
                &device,
                group,
                options,
            ));
        }
        Ok(resolved)
    }

    /// Resolved devices matching `filter`, ordered by effective vendor and model.
    pub fn list_catalog(
        &self,
        filter: &CatalogFilter,
        options: impl Into<ResolveOptions>,
    ) -> Result<Vec<EffectiveRecord>, EngineError> {
        let options = options.into();
        let records = catalog::filter_catalog(self.resolve_catalog(&options)?, filter);
        debug!(mode = options.mode.as_str(), devices = records.len(), "Listed catalog");
        Ok(records)
    }

    pub fn list_groups(
        &self,
        filter: &CatalogFilter,
        options: impl Into<ResolveOptions>,
    ) -> Result<Vec<GroupSummary>, EngineError> {
        let records = self.resolve_catalog(&options.into())?;
        Ok(catalog::summarize_groups(&records, filter))
    }

    // ========================================================================
    // Audit / history
    // ========================================================================

    /// Overrides that targeted this device, newest first.
    pub fn list_overrides_for_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<OverrideEntry>, EngineError> {
        self.require_device(device_id)?;
        let mut entries = self.storage.list_by_device(device_id)?;
        audit::sort_entries_newest_first(&mut entries);
        Ok(entries)
    }

    /// Filtered change listing, newest first, truncated to `limit` (the
    /// configured default when `None`, clamped to the configured maximum).
    pub fn list_all_changes(
        &self,
        filter: &ChangeFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeRow>, EngineError> {
        self.list_all_changes_page(filter, Page { offset: 0, limit })
    }

    pub fn list_all_changes_page(
        &self,
        filter: &ChangeFilter,
        page: Page,
    ) -> Result<Vec<ChangeRow>, EngineError> {
        let mut rows = self.storage.list_all(filter)?;
        audit::sort_newest_first(&mut rows);
        let limit = self.audit.effective_limit(page.limit);
        Ok(audit::paginate(rows, page.offset, limit))
    }

    /// Per-day change counts for the trailing window ending today (UTC).
    /// Windows wider than `audit.max_window_days` are rejected.
    pub fn changes_over_time(
        &self,
        device_id: &DeviceId,
        window_days: Option<u32>,
    ) -> Result<Vec<DailyCount>, EngineError> {
        self.require_device(device_id)?;
        let window_days = self.audit.window_days(window_days)?;
        let today = self.clock.now().date_naive();
        let entries = self.storage.list_by_device(device_id)?;
        Ok(audit::daily_counts(&entries, today, window_days))
    }

    pub fn catalog_stats(&self) -> Result<CatalogStats, EngineError> {
        Ok(self.storage.catalog_stats()?)
    }
}

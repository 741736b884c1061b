use chrono::{DateTime, Duration, TimeZone, Utc};

use devcat_core::{BaseRecord, DeviceId, FieldTable, ManualClock, OverrideEntry, Scope};
use devcat_engine::{Engine, EngineConfig, EngineError, OverrideRequest, ResolveOptions};
use devcat_storage::{BaseCatalog, SqliteStorage};

/// Fixed start time so day bucketing in tests is deterministic.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An engine over an in-memory store, the device catalog registry and a
/// manual clock that ticks one second per helper submission.
pub struct TestCatalog {
    pub engine: Engine,
    pub clock: ManualClock,
}

impl TestCatalog {
    pub fn new() -> Result<Self, EngineError> {
        let clock = ManualClock::new(epoch());
        let engine = Engine::new(
            SqliteStorage::open_in_memory()?,
            Box::new(FieldTable::device_catalog()),
            Box::new(clock.clone()),
        );
        Ok(Self { engine, clock })
    }

    pub fn with_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let clock = ManualClock::new(epoch());
        let engine = Engine::open(
            config,
            Box::new(FieldTable::device_catalog()),
            Box::new(clock.clone()),
        )?;
        Ok(Self { engine, clock })
    }

    /// Load a base record the way the catalog feed would.
    pub fn add_device(
        &mut self,
        device_id: &str,
        group_id: &str,
        fields: &[(&str, &str)],
    ) -> Result<DeviceId, Box<dyn std::error::Error>> {
        let mut record = BaseRecord::new(device_id, group_id);
        for (field, value) in fields {
            record = record.with(field, *value);
        }
        self.engine.storage_mut().put_record(&record)?;
        Ok(record.device_id)
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        self.clock.advance(by)
    }

    /// Tick the clock, then submit.
    pub fn submit(&mut self, request: OverrideRequest) -> Result<OverrideEntry, EngineError> {
        self.clock.advance(Duration::seconds(1));
        self.engine.submit_override(request)
    }

    /// Submit without moving the clock, for same-timestamp scenarios.
    pub fn submit_same_instant(
        &mut self,
        request: OverrideRequest,
    ) -> Result<OverrideEntry, EngineError> {
        self.engine.submit_override(request)
    }

    /// Unvalidated device-scope edit.
    pub fn set(
        &mut self,
        device_id: &str,
        field: &str,
        value: &str,
    ) -> Result<OverrideEntry, EngineError> {
        self.submit(OverrideRequest::new(device_id, field, value).editor("u-test", "Test Editor"))
    }

    pub fn set_validated(
        &mut self,
        device_id: &str,
        field: &str,
        value: &str,
    ) -> Result<OverrideEntry, EngineError> {
        self.submit(
            OverrideRequest::new(device_id, field, value)
                .validated(true)
                .editor("u-review", "Reviewer"),
        )
    }

    /// Group-scope edit submitted through `device_id`.
    pub fn set_group(
        &mut self,
        device_id: &str,
        field: &str,
        value: &str,
        validated: bool,
    ) -> Result<OverrideEntry, EngineError> {
        self.submit(
            OverrideRequest::new(device_id, field, value)
                .scope(Scope::Group)
                .validated(validated)
                .editor("u-test", "Test Editor"),
        )
    }

    pub fn effective(&self, device_id: &str, field: &str) -> Result<String, EngineError> {
        Ok(self
            .engine
            .resolve_field(&device_id.into(), field, ResolveOptions::effective())?
            .text)
    }

    pub fn validated(&self, device_id: &str, field: &str) -> Result<String, EngineError> {
        Ok(self
            .engine
            .resolve_field(&device_id.into(), field, ResolveOptions::validated())?
            .text)
    }
}

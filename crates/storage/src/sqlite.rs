use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use devcat_core::{
    clock::{from_millis, to_millis},
    BaseRecord, DeviceId, EntryId, GroupId, NewOverride, OverrideEntry, Scope,
};

use crate::error::StorageError;
use crate::traits::{BaseCatalog, CatalogStats, ChangeFilter, ChangeRow, OverrideLog};

const ENTRY_COLUMNS: &str = "o.id, o.device_id, o.group_id, o.field_name, o.new_value, o.is_validated, \
     o.scope, o.changed_at, o.editor_id, o.editor_name, o.note, o.previous_value, o.checksum";
const ENTRY_COLUMN_COUNT: usize = 13;

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<BaseRecord>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (device_id, group_id, attributes) = row?;
            result.push(decode_record(device_id, group_id, &attributes)?);
        }
        Ok(result)
    }

    fn query_raw(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RawEntry>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| RawEntry::from_row(row, 0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<OverrideEntry>, StorageError> {
        let mut result = Vec::new();
        for raw in self.query_raw(sql, params)? {
            if let Some(entry) = raw.into_listable()? {
                result.push(entry);
            }
        }
        Ok(result)
    }
}

/// Column values of one `override_log` row, before checksum verification.
struct RawEntry {
    id: i64,
    device_id: String,
    group_id: String,
    field_name: String,
    new_value: String,
    is_validated: bool,
    scope: String,
    changed_at: i64,
    editor_id: String,
    editor_name: String,
    note: Option<String>,
    previous_value: Option<String>,
    checksum: Vec<u8>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            device_id: row.get(offset + 1)?,
            group_id: row.get(offset + 2)?,
            field_name: row.get(offset + 3)?,
            new_value: row.get(offset + 4)?,
            is_validated: row.get(offset + 5)?,
            scope: row.get(offset + 6)?,
            changed_at: row.get(offset + 7)?,
            editor_id: row.get(offset + 8)?,
            editor_name: row.get(offset + 9)?,
            note: row.get(offset + 10)?,
            previous_value: row.get(offset + 11)?,
            checksum: row.get(offset + 12)?,
        })
    }

    fn into_entry(self) -> Result<OverrideEntry, StorageError> {
        let id = EntryId::from_i64(self.id);
        let entry = NewOverride {
            device_id: DeviceId::new(self.device_id),
            group_id: GroupId::new(self.group_id),
            field_name: self.field_name,
            new_value: self.new_value,
            is_validated: self.is_validated,
            scope: Scope::parse(&self.scope)?,
            changed_at: from_millis(self.changed_at)?,
            editor_id: self.editor_id,
            editor_name: self.editor_name,
            note: self.note,
            previous_value: self.previous_value,
        }
        .into_entry(id);
        if entry.checksum().as_slice() != self.checksum.as_slice() {
            return Err(StorageError::Corrupt { id });
        }
        Ok(entry)
    }

    /// Listing reads leave out rows that fail their checksum.
    fn into_listable(self) -> Result<Option<OverrideEntry>, StorageError> {
        match self.into_entry() {
            Ok(entry) => Ok(Some(entry)),
            Err(StorageError::Corrupt { id }) => {
                warn!(entry_id = %id, "Skipping override row that failed its checksum");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn encode_attributes(attributes: &BTreeMap<String, String>) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(attributes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_record(
    device_id: String,
    group_id: String,
    attributes: &[u8],
) -> Result<BaseRecord, StorageError> {
    let attributes: BTreeMap<String, String> = rmp_serde::from_slice(attributes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(BaseRecord {
        device_id: DeviceId::new(device_id),
        group_id: GroupId::new(group_id),
        attributes,
    })
}

/// Case-insensitive substring predicate on a nullable column.
fn contains(column: &str) -> String {
    format!("instr(lower(coalesce({column}, '')), lower(?)) > 0")
}

impl BaseCatalog for SqliteStorage {
    fn put_record(&mut self, record: &BaseRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO base_records (device_id, group_id, vendor, model, category, attributes) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id) DO UPDATE SET group_id = excluded.group_id, vendor = excluded.vendor,
                 model = excluded.model, category = excluded.category, attributes = excluded.attributes",
            rusqlite::params![
                record.device_id.as_str(),
                record.group_id.as_str(),
                record.vendor(),
                record.model(),
                record.category(),
                encode_attributes(&record.attributes)?,
            ],
        )?;
        Ok(())
    }

    fn get_record(&self, device_id: &DeviceId) -> Result<Option<BaseRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT device_id, group_id, attributes FROM base_records WHERE device_id = ?1",
                rusqlite::params![device_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((device_id, group_id, attributes)) => {
                Ok(Some(decode_record(device_id, group_id, &attributes)?))
            }
            None => Ok(None),
        }
    }

    fn list_records(&self) -> Result<Vec<BaseRecord>, StorageError> {
        self.query_records(
            "SELECT device_id, group_id, attributes FROM base_records ORDER BY device_id",
            [],
        )
    }

    fn list_records_by_group(&self, group_id: &GroupId) -> Result<Vec<BaseRecord>, StorageError> {
        self.query_records(
            "SELECT device_id, group_id, attributes FROM base_records WHERE group_id = ?1 \
             ORDER BY device_id",
            rusqlite::params![group_id.as_str()],
        )
    }

    fn catalog_stats(&self) -> Result<CatalogStats, StorageError> {
        let total_devices: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM base_records", [], |row| row.get(0))?;
        let vendors: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT vendor) FROM base_records WHERE vendor IS NOT NULL AND trim(vendor) <> ''",
            [],
            |row| row.get(0),
        )?;
        Ok(CatalogStats {
            total_devices: total_devices as u64,
            vendors: vendors as u64,
            total_overrides: self.entry_count()?,
        })
    }
}

impl OverrideLog for SqliteStorage {
    fn append(&mut self, entry: &NewOverride) -> Result<OverrideEntry, StorageError> {
        self.conn.execute(
            "INSERT INTO override_log (device_id, group_id, field_name, new_value, is_validated, scope, changed_at, editor_id, editor_name, note, previous_value, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                entry.device_id.as_str(),
                entry.group_id.as_str(),
                entry.field_name,
                entry.new_value,
                entry.is_validated,
                entry.scope.as_str(),
                to_millis(&entry.changed_at),
                entry.editor_id,
                entry.editor_name,
                entry.note,
                entry.previous_value,
                &entry.checksum()[..],
            ],
        )?;
        let id = EntryId::from_i64(self.conn.last_insert_rowid());
        Ok(entry.clone().into_entry(id))
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<OverrideEntry>, StorageError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM override_log o WHERE o.id = ?1");
        match self.query_raw(&sql, rusqlite::params![id.as_i64()])?.pop() {
            Some(raw) => Ok(Some(raw.into_entry()?)),
            None => Ok(None),
        }
    }

    fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<OverrideEntry>, StorageError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM override_log o WHERE o.device_id = ?1");
        self.query_entries(&sql, rusqlite::params![device_id.as_str()])
    }

    fn list_by_group(&self, group_id: &GroupId) -> Result<Vec<OverrideEntry>, StorageError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM override_log o WHERE o.group_id = ?1 AND o.scope = 'group'"
        );
        self.query_entries(&sql, rusqlite::params![group_id.as_str()])
    }

    fn list_all(&self, filter: &ChangeFilter) -> Result<Vec<ChangeRow>, StorageError> {
        let mut sql = format!(
            "SELECT {ENTRY_COLUMNS}, b.vendor, b.model, b.group_id
             FROM override_log o LEFT JOIN base_records b ON b.device_id = o.device_id
             WHERE 1=1"
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(editor) = &filter.editor {
            sql.push_str(&format!(
                " AND ({} OR {})",
                contains("o.editor_id"),
                contains("o.editor_name")
            ));
            params_vec.push(Box::new(editor.clone()));
            params_vec.push(Box::new(editor.clone()));
        }
        if let Some(field) = &filter.field {
            sql.push_str(&format!(" AND {}", contains("o.field_name")));
            params_vec.push(Box::new(field.clone()));
        }
        if let Some(vendor) = &filter.vendor {
            sql.push_str(&format!(" AND {}", contains("b.vendor")));
            params_vec.push(Box::new(vendor.clone()));
        }
        if let Some(scope) = filter.scope {
            sql.push_str(" AND o.scope = ?");
            params_vec.push(Box::new(scope.as_str()));
        }
        if let Some(device_id) = &filter.device_id {
            sql.push_str(" AND o.device_id = ?");
            params_vec.push(Box::new(device_id.as_str().to_string()));
        }
        if let Some(validated) = filter.validated {
            sql.push_str(" AND o.is_validated = ?");
            params_vec.push(Box::new(validated));
        }
        if let Some(from) = &filter.changed_from {
            sql.push_str(" AND o.changed_at >= ?");
            params_vec.push(Box::new(to_millis(from)));
        }
        if let Some(before) = &filter.changed_before {
            sql.push_str(" AND o.changed_at < ?");
            params_vec.push(Box::new(to_millis(before)));
        }
        sql.push_str(" ORDER BY o.changed_at DESC, o.id DESC");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), |row| {
            Ok((
                RawEntry::from_row(row, 0)?,
                row.get::<_, Option<String>>(ENTRY_COLUMN_COUNT)?,
                row.get::<_, Option<String>>(ENTRY_COLUMN_COUNT + 1)?,
                row.get::<_, Option<String>>(ENTRY_COLUMN_COUNT + 2)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (raw, vendor, model, device_group_id) = row?;
            let Some(entry) = raw.into_listable()? else {
                continue;
            };
            result.push(ChangeRow {
                entry,
                vendor,
                model,
                device_group_id: device_group_id.map(GroupId::new),
            });
        }
        Ok(result)
    }

    fn delete(&mut self, id: EntryId) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM override_log WHERE id = ?1",
            rusqlite::params![id.as_i64()],
        )?;
        Ok(removed > 0)
    }

    fn entry_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM override_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::to_millis;
use crate::error::CoreError;
use crate::ids::{DeviceId, EntryId, GroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Applies to `device_id` only.
    Device,
    /// Applies to every device sharing `group_id`, including later arrivals.
    Group,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "device" => Ok(Self::Device),
            "group" => Ok(Self::Group),
            _ => Err(CoreError::InvalidData(format!("unknown scope: {s}"))),
        }
    }
}

/// An override ready to be appended; the log assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOverride {
    pub device_id: DeviceId,
    pub group_id: GroupId,
    pub field_name: String,
    pub new_value: String,
    pub is_validated: bool,
    pub scope: Scope,
    pub changed_at: DateTime<Utc>,
    pub editor_id: String,
    pub editor_name: String,
    pub note: Option<String>,
    /// Effective value of the field just before this edit, for history display.
    pub previous_value: Option<String>,
}

impl NewOverride {
    pub fn checksum(&self) -> [u8; 32] {
        content_digest(self)
    }

    pub fn into_entry(self, id: EntryId) -> OverrideEntry {
        OverrideEntry { id, body: self }
    }
}

/// A stored override. Immutable; the only destructive operation is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub id: EntryId,
    #[serde(flatten)]
    pub body: NewOverride,
}

impl OverrideEntry {
    pub fn device_id(&self) -> &DeviceId {
        &self.body.device_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.body.group_id
    }

    pub fn field_name(&self) -> &str {
        &self.body.field_name
    }

    pub fn new_value(&self) -> &str {
        &self.body.new_value
    }

    pub fn is_validated(&self) -> bool {
        self.body.is_validated
    }

    pub fn scope(&self) -> Scope {
        self.body.scope
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.body.changed_at
    }

    /// True when the payload is blank after trimming: a "no opinion" entry.
    pub fn is_blank(&self) -> bool {
        self.body.new_value.trim().is_empty()
    }

    pub fn checksum(&self) -> [u8; 32] {
        content_digest(&self.body)
    }
}

/// blake3 over every persisted column except the id. Strings are
/// length-prefixed so adjacent fields cannot alias.
fn content_digest(body: &NewOverride) -> [u8; 32] {
    fn put_str(hasher: &mut blake3::Hasher, s: &str) {
        hasher.update(&(s.len() as u64).to_be_bytes());
        hasher.update(s.as_bytes());
    }
    fn put_opt(hasher: &mut blake3::Hasher, s: Option<&str>) {
        match s {
            Some(s) => {
                hasher.update(&[1]);
                put_str(hasher, s);
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }

    let mut hasher = blake3::Hasher::new();
    put_str(&mut hasher, body.device_id.as_str());
    put_str(&mut hasher, body.group_id.as_str());
    put_str(&mut hasher, &body.field_name);
    put_str(&mut hasher, &body.new_value);
    hasher.update(&[body.is_validated as u8]);
    put_str(&mut hasher, body.scope.as_str());
    hasher.update(&to_millis(&body.changed_at).to_be_bytes());
    put_str(&mut hasher, &body.editor_id);
    put_str(&mut hasher, &body.editor_name);
    put_opt(&mut hasher, body.note.as_deref());
    put_opt(&mut hasher, body.previous_value.as_deref());
    *hasher.finalize().as_bytes()
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, GroupId};

/// Canonical per-device attributes as delivered by the catalog feed.
/// Read-only to the override engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRecord {
    pub device_id: DeviceId,
    pub group_id: GroupId,
    pub attributes: BTreeMap<String, String>,
}

impl BaseRecord {
    pub fn new(device_id: impl Into<DeviceId>, group_id: impl Into<GroupId>) -> Self {
        Self {
            device_id: device_id.into(),
            group_id: group_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).map(String::as_str)
    }

    pub fn vendor(&self) -> Option<&str> {
        self.get("vendor")
    }

    pub fn model(&self) -> Option<&str> {
        self.get("model")
    }

    pub fn category(&self) -> Option<&str> {
        self.get("category")
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

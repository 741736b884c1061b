//! Override resolution.
//!
//! Everything here is a pure function of a base record and the override
//! entries that could apply to it. The engine loads those inputs fresh on
//! every read; nothing is cached.
//!
//! Per field, each scope bucket (device, group) picks one winner by rank.
//! The winners are then tried in precedence order, device before group,
//! and the first whose value is non-blank and coerces cleanly is used.
//! When neither qualifies the base record's value is returned.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use devcat_core::{
    coerce::coerce, BaseRecord, DeviceId, EntryId, FieldDescriptor, FieldRegistry, GroupId,
    OverrideEntry, Scope, TypedValue,
};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Every override participates; validated entries outrank unvalidated ones.
    #[default]
    Effective,
    /// Only validated overrides participate.
    EffectiveValidated,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Effective => "effective",
            Self::EffectiveValidated => "effective_validated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "effective" => Ok(Self::Effective),
            "effective_validated" => Ok(Self::EffectiveValidated),
            _ => Err(EngineError::Config(format!("unknown resolution mode: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveOptions {
    pub mode: Mode,
    /// When set, only entries with `changed_at <= as_of` are candidates.
    pub as_of: Option<DateTime<Utc>>,
}

impl ResolveOptions {
    pub fn effective() -> Self {
        Self {
            mode: Mode::Effective,
            as_of: None,
        }
    }

    pub fn validated() -> Self {
        Self {
            mode: Mode::EffectiveValidated,
            as_of: None,
        }
    }

    pub fn at(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    fn admits(&self, entry: &OverrideEntry) -> bool {
        if self.mode == Mode::EffectiveValidated && !entry.is_validated() {
            return false;
        }
        match self.as_of {
            Some(as_of) => entry.changed_at() <= as_of,
            None => true,
        }
    }

    /// Bucket ordering key; larger wins. In validated mode every candidate
    /// is validated, so the flag contributes nothing.
    fn rank(&self, entry: &OverrideEntry) -> (bool, DateTime<Utc>, EntryId) {
        let validated = match self.mode {
            Mode::Effective => entry.is_validated(),
            Mode::EffectiveValidated => false,
        };
        (validated, entry.changed_at(), entry.id)
    }
}

impl From<Mode> for ResolveOptions {
    fn from(mode: Mode) -> Self {
        Self { mode, as_of: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    DeviceOverride,
    GroupOverride,
    Base,
}

impl From<Scope> for ValueSource {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Device => Self::DeviceOverride,
            Scope::Group => Self::GroupOverride,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub field_name: String,
    pub value: TypedValue,
    /// Canonical text of `value`, or the raw base text when the base value
    /// does not coerce.
    pub text: String,
    pub source: ValueSource,
    /// The override that supplied the value; `None` for base values.
    pub entry_id: Option<EntryId>,
    /// Bucket winners passed over because their value failed coercion.
    pub skipped: Vec<EntryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveRecord {
    pub device_id: DeviceId,
    pub group_id: GroupId,
    pub fields: BTreeMap<String, ResolvedField>,
}

impl EffectiveRecord {
    pub fn get(&self, field: &str) -> Option<&ResolvedField> {
        self.fields.get(field)
    }

    /// Effective text of `field`, `""` when the field is absent.
    pub fn value(&self, field: &str) -> &str {
        self.fields.get(field).map_or("", |f| f.text.as_str())
    }

    pub fn source(&self, field: &str) -> Option<ValueSource> {
        self.fields.get(field).map(|f| f.source)
    }

    pub fn overridden_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.values().filter(|f| f.source != ValueSource::Base)
    }
}

/// All variants of one group, resolved side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupVariants {
    pub group_id: GroupId,
    /// Ordered by effective model, then device id.
    pub devices: Vec<EffectiveRecord>,
    /// Fields whose effective text is not the same on every variant.
    pub diff_fields: Vec<String>,
}

/// Highest-ranked admissible entry for `field` in one scope bucket.
fn bucket_winner<'a>(
    entries: &'a [OverrideEntry],
    scope: Scope,
    field: &str,
    options: &ResolveOptions,
) -> Option<&'a OverrideEntry> {
    entries
        .iter()
        .filter(|e| e.scope() == scope && e.field_name() == field && options.admits(e))
        .max_by_key(|e| options.rank(e))
}

fn coerce_text(
    descriptor: Option<&FieldDescriptor>,
    raw: &str,
) -> Result<TypedValue, devcat_core::CoreError> {
    match descriptor {
        Some(descriptor) => coerce(descriptor, raw),
        // Field no longer registered: keep the text as-is.
        None if raw.trim().is_empty() => Ok(TypedValue::Empty),
        None => Ok(TypedValue::Text(raw.trim().to_string())),
    }
}

/// Resolve one field. Never fails: the base record is the last resort and
/// a base value that does not coerce is returned as raw text.
pub fn resolve_field(
    field_name: &str,
    descriptor: Option<&FieldDescriptor>,
    base: &BaseRecord,
    device_entries: &[OverrideEntry],
    group_entries: &[OverrideEntry],
    options: &ResolveOptions,
) -> ResolvedField {
    let mut skipped = Vec::new();
    let protected = descriptor.is_some_and(|d| d.protected);

    if !protected {
        let candidates = [
            bucket_winner(device_entries, Scope::Device, field_name, options),
            bucket_winner(group_entries, Scope::Group, field_name, options),
        ];
        for entry in candidates.into_iter().flatten() {
            if entry.is_blank() {
                continue;
            }
            match coerce_text(descriptor, entry.new_value()) {
                Ok(value) if !value.is_empty() => {
                    return ResolvedField {
                        field_name: field_name.to_string(),
                        text: value.to_canonical(),
                        value,
                        source: entry.scope().into(),
                        entry_id: Some(entry.id),
                        skipped,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        device_id = %base.device_id,
                        field = field_name,
                        scope = entry.scope().as_str(),
                        error = %e,
                        "Skipping override that no longer coerces"
                    );
                    skipped.push(entry.id);
                }
            }
        }
    }

    let raw = base.get(field_name).unwrap_or_default();
    let (value, text) = match coerce_text(descriptor, raw) {
        Ok(value) => {
            let text = value.to_canonical();
            (value, text)
        }
        Err(e) => {
            warn!(
                device_id = %base.device_id,
                field = field_name,
                error = %e,
                "Base value does not coerce; returning it as text"
            );
            (TypedValue::Text(raw.to_string()), raw.to_string())
        }
    };
    ResolvedField {
        field_name: field_name.to_string(),
        value,
        text,
        source: ValueSource::Base,
        entry_id: None,
        skipped,
    }
}

/// Fields an effective record covers: everything the base record carries
/// plus every registered field, so overrides on fields the feed left out
/// are still visible.
pub fn record_fields(base: &BaseRecord, registry: &dyn FieldRegistry) -> BTreeSet<String> {
    base.field_names()
        .map(str::to_string)
        .chain(registry.descriptors().into_iter().map(|d| d.name.clone()))
        .collect()
}

pub fn resolve_record(
    base: &BaseRecord,
    registry: &dyn FieldRegistry,
    device_entries: &[OverrideEntry],
    group_entries: &[OverrideEntry],
    options: &ResolveOptions,
) -> EffectiveRecord {
    let fields = record_fields(base, registry)
        .into_iter()
        .map(|name| {
            let resolved = resolve_field(
                &name,
                registry.describe(&name),
                base,
                device_entries,
                group_entries,
                options,
            );
            (name, resolved)
        })
        .collect();
    EffectiveRecord {
        device_id: base.device_id.clone(),
        group_id: base.group_id.clone(),
        fields,
    }
}

/// Sort variants for display and work out which fields differ between them.
pub fn group_variants(group_id: GroupId, mut devices: Vec<EffectiveRecord>) -> GroupVariants {
    devices.sort_by(|a, b| {
        a.value("model")
            .cmp(b.value("model"))
            .then_with(|| a.device_id.cmp(&b.device_id))
    });

    let names: BTreeSet<&str> = devices
        .iter()
        .flat_map(|d| d.fields.keys().map(String::as_str))
        .collect();
    let diff_fields = names
        .into_iter()
        .filter(|name| {
            let mut values = devices.iter().map(|d| d.value(name));
            match values.next() {
                Some(first) => values.any(|v| v != first),
                None => false,
            }
        })
        .map(str::to_string)
        .collect();

    GroupVariants {
        group_id,
        devices,
        diff_fields,
    }
}

//! Catalog browsing over effective values.
//!
//! Filters and ordering look at resolved records, so an overridden vendor is
//! found under its new name and no longer under the base one.

use std::collections::BTreeMap;

use serde::Serialize;

use devcat_core::GroupId;

use crate::resolve::EffectiveRecord;

/// Fields a free-text search looks at, besides the device id.
const SEARCH_FIELDS: [&str; 5] = ["vendor", "model", "cps_vector", "category", "potential_cves"];

/// Case-insensitive browsing filter. `None` means "don't filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Substring over device id, vendor, model, CPS vector, category and CVEs.
    pub search: Option<String>,
    pub vendor: Option<String>,
    pub category: Option<String>,
}

/// Browsing summary of one product group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    /// Smallest non-blank effective vendor among the matching devices.
    pub vendor: String,
    pub model: String,
    pub variant_count: usize,
    /// Largest non-blank effective image URL, if any device has one.
    pub sample_image_url: Option<String>,
}

/// How the vendor and category filters compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeMatch {
    Equal,
    Substring,
}

impl AttributeMatch {
    fn test(self, value: &str, wanted: &str) -> bool {
        match self {
            Self::Equal => value.to_lowercase() == wanted.to_lowercase(),
            Self::Substring => value.to_lowercase().contains(&wanted.to_lowercase()),
        }
    }
}

impl CatalogFilter {
    fn matches(&self, record: &EffectiveRecord, attributes: AttributeMatch) -> bool {
        if let Some(search) = self.search.as_deref().map(str::to_lowercase) {
            let hit = record.device_id.as_str().to_lowercase().contains(&search)
                || SEARCH_FIELDS
                    .iter()
                    .any(|field| record.value(field).to_lowercase().contains(&search));
            if !hit {
                return false;
            }
        }
        if let Some(vendor) = &self.vendor {
            if !attributes.test(record.value("vendor"), vendor) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !attributes.test(record.value("category"), category) {
                return false;
            }
        }
        true
    }
}

/// Keep the records `filter` admits, ordered by vendor, model and device id.
/// Vendor and category must match exactly, ignoring case.
pub fn filter_catalog(
    records: Vec<EffectiveRecord>,
    filter: &CatalogFilter,
) -> Vec<EffectiveRecord> {
    let mut kept: Vec<EffectiveRecord> = records
        .into_iter()
        .filter(|record| filter.matches(record, AttributeMatch::Equal))
        .collect();
    kept.sort_by(|a, b| {
        (a.value("vendor"), a.value("model"), &a.device_id)
            .cmp(&(b.value("vendor"), b.value("model"), &b.device_id))
    });
    kept
}

/// One summary per group with at least one device `filter` admits, ordered
/// by vendor, model and group id. Vendor and category are substring matches.
pub fn summarize_groups(records: &[EffectiveRecord], filter: &CatalogFilter) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<&GroupId, GroupSummary> = BTreeMap::new();
    for record in records {
        if !filter.matches(record, AttributeMatch::Substring) {
            continue;
        }
        let summary = groups
            .entry(&record.group_id)
            .or_insert_with(|| GroupSummary {
                group_id: record.group_id.clone(),
                vendor: String::new(),
                model: String::new(),
                variant_count: 0,
                sample_image_url: None,
            });
        summary.variant_count += 1;
        keep_min(&mut summary.vendor, record.value("vendor"));
        keep_min(&mut summary.model, record.value("model"));

        let image = record.value("image_url");
        if !image.trim().is_empty() && summary.sample_image_url.as_deref() < Some(image) {
            summary.sample_image_url = Some(image.to_string());
        }
    }

    let mut summaries: Vec<GroupSummary> = groups.into_values().collect();
    summaries.sort_by(|a, b| {
        (&a.vendor, &a.model, &a.group_id).cmp(&(&b.vendor, &b.model, &b.group_id))
    });
    summaries
}

/// Blank values never win.
fn keep_min(current: &mut String, candidate: &str) {
    if candidate.trim().is_empty() {
        return;
    }
    if current.is_empty() || candidate < current.as_str() {
        *current = candidate.to_string();
    }
}

//! Change listings and per-day activity, derived from the override log.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use devcat_core::OverrideEntry;
use devcat_storage::ChangeRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: usize,
    /// `None` uses the configured default limit.
    pub limit: Option<usize>,
}

/// Newest first: `changed_at` descending, then id descending.
pub fn sort_newest_first(rows: &mut [ChangeRow]) {
    rows.sort_by(|a, b| {
        b.entry
            .changed_at()
            .cmp(&a.entry.changed_at())
            .then_with(|| b.entry.id.cmp(&a.entry.id))
    });
}

pub fn sort_entries_newest_first(entries: &mut [OverrideEntry]) {
    entries.sort_by(|a, b| {
        b.changed_at()
            .cmp(&a.changed_at())
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub fn paginate<T>(rows: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    rows.into_iter().skip(offset).take(limit).collect()
}

/// Dense per-day counts for the `window_days` days ending on `today`
/// (inclusive). Entries outside the window are ignored.
pub fn daily_counts(
    entries: &[OverrideEntry],
    today: NaiveDate,
    window_days: u32,
) -> Vec<DailyCount> {
    if window_days == 0 {
        return Vec::new();
    }
    let Some(start) = today.checked_sub_days(Days::new(u64::from(window_days - 1))) else {
        return Vec::new();
    };

    let mut series: Vec<DailyCount> = start
        .iter_days()
        .take(window_days as usize)
        .map(|date| DailyCount { date, count: 0 })
        .collect();

    for entry in entries {
        let day = entry.changed_at().date_naive();
        if day < start || day > today {
            continue;
        }
        let offset = (day - start).num_days() as usize;
        if let Some(bucket) = series.get_mut(offset) {
            bucket.count += 1;
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use devcat_core::{EntryId, NewOverride, Scope};

    fn entry_on(id: i64, day: u32, hour: u32) -> OverrideEntry {
        NewOverride {
            device_id: "d1".into(),
            group_id: "g1".into(),
            field_name: "vendor".into(),
            new_value: "x".into(),
            is_validated: false,
            scope: Scope::Device,
            changed_at: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            editor_id: "u1".into(),
            editor_name: "Editor".into(),
            note: None,
            previous_value: None,
        }
        .into_entry(EntryId::from_i64(id))
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn series_is_dense_and_ends_today() {
        let entries = [
            entry_on(1, 8, 9),
            entry_on(2, 8, 23),
            entry_on(3, 10, 0),
            entry_on(4, 2, 12),
        ];
        let series = daily_counts(&entries, date(10), 4);
        assert_eq!(
            series,
            vec![
                DailyCount { date: date(7), count: 0 },
                DailyCount { date: date(8), count: 2 },
                DailyCount { date: date(9), count: 0 },
                DailyCount { date: date(10), count: 1 },
            ]
        );
    }

    #[test]
    fn zero_window_is_empty() {
        assert!(daily_counts(&[entry_on(1, 10, 0)], date(10), 0).is_empty());
    }

    #[test]
    fn future_entries_are_not_counted() {
        let series = daily_counts(&[entry_on(1, 11, 0)], date(10), 1);
        assert_eq!(series, vec![DailyCount { date: date(10), count: 0 }]);
    }

    #[test]
    fn newest_first_breaks_ties_by_id() {
        let mut entries = vec![entry_on(1, 5, 0), entry_on(3, 5, 0), entry_on(2, 6, 0)];
        sort_entries_newest_first(&mut entries);
        let ids: Vec<i64> = entries.iter().map(|e| e.id.as_i64()).collect();
        assert_eq!(ids, [2, 3, 1]);
    }

    #[test]
    fn paginate_skips_then_takes() {
        assert_eq!(paginate((1..=10).collect(), 3, 4), vec![4, 5, 6, 7]);
        assert!(paginate(vec![1, 2], 5, 4).is_empty());
    }
}

//! Merged dam-level/turbidity history, gap detection, and manual backfill.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::parse::{hour_label, truncate_to_hour};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySlot {
    pub slot: NaiveDateTime,
    pub dam_level: Option<f64>,
    pub turbidity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub entries: Vec<HistorySlot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapDay {
    pub date: NaiveDate,
    pub entries: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapReport {
    pub total_missing_hours: usize,
    pub groups: Vec<GapDay>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntry {
    pub slot: String,
    #[serde(default)]
    pub dam_level: Option<f64>,
    #[serde(default)]
    pub turbidity: Option<f64>,
}

/// Both series merged per hour slot, grouped by calendar day, ascending.
pub async fn build_history(
    db: &Database,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<HistoryDay>> {
    let (range_start, range_end) = date_range_bounds(start, end);
    let merged = merged_slots(db, range_start, range_end).await?;

    let mut days: Vec<HistoryDay> = Vec::new();
    for (slot, (dam_level, turbidity)) in merged {
        let entry = HistorySlot {
            slot,
            dam_level,
            turbidity,
        };
        match days.last_mut() {
            Some(day) if day.date == slot.date() => day.entries.push(entry),
            _ => days.push(HistoryDay {
                date: slot.date(),
                entries: vec![entry],
            }),
        }
    }
    Ok(days)
}

/// Hours in `[scan_start, scan_end)` where both series are missing or zero.
///
/// A recorded zero is as suspect as no reading at all, so it counts as
/// missing. On whichever side no bound is given, the scan covers whole days:
/// midnight of the first slot's day through midnight after the last slot's
/// day, so empty leading and trailing hours of those days are reported too.
pub async fn find_gaps(
    db: &Database,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<GapReport> {
    let (range_start, range_end) = date_range_bounds(start, end);
    let merged = merged_slots(db, range_start, range_end).await?;

    let scan_start =
        range_start.or_else(|| merged.keys().next().map(|s| s.date().and_time(NaiveTime::MIN)));
    let scan_end = range_end.or_else(|| {
        merged
            .keys()
            .last()
            .and_then(|s| s.date().succ_opt())
            .map(|d| d.and_time(NaiveTime::MIN))
    });
    let (Some(scan_start), Some(scan_end)) = (scan_start, scan_end) else {
        return Ok(GapReport {
            total_missing_hours: 0,
            groups: Vec::new(),
        });
    };

    let mut total = 0;
    let mut groups: Vec<GapDay> = Vec::new();
    let mut cursor = truncate_to_hour(scan_start);
    while cursor < scan_end {
        let present = merged.get(&cursor).is_some_and(|(dam, turbidity)| {
            dam.is_some_and(|v| v != 0.0) || turbidity.is_some_and(|v| v != 0.0)
        });
        if !present {
            total += 1;
            match groups.last_mut() {
                Some(day) if day.date == cursor.date() => day.entries.push(cursor),
                _ => groups.push(GapDay {
                    date: cursor.date(),
                    entries: vec![cursor],
                }),
            }
        }
        cursor += Duration::hours(1);
    }

    Ok(GapReport {
        total_missing_hours: total,
        groups,
    })
}

/// Validates and writes operator-supplied backfill entries.
///
/// A malformed slot timestamp anywhere in the batch aborts the whole batch
/// before any write. Entries carrying neither value are skipped, not errors.
/// Returns the number of slots written.
pub async fn upsert_manual_entries(db: &Database, entries: &[ManualEntry]) -> Result<usize> {
    let mut validated = Vec::with_capacity(entries.len());
    for entry in entries {
        let slot = parse_entry_slot(&entry.slot)
            .with_context(|| format!("invalid slot timestamp {:?}", entry.slot))?;
        validated.push((truncate_to_hour(slot), entry.dam_level, entry.turbidity));
    }

    let mut saved = 0;
    for (slot, dam_level, turbidity) in validated {
        if dam_level.is_none() && turbidity.is_none() {
            continue;
        }
        let label = hour_label(slot);
        if let Some(value) = dam_level {
            db.upsert_dam(slot, &label, value).await?;
        }
        if let Some(value) = turbidity {
            db.upsert_turbidity(slot, &label, value).await?;
        }
        saved += 1;
    }
    Ok(saved)
}

const ENTRY_SLOT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn parse_entry_slot(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in ENTRY_SLOT_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    bail!("unrecognized timestamp format")
}

fn date_range_bounds(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let range_start = start.map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default());
    // The end date is inclusive for callers; the store range is half-open.
    let range_end = end
        .and_then(|d| d.succ_opt())
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default());
    (range_start, range_end)
}

type MergedSlots = BTreeMap<NaiveDateTime, (Option<f64>, Option<f64>)>;

async fn merged_slots(
    db: &Database,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> Result<MergedSlots> {
    let dam_rows = db.dam_in_range(start, end).await?;
    let turbidity_rows = db.turbidity_in_range(start, end).await?;

    let mut merged: MergedSlots = BTreeMap::new();
    for row in dam_rows {
        merged.entry(row.slot).or_default().0 = Some(row.dam_level);
    }
    for row in turbidity_rows {
        merged.entry(row.slot).or_default().1 = Some(row.turbidity);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn slot(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn test_db(dir: &TempDir) -> Database {
        Database::new(dir.path().join("damwatch.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn history_merges_both_series_per_slot() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        db.upsert_dam(slot(1, 9), "9:00 AM", 1.5).await.unwrap();
        db.upsert_turbidity(slot(1, 9), "9:00 AM", 3.2).await.unwrap();
        db.upsert_dam(slot(2, 10), "10:00 AM", 1.6).await.unwrap();

        let days = build_history(&db, None, None).await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, date(1));
        assert_eq!(days[0].entries[0].dam_level, Some(1.5));
        assert_eq!(days[0].entries[0].turbidity, Some(3.2));
        assert_eq!(days[1].entries[0].turbidity, None);
    }

    #[tokio::test]
    async fn zero_in_both_series_is_a_gap_but_one_real_value_is_not() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        // 9:00 has a zero dam level and no turbidity: a gap.
        db.upsert_dam(slot(1, 9), "9:00 AM", 0.0).await.unwrap();
        // 10:00 has a real turbidity value: not a gap.
        db.upsert_dam(slot(1, 10), "10:00 AM", 0.0).await.unwrap();
        db.upsert_turbidity(slot(1, 10), "10:00 AM", 2.5).await.unwrap();

        let report = find_gaps(&db, Some(date(1)), Some(date(1))).await.unwrap();

        let day = &report.groups[0];
        assert!(day.entries.contains(&slot(1, 9)));
        assert!(!day.entries.iter().any(|s| *s == slot(1, 10)));
    }

    #[tokio::test]
    async fn gap_scan_bounds_default_to_whole_days_of_the_data() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        db.upsert_dam(slot(1, 9), "9:00 AM", 1.5).await.unwrap();
        db.upsert_dam(slot(1, 12), "12:00 PM", 1.6).await.unwrap();

        // Data on one day only: the scan still covers all 24 hours of it.
        let report = find_gaps(&db, None, None).await.unwrap();
        assert_eq!(report.total_missing_hours, 22);
        let day = &report.groups[0];
        assert_eq!(day.entries.first(), Some(&slot(1, 0)));
        assert_eq!(day.entries.last(), Some(&slot(1, 23)));
        assert!(day.entries.contains(&slot(1, 10)));
        assert!(day.entries.contains(&slot(1, 11)));
        assert!(!day.entries.contains(&slot(1, 9)));
        assert!(!day.entries.contains(&slot(1, 12)));
    }

    #[tokio::test]
    async fn empty_store_without_bounds_reports_no_gaps() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        let report = find_gaps(&db, None, None).await.unwrap();
        assert_eq!(report.total_missing_hours, 0);
        assert!(report.groups.is_empty());
    }

    #[tokio::test]
    async fn manual_entries_truncate_and_count_saved_slots() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        let entries = vec![
            ManualEntry {
                slot: "2024-01-01T09:25:00".into(),
                dam_level: Some(1.5),
                turbidity: Some(3.1),
            },
            ManualEntry {
                slot: "2024-01-01 10:00".into(),
                dam_level: None,
                turbidity: Some(2.0),
            },
            // Neither value: skipped, not an error.
            ManualEntry {
                slot: "2024-01-01T11:00:00".into(),
                dam_level: None,
                turbidity: None,
            },
        ];

        let saved = upsert_manual_entries(&db, &entries).await.unwrap();
        assert_eq!(saved, 2);

        let rows = db.dam_in_range(None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slot, slot(1, 9));
        assert_eq!(rows[0].target_hour, "9:00 AM");
    }

    #[tokio::test]
    async fn malformed_slot_aborts_the_whole_batch() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        let entries = vec![
            ManualEntry {
                slot: "2024-01-01T09:00:00".into(),
                dam_level: Some(1.5),
                turbidity: None,
            },
            ManualEntry {
                slot: "not-a-timestamp".into(),
                dam_level: Some(1.6),
                turbidity: None,
            },
        ];

        let err = upsert_manual_entries(&db, &entries).await.unwrap_err();
        assert!(err.to_string().contains("not-a-timestamp"));
        assert!(db.dam_in_range(None, None).await.unwrap().is_empty());
    }
}

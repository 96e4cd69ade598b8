//! Snapshot store queries for the dam-level and turbidity series.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::error;
use rusqlite::{params, Connection};

use super::models::{format_slot, parse_slot, DamLevelSnapshot, TurbiditySnapshot};
use super::Database;

impl Database {
    /// Overwrites or inserts the dam-level reading for `slot`.
    pub async fn upsert_dam(
        &self,
        slot: NaiveDateTime,
        target_hour: &str,
        dam_level: f64,
    ) -> Result<()> {
        let target_hour = target_hour.to_string();
        self.execute(move |conn| upsert_dam_row(conn, slot, &target_hour, dam_level))
            .await
    }

    /// Overwrites or inserts the turbidity reading for `slot`.
    pub async fn upsert_turbidity(
        &self,
        slot: NaiveDateTime,
        target_hour: &str,
        turbidity: f64,
    ) -> Result<()> {
        let target_hour = target_hour.to_string();
        self.execute(move |conn| upsert_turbidity_row(conn, slot, &target_hour, turbidity))
            .await
    }

    /// Persists the freshly scraped dam level (when present) and returns the
    /// four most recent rows. A write failure is logged and swallowed so a
    /// broken store never fails the read path.
    pub async fn persist_and_recent_dam(
        &self,
        slot: NaiveDateTime,
        target_hour: &str,
        dam_level: Option<f64>,
    ) -> Result<Vec<DamLevelSnapshot>> {
        let target_hour = target_hour.to_string();
        self.execute(move |conn| {
            if let Some(value) = dam_level {
                if let Err(err) = upsert_dam_row(conn, slot, &target_hour, value) {
                    error!("failed to persist dam level snapshot: {err:#}");
                }
            }
            recent_dam_rows(conn, 4)
        })
        .await
    }

    pub async fn persist_and_recent_turbidity(
        &self,
        slot: NaiveDateTime,
        target_hour: &str,
        turbidity: Option<f64>,
    ) -> Result<Vec<TurbiditySnapshot>> {
        let target_hour = target_hour.to_string();
        self.execute(move |conn| {
            if let Some(value) = turbidity {
                if let Err(err) = upsert_turbidity_row(conn, slot, &target_hour, value) {
                    error!("failed to persist turbidity snapshot: {err:#}");
                }
            }
            recent_turbidity_rows(conn, 4)
        })
        .await
    }

    pub async fn recent_dam(&self, limit: usize) -> Result<Vec<DamLevelSnapshot>> {
        self.execute(move |conn| recent_dam_rows(conn, limit)).await
    }

    pub async fn recent_turbidity(&self, limit: usize) -> Result<Vec<TurbiditySnapshot>> {
        self.execute(move |conn| recent_turbidity_rows(conn, limit))
            .await
    }

    /// Dam snapshots within `[start, end)`, ascending by slot.
    pub async fn dam_in_range(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<DamLevelSnapshot>> {
        self.execute(move |conn| {
            let (clause, bounds) = range_clause(start, end);
            let sql = format!(
                "SELECT slot, target_hour, dam_level, created_at, updated_at
                 FROM dam_level_snapshots {clause} ORDER BY slot ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(bounds))?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(dam_from_row(row)?);
            }
            Ok(snapshots)
        })
        .await
    }

    pub async fn turbidity_in_range(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<TurbiditySnapshot>> {
        self.execute(move |conn| {
            let (clause, bounds) = range_clause(start, end);
            let sql = format!(
                "SELECT slot, target_hour, turbidity, created_at, updated_at
                 FROM turbidity_snapshots {clause} ORDER BY slot ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(bounds))?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(turbidity_from_row(row)?);
            }
            Ok(snapshots)
        })
        .await
    }

    /// Slot of the most recent turbidity reading strictly above `threshold`
    /// at or before `now`. Readings above the threshold mean the plant was
    /// actively dosing that hour.
    pub async fn last_active_treatment(
        &self,
        threshold: f64,
        now: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT slot FROM turbidity_snapshots
                 WHERE turbidity > ?1 AND slot <= ?2
                 ORDER BY slot DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![threshold, format_slot(now)])?;
            match rows.next()? {
                Some(row) => Ok(Some(parse_slot(&row.get::<_, String>(0)?)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Count of above-threshold turbidity hours within the calendar month
    /// containing `now`.
    pub async fn treatment_hours_in_month(
        &self,
        threshold: f64,
        now: NaiveDateTime,
    ) -> Result<i64> {
        let (month_start, next_month_start) = month_bounds(now);
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turbidity_snapshots
                 WHERE turbidity > ?1 AND slot >= ?2 AND slot < ?3",
                params![
                    threshold,
                    format_slot(month_start),
                    format_slot(next_month_start)
                ],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}

fn upsert_dam_row(
    conn: &Connection,
    slot: NaiveDateTime,
    target_hour: &str,
    dam_level: f64,
) -> Result<()> {
    let now = format_slot(Local::now().naive_local());
    conn.execute(
        "INSERT INTO dam_level_snapshots (slot, target_hour, dam_level, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(slot) DO UPDATE SET
             dam_level = excluded.dam_level,
             target_hour = excluded.target_hour,
             updated_at = excluded.updated_at",
        params![format_slot(slot), target_hour, dam_level, now],
    )
    .context("failed to upsert dam level snapshot")?;
    Ok(())
}

fn upsert_turbidity_row(
    conn: &Connection,
    slot: NaiveDateTime,
    target_hour: &str,
    turbidity: f64,
) -> Result<()> {
    let now = format_slot(Local::now().naive_local());
    conn.execute(
        "INSERT INTO turbidity_snapshots (slot, target_hour, turbidity, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(slot) DO UPDATE SET
             turbidity = excluded.turbidity,
             target_hour = excluded.target_hour,
             updated_at = excluded.updated_at",
        params![format_slot(slot), target_hour, turbidity, now],
    )
    .context("failed to upsert turbidity snapshot")?;
    Ok(())
}

fn recent_dam_rows(conn: &Connection, limit: usize) -> Result<Vec<DamLevelSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT slot, target_hour, dam_level, created_at, updated_at
         FROM dam_level_snapshots ORDER BY slot DESC LIMIT ?1",
    )?;
    let mut rows = stmt.query(params![limit as i64])?;
    let mut snapshots = Vec::new();
    while let Some(row) = rows.next()? {
        snapshots.push(dam_from_row(row)?);
    }
    Ok(snapshots)
}

fn recent_turbidity_rows(conn: &Connection, limit: usize) -> Result<Vec<TurbiditySnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT slot, target_hour, turbidity, created_at, updated_at
         FROM turbidity_snapshots ORDER BY slot DESC LIMIT ?1",
    )?;
    let mut rows = stmt.query(params![limit as i64])?;
    let mut snapshots = Vec::new();
    while let Some(row) = rows.next()? {
        snapshots.push(turbidity_from_row(row)?);
    }
    Ok(snapshots)
}

fn dam_from_row(row: &rusqlite::Row<'_>) -> Result<DamLevelSnapshot> {
    Ok(DamLevelSnapshot {
        slot: parse_slot(&row.get::<_, String>(0)?)?,
        target_hour: row.get(1)?,
        dam_level: row.get(2)?,
        created_at: parse_slot(&row.get::<_, String>(3)?)?,
        updated_at: parse_slot(&row.get::<_, String>(4)?)?,
    })
}

fn turbidity_from_row(row: &rusqlite::Row<'_>) -> Result<TurbiditySnapshot> {
    Ok(TurbiditySnapshot {
        slot: parse_slot(&row.get::<_, String>(0)?)?,
        target_hour: row.get(1)?,
        turbidity: row.get(2)?,
        created_at: parse_slot(&row.get::<_, String>(3)?)?,
        updated_at: parse_slot(&row.get::<_, String>(4)?)?,
    })
}

// The fixed slot format sorts lexicographically, so TEXT comparisons match
// chronological order.
fn range_clause(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut bounds = Vec::new();

    if let Some(start) = start {
        bounds.push(format_slot(start));
        conditions.push(format!("slot >= ?{}", bounds.len()));
    }
    if let Some(end) = end {
        bounds.push(format_slot(end));
        conditions.push(format!("slot < ?{}", bounds.len()));
    }

    if conditions.is_empty() {
        (String::new(), bounds)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), bounds)
    }
}

fn month_bounds(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let date = now.date();
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .map(|d| d.and_time(NaiveTime::MIN))
        .unwrap_or(now);
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
    .map(|d| d.and_time(NaiveTime::MIN))
    .unwrap_or(start);
    (start, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn slot(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn test_db(dir: &TempDir) -> Database {
        Database::new(dir.path().join("damwatch.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn upsert_same_slot_keeps_one_row_with_latest_value() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        db.upsert_dam(slot(1, 9), "9:00 AM", 1.52).await.unwrap();
        db.upsert_dam(slot(1, 9), "9:00 AM", 1.61).await.unwrap();

        let rows = db.recent_dam(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dam_level, 1.61);
    }

    #[tokio::test]
    async fn persist_and_recent_skips_write_when_value_absent() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        db.upsert_dam(slot(1, 8), "8:00 AM", 1.40).await.unwrap();
        let rows = db
            .persist_and_recent_dam(slot(1, 9), "9:00 AM", None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slot, slot(1, 8));
    }

    #[tokio::test]
    async fn recent_rows_are_ordered_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        for hour in [7, 9, 8] {
            db.upsert_turbidity(slot(1, hour), "label", hour as f64)
                .await
                .unwrap();
        }

        let rows = db.recent_turbidity(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].slot, slot(1, 9));
        assert_eq!(rows[1].slot, slot(1, 8));
    }

    #[tokio::test]
    async fn treatment_metrics_respect_threshold_and_month() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        db.upsert_turbidity(slot(2, 9), "9:00 AM", 7.5).await.unwrap();
        db.upsert_turbidity(slot(2, 10), "10:00 AM", 4.0).await.unwrap();
        db.upsert_turbidity(slot(3, 11), "11:00 AM", 6.1).await.unwrap();
        // Previous month, above threshold; must not count.
        let december = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        db.upsert_turbidity(december, "11:00 PM", 9.0).await.unwrap();

        let now = slot(15, 12);
        let last = db.last_active_treatment(5.0, now).await.unwrap();
        assert_eq!(last, Some(slot(3, 11)));

        let hours = db.treatment_hours_in_month(5.0, now).await.unwrap();
        assert_eq!(hours, 2);
    }

    #[tokio::test]
    async fn range_queries_are_half_open() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir);

        for day in 1..=3 {
            db.upsert_dam(slot(day, 9), "9:00 AM", day as f64).await.unwrap();
        }

        let rows = db
            .dam_in_range(Some(slot(1, 9)), Some(slot(3, 9)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].slot, slot(1, 9));
        assert_eq!(rows[1].slot, slot(2, 9));
    }
}

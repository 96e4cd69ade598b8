//! Live scrape pipeline: log in, discover the target hour's column, read the
//! tracked rows, reconcile against the snapshot store, return one reading.

use std::{collections::HashMap, sync::Arc};

use chrono::{Local, NaiveDateTime};
use log::{debug, error, warn};

use super::{reading::treatment_metrics, Reading, ScrapeError};
use crate::{
    cache::{previous_from_last_displayed, DamCache},
    config::Config,
    db::Database,
    parse::{normalize_hour_label, parse_numeric, target_hour_label, target_slot},
    portal::{locators, PortalConnector, PortalSession},
};

pub struct LiveScraper {
    config: Config,
    db: Database,
    cache: DamCache,
    connector: Arc<dyn PortalConnector>,
}

impl LiveScraper {
    pub fn new(
        config: Config,
        db: Database,
        cache: DamCache,
        connector: Arc<dyn PortalConnector>,
    ) -> Self {
        Self {
            config,
            db,
            cache,
            connector,
        }
    }

    /// Sole entry point: one browser session, one point-in-time reading.
    pub async fn fetch_live_reading(&self) -> Result<Reading, ScrapeError> {
        self.fetch_live_reading_at(Local::now().naive_local()).await
    }

    pub async fn fetch_live_reading_at(&self, now: NaiveDateTime) -> Result<Reading, ScrapeError> {
        if !self.config.has_credentials() {
            return Err(ScrapeError::MissingCredentials);
        }

        let target_hour = target_hour_label(now, self.config.delay_minutes);
        let mut session = self.connector.open().await?;
        let result = self.scrape(session.as_mut(), &target_hour, now).await;

        // The session closes no matter how the scrape went.
        if let Err(err) = session.close().await {
            warn!("failed to close scrape session: {err}");
        }

        result
    }

    async fn scrape(
        &self,
        session: &mut dyn PortalSession,
        target_hour: &str,
        now: NaiveDateTime,
    ) -> Result<Reading, ScrapeError> {
        session
            .login(&self.config.username, &self.config.password)
            .await?;

        let cache_payload = self.cache.load();

        let header_texts = session.header_texts().await?;
        let mut header_map = HashMap::new();
        for (offset, text) in header_texts.iter().enumerate() {
            let normalized = normalize_hour_label(text);
            if !normalized.is_empty() {
                header_map.insert(normalized, locators::FIRST_DATA_COLUMN + offset);
            }
        }

        // Expected to be absent near shift boundaries; surfaced, not retried.
        let target_column = header_map
            .get(target_hour)
            .copied()
            .ok_or_else(|| ScrapeError::TargetHourUnavailable(target_hour.to_string()))?;

        let current_dam = numeric_cell(session, locators::DAM_LEVEL_ROW, target_column).await?;
        let mut previous_dam = scan_left(session, locators::DAM_LEVEL_ROW, target_column).await?;
        let mut dam_1_prior =
            numeric_cell_prior(session, locators::DAM_LEVEL_ROW, target_column, 1).await?;
        let mut dam_2_prior =
            numeric_cell_prior(session, locators::DAM_LEVEL_ROW, target_column, 2).await?;
        let mut dam_3_prior =
            numeric_cell_prior(session, locators::DAM_LEVEL_ROW, target_column, 3).await?;

        let turbidity = numeric_cell(session, locators::TURBIDITY_ROW, target_column).await?;
        let mut previous_turbidity =
            scan_left(session, locators::TURBIDITY_ROW, target_column).await?;
        let mut turbidity_1_prior =
            numeric_cell_prior(session, locators::TURBIDITY_ROW, target_column, 1).await?;
        let mut turbidity_2_prior =
            numeric_cell_prior(session, locators::TURBIDITY_ROW, target_column, 2).await?;
        let mut turbidity_3_prior =
            numeric_cell_prior(session, locators::TURBIDITY_ROW, target_column, 3).await?;

        let old_res_status = session
            .row_cell_text(locators::RESERVOIR_STATUS_ROW, target_column)
            .await?
            .filter(|text| !text.is_empty());

        let old_res_big_tank_level =
            first_alternate(session, locators::BIG_TANK_ROW_ALTERNATES, target_column).await?;

        let mut tank_a_level = tank_numeric(session, "Phase 1", "A", target_column).await?;
        if tank_a_level.is_none() {
            tank_a_level =
                first_alternate(session, locators::TANK_A_ROW_ALTERNATES, target_column).await?;
        }

        let mut tank_b_level = tank_numeric(session, "Phase 1", "B", target_column).await?;
        if tank_b_level.is_none() {
            tank_b_level =
                first_alternate(session, locators::TANK_B_ROW_ALTERNATES, target_column).await?;
        }

        // Tanks C and D report as one averaged figure.
        let tank_c = tank_numeric(session, "Phase 2", "C", target_column).await?;
        let tank_d = tank_numeric(session, "Phase 2", "D", target_column).await?;
        let mut tank_cd_level = match (tank_c, tank_d) {
            (Some(c), Some(d)) => Some((c + d) / 2.0),
            (Some(c), None) => Some(c),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        };
        if tank_cd_level.is_none() {
            tank_cd_level =
                first_alternate(session, locators::TANK_CD_ROW_ALTERNATES, target_column).await?;
        }

        let current_operator = session
            .row_cell_text(locators::OPERATOR_ROW, target_column)
            .await?
            .filter(|text| !text.is_empty());

        // Persist the target slot and reconcile the prior-hour fields from
        // history. When a fresh value was just written it sits at index 0,
        // so the history read starts one row further down.
        let slot = target_slot(now, self.config.delay_minutes);

        let recent_dam = match self
            .db
            .persist_and_recent_dam(slot, target_hour, current_dam)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                error!("dam snapshot history unavailable: {err:#}");
                Vec::new()
            }
        };
        let dam_offset = usize::from(current_dam.is_some());
        if let Some(row) = recent_dam.get(dam_offset) {
            if previous_dam.is_some() && previous_dam != Some(row.dam_level) {
                debug!(
                    "snapshot history overrides page-scanned previous dam level ({previous_dam:?} -> {})",
                    row.dam_level
                );
            }
            previous_dam = Some(row.dam_level);
            dam_1_prior = Some(row.dam_level);
        }
        if let Some(row) = recent_dam.get(dam_offset + 1) {
            dam_2_prior = Some(row.dam_level);
        }
        if let Some(row) = recent_dam.get(dam_offset + 2) {
            dam_3_prior = Some(row.dam_level);
        }

        let recent_turbidity = match self
            .db
            .persist_and_recent_turbidity(slot, target_hour, turbidity)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                error!("turbidity snapshot history unavailable: {err:#}");
                Vec::new()
            }
        };
        let turbidity_offset = usize::from(turbidity.is_some());
        if let Some(row) = recent_turbidity.get(turbidity_offset) {
            if previous_turbidity.is_some() && previous_turbidity != Some(row.turbidity) {
                debug!(
                    "snapshot history overrides page-scanned previous turbidity ({previous_turbidity:?} -> {})",
                    row.turbidity
                );
            }
            previous_turbidity = Some(row.turbidity);
            turbidity_1_prior = Some(row.turbidity);
        }
        if let Some(row) = recent_turbidity.get(turbidity_offset + 1) {
            turbidity_2_prior = Some(row.turbidity);
        }
        if let Some(row) = recent_turbidity.get(turbidity_offset + 2) {
            turbidity_3_prior = Some(row.turbidity);
        }

        if let Some(value) = current_dam {
            self.cache.record_last_displayed(value, target_hour, now);
        }
        if previous_dam.is_none() {
            previous_dam = previous_from_last_displayed(&cache_payload, target_hour, now);
        }

        let (last_active_dosing, total_treatment_hours_month) =
            treatment_metrics(&self.db, &self.cache, now).await;

        Ok(Reading {
            target_hour: Some(target_hour.to_string()),
            target_column: Some(target_column),
            turbidity,
            previous_turbidity,
            turbidity_1_hour_prior: turbidity_1_prior,
            turbidity_2_hours_prior: turbidity_2_prior,
            turbidity_3_hours_prior: turbidity_3_prior,
            current_dam_level: current_dam,
            previous_dam_level: previous_dam,
            dam_level_1_hour_prior: dam_1_prior,
            dam_level_2_hours_prior: dam_2_prior,
            dam_level_3_hours_prior: dam_3_prior,
            old_res_status,
            old_res_big_tank_level,
            tank_a_level,
            tank_b_level,
            tank_cd_level,
            current_operator,
            last_active_dosing,
            total_treatment_hours_month,
            last_chlorine_tank_change: self.cache.last_chlorine_tank_change(),
            fetched_at: now,
            scrape_error: None,
        })
    }
}

async fn numeric_cell(
    session: &mut dyn PortalSession,
    row_label: &str,
    column: usize,
) -> Result<Option<f64>, ScrapeError> {
    let text = session.row_cell_text(row_label, column).await?;
    Ok(text.as_deref().and_then(parse_numeric))
}

/// The cell `hours_back` columns left of the target, bounded at the first
/// data column.
async fn numeric_cell_prior(
    session: &mut dyn PortalSession,
    row_label: &str,
    target_column: usize,
    hours_back: usize,
) -> Result<Option<f64>, ScrapeError> {
    let Some(column) = target_column.checked_sub(hours_back) else {
        return Ok(None);
    };
    if column < locators::FIRST_DATA_COLUMN {
        return Ok(None);
    }
    numeric_cell(session, row_label, column).await
}

/// Scans leftward from the target column until a parseable value turns up;
/// tolerates hours whose cells were left blank.
async fn scan_left(
    session: &mut dyn PortalSession,
    row_label: &str,
    target_column: usize,
) -> Result<Option<f64>, ScrapeError> {
    for column in (locators::FIRST_DATA_COLUMN..target_column).rev() {
        if let Some(value) = numeric_cell(session, row_label, column).await? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

async fn tank_numeric(
    session: &mut dyn PortalSession,
    phase_label: &str,
    tank_label: &str,
    column: usize,
) -> Result<Option<f64>, ScrapeError> {
    let text = session.tank_cell_text(phase_label, tank_label, column).await?;
    Ok(text.as_deref().and_then(parse_numeric))
}

/// Tries historically-seen row label spellings in order until one parses.
async fn first_alternate(
    session: &mut dyn PortalSession,
    row_labels: &[&str],
    column: usize,
) -> Result<Option<f64>, ScrapeError> {
    for row_label in row_labels {
        if let Some(value) = numeric_cell(session, row_label, column).await? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{PortalConnector, PortalError};
    use crate::scraper::fallback_reading;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct FakeTable {
        headers: Vec<String>,
        // row label -> column -> cell text
        cells: HashMap<String, HashMap<usize, String>>,
    }

    impl FakeTable {
        fn with_headers(headers: &[&str]) -> Self {
            Self {
                headers: headers.iter().map(|h| h.to_string()).collect(),
                cells: HashMap::new(),
            }
        }

        fn set(&mut self, row_label: &str, column: usize, text: &str) -> &mut Self {
            self.cells
                .entry(row_label.to_string())
                .or_default()
                .insert(column, text.to_string());
            self
        }
    }

    struct FakeSession {
        table: FakeTable,
    }

    #[async_trait]
    impl PortalSession for FakeSession {
        async fn login(&mut self, _username: &str, _password: &str) -> Result<(), PortalError> {
            Ok(())
        }

        async fn header_texts(&mut self) -> Result<Vec<String>, PortalError> {
            Ok(self.table.headers.clone())
        }

        async fn row_cell_text(
            &mut self,
            row_label: &str,
            column: usize,
        ) -> Result<Option<String>, PortalError> {
            // Mirrors the portal's contains() row match.
            Ok(self
                .table
                .cells
                .iter()
                .find(|(label, _)| label.contains(row_label))
                .and_then(|(_, row)| row.get(&column).cloned()))
        }

        async fn tank_cell_text(
            &mut self,
            phase_label: &str,
            tank_label: &str,
            column: usize,
        ) -> Result<Option<String>, PortalError> {
            let key = format!("{phase_label} {tank_label}");
            Ok(self
                .table
                .cells
                .get(&key)
                .and_then(|row| row.get(&column).cloned()))
        }

        async fn dam_summary_text(&mut self) -> Result<Option<String>, PortalError> {
            Ok(None)
        }

        async fn readiness_cell_texts(&mut self) -> Result<Vec<String>, PortalError> {
            Ok(Vec::new())
        }

        async fn reload(&mut self) -> Result<(), PortalError> {
            Ok(())
        }

        async fn submit_value(&mut self, _value: f64) -> Result<(), PortalError> {
            Ok(())
        }

        async fn submission_pending(&mut self) -> Result<bool, PortalError> {
            Ok(false)
        }

        async fn close(&mut self) -> Result<(), PortalError> {
            Ok(())
        }
    }

    struct FakeConnector {
        table: FakeTable,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl PortalConnector for FakeConnector {
        async fn open(&self) -> Result<Box<dyn PortalSession>, PortalError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                table: self.table.clone(),
            }))
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(h: u32) -> NaiveDateTime {
        at(h, 0)
    }

    fn test_config() -> Config {
        Config {
            username: "laboratory".into(),
            password: "secret".into(),
            ..Config::default()
        }
    }

    fn scraper(dir: &TempDir, table: FakeTable) -> (LiveScraper, Database, DamCache) {
        let db = Database::new(dir.path().join("damwatch.sqlite3")).unwrap();
        let cache = DamCache::new(dir.path().join("dam_cache.json"));
        let connector = Arc::new(FakeConnector {
            table,
            opened: AtomicUsize::new(0),
        });
        (
            LiveScraper::new(test_config(), db.clone(), cache.clone(), connector),
            db,
            cache,
        )
    }

    // Headers for columns 4..=11 covering 6:00 AM through 1:00 PM.
    fn morning_headers() -> Vec<&'static str> {
        vec![
            "6:00 AM", "7:00 AM", "8:00 AM", "9:00 AM", "10:00 AM", "11:00 AM", "12:00 PM",
            "1:00 PM",
        ]
    }

    #[tokio::test]
    async fn reads_target_column_and_tracked_rows() {
        let mut table = FakeTable::with_headers(&morning_headers());
        table
            .set("Dam Level", 11, "1.52 m")
            .set("Turbidity", 11, "3.4")
            .set("Old Reservoir P3 Status", 11, "RUNNING")
            .set("Encoded By", 11, "J. Cruz")
            .set("Phase 1 A", 11, "2.1")
            .set("Phase 1 B", 11, "2.3")
            .set("Phase 2 C", 11, "3.0")
            .set("Phase 2 D", 11, "4.0");

        let dir = TempDir::new().unwrap();
        let (scraper, _db, _cache) = scraper(&dir, table);

        // 13:12 with a 12 minute delay targets 1:00 PM = column 11.
        let reading = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap();

        assert_eq!(reading.target_hour.as_deref(), Some("1:00 PM"));
        assert_eq!(reading.target_column, Some(11));
        assert_eq!(reading.current_dam_level, Some(1.52));
        assert_eq!(reading.turbidity, Some(3.4));
        assert_eq!(reading.old_res_status.as_deref(), Some("RUNNING"));
        assert_eq!(reading.current_operator.as_deref(), Some("J. Cruz"));
        assert_eq!(reading.tank_a_level, Some(2.1));
        assert_eq!(reading.tank_b_level, Some(2.3));
        assert_eq!(reading.tank_cd_level, Some(3.5));
    }

    #[tokio::test]
    async fn missing_target_hour_is_a_typed_failure() {
        let table = FakeTable::with_headers(&["6:00 AM", "7:00 AM"]);
        let dir = TempDir::new().unwrap();
        let (scraper, db, cache) = scraper(&dir, table);

        db.upsert_turbidity(slot(9), "9:00 AM", 7.2).await.unwrap();

        let err = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TargetHourUnavailable(ref hour) if hour == "1:00 PM"));

        // The serving layer's fallback still carries store-derived metrics.
        let fallback = fallback_reading(&db, &cache, at(13, 12), Some(err.to_string())).await;
        assert!(fallback.target_hour.is_none());
        assert!(fallback.scrape_error.is_some());
        assert_eq!(fallback.last_active_dosing.as_deref(), Some("2024-01-01 09:00"));
        assert_eq!(fallback.total_treatment_hours_month, 1);
    }

    #[tokio::test]
    async fn missing_credentials_never_open_a_session() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("damwatch.sqlite3")).unwrap();
        let cache = DamCache::new(dir.path().join("dam_cache.json"));
        let connector = Arc::new(FakeConnector {
            table: FakeTable::default(),
            opened: AtomicUsize::new(0),
        });
        let scraper = LiveScraper::new(
            Config::default(),
            db,
            cache,
            connector.clone(),
        );

        let err = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::MissingCredentials));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stored_history_backfills_blank_prior_cells() {
        // The live table shows the current hour but the 12:00 PM cell is
        // blank; the store already has 12:00.
        let mut table = FakeTable::with_headers(&morning_headers());
        table.set("Dam Level", 11, "1.52").set("Turbidity", 11, "3.4");

        let dir = TempDir::new().unwrap();
        let (scraper, db, _cache) = scraper(&dir, table);
        db.upsert_dam(slot(12), "12:00 PM", 1.47).await.unwrap();
        db.upsert_dam(slot(11), "11:00 AM", 1.44).await.unwrap();

        let reading = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap();

        // Fresh 13:00 write sits at index 0, so the offset skips it.
        assert_eq!(reading.dam_level_1_hour_prior, Some(1.47));
        assert_eq!(reading.previous_dam_level, Some(1.47));
        assert_eq!(reading.dam_level_2_hours_prior, Some(1.44));
        assert_eq!(reading.dam_level_3_hours_prior, None);
    }

    #[tokio::test]
    async fn offset_is_zero_when_no_fresh_value_was_written() {
        // Dam row entirely blank on the page; history alone supplies priors.
        let mut table = FakeTable::with_headers(&morning_headers());
        table.set("Turbidity", 11, "3.4");

        let dir = TempDir::new().unwrap();
        let (scraper, db, _cache) = scraper(&dir, table);
        db.upsert_dam(slot(12), "12:00 PM", 1.47).await.unwrap();

        let reading = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap();

        assert_eq!(reading.current_dam_level, None);
        assert_eq!(reading.dam_level_1_hour_prior, Some(1.47));
    }

    #[tokio::test]
    async fn alternate_row_labels_are_tried_in_order() {
        let mut table = FakeTable::with_headers(&morning_headers());
        table
            .set("Dam Level", 11, "1.52")
            .set("Turbidity", 11, "3.4")
            // No Phase rows; only a historical spelling carries the value.
            .set("Tank Water Level Phase 3 C & D", 11, "5.5");

        let dir = TempDir::new().unwrap();
        let (scraper, _db, _cache) = scraper(&dir, table);

        let reading = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap();
        assert_eq!(reading.tank_cd_level, Some(5.5));
    }

    #[tokio::test]
    async fn last_displayed_cache_offers_previous_for_a_new_hour() {
        let mut table = FakeTable::with_headers(&morning_headers());
        // Only the current hour has any dam data; nothing to scan leftward.
        table.set("Dam Level", 11, "1.52").set("Turbidity", 11, "3.4");

        let dir = TempDir::new().unwrap();
        let (scraper, _db, cache) = scraper(&dir, table);
        cache.record_last_displayed(1.39, "12:00 PM", at(12, 15));

        let reading = scraper.fetch_live_reading_at(at(13, 12)).await.unwrap();
        assert_eq!(reading.previous_dam_level, Some(1.39));
    }
}

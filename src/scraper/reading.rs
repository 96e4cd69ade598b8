use chrono::NaiveDateTime;
use log::error;
use serde::Serialize;

use super::TREATMENT_THRESHOLD_NTU;
use crate::{cache::DamCache, db::Database};

/// One point-in-time capture of the monitoring screen. Ephemeral: the
/// constituent dam-level and turbidity values are persisted individually
/// into the snapshot store, never the reading as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub target_hour: Option<String>,
    pub target_column: Option<usize>,
    pub turbidity: Option<f64>,
    pub previous_turbidity: Option<f64>,
    pub turbidity_1_hour_prior: Option<f64>,
    pub turbidity_2_hours_prior: Option<f64>,
    pub turbidity_3_hours_prior: Option<f64>,
    pub current_dam_level: Option<f64>,
    pub previous_dam_level: Option<f64>,
    pub dam_level_1_hour_prior: Option<f64>,
    pub dam_level_2_hours_prior: Option<f64>,
    pub dam_level_3_hours_prior: Option<f64>,
    pub old_res_status: Option<String>,
    pub old_res_big_tank_level: Option<f64>,
    pub tank_a_level: Option<f64>,
    pub tank_b_level: Option<f64>,
    pub tank_cd_level: Option<f64>,
    pub current_operator: Option<String>,
    pub last_active_dosing: Option<String>,
    pub total_treatment_hours_month: i64,
    pub last_chlorine_tank_change: Option<String>,
    pub fetched_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_error: Option<String>,
}

/// Derived dosing metrics: the last hour the plant was actively treating
/// (manual override wins over the computed value) and the month's treatment
/// hour count. Store failures degrade to empty metrics rather than erroring.
pub(crate) async fn treatment_metrics(
    db: &Database,
    cache: &DamCache,
    now: NaiveDateTime,
) -> (Option<String>, i64) {
    let computed = match db.last_active_treatment(TREATMENT_THRESHOLD_NTU, now).await {
        Ok(slot) => slot.map(|s| s.format("%Y-%m-%d %H:%M").to_string()),
        Err(err) => {
            error!("failed to query last active treatment: {err:#}");
            None
        }
    };

    let total = match db.treatment_hours_in_month(TREATMENT_THRESHOLD_NTU, now).await {
        Ok(count) => count,
        Err(err) => {
            error!("failed to count treatment hours: {err:#}");
            0
        }
    };

    let last_active = cache.last_active_dosing().or(computed);
    (last_active, total)
}

/// Degraded payload served when a scrape fails: all screen-sourced fields
/// null, store-derived metrics still populated, and the failure reason
/// carried in `scrape_error` for callers to check.
pub async fn fallback_reading(
    db: &Database,
    cache: &DamCache,
    now: NaiveDateTime,
    scrape_error: Option<String>,
) -> Reading {
    let (last_active_dosing, total_treatment_hours_month) =
        treatment_metrics(db, cache, now).await;

    Reading {
        target_hour: None,
        target_column: None,
        turbidity: None,
        previous_turbidity: None,
        turbidity_1_hour_prior: None,
        turbidity_2_hours_prior: None,
        turbidity_3_hours_prior: None,
        current_dam_level: None,
        previous_dam_level: None,
        dam_level_1_hour_prior: None,
        dam_level_2_hours_prior: None,
        dam_level_3_hours_prior: None,
        old_res_status: None,
        old_res_big_tank_level: None,
        tank_a_level: None,
        tank_b_level: None,
        tank_cd_level: None,
        current_operator: None,
        last_active_dosing,
        total_treatment_hours_month,
        last_chlorine_tank_change: cache.last_chlorine_tank_change(),
        fetched_at: now,
        scrape_error,
    }
}

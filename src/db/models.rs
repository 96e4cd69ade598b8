use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Storage format for slot timestamps. Slots are naive local time because the
/// portal reports wall-clock shift hours.
pub(crate) const SLOT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub(crate) fn format_slot(slot: NaiveDateTime) -> String {
    slot.format(SLOT_FORMAT).to_string()
}

pub(crate) fn parse_slot(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, SLOT_FORMAT)
        .map_err(|err| anyhow!("invalid slot timestamp '{value}': {err}"))
}

/// One dam-level reading per hour slot; the slot is unique and a later write
/// for the same slot replaces the value in place.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DamLevelSnapshot {
    pub slot: NaiveDateTime,
    pub target_hour: String,
    pub dam_level: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurbiditySnapshot {
    pub slot: NaiveDateTime,
    pub target_hour: String,
    pub turbidity: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

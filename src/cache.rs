//! File-backed key-value cache for values that live outside the snapshot
//! series: operator-maintained overrides and the last-displayed dam level.
//!
//! The payload is read-modify-written without locking; writes are infrequent
//! and last-writer-wins is acceptable for these fields.

use std::{fs, path::PathBuf};

use chrono::{Duration, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};

const HISTORY_CAP: usize = 50;
const LAST_DISPLAYED_MAX_AGE_HOURS: i64 = 18;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePayload {
    pub last_chlorine_tank_change: Option<String>,
    pub last_active_dosing: Option<String>,
    pub last_displayed_current_dam: Option<f64>,
    pub last_displayed_target_hour: Option<String>,
    pub last_displayed_fetched_at: Option<NaiveDateTime>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub dam_level: Option<f64>,
    pub target_hour: Option<String>,
    pub fetched_at: Option<NaiveDateTime>,
}

#[derive(Clone)]
pub struct DamCache {
    path: PathBuf,
}

impl DamCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A missing or corrupt backing file reads as an empty payload.
    pub fn load(&self) -> CachePayload {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return CachePayload::default();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    /// Persists `payload`, capping the audit history. Callers always
    /// load-modify-save, so operator overrides carry through untouched saves.
    pub fn save(&self, payload: &CachePayload) {
        let mut merged = payload.clone();

        if merged.history.len() > HISTORY_CAP {
            merged.history = merged
                .history
                .split_off(merged.history.len() - HISTORY_CAP);
        }

        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, serde_json::to_string(&merged)?)?;
            Ok(())
        })();

        if let Err(err) = result {
            warn!("failed to write dam cache {}: {err:#}", self.path.display());
        }
    }

    pub fn last_active_dosing(&self) -> Option<String> {
        non_empty(self.load().last_active_dosing)
    }

    pub fn set_last_active_dosing(&self, value: &str) -> Option<String> {
        let mut payload = self.load();
        payload.last_active_dosing = non_empty(Some(value.to_string()));
        self.save(&payload);
        payload.last_active_dosing
    }

    pub fn last_chlorine_tank_change(&self) -> Option<String> {
        non_empty(self.load().last_chlorine_tank_change)
    }

    pub fn set_last_chlorine_tank_change(&self, value: &str) -> Option<String> {
        let mut payload = self.load();
        payload.last_chlorine_tank_change = non_empty(Some(value.to_string()));
        self.save(&payload);
        payload.last_chlorine_tank_change
    }

    /// Records the dam level just shown for `target_hour` so a near-future
    /// call with a different target hour can use it as a "previous" fallback.
    pub fn record_last_displayed(
        &self,
        dam_level: f64,
        target_hour: &str,
        fetched_at: NaiveDateTime,
    ) {
        let mut payload = self.load();
        payload.last_displayed_current_dam = Some(dam_level);
        payload.last_displayed_target_hour = Some(target_hour.to_string());
        payload.last_displayed_fetched_at = Some(fetched_at);
        payload.history.push(HistoryEntry {
            dam_level: Some(dam_level),
            target_hour: Some(target_hour.to_string()),
            fetched_at: Some(fetched_at),
        });
        self.save(&payload);
    }
}

/// The cached last-displayed dam level, usable as a "previous" value only
/// when it belongs to a different hour and is at most 18 hours old.
pub fn previous_from_last_displayed(
    payload: &CachePayload,
    current_target_hour: &str,
    now: NaiveDateTime,
) -> Option<f64> {
    let value = payload.last_displayed_current_dam?;
    let hour = payload.last_displayed_target_hour.as_deref()?;
    let fetched_at = payload.last_displayed_fetched_at?;

    if hour == current_target_hour {
        return None;
    }
    if now - fetched_at > Duration::hours(LAST_DISPLAYED_MAX_AGE_HOURS) {
        return None;
    }
    Some(value)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

//! Timed submission scheduler.
//!
//! A 1-second poll loop fires each configured row when the wall clock matches
//! its time exactly. Submissions are serialized process-wide: the portal keeps
//! per-login session state that overlapping browser sessions would corrupt,
//! so a mutual-exclusion gate trades throughput for correctness.

mod loop_worker;
mod shift;
mod submission;

pub use shift::{generate_shift_times, normalize_time, ScheduledRow, Shift};

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{alert::AlertSink, config::Config, portal::PortalConnector};

use loop_worker::scheduler_loop;

/// Minimum submittable value while flood mode is selected.
pub(crate) const FLOOD_MODE_FLOOR: f64 = 5.0;
/// Dam-level movement that warrants an operator alert.
pub(crate) const DAM_JUMP_THRESHOLD: f64 = 0.08;
/// Gate and executing-set release lag after a submission's session closes.
pub(crate) const RELEASE_DELAY: Duration = Duration::from_secs(5);
/// Consecutive failure count at which the escalated alert fires.
pub(crate) const ESCALATION_THRESHOLD: u32 = 2;

/// Operator-selected safety mode. There is no default: the scheduler cannot
/// start until one is chosen, so an unselected mode is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodMode {
    NoFlood,
    /// Imposes [`FLOOD_MODE_FLOOR`] as a minimum submittable value.
    Flood,
}

impl std::str::FromStr for FloodMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "flood" => Ok(FloodMode::Flood),
            "no-flood" | "noflood" => Ok(FloodMode::NoFlood),
            other => bail!("unknown mode {other:?} (expected flood or no-flood)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub flood_mode: FloodMode,
    pub alarm_enabled: bool,
}

/// State shared between the poll loop and in-flight submission tasks.
pub(crate) struct SchedulerContext {
    pub(crate) config: Config,
    pub(crate) connector: Arc<dyn PortalConnector>,
    pub(crate) alerts: Arc<dyn AlertSink>,
    pub(crate) options: SchedulerOptions,
    /// Row indices with a submission in flight or in its release delay.
    pub(crate) executing: Mutex<HashSet<usize>>,
    /// Process-wide submission gate; acquired with `try_lock_owned` so the
    /// poll loop never blocks on it.
    pub(crate) gate: Arc<tokio::sync::Mutex<()>>,
    pub(crate) consecutive_failures: Arc<AtomicU32>,
}

pub struct SchedulerController {
    config: Config,
    connector: Arc<dyn PortalConnector>,
    alerts: Arc<dyn AlertSink>,
    consecutive_failures: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SchedulerController {
    pub fn new(
        config: Config,
        connector: Arc<dyn PortalConnector>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            connector,
            alerts,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, rows: Vec<ScheduledRow>, options: SchedulerOptions) -> Result<()> {
        if self.handle.is_some() {
            bail!("scheduler already active");
        }
        if rows.is_empty() {
            bail!("no scheduled rows configured");
        }

        let mut validated = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.time = normalize_time(&row.time)
                .with_context(|| format!("row {} has an invalid time", row.index))?;
            validated.push(row);
        }

        let context = Arc::new(SchedulerContext {
            config: self.config.clone(),
            connector: self.connector.clone(),
            alerts: self.alerts.clone(),
            options,
            executing: Mutex::new(HashSet::new()),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            consecutive_failures: self.consecutive_failures.clone(),
        });

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        info!(
            "scheduler starting with {} rows (mode={:?}, alarms={})",
            validated.len(),
            options.flood_mode,
            options.alarm_enabled
        );
        let handle = tokio::spawn(scheduler_loop(validated, context, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stops the poll loop. An in-flight submission is not cancelled; it runs
    /// to completion (or its own timeout) on its detached task.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("scheduler loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        info!("consecutive failure counter reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_mode_must_parse_to_an_explicit_selection() {
        assert_eq!("flood".parse::<FloodMode>().unwrap(), FloodMode::Flood);
        assert_eq!("No-Flood".parse::<FloodMode>().unwrap(), FloodMode::NoFlood);
        assert!("".parse::<FloodMode>().is_err());
        assert!("maybe".parse::<FloodMode>().is_err());
    }
}

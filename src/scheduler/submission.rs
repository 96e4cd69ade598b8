//! One scheduled row's submission, end to end.

use std::sync::{atomic::Ordering, Arc};

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use tokio::{
    sync::OwnedMutexGuard,
    time::{sleep, Duration, Instant},
};

use super::{
    shift::ScheduledRow, FloodMode, SchedulerContext, DAM_JUMP_THRESHOLD, ESCALATION_THRESHOLD,
    FLOOD_MODE_FLOOR, RELEASE_DELAY,
};
use crate::{alert::AlertEvent, parse::parse_numeric, portal::PortalSession};

const READINESS_POLL: Duration = Duration::from_secs(15);
const READINESS_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// The portal marks a fresh, awaiting-input entry slot with a literal "0.00".
const READINESS_MARKER: &str = "0.00";

pub(crate) async fn run_submission(row: &ScheduledRow, context: &Arc<SchedulerContext>) {
    // Flood mode imposes a minimum before any network activity happens.
    if context.options.flood_mode == FloodMode::Flood && row.value < FLOOD_MODE_FLOOR {
        warn!(
            "row {}: value {} rejected by the flood-mode floor",
            row.index, row.value
        );
        context.alerts.raise(AlertEvent::SubmissionBlocked {
            row_index: row.index,
            value: row.value,
        });
        return;
    }

    match submit_row(row, context).await {
        Ok(dam_delta) => {
            context.consecutive_failures.store(0, Ordering::SeqCst);
            info!("row {}: submission verified", row.index);
            context.alerts.raise(AlertEvent::SubmissionSucceeded {
                row_index: row.index,
                value: row.value,
                dam_delta,
            });
        }
        Err(err) => {
            let count = context.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("row {}: submission failed: {err:#}", row.index);
            context.alerts.raise(AlertEvent::SubmissionFailed {
                row_index: row.index,
                value: row.value,
            });
            if count >= ESCALATION_THRESHOLD {
                context
                    .alerts
                    .raise(AlertEvent::ConsecutiveFailures { count });
            }
        }
    }
}

/// Removes the row from the executing set and drops the gate permit, a fixed
/// delay after the submission's session closed. The lag absorbs portal-side
/// settling before the next row may start.
pub(crate) async fn release_after_delay(
    row_index: usize,
    context: &Arc<SchedulerContext>,
    permit: OwnedMutexGuard<()>,
) {
    sleep(RELEASE_DELAY).await;
    match context.executing.lock() {
        Ok(mut guard) => {
            guard.remove(&row_index);
        }
        Err(poisoned) => {
            poisoned.into_inner().remove(&row_index);
        }
    }
    drop(permit);
}

/// Opens a session, drives the submission, and closes the session whatever
/// the outcome. Returns the dam-level delta read from the summary row, when
/// one was available.
async fn submit_row(
    row: &ScheduledRow,
    context: &Arc<SchedulerContext>,
) -> Result<Option<f64>> {
    let mut session = context.connector.open().await?;
    let result = drive_submission(session.as_mut(), row, context).await;

    if let Err(err) = session.close().await {
        warn!("row {}: failed to close submission session: {err}", row.index);
    }
    result
}

async fn drive_submission(
    session: &mut dyn PortalSession,
    row: &ScheduledRow,
    context: &Arc<SchedulerContext>,
) -> Result<Option<f64>> {
    session
        .login(&context.config.username, &context.config.password)
        .await?;

    let summary = session.dam_summary_text().await?;
    let dam_delta = summary.as_deref().and_then(dam_delta_from_summary);
    // Only a rise trips the alarm; a falling level is normal drawdown.
    if let Some((latest, previous)) = summary.as_deref().and_then(dam_levels_from_summary) {
        if context.options.alarm_enabled && latest - previous >= DAM_JUMP_THRESHOLD {
            context.alerts.raise(AlertEvent::DamJump { latest, previous });
        }
    }

    wait_for_readiness(session).await?;

    for attempt in 1..=VERIFY_ATTEMPTS {
        match session.submit_value(row.value).await {
            Ok(()) => {
                if !session.submission_pending().await? {
                    return Ok(dam_delta);
                }
                warn!(
                    "row {}: attempt {attempt} still pending after submit",
                    row.index
                );
            }
            Err(err) => warn!("row {}: attempt {attempt} errored: {err}", row.index),
        }

        if attempt < VERIFY_ATTEMPTS {
            sleep(VERIFY_RETRY_PAUSE).await;
            session.reload().await?;
        }
    }

    bail!("submission not verified after {VERIFY_ATTEMPTS} attempts")
}

/// Waits for any readiness cell to read exactly "0.00", reloading between
/// checks. The outer deadline is independent of per-action timeouts.
async fn wait_for_readiness(session: &mut dyn PortalSession) -> Result<()> {
    let deadline = Instant::now() + READINESS_TIMEOUT;
    loop {
        let cells = session.readiness_cell_texts().await?;
        if cells.iter().any(|cell| cell.trim() == READINESS_MARKER) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "portal never showed a fresh entry slot within {} minutes",
                READINESS_TIMEOUT.as_secs() / 60
            ));
        }
        sleep(READINESS_POLL).await;
        session.reload().await?;
    }
}

/// The summary row renders dam levels as whitespace-separated tokens; the
/// final token is the latest reading, the one before it the previous.
fn dam_levels_from_summary(text: &str) -> Option<(f64, f64)> {
    let values: Vec<f64> = text
        .split_whitespace()
        .filter_map(parse_numeric)
        .collect();
    if values.len() < 2 {
        return None;
    }
    Some((values[values.len() - 1], values[values.len() - 2]))
}

fn dam_delta_from_summary(text: &str) -> Option<f64> {
    dam_levels_from_summary(text).map(|(latest, previous)| latest - previous)
}

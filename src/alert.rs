//! Operator alerting for the submission scheduler.
//!
//! Submissions have no caller to return an outcome to, so results surface
//! through a sink the control surface installs. The default sink writes to
//! the log at a severity matching the event.

use log::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// A scheduled value was submitted and verified.
    SubmissionSucceeded {
        row_index: usize,
        value: f64,
        dam_delta: Option<f64>,
    },
    /// A scheduled submission exhausted its verify attempts.
    SubmissionFailed { row_index: usize, value: f64 },
    /// Two or more submissions in a row have failed since the last success.
    ConsecutiveFailures { count: u32 },
    /// The dam level moved at least the jump threshold between readings.
    DamJump { latest: f64, previous: f64 },
    /// A flood-mode value below the safety floor was rejected before any
    /// network activity.
    SubmissionBlocked { row_index: usize, value: f64 },
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, event: AlertEvent);
}

pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, event: AlertEvent) {
        match event {
            AlertEvent::SubmissionSucceeded {
                row_index,
                value,
                dam_delta,
            } => match dam_delta {
                Some(delta) => info!(
                    "row {row_index}: submitted {value} (dam level delta {delta:.2})"
                ),
                None => info!("row {row_index}: submitted {value}"),
            },
            AlertEvent::SubmissionFailed { row_index, value } => {
                warn!("row {row_index}: submission of {value} failed verification");
            }
            AlertEvent::ConsecutiveFailures { count } => {
                error!("{count} consecutive submission failures; portal needs attention");
            }
            AlertEvent::DamJump { latest, previous } => {
                warn!("dam level jumped from {previous} to {latest}");
            }
            AlertEvent::SubmissionBlocked { row_index, value } => {
                warn!("row {row_index}: value {value} is below the flood-mode floor, blocked");
            }
        }
    }
}

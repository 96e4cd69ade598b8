use std::{collections::HashSet, sync::Arc};

use chrono::Local;
use log::{debug, info};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{
    shift::ScheduledRow,
    submission::{release_after_delay, run_submission},
    SchedulerContext,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) async fn scheduler_loop(
    rows: Vec<ScheduledRow>,
    context: Arc<SchedulerContext>,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_hms = Local::now().format("%H:%M:%S").to_string();
                dispatch_due_rows(&rows, &now_hms, &context);
            }
            _ = cancel_token.cancelled() => {
                info!("scheduler loop shutting down");
                break;
            }
        }
    }
}

fn dispatch_due_rows(rows: &[ScheduledRow], now_hms: &str, context: &Arc<SchedulerContext>) {
    for row in rows {
        {
            let executing = match context.executing.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !is_eligible(row, now_hms, &executing) {
                continue;
            }
        }

        // Serializes submissions process-wide; a row whose second coincides
        // with an in-flight submission simply does not fire.
        let Ok(permit) = context.gate.clone().try_lock_owned() else {
            debug!("row {} due but the submission gate is held", row.index);
            continue;
        };

        match context.executing.lock() {
            Ok(mut guard) => guard.insert(row.index),
            Err(poisoned) => poisoned.into_inner().insert(row.index),
        };

        info!("row {} firing at {now_hms} with value {}", row.index, row.value);
        let row = row.clone();
        let context = context.clone();
        tokio::spawn(async move {
            run_submission(&row, &context).await;
            release_after_delay(row.index, &context, permit).await;
        });
    }
}

/// A row is due when the clock reads its time to the second and it is not
/// already executing. The gate is checked separately because acquiring it
/// must consume it.
pub(crate) fn is_eligible(row: &ScheduledRow, now_hms: &str, executing: &HashSet<usize>) -> bool {
    row.time == now_hms && !executing.contains(&row.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, time: &str) -> ScheduledRow {
        ScheduledRow {
            index,
            time: time.to_string(),
            value: 6.0,
        }
    }

    #[test]
    fn eligibility_requires_exact_second_match() {
        let executing = HashSet::new();
        assert!(is_eligible(&row(0, "09:10:30"), "09:10:30", &executing));
        assert!(!is_eligible(&row(0, "09:10:30"), "09:10:31", &executing));
        assert!(!is_eligible(&row(0, "09:10:30"), "09:10", &executing));
    }

    #[test]
    fn executing_rows_are_not_eligible() {
        let mut executing = HashSet::new();
        executing.insert(1);
        assert!(!is_eligible(&row(1, "09:10:30"), "09:10:30", &executing));
        assert!(is_eligible(&row(2, "09:10:30"), "09:10:30", &executing));
    }

    #[test]
    fn gate_admits_one_of_two_same_second_rows() {
        let gate = Arc::new(tokio::sync::Mutex::new(()));

        let first = gate.clone().try_lock_owned();
        assert!(first.is_ok());
        // The second row's acquisition fails without blocking.
        assert!(gate.clone().try_lock_owned().is_err());

        drop(first);
        assert!(gate.clone().try_lock_owned().is_ok());
    }
}

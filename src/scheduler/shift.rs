//! Shift definitions and scheduled-row time generation.

use anyhow::{bail, Result};
use rand::Rng;

/// Plant duty shifts. Each covers a fixed span of hours; submission rows are
/// generated one per hour in the span. Spans past 24 wrap into the next day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    /// 5 PM through 7 AM the next morning, 15 rows.
    Straight,
    /// 8 AM through 4 PM, 9 rows.
    Second,
    /// 4 PM through 11 PM, 8 rows.
    Third,
}

impl Shift {
    fn hour_span(self) -> std::ops::RangeInclusive<u32> {
        match self {
            Shift::Straight => 17..=31,
            Shift::Second => 8..=16,
            Shift::Third => 16..=23,
        }
    }

    pub fn row_count(self) -> usize {
        self.hour_span().count()
    }
}

impl std::str::FromStr for Shift {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "straight" => Ok(Shift::Straight),
            "second" => Ok(Shift::Second),
            "third" => Ok(Shift::Third),
            other => bail!("unknown shift {other:?} (expected straight, second or third)"),
        }
    }
}

/// One operator-configured submission: fires once when the wall clock reads
/// `time` exactly. Identity is `index` within the active shift.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRow {
    pub index: usize,
    /// "HH:MM:SS", 24-hour.
    pub time: String,
    pub value: f64,
}

/// One submission time per shift hour, randomly placed shortly after the
/// hour (minute 9-12, second 1-51) so submissions land after the portal has
/// rolled its entry slot over but never at a predictable instant.
pub fn generate_shift_times(shift: Shift) -> Vec<String> {
    let mut rng = rand::thread_rng();
    shift
        .hour_span()
        .map(|hour| {
            let minute = rng.gen_range(9..=12);
            let second = rng.gen_range(1..=51);
            format!("{:02}:{minute:02}:{second:02}", hour % 24)
        })
        .collect()
}

/// Validates an operator-edited time, auto-completing "HH:MM" to "HH:MM:SS".
pub fn normalize_time(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(':').collect();
    let (hour, minute, second) = match parts.as_slice() {
        [h, m] => (*h, *m, "00"),
        [h, m, s] => (*h, *m, *s),
        _ => bail!("invalid time {raw:?} (expected HH:MM or HH:MM:SS)"),
    };

    let hour: u32 = hour.parse().map_err(|_| anyhow::anyhow!("invalid hour in {raw:?}"))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in {raw:?}"))?;
    let second: u32 = second
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid second in {raw:?}"))?;
    if hour > 23 || minute > 59 || second > 59 {
        bail!("time {raw:?} is out of range");
    }

    Ok(format!("{hour:02}:{minute:02}:{second:02}"))
}

//! Time sources and the weekly scoring epoch
//!
//! Weekly leaderboards score over `[week_start, week_end)` where `week_start`
//! is the most recent Monday 00:00:00 UTC at or before "now". The window is
//! recomputed from the clock on every request; nothing is persisted and
//! there is no rollover job.

use super::error::{GrowthError, GrowthResult};
use chrono::{DateTime, Datelike, TimeDelta, Utc};
use std::sync::Arc;

pub const SECONDS_PER_WEEK: i64 = 7 * 86_400;

/// Timestamp function returning Unix seconds
///
/// Components take one of these so tests can pin or advance time.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock (`chrono::Utc::now()`)
pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp())
}

/// Clock frozen at `ts`
pub fn fixed_clock(ts: i64) -> Clock {
    Arc::new(move || ts)
}

/// Half-open UTC week `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekEpoch {
    pub start: i64,
    pub end: i64,
}

impl WeekEpoch {
    /// Epoch containing `now`
    pub fn containing(now: i64) -> GrowthResult<Self> {
        let dt: DateTime<Utc> = DateTime::from_timestamp(now, 0).ok_or(GrowthError::Clock(now))?;

        let days_since_monday = i64::from(dt.weekday().num_days_from_monday());
        let monday = dt.date_naive() - TimeDelta::days(days_since_monday);
        let start = monday
            .and_hms_opt(0, 0, 0)
            .ok_or(GrowthError::Clock(now))?
            .and_utc()
            .timestamp();

        Ok(Self {
            start,
            end: start + SECONDS_PER_WEEK,
        })
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}

// src/campaign/schedule.rs
//! Due-time arithmetic for the scheduled review check.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use crate::config::ScheduleConfig;

/// The local day on which a check running at `now` counts, when it falls in
/// `[review_time, review_time + window_minutes)` local time. A window that
/// opens late in the evening runs past midnight and still counts for the day
/// it opened on.
pub fn due_day(now: DateTime<Utc>, schedule: &ScheduleConfig, offset: FixedOffset) -> Option<NaiveDate> {
    if !schedule.enabled {
        return None;
    }
    let at = schedule.review_time()?;
    let local = now.with_timezone(&offset).naive_local();
    let window = Duration::minutes(i64::from(schedule.window_minutes.max(1)));
    let today = local.date();
    [today, today - Duration::days(1)].into_iter().find(|day| {
        let since = local - day.and_time(at);
        since >= Duration::zero() && since < window
    })
}

/// Campaign the check on `local_day` acts on.
pub fn target_date(local_day: NaiveDate, schedule: &ScheduleConfig) -> NaiveDate {
    local_day + Duration::days(schedule.target_day_offset)
}

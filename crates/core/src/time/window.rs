use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Inclusive `[now - days, now]` date range used by the trailing-window views.
pub fn trailing_window(now: DateTime<Utc>, days: u32) -> (NaiveDate, NaiveDate) {
    let to = now.date_naive();
    let from = (now - Duration::days(i64::from(days))).date_naive();
    (from, to)
}

/// Evaluation time from an optional RFC 3339 timestamp or `YYYY-MM-DD` date
/// (midnight UTC), falling back to `now_utc`.
pub fn resolve_now(arg: Option<&str>, now_utc: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let Some(s) = arg.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now_utc);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid evaluation time {s:?}: expected RFC 3339 or YYYY-MM-DD"))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid midnight")?;
    Ok(midnight.and_utc())
}

use crate::analytics::{mean, AnalyticsOptions};
use crate::domain::DashboardStats;
use crate::repository::{EntryFilter, EntryQuery, FetchError, PriceRepository};
use crate::time::trailing_window;
use chrono::{DateTime, Utc};

/// Headline counters: all active entries, active crop classes, and entries/mean price over
/// the trailing window.
pub async fn dashboard_stats(
    repo: &dyn PriceRepository,
    now: DateTime<Utc>,
    opts: &AnalyticsOptions,
) -> Result<DashboardStats, FetchError> {
    let total_entries = repo.count_entries(&EntryQuery::new()).await?;
    let active_crop_classes = repo.crop_classes().await?.len() as u64;

    let (from, to) = trailing_window(now, opts.trend_window_days);
    let recent = repo
        .query_entries(
            &EntryQuery::new()
                .filter(EntryFilter::DateFrom(from))
                .filter(EntryFilter::DateTo(to)),
        )
        .await?;

    Ok(DashboardStats {
        total_entries,
        active_crop_classes,
        recent_entries: recent.len() as u64,
        recent_average_price: mean(recent.iter().map(|e| e.cash_price)),
    })
}

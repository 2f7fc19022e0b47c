pub mod delivery;
pub mod elevator;
pub mod price_trend;
pub mod stats;

pub use delivery::{bucket_delivery_months, delivery_month_trends};
pub use elevator::{elevator_performance, rank_elevators, split_rankings, ElevatorRankings};
pub use price_trend::{price_trends, summarize_trend};
pub use stats::dashboard_stats;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOptions {
    /// Trailing window for the price trend and recent-entry stats.
    pub trend_window_days: u32,

    /// Maximum rows in each of the top and bottom lists per (class, region) pair.
    pub ranking_size: usize,

    /// Most recent rows fed to the delivery-month view. `None` reads every row.
    pub delivery_row_cap: Option<usize>,

    /// Number of delivery-month buckets returned.
    pub delivery_buckets: usize,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            trend_window_days: 30,
            ranking_size: 5,
            delivery_row_cap: Some(1000),
            delivery_buckets: 12,
        }
    }
}

impl AnalyticsOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("PRICE_TREND_WINDOW_DAYS") {
            if let Ok(n) = s.parse::<u32>() {
                out.trend_window_days = n;
            }
        }

        if let Ok(s) = std::env::var("ELEVATOR_RANKING_SIZE") {
            if let Ok(n) = s.parse::<usize>() {
                out.ranking_size = n;
            }
        }

        // 0 disables the cap.
        if let Ok(s) = std::env::var("DELIVERY_TREND_ROW_CAP") {
            if let Ok(n) = s.parse::<usize>() {
                out.delivery_row_cap = (n > 0).then_some(n);
            }
        }

        if let Ok(s) = std::env::var("DELIVERY_TREND_BUCKETS") {
            if let Ok(n) = s.parse::<usize>() {
                out.delivery_buckets = n;
            }
        }

        out
    }
}

/// Arithmetic mean, `None` for an empty input.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0_f64, 0_u64), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean([5.0, 5.5, 6.0]), Some(5.5));
    }

    #[test]
    fn defaults_match_dashboard_views() {
        let opts = AnalyticsOptions::default();
        assert_eq!(opts.trend_window_days, 30);
        assert_eq!(opts.ranking_size, 5);
        assert_eq!(opts.delivery_row_cap, Some(1000));
        assert_eq!(opts.delivery_buckets, 12);
    }
}

use crate::analytics::AnalyticsOptions;
use crate::domain::{DeliveryMonth, DeliveryMonthTrend, PriceEntry};
use crate::repository::{EntryFilter, EntryOrder, EntryQuery, FetchError, PriceRepository};
use std::collections::BTreeMap;

/// Average price per delivery month, most recent bucket first.
///
/// Reads the newest `delivery_row_cap` rows (by delivery year, then date). The cap bounds
/// the read, so a thinly traded month can fall out of the view once newer rows push it
/// past the cap.
pub async fn delivery_month_trends(
    repo: &dyn PriceRepository,
    opts: &AnalyticsOptions,
) -> Result<Vec<DeliveryMonthTrend>, FetchError> {
    let mut query = EntryQuery::new()
        .filter(EntryFilter::DeliveryPresent)
        .order_by(EntryOrder::DeliveryYearDesc)
        .order_by(EntryOrder::DateDesc);
    if let Some(cap) = opts.delivery_row_cap {
        query = query.limit(cap);
    }

    let entries = repo.query_entries(&query).await?;
    let out = bucket_delivery_months(&entries, opts.delivery_buckets);

    tracing::debug!(rows = entries.len(), buckets = out.len(), "delivery month trends computed");
    Ok(out)
}

/// Groups entries by (delivery month, delivery year) and returns at most `max_buckets`
/// buckets in descending chronological order.
///
/// Entries without a delivery month/year or with an unrecognized month token are ignored.
pub fn bucket_delivery_months(entries: &[PriceEntry], max_buckets: usize) -> Vec<DeliveryMonthTrend> {
    let mut buckets: BTreeMap<(i32, DeliveryMonth), (f64, u64)> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.is_active) {
        let (Some(token), Some(year)) = (entry.delivery_month.as_deref(), entry.delivery_year) else {
            continue;
        };
        let Some(month) = DeliveryMonth::parse(token) else {
            tracing::debug!(entry_id = %entry.id, token, "unrecognized delivery month; skipping entry");
            continue;
        };
        let slot = buckets.entry((year, month)).or_insert((0.0, 0));
        slot.0 += entry.cash_price;
        slot.1 += 1;
    }

    // (year, month) orders exactly like year * 100 + month index.
    buckets
        .into_iter()
        .rev()
        .take(max_buckets)
        .map(|((year, month), (sum, n))| DeliveryMonthTrend {
            delivery_month: month.as_str().to_string(),
            delivery_year: year,
            label: format!("{}/{}", month.as_str(), year),
            average_price: sum / n as f64,
            entry_count: n,
            sort_key: month.sort_key(year),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{d, delivered, entry};
    use crate::repository::memory::Fixture;
    use crate::repository::{FailPoint, MemoryRepository};

    #[test]
    fn december_sorts_after_january_in_the_same_year() {
        let entries = vec![
            delivered(entry(1, 1, 100, 1000, d(2024, 1, 1), 5.0), "Jan", 2024),
            delivered(entry(2, 1, 100, 1000, d(2024, 1, 1), 7.0), "Dec", 2024),
            delivered(entry(3, 1, 100, 1000, d(2024, 1, 1), 6.0), "Feb", 2024),
        ];
        let out = bucket_delivery_months(&entries, 12);
        let labels: Vec<_> = out.iter().map(|b| b.label.as_str()).collect();

        assert_eq!(labels, vec!["Dec/2024", "Feb/2024", "Jan/2024"]);
        assert!(out[0].sort_key > out[2].sort_key);
        assert_eq!(out[0].sort_key, 202411);
    }

    #[test]
    fn averages_and_counts_per_bucket() {
        let entries = vec![
            delivered(entry(1, 1, 100, 1000, d(2025, 1, 1), 5.0), "Mar", 2025),
            delivered(entry(2, 2, 101, 1000, d(2025, 1, 2), 6.0), "Mar", 2025),
            delivered(entry(3, 1, 100, 1000, d(2025, 1, 3), 9.0), "Mar", 2026),
        ];
        let out = bucket_delivery_months(&entries, 12);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, "Mar/2026");
        assert_eq!(out[1].average_price, 5.5);
        assert_eq!(out[1].entry_count, 2);
    }

    #[test]
    fn keeps_only_the_most_recent_buckets() {
        let entries: Vec<_> = (0..30)
            .map(|i| {
                let month = DeliveryMonth::ALL[i % 12].as_str();
                let year = 2023 + (i / 12) as i32;
                delivered(entry(i as u128, 1, 100, 1000, d(2025, 1, 1), 5.0), month, year)
            })
            .collect();
        let out = bucket_delivery_months(&entries, 12);

        assert_eq!(out.len(), 12);
        assert_eq!(out[0].label, "Jun/2025");
        assert_eq!(out[11].label, "Jul/2024");
        for pair in out.windows(2) {
            assert!(pair[0].sort_key > pair[1].sort_key);
        }
    }

    #[test]
    fn ignores_missing_and_unknown_tokens() {
        let entries = vec![
            entry(1, 1, 100, 1000, d(2025, 1, 1), 5.0),
            delivered(entry(2, 1, 100, 1000, d(2025, 1, 1), 5.0), "Sept", 2025),
            delivered(entry(3, 1, 100, 1000, d(2025, 1, 1), 8.0), "Sep", 2025),
        ];
        let out = bucket_delivery_months(&entries, 12);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].average_price, 8.0);
    }

    #[tokio::test]
    async fn row_cap_takes_the_newest_rows() {
        let entries = vec![
            delivered(entry(1, 1, 100, 1000, d(2024, 6, 1), 4.0), "Jul", 2024),
            delivered(entry(2, 1, 100, 1000, d(2025, 6, 1), 6.0), "Jul", 2025),
            delivered(entry(3, 1, 100, 1000, d(2025, 6, 2), 7.0), "Aug", 2025),
            entry(4, 1, 100, 1000, d(2025, 6, 3), 100.0),
        ];
        let repo = MemoryRepository::new(Fixture {
            entries,
            ..Fixture::default()
        });

        let opts = AnalyticsOptions {
            delivery_row_cap: Some(2),
            ..AnalyticsOptions::default()
        };
        let out = delivery_month_trends(&repo, &opts).await.unwrap();
        let labels: Vec<_> = out.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["Aug/2025", "Jul/2025"]);

        let opts = AnalyticsOptions {
            delivery_row_cap: None,
            ..AnalyticsOptions::default()
        };
        let out = delivery_month_trends(&repo, &opts).await.unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_is_an_error() {
        let repo = MemoryRepository::new(Fixture::default()).with_failure(FailPoint::EntriesWithDelivery);
        assert!(delivery_month_trends(&repo, &AnalyticsOptions::default())
            .await
            .is_err());
    }
}

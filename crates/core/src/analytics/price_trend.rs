use crate::analytics::AnalyticsOptions;
use crate::domain::{CropClass, PriceEntry, PriceTrendReport, TrendPoint};
use crate::repository::{EntryFilter, EntryOrder, EntryQuery, FetchError, PriceRepository};
use crate::time::trailing_window;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Trailing-window trend for every active crop class that has data, in crop class name order.
///
/// Fails only when the crop class list cannot be read. A failed entry fetch for one class
/// skips that class.
pub async fn price_trends(
    repo: &dyn PriceRepository,
    now: DateTime<Utc>,
    opts: &AnalyticsOptions,
) -> Result<Vec<PriceTrendReport>, FetchError> {
    let classes = repo.crop_classes().await?;
    let (from, to) = trailing_window(now, opts.trend_window_days);

    let mut out = Vec::with_capacity(classes.len());
    for class in &classes {
        let query = EntryQuery::new()
            .filter(EntryFilter::ClassEq(class.id))
            .filter(EntryFilter::DateFrom(from))
            .filter(EntryFilter::DateTo(to))
            .order_by(EntryOrder::DateAsc);

        let entries = match repo.query_entries(&query).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    class_id = %class.id,
                    class_name = %class.name,
                    error = %err,
                    "price trend fetch failed; skipping crop class"
                );
                continue;
            }
        };

        if let Some(report) = summarize_trend(class, &entries) {
            out.push(report);
        }
    }

    tracing::debug!(%from, %to, classes = classes.len(), reports = out.len(), "price trends computed");
    Ok(out)
}

/// Daily averages in ascending date order plus first-to-last change.
///
/// Returns `None` when no active entry is present. `percent_change` is `None` when the
/// first day's average is zero.
pub fn summarize_trend(class: &CropClass, entries: &[PriceEntry]) -> Option<PriceTrendReport> {
    let mut by_date: BTreeMap<NaiveDate, (f64, u64)> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.is_active) {
        let slot = by_date.entry(entry.date).or_insert((0.0, 0));
        slot.0 += entry.cash_price;
        slot.1 += 1;
    }

    let points: Vec<TrendPoint> = by_date
        .into_iter()
        .map(|(date, (sum, n))| TrendPoint {
            date,
            average_price: sum / n as f64,
        })
        .collect();

    let first = points.first()?.average_price;
    let last = points.last()?.average_price;
    let absolute_change = last - first;
    let percent_change = (first != 0.0).then(|| absolute_change / first * 100.0);

    Some(PriceTrendReport {
        class_id: class.id,
        class_name: class.name.clone(),
        class_code: class.code.clone(),
        points,
        absolute_change,
        percent_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{class, d, entry, id};
    use crate::repository::memory::Fixture;
    use crate::repository::{FailPoint, MemoryRepository};
    use chrono::TimeZone;

    #[test]
    fn two_day_wheat_scenario() {
        let wheat = class(1, "Wheat");
        let entries = vec![
            entry(1, 1, 100, 1000, d(2025, 1, 1), 5.00),
            entry(2, 1, 100, 1000, d(2025, 1, 2), 5.50),
        ];
        let report = summarize_trend(&wheat, &entries).unwrap();

        assert_eq!(report.points.len(), 2);
        assert_eq!(report.absolute_change, 0.5);
        assert_eq!(report.percent_change, Some(10.0));
        assert_eq!(report.class_name, "Wheat");
    }

    #[test]
    fn averages_same_day_entries_and_sorts_by_date() {
        let wheat = class(1, "Wheat");
        let entries = vec![
            entry(1, 1, 100, 1000, d(2025, 1, 3), 7.0),
            entry(2, 1, 100, 1000, d(2025, 1, 1), 4.0),
            entry(3, 1, 101, 1000, d(2025, 1, 1), 6.0),
        ];
        let report = summarize_trend(&wheat, &entries).unwrap();

        assert_eq!(
            report.points,
            vec![
                TrendPoint {
                    date: d(2025, 1, 1),
                    average_price: 5.0
                },
                TrendPoint {
                    date: d(2025, 1, 3),
                    average_price: 7.0
                },
            ]
        );
        assert_eq!(report.absolute_change, 2.0);
        assert_eq!(report.percent_change, Some(40.0));
    }

    #[test]
    fn zero_first_price_has_no_percent_change() {
        let wheat = class(1, "Wheat");
        let entries = vec![
            entry(1, 1, 100, 1000, d(2025, 1, 1), 0.0),
            entry(2, 1, 100, 1000, d(2025, 1, 2), 3.0),
        ];
        let report = summarize_trend(&wheat, &entries).unwrap();
        assert_eq!(report.absolute_change, 3.0);
        assert_eq!(report.percent_change, None);
    }

    #[test]
    fn empty_or_inactive_entries_produce_no_report() {
        let wheat = class(1, "Wheat");
        assert!(summarize_trend(&wheat, &[]).is_none());

        let mut inactive = entry(1, 1, 100, 1000, d(2025, 1, 1), 5.0);
        inactive.is_active = false;
        assert!(summarize_trend(&wheat, &[inactive]).is_none());
    }

    fn fixture() -> Fixture {
        Fixture {
            crop_classes: vec![class(2, "Wheat"), class(1, "Barley"), class(3, "Canola")],
            entries: vec![
                entry(1, 1, 100, 1000, d(2025, 1, 20), 4.0),
                entry(2, 1, 100, 1000, d(2025, 1, 25), 4.4),
                entry(3, 2, 100, 1000, d(2025, 1, 21), 6.0),
                // Outside the window.
                entry(4, 3, 100, 1000, d(2024, 11, 1), 12.0),
            ],
            ..Fixture::default()
        }
    }

    #[tokio::test]
    async fn skips_classes_without_data_and_keeps_name_order() {
        let repo = MemoryRepository::new(fixture());
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();

        let reports = price_trends(&repo, now, &AnalyticsOptions::default())
            .await
            .unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.class_name.as_str()).collect();
        assert_eq!(names, vec!["Barley", "Wheat"]);
        assert_eq!(reports[1].percent_change, Some(0.0));
    }

    #[tokio::test]
    async fn one_failing_class_does_not_abort_the_rest() {
        let repo = MemoryRepository::new(fixture())
            .with_failure(FailPoint::EntriesForClass(id(1)));
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();

        let reports = price_trends(&repo, now, &AnalyticsOptions::default())
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].class_name, "Wheat");
    }

    #[tokio::test]
    async fn class_list_failure_is_an_error() {
        let repo = MemoryRepository::new(fixture()).with_failure(FailPoint::CropClasses);
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        assert!(price_trends(&repo, now, &AnalyticsOptions::default())
            .await
            .is_err());
    }
}

use crate::analytics::AnalyticsOptions;
use crate::domain::{CropClass, ElevatorPerformanceEntry, PriceEntry, Region};
use crate::repository::{EntryFilter, EntryQuery, FetchError, PriceRepository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const UNKNOWN_ELEVATOR: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElevatorRankings {
    pub top: Vec<ElevatorPerformanceEntry>,
    pub bottom: Vec<ElevatorPerformanceEntry>,
}

/// Mean price of one elevator within a (class, region) slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevatorAverage {
    pub elevator_id: Uuid,
    pub elevator_name: String,
    pub average_price: f64,
    pub entry_count: u64,
}

/// Top and bottom elevators for every (crop class, region) pair.
///
/// Pairs are visited crop class first, region second, both in name order. A pair whose
/// region has no active towns, has no entries, or whose fetch fails contributes nothing.
pub async fn elevator_performance(
    repo: &dyn PriceRepository,
    opts: &AnalyticsOptions,
) -> Result<ElevatorRankings, FetchError> {
    let classes = repo.crop_classes().await?;
    let regions = repo.regions().await?;

    // Town membership does not depend on the crop class; resolve it once per region.
    let mut region_towns: Vec<(&Region, Vec<Uuid>)> = Vec::with_capacity(regions.len());
    for region in &regions {
        match repo.region_town_ids(region.id).await {
            Ok(towns) if towns.is_empty() => {
                tracing::debug!(region = %region.name, "region has no active towns; skipping");
            }
            Ok(towns) => region_towns.push((region, towns)),
            Err(err) => {
                tracing::warn!(
                    region_id = %region.id,
                    region = %region.name,
                    error = %err,
                    "region town lookup failed; skipping region"
                );
            }
        }
    }

    let mut out = ElevatorRankings::default();
    for class in &classes {
        for (region, towns) in &region_towns {
            let query = EntryQuery::new()
                .filter(EntryFilter::ClassEq(class.id))
                .filter(EntryFilter::TownIn(towns.clone()))
                .with_elevator_name();

            let entries = match repo.query_entries(&query).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(
                        class = %class.name,
                        region = %region.name,
                        error = %err,
                        "elevator performance fetch failed; skipping pair"
                    );
                    continue;
                }
            };

            let ranked = rank_elevators(&entries);
            if ranked.is_empty() {
                continue;
            }

            let (top, bottom) = split_rankings(&ranked, opts.ranking_size);
            out.top.extend(to_report_rows(class, region, top));
            out.bottom.extend(to_report_rows(class, region, bottom));
        }
    }

    tracing::debug!(
        classes = classes.len(),
        regions = region_towns.len(),
        top = out.top.len(),
        bottom = out.bottom.len(),
        "elevator performance computed"
    );
    Ok(out)
}

/// Per-elevator mean and count, highest mean first.
///
/// Equal means are ordered by ascending elevator id so the result does not depend on the
/// order the store returned rows in.
pub fn rank_elevators(entries: &[PriceEntry]) -> Vec<ElevatorAverage> {
    let mut groups: BTreeMap<Uuid, (Option<&str>, f64, u64)> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.is_active) {
        let slot = groups.entry(entry.elevator_id).or_insert((None, 0.0, 0));
        if slot.0.is_none() {
            slot.0 = entry.elevator_name.as_deref();
        }
        slot.1 += entry.cash_price;
        slot.2 += 1;
    }

    let mut ranked: Vec<ElevatorAverage> = groups
        .into_iter()
        .map(|(elevator_id, (name, sum, n))| ElevatorAverage {
            elevator_id,
            elevator_name: name.unwrap_or(UNKNOWN_ELEVATOR).to_string(),
            average_price: sum / n as f64,
            entry_count: n,
        })
        .collect();

    // Stable: ties keep ascending id order from the map.
    ranked.sort_by(|a, b| b.average_price.total_cmp(&a.average_price));
    ranked
}

/// First `limit` rows as the top list, last `limit` rows reversed as the bottom list.
pub fn split_rankings(
    ranked: &[ElevatorAverage],
    limit: usize,
) -> (Vec<ElevatorAverage>, Vec<ElevatorAverage>) {
    let top = ranked.iter().take(limit).cloned().collect();
    let bottom = ranked.iter().rev().take(limit).cloned().collect();
    (top, bottom)
}

fn to_report_rows<'a>(
    class: &'a CropClass,
    region: &'a Region,
    rows: Vec<ElevatorAverage>,
) -> impl Iterator<Item = ElevatorPerformanceEntry> + 'a {
    rows.into_iter()
        .enumerate()
        .map(move |(i, row)| ElevatorPerformanceEntry {
            class_id: class.id,
            class_name: class.name.clone(),
            region_id: region.id,
            region_name: region.name.clone(),
            rank: (i + 1) as u32,
            elevator_id: row.elevator_id,
            elevator_name: row.elevator_name,
            average_price: row.average_price,
            entry_count: row.entry_count,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{class, d, elevator, entry, id, link, region};
    use crate::repository::memory::Fixture;
    use crate::repository::{FailPoint, MemoryRepository};

    fn prices(rows: &[ElevatorAverage]) -> Vec<f64> {
        rows.iter().map(|r| r.average_price).collect()
    }

    #[test]
    fn seven_elevator_scenario() {
        let entries: Vec<_> = [10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, p)| entry(i as u128, 1, 100 + i as u128, 1000, d(2025, 1, 1), *p))
            .collect();

        let ranked = rank_elevators(&entries);
        let (top, bottom) = split_rankings(&ranked, 5);

        assert_eq!(prices(&top), vec![10.0, 9.0, 8.0, 7.0, 6.0]);
        assert_eq!(prices(&bottom), vec![4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn groups_by_elevator_with_counts() {
        let mut a1 = entry(1, 1, 100, 1000, d(2025, 1, 1), 5.0);
        a1.elevator_name = Some("Alpha".to_string());
        let entries = vec![
            a1,
            entry(2, 1, 100, 1000, d(2025, 1, 2), 7.0),
            entry(3, 1, 101, 1000, d(2025, 1, 2), 8.0),
        ];
        let ranked = rank_elevators(&entries);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].elevator_id, id(101));
        assert_eq!(ranked[0].elevator_name, UNKNOWN_ELEVATOR);
        assert_eq!(ranked[1].elevator_name, "Alpha");
        assert_eq!(ranked[1].average_price, 6.0);
        assert_eq!(ranked[1].entry_count, 2);
    }

    #[test]
    fn ties_break_by_elevator_id() {
        let entries = vec![
            entry(1, 1, 103, 1000, d(2025, 1, 1), 5.0),
            entry(2, 1, 101, 1000, d(2025, 1, 1), 5.0),
            entry(3, 1, 102, 1000, d(2025, 1, 1), 6.0),
        ];
        let ranked = rank_elevators(&entries);
        let ids: Vec<_> = ranked.iter().map(|r| r.elevator_id).collect();
        assert_eq!(ids, vec![id(102), id(101), id(103)]);

        // Reversing the input does not change the outcome.
        let mut reversed = entries.clone();
        reversed.reverse();
        assert_eq!(rank_elevators(&reversed), ranked);
    }

    #[test]
    fn short_lists_appear_in_both_directions() {
        let entries = vec![
            entry(1, 1, 100, 1000, d(2025, 1, 1), 5.0),
            entry(2, 1, 101, 1000, d(2025, 1, 1), 6.0),
        ];
        let (top, bottom) = split_rankings(&rank_elevators(&entries), 5);
        assert_eq!(prices(&top), vec![6.0, 5.0]);
        assert_eq!(prices(&bottom), vec![5.0, 6.0]);
    }

    fn fixture() -> Fixture {
        let mut entries = Vec::new();
        // Wheat in the North region (towns 1000, 1001): seven elevators.
        for (i, p) in [10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0].iter().enumerate() {
            let town = 1000 + (i as u128 % 2);
            entries.push(entry(i as u128, 1, 100 + i as u128, town, d(2025, 1, 1), *p));
        }
        // Barley in the South region (town 2000).
        entries.push(entry(20, 2, 200, 2000, d(2025, 1, 1), 3.0));
        entries.push(entry(21, 2, 201, 2000, d(2025, 1, 1), 3.5));

        Fixture {
            crop_classes: vec![class(1, "Wheat"), class(2, "Barley")],
            regions: vec![region(50, "North"), region(51, "South"), region(52, "Empty")],
            town_regions: vec![link(1000, 50), link(1001, 50), link(2000, 51)],
            elevators: (0..7)
                .map(|i| elevator(100 + i, &format!("Elevator {i}")))
                .chain([elevator(200, "South A"), elevator(201, "South B")])
                .collect(),
            entries,
            ..Fixture::default()
        }
    }

    #[tokio::test]
    async fn ranks_each_pair_and_skips_empty_ones() {
        let repo = MemoryRepository::new(fixture());
        let out = elevator_performance(&repo, &AnalyticsOptions::default())
            .await
            .unwrap();

        // Barley sorts before Wheat; only Barley/South and Wheat/North have data.
        assert_eq!(out.top.len(), 2 + 5);
        assert_eq!(out.bottom.len(), 2 + 5);

        assert_eq!(out.top[0].class_name, "Barley");
        assert_eq!(out.top[0].region_name, "South");
        assert_eq!(out.top[0].elevator_name, "South B");
        assert_eq!(out.top[0].rank, 1);

        let wheat_top: Vec<_> = out.top[2..].iter().map(|r| r.average_price).collect();
        assert_eq!(wheat_top, vec![10.0, 9.0, 8.0, 7.0, 6.0]);
        let wheat_bottom: Vec<_> = out.bottom[2..].iter().map(|r| r.average_price).collect();
        assert_eq!(wheat_bottom, vec![4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(out.bottom[2].rank, 1);
        assert_eq!(out.bottom[2].elevator_name, "Elevator 6");

        for pair in out.top.windows(2) {
            if pair[0].class_id == pair[1].class_id && pair[0].region_id == pair[1].region_id {
                assert!(pair[0].average_price >= pair[1].average_price);
            }
        }
        for pair in out.bottom.windows(2) {
            if pair[0].class_id == pair[1].class_id && pair[0].region_id == pair[1].region_id {
                assert!(pair[0].average_price <= pair[1].average_price);
            }
        }
    }

    #[tokio::test]
    async fn fetch_failures_skip_pairs_not_the_run() {
        let repo = MemoryRepository::new(fixture()).with_failure(FailPoint::EntriesForClass(id(1)));
        let out = elevator_performance(&repo, &AnalyticsOptions::default())
            .await
            .unwrap();
        assert_eq!(out.top.len(), 2);
        assert!(out.top.iter().all(|r| r.class_name == "Barley"));

        let repo = MemoryRepository::new(fixture()).with_failure(FailPoint::RegionTowns);
        let out = elevator_performance(&repo, &AnalyticsOptions::default())
            .await
            .unwrap();
        assert!(out.top.is_empty() && out.bottom.is_empty());
    }

    #[tokio::test]
    async fn town_scoped_fetch_failures_leave_empty_lists() {
        let repo = MemoryRepository::new(fixture()).with_failure(FailPoint::EntriesByTown);
        let out = elevator_performance(&repo, &AnalyticsOptions::default())
            .await
            .unwrap();
        assert!(out.top.is_empty());
        assert!(out.bottom.is_empty());
    }

    #[tokio::test]
    async fn region_list_failure_is_an_error() {
        let repo = MemoryRepository::new(fixture()).with_failure(FailPoint::Regions);
        assert!(elevator_performance(&repo, &AnalyticsOptions::default())
            .await
            .is_err());
    }
}

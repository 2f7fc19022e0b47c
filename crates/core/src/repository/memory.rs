use crate::domain::{CropClass, Elevator, PriceEntry, Region, Town, TownRegion};
use crate::repository::{EntryFilter, EntryOrder, EntryQuery, FetchError, PriceRepository};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use uuid::Uuid;

const SOURCE: &str = "memory";

/// Table contents loaded from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub crop_classes: Vec<CropClass>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub towns: Vec<Town>,
    #[serde(default)]
    pub town_regions: Vec<TownRegion>,
    #[serde(default)]
    pub elevators: Vec<Elevator>,
    #[serde(default)]
    pub entries: Vec<PriceEntry>,
}

/// Where a simulated store failure should be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Entries,
    EntriesForClass(Uuid),
    /// Entry queries restricted to a town set.
    EntriesByTown,
    /// Entry queries restricted to rows with delivery month/year.
    EntriesWithDelivery,
    CountEntries,
    CropClasses,
    Regions,
    RegionTowns,
}

/// In-process store with the same filtering semantics as the hosted one.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Fixture,
    elevator_names: HashMap<Uuid, String>,
    failures: HashSet<FailPoint>,
    calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new(tables: Fixture) -> Self {
        let elevator_names = tables
            .elevators
            .iter()
            .map(|e| (e.id, e.name.clone()))
            .collect();
        Self {
            tables,
            elevator_names,
            failures: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        let tables = serde_json::from_str::<Fixture>(&text)
            .with_context(|| format!("failed to parse fixture {}", path.display()))?;
        Ok(Self::new(tables))
    }

    pub fn with_failure(mut self, point: FailPoint) -> Self {
        self.failures.insert(point);
        self
    }

    /// Number of repository calls served so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    fn enter(&self, point: FailPoint, operation: &'static str) -> Result<(), FetchError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.failures.contains(&point) {
            return Err(FetchError::new(SOURCE, operation, "simulated store failure"));
        }
        Ok(())
    }

    fn check_entry_failures(&self, query: &EntryQuery, operation: &'static str) -> Result<(), FetchError> {
        for filter in &query.filters {
            let point = match filter {
                EntryFilter::ClassEq(id) => FailPoint::EntriesForClass(*id),
                EntryFilter::TownIn(_) => FailPoint::EntriesByTown,
                EntryFilter::DeliveryPresent => FailPoint::EntriesWithDelivery,
                _ => continue,
            };
            if self.failures.contains(&point) {
                return Err(FetchError::new(SOURCE, operation, "simulated store failure"));
            }
        }
        Ok(())
    }

    fn select(&self, query: &EntryQuery) -> Vec<PriceEntry> {
        let mut rows: Vec<PriceEntry> = self
            .tables
            .entries
            .iter()
            .filter(|e| e.is_active && query.filters.iter().all(|f| matches_filter(e, f)))
            .cloned()
            .collect();

        // Stable sort: ties keep table order.
        rows.sort_by(|a, b| compare_entries(a, b, &query.order));

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if query.with_elevator_name {
            for row in &mut rows {
                row.elevator_name = self.elevator_names.get(&row.elevator_id).cloned();
            }
        } else {
            for row in &mut rows {
                row.elevator_name = None;
            }
        }

        rows
    }
}

fn matches_filter(entry: &PriceEntry, filter: &EntryFilter) -> bool {
    match filter {
        EntryFilter::ClassEq(id) => entry.class_id == *id,
        EntryFilter::TownIn(ids) => ids.contains(&entry.town_id),
        EntryFilter::DateFrom(d) => entry.date >= *d,
        EntryFilter::DateTo(d) => entry.date <= *d,
        EntryFilter::DeliveryPresent => {
            entry.delivery_month.is_some() && entry.delivery_year.is_some()
        }
    }
}

fn compare_entries(a: &PriceEntry, b: &PriceEntry, order: &[EntryOrder]) -> Ordering {
    for key in order {
        let ord = match key {
            EntryOrder::DateAsc => a.date.cmp(&b.date),
            EntryOrder::DateDesc => b.date.cmp(&a.date),
            // Nulls sort last, as in the hosted store's DESC ordering with NULLS LAST.
            EntryOrder::DeliveryYearDesc => match (a.delivery_year, b.delivery_year) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait::async_trait]
impl PriceRepository for MemoryRepository {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<PriceEntry>, FetchError> {
        self.enter(FailPoint::Entries, "query_entries")?;
        self.check_entry_failures(query, "query_entries")?;
        Ok(self.select(query))
    }

    async fn count_entries(&self, query: &EntryQuery) -> Result<u64, FetchError> {
        self.enter(FailPoint::CountEntries, "count_entries")?;
        self.check_entry_failures(query, "count_entries")?;
        let unlimited = EntryQuery {
            limit: None,
            ..query.clone()
        };
        Ok(self.select(&unlimited).len() as u64)
    }

    async fn crop_classes(&self) -> Result<Vec<CropClass>, FetchError> {
        self.enter(FailPoint::CropClasses, "crop_classes")?;
        let mut out: Vec<CropClass> = self
            .tables
            .crop_classes
            .iter()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn regions(&self) -> Result<Vec<Region>, FetchError> {
        self.enter(FailPoint::Regions, "regions")?;
        let mut out: Vec<Region> = self
            .tables
            .regions
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn region_town_ids(&self, region_id: Uuid) -> Result<Vec<Uuid>, FetchError> {
        self.enter(FailPoint::RegionTowns, "region_town_ids")?;
        let mut seen = HashSet::new();
        Ok(self
            .tables
            .town_regions
            .iter()
            .filter(|tr| tr.is_active && tr.region_id == region_id)
            .map(|tr| tr.town_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(n: u128, date: NaiveDate, price: f64, town: u128) -> PriceEntry {
        PriceEntry {
            id: Uuid::from_u128(n),
            date,
            cash_price: price,
            class_id: Uuid::from_u128(100),
            elevator_id: Uuid::from_u128(200),
            elevator_name: None,
            town_id: Uuid::from_u128(town),
            delivery_month: None,
            delivery_year: None,
            is_active: true,
        }
    }

    fn repo() -> MemoryRepository {
        let mut inactive = entry(4, d(2025, 1, 4), 9.0, 1);
        inactive.is_active = false;
        MemoryRepository::new(Fixture {
            elevators: vec![Elevator {
                id: Uuid::from_u128(200),
                name: "North Elevator".to_string(),
            }],
            town_regions: vec![
                TownRegion {
                    town_id: Uuid::from_u128(1),
                    region_id: Uuid::from_u128(50),
                    is_active: true,
                },
                TownRegion {
                    town_id: Uuid::from_u128(2),
                    region_id: Uuid::from_u128(50),
                    is_active: false,
                },
            ],
            entries: vec![
                entry(1, d(2025, 1, 3), 5.0, 1),
                entry(2, d(2025, 1, 1), 6.0, 2),
                entry(3, d(2025, 1, 2), 7.0, 1),
                inactive,
            ],
            ..Fixture::default()
        })
    }

    #[tokio::test]
    async fn filters_orders_and_limits_active_rows() {
        let repo = repo();
        let q = EntryQuery::new()
            .filter(EntryFilter::DateFrom(d(2025, 1, 2)))
            .order_by(EntryOrder::DateAsc);
        let rows = repo.query_entries(&q).await.unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2025, 1, 2), d(2025, 1, 3)]);

        let q = EntryQuery::new().order_by(EntryOrder::DateDesc).limit(1);
        let rows = repo.query_entries(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, d(2025, 1, 3));

        assert_eq!(repo.count_entries(&EntryQuery::new().limit(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn joins_elevator_name_only_when_asked() {
        let repo = repo();
        let rows = repo.query_entries(&EntryQuery::new()).await.unwrap();
        assert!(rows.iter().all(|r| r.elevator_name.is_none()));

        let rows = repo
            .query_entries(&EntryQuery::new().with_elevator_name())
            .await
            .unwrap();
        assert!(rows
            .iter()
            .all(|r| r.elevator_name.as_deref() == Some("North Elevator")));
    }

    #[tokio::test]
    async fn region_towns_ignore_inactive_links() {
        let repo = repo();
        let towns = repo.region_town_ids(Uuid::from_u128(50)).await.unwrap();
        assert_eq!(towns, vec![Uuid::from_u128(1)]);

        let q = EntryQuery::new().filter(EntryFilter::TownIn(towns));
        assert_eq!(repo.query_entries(&q).await.unwrap().len(), 2);

        let q = EntryQuery::new().filter(EntryFilter::TownIn(vec![]));
        assert!(repo.query_entries(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_scoped() {
        let class_id = Uuid::from_u128(100);
        let repo = repo().with_failure(FailPoint::EntriesForClass(class_id));

        assert!(repo.query_entries(&EntryQuery::new()).await.is_ok());
        let err = repo
            .query_entries(&EntryQuery::new().filter(EntryFilter::ClassEq(class_id)))
            .await
            .unwrap_err();
        assert_eq!(err.operation, "query_entries");
        assert_eq!(repo.call_count(), 2);
    }

    #[tokio::test]
    async fn entries_failure_is_limited_to_row_reads() {
        let repo = repo().with_failure(FailPoint::Entries);
        let err = repo.query_entries(&EntryQuery::new()).await.unwrap_err();
        assert_eq!(err.source_name, "memory");
        assert!(repo.count_entries(&EntryQuery::new()).await.is_ok());
        assert!(repo.crop_classes().await.is_ok());
    }

    #[test]
    fn parses_fixture_json() {
        let v = serde_json::json!({
            "crop_classes": [{"id": Uuid::from_u128(1), "name": "Wheat", "code": "CWRS"}],
            "regions": [{"id": Uuid::from_u128(2), "name": "Peace"}],
        });
        let f: Fixture = serde_json::from_value(v).unwrap();
        assert_eq!(f.crop_classes.len(), 1);
        assert!(f.regions[0].is_active);
        assert!(f.entries.is_empty());
    }
}

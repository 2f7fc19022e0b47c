use crate::domain::{CropClass, PriceEntry, Region};
use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod rest;

pub use memory::{FailPoint, MemoryRepository};
pub use postgres::PgRepository;
pub use rest::RestRepository;

/// Read-only access to price observations and their reference tables.
///
/// Every entry query is implicitly restricted to `is_active = true`; reference
/// lookups return active rows only.
#[async_trait::async_trait]
pub trait PriceRepository: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<PriceEntry>, FetchError>;

    async fn count_entries(&self, query: &EntryQuery) -> Result<u64, FetchError>;

    /// Active crop classes ordered by name.
    async fn crop_classes(&self) -> Result<Vec<CropClass>, FetchError>;

    /// Active regions ordered by name.
    async fn regions(&self) -> Result<Vec<Region>, FetchError>;

    /// Towns linked to the region through active associations.
    async fn region_town_ids(&self, region_id: Uuid) -> Result<Vec<Uuid>, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryFilter {
    ClassEq(Uuid),
    /// An empty set matches nothing.
    TownIn(Vec<Uuid>),
    DateFrom(NaiveDate),
    /// Inclusive.
    DateTo(NaiveDate),
    /// Both delivery month and delivery year are non-null.
    DeliveryPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrder {
    DateAsc,
    DateDesc,
    DeliveryYearDesc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    pub filters: Vec<EntryFilter>,
    pub order: Vec<EntryOrder>,
    pub limit: Option<usize>,
    pub with_elevator_name: bool,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: EntryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: EntryOrder) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_elevator_name(mut self) -> Self {
        self.with_elevator_name = true;
        self
    }

    /// True when a filter makes the result trivially empty.
    pub fn matches_nothing(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, EntryFilter::TownIn(ids) if ids.is_empty()))
    }
}

/// The store was unreachable, rejected the query, or returned rows we could not decode.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub source_name: &'static str,
    pub operation: &'static str,
    pub detail: String,
}

impl FetchError {
    pub fn new(source_name: &'static str, operation: &'static str, detail: impl fmt::Display) -> Self {
        Self {
            source_name,
            operation,
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch error (source={}, operation={}): {}",
            self.source_name, self.operation, self.detail
        )
    }
}

impl std::error::Error for FetchError {}

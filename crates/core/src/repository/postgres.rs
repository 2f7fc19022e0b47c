use crate::domain::{CropClass, PriceEntry, Region};
use crate::repository::{EntryFilter, EntryOrder, EntryQuery, FetchError, PriceRepository};
use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

const SOURCE: &str = "postgres";

type EntryRow = (
    Uuid,
    NaiveDate,
    f64,
    Uuid,
    Uuid,
    Option<String>,
    Uuid,
    Option<String>,
    Option<i32>,
    bool,
);

/// Direct connection to the store's Postgres database.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: sqlx::PgPool,
}

impl PgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[EntryFilter]) {
    qb.push(" WHERE e.is_active = TRUE");
    for filter in filters {
        match filter {
            EntryFilter::ClassEq(id) => {
                qb.push(" AND e.class_id = ").push_bind(*id);
            }
            EntryFilter::TownIn(ids) => {
                qb.push(" AND e.town_id = ANY(").push_bind(ids.clone()).push(")");
            }
            EntryFilter::DateFrom(d) => {
                qb.push(" AND e.date >= ").push_bind(*d);
            }
            EntryFilter::DateTo(d) => {
                qb.push(" AND e.date <= ").push_bind(*d);
            }
            EntryFilter::DeliveryPresent => {
                qb.push(" AND e.delivery_month IS NOT NULL AND e.delivery_year IS NOT NULL");
            }
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, order: &[EntryOrder]) {
    if order.is_empty() {
        return;
    }
    let clauses: Vec<&str> = order
        .iter()
        .map(|o| match o {
            EntryOrder::DateAsc => "e.date ASC",
            EntryOrder::DateDesc => "e.date DESC",
            EntryOrder::DeliveryYearDesc => "e.delivery_year DESC NULLS LAST",
        })
        .collect();
    qb.push(" ORDER BY ").push(clauses.join(", "));
}

fn entries_sql(query: &EntryQuery) -> QueryBuilder<'static, Postgres> {
    let name_col = if query.with_elevator_name {
        "el.name"
    } else {
        "NULL::text"
    };
    let mut qb = QueryBuilder::new(format!(
        "SELECT e.id, e.date, e.cash_price::float8, e.class_id, e.elevator_id, {name_col}, \
         e.town_id, e.delivery_month, e.delivery_year, e.is_active \
         FROM price_entries e"
    ));
    if query.with_elevator_name {
        qb.push(" LEFT JOIN elevators el ON el.id = e.elevator_id");
    }
    push_filters(&mut qb, &query.filters);
    push_order(&mut qb, &query.order);
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
    qb
}

#[async_trait::async_trait]
impl PriceRepository for PgRepository {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<PriceEntry>, FetchError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }

        let t0 = std::time::Instant::now();
        let mut qb = entries_sql(query);
        let rows = qb
            .build_query_as::<EntryRow>()
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FetchError::new(SOURCE, "query_entries", e))?;

        tracing::debug!(
            rows = rows.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "price_entries query"
        );

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    date,
                    cash_price,
                    class_id,
                    elevator_id,
                    elevator_name,
                    town_id,
                    delivery_month,
                    delivery_year,
                    is_active,
                )| PriceEntry {
                    id,
                    date,
                    cash_price,
                    class_id,
                    elevator_id,
                    elevator_name,
                    town_id,
                    delivery_month,
                    delivery_year,
                    is_active,
                },
            )
            .collect())
    }

    async fn count_entries(&self, query: &EntryQuery) -> Result<u64, FetchError> {
        if query.matches_nothing() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM price_entries e");
        push_filters(&mut qb, &query.filters);
        let count: i64 = qb
            .build_query_scalar()
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FetchError::new(SOURCE, "count_entries", e))?;
        Ok(count.max(0) as u64)
    }

    async fn crop_classes(&self) -> Result<Vec<CropClass>, FetchError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, bool)>(
            "SELECT id, name, code, is_active \
             FROM crop_classes \
             WHERE is_active = TRUE \
             ORDER BY name ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FetchError::new(SOURCE, "crop_classes", e))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, code, is_active)| CropClass {
                id,
                name,
                code,
                is_active,
            })
            .collect())
    }

    async fn regions(&self) -> Result<Vec<Region>, FetchError> {
        let rows = sqlx::query_as::<_, (Uuid, String, bool)>(
            "SELECT id, name, is_active \
             FROM regions \
             WHERE is_active = TRUE \
             ORDER BY name ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FetchError::new(SOURCE, "regions", e))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, is_active)| Region {
                id,
                name,
                is_active,
            })
            .collect())
    }

    async fn region_town_ids(&self, region_id: Uuid) -> Result<Vec<Uuid>, FetchError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT town_id \
             FROM town_regions \
             WHERE region_id = $1 AND is_active = TRUE \
             ORDER BY town_id",
        )
        .persistent(false)
        .bind(region_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FetchError::new(SOURCE, "region_town_ids", e))
    }
}

use crate::config::Settings;
use crate::domain::{CropClass, PriceEntry, Region, Session};
use crate::repository::{EntryFilter, EntryOrder, EntryQuery, FetchError, PriceRepository};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const SOURCE: &str = "rest";
const REST_PATH: &str = "/rest/v1";
const ENTRY_COLUMNS: &str =
    "id,date,cash_price,class_id,elevator_id,town_id,delivery_month,delivery_year,is_active";

/// Table service of the hosted store (PostgREST dialect).
#[derive(Debug, Clone)]
pub struct RestRepository {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bearer: String,
}

#[derive(Debug, Deserialize)]
struct EntryRow {
    id: Uuid,
    date: NaiveDate,
    cash_price: f64,
    class_id: Uuid,
    elevator_id: Uuid,
    town_id: Uuid,
    delivery_month: Option<String>,
    delivery_year: Option<i32>,
    is_active: bool,
    #[serde(default)]
    elevators: Option<EmbeddedName>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TownIdRow {
    town_id: Uuid,
}

impl RestRepository {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_supabase_url()?.to_string();
        let api_key = settings.require_supabase_api_key()?.to_string();

        // No timeout unless configured: a hung fetch stalls only its own computation.
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = std::env::var("REST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .context("failed to build store http client")?;

        Ok(Self {
            http,
            bearer: api_key.clone(),
            base_url,
            api_key,
        })
    }

    /// Clone that forwards the caller's bearer so row-level policies apply.
    pub fn for_session(&self, session: &Session) -> Self {
        Self {
            bearer: session.access_token.clone(),
            ..self.clone()
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}{}/{}", self.base_url.trim_end_matches('/'), REST_PATH, table)
    }

    fn headers(&self) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.api_key).map_err(|e| e.to_string())?,
        );
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.bearer)).map_err(|e| e.to_string())?,
        );
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(String, String)],
        operation: &'static str,
    ) -> Result<Vec<T>, FetchError> {
        let headers = self
            .headers()
            .map_err(|e| FetchError::new(SOURCE, operation, e))?;
        let res = self
            .http
            .get(self.url(table))
            .headers(headers)
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::new(SOURCE, operation, format!("request failed: {e}")))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| FetchError::new(SOURCE, operation, format!("failed to read body: {e}")))?;
        if !status.is_success() {
            return Err(FetchError::new(SOURCE, operation, format!("HTTP {status}: {text}")));
        }

        serde_json::from_str::<Vec<T>>(&text)
            .map_err(|e| FetchError::new(SOURCE, operation, format!("undecodable rows: {e}")))
    }
}

fn entry_params(query: &EntryQuery) -> Vec<(String, String)> {
    let select = if query.with_elevator_name {
        format!("{ENTRY_COLUMNS},elevators(name)")
    } else {
        ENTRY_COLUMNS.to_string()
    };
    let mut params = vec![
        ("select".to_string(), select),
        ("is_active".to_string(), "eq.true".to_string()),
    ];
    params.extend(filter_params(&query.filters));

    if !query.order.is_empty() {
        let order: Vec<&str> = query
            .order
            .iter()
            .map(|o| match o {
                EntryOrder::DateAsc => "date.asc",
                EntryOrder::DateDesc => "date.desc",
                EntryOrder::DeliveryYearDesc => "delivery_year.desc.nullslast",
            })
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn filter_params(filters: &[EntryFilter]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for filter in filters {
        match filter {
            EntryFilter::ClassEq(id) => out.push(("class_id".to_string(), format!("eq.{id}"))),
            EntryFilter::TownIn(ids) => {
                let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                out.push(("town_id".to_string(), format!("in.({})", list.join(","))));
            }
            EntryFilter::DateFrom(d) => out.push(("date".to_string(), format!("gte.{d}"))),
            EntryFilter::DateTo(d) => out.push(("date".to_string(), format!("lte.{d}"))),
            EntryFilter::DeliveryPresent => {
                out.push(("delivery_month".to_string(), "not.is.null".to_string()));
                out.push(("delivery_year".to_string(), "not.is.null".to_string()));
            }
        }
    }
    out
}

/// Total from a `Content-Range` header such as `0-0/42` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse::<u64>().ok()
}

#[async_trait::async_trait]
impl PriceRepository for RestRepository {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<PriceEntry>, FetchError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }

        let rows: Vec<EntryRow> = self
            .get_rows("price_entries", &entry_params(query), "query_entries")
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| PriceEntry {
                id: r.id,
                date: r.date,
                cash_price: r.cash_price,
                class_id: r.class_id,
                elevator_id: r.elevator_id,
                elevator_name: r.elevators.map(|e| e.name),
                town_id: r.town_id,
                delivery_month: r.delivery_month,
                delivery_year: r.delivery_year,
                is_active: r.is_active,
            })
            .collect())
    }

    async fn count_entries(&self, query: &EntryQuery) -> Result<u64, FetchError> {
        const OP: &str = "count_entries";
        if query.matches_nothing() {
            return Ok(0);
        }

        let mut params = vec![
            ("select".to_string(), "id".to_string()),
            ("is_active".to_string(), "eq.true".to_string()),
        ];
        params.extend(filter_params(&query.filters));

        let mut headers = self.headers().map_err(|e| FetchError::new(SOURCE, OP, e))?;
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        let res = self
            .http
            .head(self.url("price_entries"))
            .headers(headers)
            .query(&params)
            .send()
            .await
            .map_err(|e| FetchError::new(SOURCE, OP, format!("request failed: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::new(SOURCE, OP, format!("HTTP {status}")));
        }

        res.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| FetchError::new(SOURCE, OP, "missing or invalid Content-Range"))
    }

    async fn crop_classes(&self) -> Result<Vec<CropClass>, FetchError> {
        let params = [
            ("select".to_string(), "id,name,code,is_active".to_string()),
            ("is_active".to_string(), "eq.true".to_string()),
            ("order".to_string(), "name.asc".to_string()),
        ];
        self.get_rows("crop_classes", &params, "crop_classes").await
    }

    async fn regions(&self) -> Result<Vec<Region>, FetchError> {
        let params = [
            ("select".to_string(), "id,name,is_active".to_string()),
            ("is_active".to_string(), "eq.true".to_string()),
            ("order".to_string(), "name.asc".to_string()),
        ];
        self.get_rows("regions", &params, "regions").await
    }

    async fn region_town_ids(&self, region_id: Uuid) -> Result<Vec<Uuid>, FetchError> {
        let params = [
            ("select".to_string(), "town_id".to_string()),
            ("region_id".to_string(), format!("eq.{region_id}")),
            ("is_active".to_string(), "eq.true".to_string()),
        ];
        let rows: Vec<TownIdRow> = self
            .get_rows("town_regions", &params, "region_town_ids")
            .await?;

        let mut out: Vec<Uuid> = Vec::with_capacity(rows.len());
        for row in rows {
            if !out.contains(&row.town_id) {
                out.push(row.town_id);
            }
        }
        Ok(out)
    }
}

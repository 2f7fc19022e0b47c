use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub average_price: f64,
}

/// Trailing-window price trend for one crop class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrendReport {
    pub class_id: Uuid,
    pub class_name: String,
    pub class_code: String,
    /// Ascending by date, one point per distinct date.
    pub points: Vec<TrendPoint>,
    pub absolute_change: f64,
    /// `None` when the first point's price is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevatorPerformanceEntry {
    pub class_id: Uuid,
    pub class_name: String,
    pub region_id: Uuid,
    pub region_name: String,
    /// 1-based position within its list for this (class, region) pair.
    pub rank: u32,
    pub elevator_id: Uuid,
    pub elevator_name: String,
    pub average_price: f64,
    pub entry_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMonthTrend {
    pub delivery_month: String,
    pub delivery_year: i32,
    /// `Mon/YYYY`, e.g. `Dec/2024`.
    pub label: String,
    pub average_price: f64,
    pub entry_count: u64,
    pub sort_key: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_entries: u64,
    pub active_crop_classes: u64,
    pub recent_entries: u64,
    pub recent_average_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Computation {
    Stats,
    PriceTrends,
    ElevatorPerformance,
    DeliveryMonthTrends,
}

impl Computation {
    pub fn as_str(self) -> &'static str {
        match self {
            Computation::Stats => "stats",
            Computation::PriceTrends => "price_trends",
            Computation::ElevatorPerformance => "elevator_performance",
            Computation::DeliveryMonthTrends => "delivery_month_trends",
        }
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationError {
    pub computation: Computation,
    pub message: String,
}

/// Everything the dashboard renders, produced in one composition pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub stats: DashboardStats,
    pub price_trends: Vec<PriceTrendReport>,
    pub top_elevators: Vec<ElevatorPerformanceEntry>,
    pub bottom_elevators: Vec<ElevatorPerformanceEntry>,
    pub delivery_month_trends: Vec<DeliveryMonthTrend>,
    pub loading: bool,
    pub error: Option<String>,
    pub errors: Vec<ComputationError>,
}

impl DashboardSnapshot {
    /// Settled snapshot with no data and no error.
    pub fn empty() -> Self {
        Self {
            stats: DashboardStats::default(),
            price_trends: Vec::new(),
            top_elevators: Vec::new(),
            bottom_elevators: Vec::new(),
            delivery_month_trends: Vec::new(),
            loading: false,
            error: None,
            errors: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, computation: Computation, message: String) {
        self.error = Some(message.clone());
        self.errors.push(ComputationError {
            computation,
            message,
        });
    }
}

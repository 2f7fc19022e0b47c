use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single cash price observation for one crop class at one elevator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub id: Uuid,
    pub date: NaiveDate,
    pub cash_price: f64,
    pub class_id: Uuid,
    pub elevator_id: Uuid,
    /// Populated only when the query asked for the elevator join.
    #[serde(default)]
    pub elevator_name: Option<String>,
    pub town_id: Uuid,
    #[serde(default)]
    pub delivery_month: Option<String>,
    #[serde(default)]
    pub delivery_year: Option<i32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropClass {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Town {
    pub id: Uuid,
    pub name: String,
}

/// Many-to-many link between towns and regions. Inactive links are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownRegion {
    pub town_id: Uuid,
    pub region_id: Uuid,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Elevator {
    pub id: Uuid,
    pub name: String,
}

fn default_active() -> bool {
    true
}

/// Delivery month tokens as stored on price entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeliveryMonth {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl DeliveryMonth {
    pub const ALL: [DeliveryMonth; 12] = [
        DeliveryMonth::Jan,
        DeliveryMonth::Feb,
        DeliveryMonth::Mar,
        DeliveryMonth::Apr,
        DeliveryMonth::May,
        DeliveryMonth::Jun,
        DeliveryMonth::Jul,
        DeliveryMonth::Aug,
        DeliveryMonth::Sep,
        DeliveryMonth::Oct,
        DeliveryMonth::Nov,
        DeliveryMonth::Dec,
    ];

    /// Case-sensitive match on the three-letter token; surrounding whitespace is ignored.
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == token.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMonth::Jan => "Jan",
            DeliveryMonth::Feb => "Feb",
            DeliveryMonth::Mar => "Mar",
            DeliveryMonth::Apr => "Apr",
            DeliveryMonth::May => "May",
            DeliveryMonth::Jun => "Jun",
            DeliveryMonth::Jul => "Jul",
            DeliveryMonth::Aug => "Aug",
            DeliveryMonth::Sep => "Sep",
            DeliveryMonth::Oct => "Oct",
            DeliveryMonth::Nov => "Nov",
            DeliveryMonth::Dec => "Dec",
        }
    }

    /// Zero-based calendar position (Jan = 0).
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Monotonic chronological key: `year * 100 + index`.
    pub fn sort_key(self, year: i32) -> i64 {
        i64::from(year) * 100 + i64::from(self.index())
    }
}

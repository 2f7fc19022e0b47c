pub mod entry;
pub mod report;
pub mod session;

pub use entry::{CropClass, DeliveryMonth, Elevator, PriceEntry, Region, Town, TownRegion};
pub use report::{
    Computation, ComputationError, DashboardSnapshot, DashboardStats, DeliveryMonthTrend,
    ElevatorPerformanceEntry, PriceTrendReport, TrendPoint,
};
pub use session::Session;

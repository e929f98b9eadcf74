//! Raw NEM tables → typed price points.

pub mod forecast;
pub mod settlement;
pub mod wide;

pub use forecast::{forecast_points, AVERAGE_REGION};
pub use settlement::{settled_prices, settlement_set, MAINLAND_REGION, MAINLAND_REGIONS};
pub use wide::{WideColumn, WidePrices};

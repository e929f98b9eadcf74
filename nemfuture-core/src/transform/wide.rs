//! Wide (one column per market and region) ↔ long (one point per value) prices.
//!
//! NemWeb publishes one row per region with a column per market; charts and
//! spreadsheets want one row per interval with a column per market-region
//! pair. `WidePrices` is the column-oriented form.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::domain::{ForecastPoint, Market, SettledPrice};

/// One market-region column of a wide table.
#[derive(Debug, Clone, PartialEq)]
pub struct WideColumn {
    pub market: Market,
    pub region: String,
    pub values: Vec<Option<f64>>,
}

impl WideColumn {
    /// Header such as `RRP_NSW` or `RAISEREGRRP_MAINLAND_AVG`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.market.price_column(), self.region)
    }
}

/// Prices in column-oriented form.
///
/// Row `i` is keyed by `(issued_at[i], interval[i])`; settled prices have no
/// issue time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidePrices {
    pub issued_at: Vec<Option<NaiveDateTime>>,
    pub interval: Vec<NaiveDateTime>,
    pub columns: Vec<WideColumn>,
}

type RowKey = (Option<NaiveDateTime>, NaiveDateTime);

impl WidePrices {
    fn pivot<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = (RowKey, (Market, &'a str), Option<f64>)>,
    {
        let mut grid: BTreeMap<(Market, &str), BTreeMap<RowKey, Option<f64>>> = BTreeMap::new();
        let mut keys: BTreeMap<RowKey, usize> = BTreeMap::new();
        for (key, column, value) in cells {
            keys.insert(key, 0);
            grid.entry(column).or_default().insert(key, value);
        }
        for (i, slot) in keys.values_mut().enumerate() {
            *slot = i;
        }

        let columns = grid
            .into_iter()
            .map(|((market, region), cells)| {
                let mut values = vec![None; keys.len()];
                for (key, value) in cells {
                    values[keys[&key]] = value;
                }
                WideColumn {
                    market,
                    region: region.to_string(),
                    values,
                }
            })
            .collect();

        let (issued_at, interval) = keys.into_keys().unzip();
        Self {
            issued_at,
            interval,
            columns,
        }
    }

    /// One row per `(issued_at, target_interval)`.
    pub fn from_forecasts(points: &[ForecastPoint]) -> Self {
        Self::pivot(points.iter().map(|p| {
            (
                (Some(p.issued_at), p.target_interval),
                (p.market, p.region.as_str()),
                p.price,
            )
        }))
    }

    /// One row per settlement interval.
    pub fn from_settled(prices: &[SettledPrice]) -> Self {
        Self::pivot(
            prices
                .iter()
                .map(|p| ((None, p.interval5), (p.market, p.region.as_str()), Some(p.price))),
        )
    }

    pub fn len(&self) -> usize {
        self.interval.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interval.is_empty()
    }

    pub fn column(&self, market: Market, region: &str) -> Option<&WideColumn> {
        self.columns
            .iter()
            .find(|c| c.market == market && c.region == region)
    }

    fn melt(&self) -> impl Iterator<Item = (Option<NaiveDateTime>, NaiveDateTime, &WideColumn, f64)> + '_ {
        self.columns.iter().flat_map(move |col| {
            col.values.iter().enumerate().filter_map(move |(i, &v)| {
                v.map(|price| (self.issued_at[i], self.interval[i], col, price))
            })
        })
    }

    /// Long forecast points for every defined value of rows with an issue time.
    pub fn to_forecasts(&self) -> Vec<ForecastPoint> {
        self.melt()
            .filter_map(|(issued, interval, col, price)| {
                issued.map(|issued_at| ForecastPoint {
                    issued_at,
                    target_interval: interval,
                    region: col.region.clone(),
                    market: col.market,
                    price: Some(price),
                })
            })
            .collect()
    }

    /// Long settled prices for every defined value.
    pub fn to_settled(&self) -> Vec<SettledPrice> {
        self.melt()
            .map(|(_, interval5, col, price)| SettledPrice {
                interval5,
                region: col.region.clone(),
                market: col.market,
                price,
            })
            .collect()
    }
}

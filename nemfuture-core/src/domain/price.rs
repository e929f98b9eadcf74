//! Forecast and settled price points.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::time;

/// Energy plus the eight FCAS markets priced in NEM price tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Market {
    Energy,
    Raise6Sec,
    Raise60Sec,
    Raise5Min,
    RaiseReg,
    Lower6Sec,
    Lower60Sec,
    Lower5Min,
    LowerReg,
}

impl Market {
    pub const ALL: [Market; 9] = [
        Market::Energy,
        Market::Raise6Sec,
        Market::Raise60Sec,
        Market::Raise5Min,
        Market::RaiseReg,
        Market::Lower6Sec,
        Market::Lower60Sec,
        Market::Lower5Min,
        Market::LowerReg,
    ];

    /// Price column carrying this market in NEM price tables.
    pub fn price_column(self) -> &'static str {
        match self {
            Market::Energy => "RRP",
            Market::Raise6Sec => "RAISE6SECRRP",
            Market::Raise60Sec => "RAISE60SECRRP",
            Market::Raise5Min => "RAISE5MINRRP",
            Market::RaiseReg => "RAISEREGRRP",
            Market::Lower6Sec => "LOWER6SECRRP",
            Market::Lower60Sec => "LOWER60SECRRP",
            Market::Lower5Min => "LOWER5MINRRP",
            Market::LowerReg => "LOWERREGRRP",
        }
    }

    pub fn is_fcas(self) -> bool {
        self != Market::Energy
    }

    fn label(self) -> &'static str {
        match self {
            Market::Energy => "Energy",
            Market::Raise6Sec => "RAISE6SEC",
            Market::Raise60Sec => "RAISE60SEC",
            Market::Raise5Min => "RAISE5MIN",
            Market::RaiseReg => "RAISEREG",
            Market::Lower6Sec => "LOWER6SEC",
            Market::Lower60Sec => "LOWER60SEC",
            Market::Lower5Min => "LOWER5MIN",
            Market::LowerReg => "LOWERREG",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Market::ALL
            .into_iter()
            .find(|m| {
                m.label().eq_ignore_ascii_case(wanted) || m.price_column().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown market '{s}'"))
    }
}

/// Normalise a NEM region id: `NSW1` → `NSW`.
pub fn normalize_region(raw: &str) -> String {
    raw.trim().replace('1', "")
}

/// One forecast price for one trading interval, as issued at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub issued_at: NaiveDateTime,
    /// Period-ending 30-minute boundary the forecast is for.
    pub target_interval: NaiveDateTime,
    pub region: String,
    pub market: Market,
    pub price: Option<f64>,
}

impl ForecastPoint {
    /// A forecast only means something for an interval after its issue time.
    pub fn is_future(&self) -> bool {
        self.target_interval > self.issued_at
    }
}

/// One settled dispatch interval with its trading-interval mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualPoint {
    pub interval5: NaiveDateTime,
    pub interval30: NaiveDateTime,
    pub region: String,
    pub market: Market,
    pub settled_5min: f64,
    pub settled_30min: f64,
}

/// A settled 5-minute price before trading-interval means are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledPrice {
    pub interval5: NaiveDateTime,
    pub region: String,
    pub market: Market,
    pub price: f64,
}

/// Settled prices with `settled_30min` kept equal to the mean of every
/// 5-minute price sharing `(interval30, region, market)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementSet {
    five_minute: BTreeMap<(NaiveDateTime, String, Market), f64>,
    points: Vec<ActualPoint>,
}

impl SettlementSet {
    pub fn from_prices<I>(prices: I) -> Self
    where
        I: IntoIterator<Item = SettledPrice>,
    {
        let mut set = Self::default();
        set.extend(prices);
        set
    }

    /// Add or replace 5-minute prices and recompute every trading-interval mean.
    pub fn extend<I>(&mut self, prices: I)
    where
        I: IntoIterator<Item = SettledPrice>,
    {
        for p in prices {
            self.five_minute.insert((p.interval5, p.region, p.market), p.price);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut groups: BTreeMap<(NaiveDateTime, &str, Market), (f64, usize)> = BTreeMap::new();
        for ((interval5, region, market), price) in &self.five_minute {
            let key = (time::trading_interval(*interval5), region.as_str(), *market);
            let entry = groups.entry(key).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
        }

        self.points = self
            .five_minute
            .iter()
            .map(|((interval5, region, market), price)| {
                let interval30 = time::trading_interval(*interval5);
                let (sum, n) = groups[&(interval30, region.as_str(), *market)];
                ActualPoint {
                    interval5: *interval5,
                    interval30,
                    region: region.clone(),
                    market: *market,
                    settled_5min: *price,
                    settled_30min: sum / n as f64,
                }
            })
            .collect();
    }

    /// Points ordered by `(interval5, region, market)`.
    pub fn points(&self) -> &[ActualPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<ActualPoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

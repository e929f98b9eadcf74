//! `TRADINGPRICE` rows → settled prices.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::domain::{normalize_region, Market, RawTable, SettledPrice, SettlementSet};
use crate::source::SourceError;
use crate::time;

/// Region label of the mainland FCAS mean.
pub const MAINLAND_REGION: &str = "MAINLAND_AVG";

/// Regions averaged into [`MAINLAND_REGION`]; Tasmania is excluded.
pub const MAINLAND_REGIONS: [&str; 4] = ["SA", "VIC", "QLD", "NSW"];

/// Settled 5-minute prices, one per interval, region and market.
///
/// Empty or unparseable prices are skipped. With `include_mainland` the FCAS
/// markets also get a [`MAINLAND_REGION`] mean over the mainland regions.
pub fn settled_prices(table: &RawTable, include_mainland: bool) -> Result<Vec<SettledPrice>, SourceError> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let interval_idx = table.require_column("SETTLEMENTDATE")?;
    let region_idx = table.require_column("REGIONID")?;
    let markets: Vec<(Market, usize)> = Market::ALL
        .into_iter()
        .filter_map(|m| table.column_index(m.price_column()).map(|i| (m, i)))
        .collect();
    if markets.is_empty() {
        return Err(SourceError::MissingColumn {
            column: Market::Energy.price_column().to_string(),
        });
    }

    let mut prices = Vec::with_capacity(table.len() * markets.len());
    for row in table.rows() {
        let Some(interval5) = time::parse_field(&row[interval_idx]) else {
            continue;
        };
        let region = normalize_region(&row[region_idx]);
        for &(market, idx) in &markets {
            if let Ok(price) = row[idx].trim().parse::<f64>() {
                prices.push(SettledPrice {
                    interval5,
                    region: region.clone(),
                    market,
                    price,
                });
            }
        }
    }

    if include_mainland {
        let mainland = mainland_average(&prices);
        prices.extend(mainland);
    }
    Ok(prices)
}

fn mainland_average(prices: &[SettledPrice]) -> Vec<SettledPrice> {
    let mut groups: BTreeMap<(NaiveDateTime, Market), (f64, usize)> = BTreeMap::new();
    for p in prices
        .iter()
        .filter(|p| p.market.is_fcas() && MAINLAND_REGIONS.contains(&p.region.as_str()))
    {
        let entry = groups.entry((p.interval5, p.market)).or_insert((0.0, 0));
        entry.0 += p.price;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((interval5, market), (sum, n))| SettledPrice {
            interval5,
            region: MAINLAND_REGION.to_string(),
            market,
            price: sum / n as f64,
        })
        .collect()
}

/// Settled prices with trading-interval means attached.
pub fn settlement_set(table: &RawTable, include_mainland: bool) -> Result<SettlementSet, SourceError> {
    Ok(SettlementSet::from_prices(settled_prices(table, include_mainland)?))
}

//! `PREDISPATCHPRICE` rows → forecast points.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{normalize_region, ForecastPoint, Market, RawTable};
use crate::source::SourceError;
use crate::time;

/// Region label of the all-region mean.
pub const AVERAGE_REGION: &str = "AVG";

/// Convert predispatch price rows into one point per region and market.
///
/// Intervention runs are dropped. Markets whose price column is absent are
/// skipped; empty price fields become `None`. With `include_average` an
/// [`AVERAGE_REGION`] point is added per issue time, interval and market.
pub fn forecast_points(table: &RawTable, include_average: bool) -> Result<Vec<ForecastPoint>, SourceError> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let region_idx = table.require_column("REGIONID")?;
    let issued_idx = table.require_column("LASTCHANGED")?;
    let target_idx = table.require_column("DATETIME")?;
    let intervention_idx = table.column_index("INTERVENTION");
    let markets: Vec<(Market, usize)> = Market::ALL
        .into_iter()
        .filter_map(|m| table.column_index(m.price_column()).map(|i| (m, i)))
        .collect();
    if markets.is_empty() {
        return Err(SourceError::MissingColumn {
            column: Market::Energy.price_column().to_string(),
        });
    }

    // Keyed so duplicate rows (same issue, interval, region) collapse to their mean.
    let mut cells: BTreeMap<(NaiveDateTime, NaiveDateTime, String, Market), (f64, usize)> = BTreeMap::new();
    let mut blanks: BTreeSet<(NaiveDateTime, NaiveDateTime, String, Market)> = BTreeSet::new();
    let mut skipped = 0usize;

    for row in table.rows() {
        if let Some(i) = intervention_idx {
            if !row[i].trim().parse::<f64>().is_ok_and(|v| v < 1.0) {
                continue;
            }
        }
        let (Some(issued), Some(target)) = (time::parse_field(&row[issued_idx]), time::parse_field(&row[target_idx])) else {
            skipped += 1;
            continue;
        };
        let region = normalize_region(&row[region_idx]);

        for &(market, idx) in &markets {
            let key = (issued, target, region.clone(), market);
            match row[idx].trim().parse::<f64>() {
                Ok(price) => {
                    let cell = cells.entry(key).or_insert((0.0, 0));
                    cell.0 += price;
                    cell.1 += 1;
                }
                Err(_) => {
                    blanks.insert(key);
                }
            }
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "forecast rows without parseable timestamps");
    }

    let mut points: Vec<ForecastPoint> = cells
        .iter()
        .map(|((issued, target, region, market), (sum, n))| ForecastPoint {
            issued_at: *issued,
            target_interval: *target,
            region: region.clone(),
            market: *market,
            price: Some(sum / *n as f64),
        })
        .collect();
    points.extend(
        blanks
            .into_iter()
            .filter(|k| !cells.contains_key(k))
            .map(|(issued_at, target_interval, region, market)| ForecastPoint {
                issued_at,
                target_interval,
                region,
                market,
                price: None,
            }),
    );

    if include_average {
        let averages = region_average(&points);
        points.extend(averages);
    }

    points.sort_by(|a, b| {
        (a.issued_at, a.target_interval, &a.region, a.market).cmp(&(b.issued_at, b.target_interval, &b.region, b.market))
    });
    Ok(points)
}

/// Mean over every region's defined price per issue time, interval and market.
fn region_average(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut groups: BTreeMap<(NaiveDateTime, NaiveDateTime, Market), (f64, usize)> = BTreeMap::new();
    for p in points.iter().filter(|p| p.region != AVERAGE_REGION) {
        let entry = groups
            .entry((p.issued_at, p.target_interval, p.market))
            .or_insert((0.0, 0));
        if let Some(price) = p.price {
            entry.0 += price;
            entry.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((issued_at, target_interval, market), (sum, n))| ForecastPoint {
            issued_at,
            target_interval,
            region: AVERAGE_REGION.to_string(),
            market,
            price: (n > 0).then(|| sum / n as f64),
        })
        .collect()
}

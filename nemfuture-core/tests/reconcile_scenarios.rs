//! Reconciliation scenarios from raw NEM rows to frames.
//!
//! Tests:
//! 1. A forecast ahead of the settlement frontier keeps null actuals
//! 2. Later issues supersede nothing: every issue time is its own frame
//! 3. FCAS markets reconcile against the mainland mean
//! 4. Wide price tables round-trip through the long form

use chrono::NaiveDateTime;

use nemfuture_core::domain::{Market, RawTable};
use nemfuture_core::reconcile::{reconcile, ReconcileOptions};
use nemfuture_core::time;
use nemfuture_core::transform::{
    forecast_points, settled_prices, settlement_set, WidePrices, MAINLAND_REGION,
};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn ts(s: &str) -> NaiveDateTime {
    time::parse_field(s).unwrap()
}

fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
    RawTable::new(
        headers.iter().map(|s| s.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect(),
    )
}

fn predispatch(rows: &[&[&str]]) -> RawTable {
    table(
        &["LASTCHANGED", "DATETIME", "REGIONID", "INTERVENTION", "RRP", "RAISEREGRRP"],
        rows,
    )
}

fn trading(rows: &[&[&str]]) -> RawTable {
    table(&["SETTLEMENTDATE", "REGIONID", "RRP", "RAISEREGRRP"], rows)
}

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[test]
fn forecast_ahead_of_frontier_keeps_null_actuals() {
    let forecasts = forecast_points(
        &predispatch(&[&["2024/01/15 09:00:00", "2024/01/15 09:30:00", "NSW1", "0", "100", "9"]]),
        false,
    )
    .unwrap();
    let settlement = settlement_set(
        &trading(&[&["2024/01/15 09:05:00", "NSW1", "80", "7"]]),
        false,
    )
    .unwrap();

    let series = reconcile(
        &forecasts,
        settlement.points(),
        &ReconcileOptions::for_region("NSW").with_market(Market::Energy),
    );

    let row = series
        .rows()
        .iter()
        .find(|r| r.issued_at == ts("2024/01/15 09:00:00") && r.interval5 == ts("2024/01/15 09:30:00"))
        .unwrap();
    assert_eq!(row.forecast_price, Some(100.0));
    assert_eq!(row.settled_5min, None);
    assert_eq!(row.settled_30min, None);

    // 09:05 opens the 09:30 trading interval, so it carries the forecast too.
    let settled = series
        .rows()
        .iter()
        .find(|r| r.interval5 == ts("2024/01/15 09:05:00"))
        .unwrap();
    assert_eq!(settled.forecast_price, Some(100.0));
    assert_eq!(settled.settled_5min, Some(80.0));
    assert_eq!(settled.settled_30min, Some(80.0));
    assert_eq!(
        series.settlement_frontier(ts("2024/01/15 09:00:00")),
        Some(ts("2024/01/15 09:05:00"))
    );
}

#[test]
fn every_issue_time_is_a_frame() {
    let forecasts = forecast_points(
        &predispatch(&[
            &["2024/01/15 09:00:00", "2024/01/15 10:00:00", "SA1", "0", "120", ""],
            &["2024/01/15 09:30:00", "2024/01/15 10:00:00", "SA1", "0", "140", ""],
            // Intervention runs are ignored.
            &["2024/01/15 09:30:00", "2024/01/15 10:00:00", "SA1", "1", "999", ""],
        ]),
        false,
    )
    .unwrap();
    let settlement = settlement_set(
        &trading(&[
            &["2024/01/15 09:35:00", "SA1", "130", ""],
            &["2024/01/15 09:40:00", "SA1", "150", ""],
        ]),
        false,
    )
    .unwrap();

    let series = reconcile(
        &forecasts,
        settlement.points(),
        &ReconcileOptions::for_region("SA").with_market(Market::Energy),
    );

    assert_eq!(
        series.frame_labels(),
        vec!["20240115 09:00".to_string(), "20240115 09:30".to_string()]
    );
    for (issued_at, rows) in series.frames() {
        let expected = if issued_at == ts("2024/01/15 09:00:00") { 120.0 } else { 140.0 };
        let at_1000 = rows
            .iter()
            .find(|r| r.interval5 == ts("2024/01/15 10:00:00"))
            .unwrap();
        assert_eq!(at_1000.forecast_price, Some(expected));

        // Both settled intervals appear in both frames with the 30-minute mean.
        let settled: Vec<_> = rows.iter().filter(|r| r.has_settlement()).collect();
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|r| r.settled_30min == Some(140.0)));
    }
}

#[test]
fn fcas_reconciles_against_mainland_mean() {
    let forecasts = forecast_points(
        &predispatch(&[
            &["2024/01/15 09:00:00", "2024/01/15 09:30:00", "NSW1", "0", "100", "12"],
            &["2024/01/15 09:00:00", "2024/01/15 09:30:00", "VIC1", "0", "90", "8"],
        ]),
        true,
    )
    .unwrap();
    let prices = settled_prices(
        &trading(&[
            &["2024/01/15 09:05:00", "NSW1", "80", "10"],
            &["2024/01/15 09:05:00", "VIC1", "70", "20"],
            &["2024/01/15 09:05:00", "TAS1", "60", "90"],
        ]),
        true,
    )
    .unwrap();

    let mainland: Vec<_> = prices
        .iter()
        .filter(|p| p.region == MAINLAND_REGION)
        .collect();
    assert_eq!(mainland.len(), 1);
    assert_eq!(mainland[0].market, Market::RaiseReg);
    assert!((mainland[0].price - 15.0).abs() < 1e-9);

    let settlement = nemfuture_core::domain::SettlementSet::from_prices(prices);
    let series = reconcile(
        &forecasts,
        settlement.points(),
        &ReconcileOptions::for_region(MAINLAND_REGION).with_market(Market::RaiseReg),
    );

    // Forecasts average to "AVG", not the mainland label, so only actuals join.
    assert!(series.rows().iter().all(|r| r.forecast_price.is_none()));
    assert_eq!(series.len(), 1);
    assert_eq!(series.rows()[0].settled_5min, Some(15.0));
}

#[test]
fn wide_prices_round_trip_through_long_form() {
    let forecasts = forecast_points(
        &predispatch(&[
            &["2024/01/15 09:00:00", "2024/01/15 09:30:00", "NSW1", "0", "100", "12"],
            &["2024/01/15 09:00:00", "2024/01/15 10:00:00", "NSW1", "0", "110", ""],
            &["2024/01/15 09:00:00", "2024/01/15 09:30:00", "QLD1", "0", "95", "11"],
        ]),
        false,
    )
    .unwrap();

    let wide = WidePrices::from_forecasts(&forecasts);
    assert_eq!(wide.len(), 2);
    let nsw = wide.column(Market::Energy, "NSW").unwrap();
    assert_eq!(nsw.name(), "RRP_NSW");
    assert_eq!(nsw.values, vec![Some(100.0), Some(110.0)]);
    let qld_reg = wide.column(Market::RaiseReg, "QLD").unwrap();
    assert_eq!(qld_reg.values, vec![Some(11.0), None]);

    let mut back = wide.to_forecasts();
    back.sort_by(|a, b| {
        (a.target_interval, &a.region, a.market).cmp(&(b.target_interval, &b.region, b.market))
    });
    let mut defined: Vec<_> = forecasts.into_iter().filter(|p| p.price.is_some()).collect();
    defined.sort_by(|a, b| {
        (a.target_interval, &a.region, a.market).cmp(&(b.target_interval, &b.region, b.market))
    });
    assert_eq!(back, defined);
}

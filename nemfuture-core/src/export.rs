//! Tabular output: polars DataFrames, Parquet files and CSV.

use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::domain::RawTable;
use crate::reconcile::ReconciledSeries;
use crate::time;
use crate::transform::WidePrices;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("dataframe: {0}")]
    Frame(String),

    #[error("write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

fn millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

fn datetime_column(name: &str, values: Vec<Option<i64>>) -> Result<Column, ExportError> {
    Column::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .map_err(|e| ExportError::Frame(format!("{name} cast: {e}")))
}

/// Reconciled series as a DataFrame, one row per series row.
pub fn series_frame(series: &ReconciledSeries) -> Result<DataFrame, ExportError> {
    let rows = series.rows();
    let stamp = |f: fn(&crate::reconcile::ReconciledRow) -> NaiveDateTime| -> Vec<Option<i64>> {
        rows.iter().map(|r| Some(millis(f(r)))).collect()
    };

    DataFrame::new(vec![
        datetime_column("issued_at", stamp(|r| r.issued_at))?,
        Column::new(
            "frame".into(),
            rows.iter().map(|r| r.frame_label()).collect::<Vec<_>>(),
        ),
        datetime_column("interval5", stamp(|r| r.interval5))?,
        datetime_column("interval30", stamp(|r| r.interval30))?,
        Column::new(
            "region".into(),
            rows.iter().map(|r| r.region.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "market".into(),
            rows.iter().map(|r| r.market.to_string()).collect::<Vec<_>>(),
        ),
        Column::new(
            "forecast_price".into(),
            rows.iter().map(|r| r.forecast_price).collect::<Vec<_>>(),
        ),
        Column::new(
            "settled_5min".into(),
            rows.iter().map(|r| r.settled_5min).collect::<Vec<_>>(),
        ),
        Column::new(
            "settled_30min".into(),
            rows.iter().map(|r| r.settled_30min).collect::<Vec<_>>(),
        ),
    ])
    .map_err(|e| ExportError::Frame(format!("series frame: {e}")))
}

/// Wide prices as a DataFrame: key columns then one column per market-region.
pub fn wide_frame(wide: &WidePrices) -> Result<DataFrame, ExportError> {
    let mut columns = Vec::with_capacity(wide.columns.len() + 2);
    if wide.issued_at.iter().any(Option::is_some) {
        columns.push(datetime_column(
            "issued_at",
            wide.issued_at.iter().map(|t| t.map(millis)).collect(),
        )?);
    }
    columns.push(datetime_column(
        "interval",
        wide.interval.iter().map(|t| Some(millis(*t))).collect(),
    )?);
    for col in &wide.columns {
        columns.push(Column::new(col.name().as_str().into(), col.values.clone()));
    }

    DataFrame::new(columns).map_err(|e| ExportError::Frame(format!("wide frame: {e}")))
}

/// Write a DataFrame to a Parquet file.
pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), ExportError> {
    let write_err = |reason: String| ExportError::Write {
        path: path.display().to_string(),
        reason,
    };
    let file = fs::File::create(path).map_err(|e| write_err(e.to_string()))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| write_err(e.to_string()))?;
    tracing::info!(path = %path.display(), rows = df.height(), "parquet written");
    Ok(())
}

fn field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Reconciled series as CSV with NEM-style timestamps.
pub fn write_series_csv<W: Write>(series: &ReconciledSeries, out: W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "issued_at",
        "frame",
        "interval5",
        "interval30",
        "region",
        "market",
        "forecast_price",
        "settled_5min",
        "settled_30min",
    ])?;
    for row in series.rows() {
        writer.write_record([
            time::format_field(row.issued_at),
            row.frame_label(),
            time::format_field(row.interval5),
            time::format_field(row.interval30),
            row.region.clone(),
            row.market.to_string(),
            field(row.forecast_price),
            field(row.settled_5min),
            field(row.settled_30min),
        ])?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// A raw table as CSV, headers first.
pub fn write_table_csv<W: Write>(table: &RawTable, out: W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(table.headers())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Wide prices as CSV.
pub fn write_wide_csv<W: Write>(wide: &WidePrices, out: W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    let with_issue = wide.issued_at.iter().any(Option::is_some);

    let mut header = Vec::with_capacity(wide.columns.len() + 2);
    if with_issue {
        header.push("issued_at".to_string());
    }
    header.push("interval".to_string());
    header.extend(wide.columns.iter().map(|c| c.name()));
    writer.write_record(&header)?;

    for i in 0..wide.len() {
        let mut record = Vec::with_capacity(header.len());
        if with_issue {
            record.push(wide.issued_at[i].map(time::format_field).unwrap_or_default());
        }
        record.push(time::format_field(wide.interval[i]));
        record.extend(wide.columns.iter().map(|c| field(c.values[i])));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActualPoint, ForecastPoint, Market, SettledPrice};
    use crate::reconcile::{reconcile, ReconcileOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn test_dir() -> std::path::PathBuf {
        let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("nemfuture_export_{}_{n}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ts(s: &str) -> NaiveDateTime {
        time::parse_field(s).unwrap()
    }

    fn sample_series() -> ReconciledSeries {
        reconcile(
            &[ForecastPoint {
                issued_at: ts("2024/01/15 09:00:00"),
                target_interval: ts("2024/01/15 09:30:00"),
                region: "NSW".into(),
                market: Market::Energy,
                price: Some(100.0),
            }],
            &[ActualPoint {
                interval5: ts("2024/01/15 09:05:00"),
                interval30: ts("2024/01/15 09:30:00"),
                region: "NSW".into(),
                market: Market::Energy,
                settled_5min: 80.0,
                settled_30min: 80.0,
            }],
            &ReconcileOptions::default(),
        )
    }

    #[test]
    fn series_frame_has_typed_columns() {
        let df = series_frame(&sample_series()).unwrap();
        assert_eq!(df.height(), 6);
        assert_eq!(
            df.column("interval5").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(df.column("forecast_price").unwrap().null_count(), 1);
        assert_eq!(df.column("settled_5min").unwrap().null_count(), 5);
    }

    #[test]
    fn parquet_round_trip() {
        let dir = test_dir();
        let path = dir.join("series.parquet");
        let df = series_frame(&sample_series()).unwrap();
        write_parquet(&df, &path).unwrap();

        let back = ParquetReader::new(fs::File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(back.height(), df.height());
        assert_eq!(back.get_column_names(), df.get_column_names());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn series_csv_leaves_missing_values_blank() {
        let mut out = Vec::new();
        write_series_csv(&sample_series(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("issued_at,frame,interval5"));
        assert_eq!(
            lines.next().unwrap(),
            "2024/01/15 09:00:00,20240115 09:00,2024/01/15 09:05:00,2024/01/15 09:30:00,NSW,Energy,,80,80"
        );
    }

    #[test]
    fn wide_csv_and_frame() {
        let wide = WidePrices::from_settled(&[
            SettledPrice {
                interval5: ts("2024/01/15 09:05:00"),
                region: "NSW".into(),
                market: Market::Energy,
                price: 50.0,
            },
            SettledPrice {
                interval5: ts("2024/01/15 09:10:00"),
                region: "VIC".into(),
                market: Market::Energy,
                price: 40.0,
            },
        ]);

        let mut out = Vec::new();
        write_wide_csv(&wide, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next().unwrap(), "interval,RRP_NSW,RRP_VIC");
        assert_eq!(text.lines().nth(1).unwrap(), "2024/01/15 09:05:00,50,");

        let df = wide_frame(&wide).unwrap();
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn raw_table_csv() {
        let table = RawTable::new(
            vec!["A".into(), "B".into()],
            vec![vec!["1".into(), "x,y".into()]],
        );
        let mut out = Vec::new();
        write_table_csv(&table, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "A,B\n1,\"x,y\"\n");
    }
}

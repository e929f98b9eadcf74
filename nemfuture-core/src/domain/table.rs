//! Logical table registry.
//!
//! Each logical NEM table is published under different names on each tier.
//! The registry is compiled in and never changes at runtime.

use serde::Serialize;

use crate::source::provider::SourceError;

/// Historical-archive bucket a table is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeFrame {
    Predispatch,
    FiveMinute,
    Actuals,
    StPasa,
}

impl TimeFrame {
    /// MMSDM folder holding this bucket's monthly files.
    pub fn archive_folder(self) -> &'static str {
        match self {
            TimeFrame::Predispatch => "PREDISP_ALL_DATA",
            TimeFrame::FiveMinute => "P5MIN_ALL_DATA",
            TimeFrame::Actuals | TimeFrame::StPasa => "DATA",
        }
    }
}

/// Tier-specific identifiers for one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    /// Logical name exposed to callers, e.g. `PREDISPATCHPRICE`.
    pub name: &'static str,
    /// File-table id in the historical archive (`PUBLIC_DVD_{id}_...`); `None`
    /// when the table is not archived there.
    pub archive_table_id: Option<&'static str>,
    /// Folder under `Reports/Archive/`.
    pub rolling_folder: &'static str,
    /// Folder under `Reports/Current/`.
    pub current_folder: &'static str,
    /// Token in the report-name column identifying the table's rows.
    pub filter_token: &'static str,
    pub time_frame: TimeFrame,
    /// Column carrying the revision / slice timestamp.
    pub slice_column: &'static str,
    /// Whether a transform into price points exists for this table.
    pub transformed: bool,
}

pub const PREDISPATCHPRICE: TableDescriptor = TableDescriptor {
    name: "PREDISPATCHPRICE",
    archive_table_id: Some("PREDISPATCHPRICE"),
    rolling_folder: "PredispatchIS_Reports",
    current_folder: "PredispatchIS_Reports",
    filter_token: "REGION_PRICES",
    time_frame: TimeFrame::Predispatch,
    slice_column: "LASTCHANGED",
    transformed: true,
};

pub const PREDISPATCHREGIONSUM: TableDescriptor = TableDescriptor {
    name: "PREDISPATCHREGIONSUM",
    archive_table_id: Some("PREDISPATCHREGIONSUM"),
    rolling_folder: "PredispatchIS_Reports",
    current_folder: "PredispatchIS_Reports",
    filter_token: "REGION_SOLUTION",
    time_frame: TimeFrame::Predispatch,
    slice_column: "LASTCHANGED",
    transformed: false,
};

pub const PREDISPATCHINTERCONNECTORRES: TableDescriptor = TableDescriptor {
    name: "PREDISPATCHINTERCONNECTORRES",
    archive_table_id: Some("PREDISPATCHINTERCONNECTORRES"),
    rolling_folder: "PredispatchIS_Reports",
    current_folder: "PredispatchIS_Reports",
    filter_token: "INTERCONNECTOR_SOLN",
    time_frame: TimeFrame::Predispatch,
    slice_column: "LASTCHANGED",
    transformed: false,
};

pub const TRADINGPRICE: TableDescriptor = TableDescriptor {
    name: "TRADINGPRICE",
    archive_table_id: Some("TRADINGPRICE"),
    rolling_folder: "TradingIS_Reports",
    current_folder: "TradingIS_Reports",
    filter_token: "PRICE",
    time_frame: TimeFrame::Actuals,
    slice_column: "SETTLEMENTDATE",
    transformed: true,
};

/// Every registered table, wired or reserved.
pub const TABLES: &[TableDescriptor] = &[
    PREDISPATCHPRICE,
    PREDISPATCHREGIONSUM,
    PREDISPATCHINTERCONNECTORRES,
    TRADINGPRICE,
    TableDescriptor {
        name: "PREDISPATCHPRICESENSITIVITIES",
        archive_table_id: None,
        rolling_folder: "Predispatch_Sensitivities",
        current_folder: "Predispatch_Sensitivities",
        filter_token: "PRICESENSITIVITIES",
        time_frame: TimeFrame::Predispatch,
        slice_column: "LASTCHANGED",
        transformed: false,
    },
    TableDescriptor {
        name: "P5MIN_REGIONSOLUTION",
        archive_table_id: Some("P5MIN_REGIONSOLUTION_ALL"),
        rolling_folder: "P5_Reports",
        current_folder: "P5_Reports",
        filter_token: "REGIONSOLUTION",
        time_frame: TimeFrame::FiveMinute,
        slice_column: "LASTCHANGED",
        transformed: false,
    },
    TableDescriptor {
        name: "P5MIN_INTERCONNECTORSOLN",
        archive_table_id: Some("P5MIN_INTERCONNECTORSOLN_ALL"),
        rolling_folder: "P5_Reports",
        current_folder: "P5_Reports",
        filter_token: "INTERCONNECTORSOLN",
        time_frame: TimeFrame::FiveMinute,
        slice_column: "LASTCHANGED",
        transformed: false,
    },
    TableDescriptor {
        name: "DISPATCHPRICE",
        archive_table_id: Some("DISPATCHPRICE"),
        rolling_folder: "Public_Prices",
        current_folder: "Public_Prices",
        filter_token: "PRICE",
        time_frame: TimeFrame::FiveMinute,
        slice_column: "SETTLEMENTDATE",
        transformed: false,
    },
    TableDescriptor {
        name: "STPASA_REGIONSOLUTION",
        archive_table_id: Some("STPASA_REGIONSOLUTION"),
        rolling_folder: "Short_Term_PASA_Reports",
        current_folder: "Short_Term_PASA_Reports",
        filter_token: "REGIONSOLUTION",
        time_frame: TimeFrame::StPasa,
        slice_column: "LASTCHANGED",
        transformed: false,
    },
    TableDescriptor {
        name: "STPASA_INTERCONNECTORSOLN",
        archive_table_id: Some("STPASA_INTERCONNECTORSOLN"),
        rolling_folder: "Short_Term_PASA_Reports",
        current_folder: "Short_Term_PASA_Reports",
        filter_token: "INTERCONNECTORSOLN",
        time_frame: TimeFrame::StPasa,
        slice_column: "LASTCHANGED",
        transformed: false,
    },
];

impl TableDescriptor {
    /// Look up a registered table by logical name (case-insensitive).
    pub fn lookup(name: &str) -> Result<&'static TableDescriptor, SourceError> {
        TABLES
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| SourceError::UnknownTable(name.to_string()))
    }
}

//! NemWeb HTTP collaborators.
//!
//! Directory pages are plain HTML indexes; documents are zip archives holding
//! NEM multi-table CSV files (rolling-archive zips hold one zip per interval).
//! Every CSV line starts with a record type (`C`, `I`, `D`), a report family
//! and a report name in column 2; `I` lines carry headers for the following
//! `D` lines of the same report.

use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::OnceLock;
use std::time::Duration;
use zip::ZipArchive;

use super::cancel::CancelToken;
use super::listing;
use super::locate::nearest_preceding;
use super::provider::{DirectoryLister, FetchRequest, SourceError, TableFetcher};
use crate::config::NemwebSettings;
use crate::domain::RawTable;

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*"([^"]+)""#).expect("valid regex"))
}

/// Blocking HTTP client for nemweb.com.au.
pub struct NemwebClient {
    client: reqwest::blocking::Client,
    request_timeout: Duration,
}

impl NemwebClient {
    pub fn new(settings: &NemwebSettings) -> Result<Self, SourceError> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| SourceError::fetch(&settings.base_url, format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// GET a URL, bounding the request by the token's remaining deadline.
    fn get(&self, url: &str, cancel: &CancelToken) -> Result<reqwest::blocking::Response, SourceError> {
        cancel.check()?;
        let mut request = self.client.get(url);
        if let Some(remaining) = cancel.remaining() {
            if remaining.is_zero() {
                return Err(SourceError::Canceled);
            }
            request = request.timeout(remaining.min(self.request_timeout));
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() && cancel.is_canceled() {
                SourceError::Canceled
            } else {
                SourceError::fetch(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::fetch(url, format!("HTTP {status}")));
        }
        Ok(response)
    }
}

impl DirectoryLister for NemwebClient {
    fn links(&self, directory_url: &str, cancel: &CancelToken) -> Result<Vec<String>, SourceError> {
        let body = self
            .get(directory_url, cancel)?
            .text()
            .map_err(|e| SourceError::fetch(directory_url, e))?;

        Ok(href_re()
            .captures_iter(&body)
            .map(|c| listing::absolutize(directory_url, &c[1]))
            .collect())
    }
}

impl TableFetcher for NemwebClient {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelToken) -> Result<RawTable, SourceError> {
        if !request.url.to_ascii_lowercase().ends_with(".zip") {
            return Err(SourceError::fetch(&request.url, "expected a zip document"));
        }

        let bytes = self
            .get(&request.url, cancel)?
            .bytes()
            .map_err(|e| SourceError::fetch(&request.url, e))?;

        tracing::debug!(url = %request.url, bytes = bytes.len(), "downloaded");
        decode_archive(&bytes, request)
    }
}

/// Extract the requested table from an archive's bytes.
///
/// With `as_of` set only the embedded file whose name timestamp is
/// nearest-preceding it is read.
pub fn decode_archive(bytes: &[u8], request: &FetchRequest) -> Result<RawTable, SourceError> {
    let url = request.url.as_str();
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| SourceError::fetch(url, format!("bad zip: {e}")))?;

    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();

    if let Some(as_of) = request.as_of {
        let mut stamped: Vec<_> = names
            .iter()
            .filter_map(|n| listing::covered_dates(n).last().map(|t| (*t, n.clone())))
            .collect();
        stamped.sort();
        let stamps: Vec<_> = stamped.iter().map(|(t, _)| *t).collect();
        let idx = nearest_preceding(&stamps, as_of).ok_or_else(|| SourceError::NoPriorSnapshot {
            as_of,
            earliest: stamps
                .first()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "nothing".into()),
        })?;
        names = vec![stamped[idx].1.clone()];
    }

    let mut table = RawTable::default();
    for name in names {
        let mut contents = Vec::new();
        archive
            .by_name(&name)
            .and_then(|mut f| f.read_to_end(&mut contents).map_err(Into::into))
            .map_err(|e| SourceError::fetch(url, format!("{name}: {e}")))?;

        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            let nested = FetchRequest {
                url: format!("{url}#{name}"),
                as_of: None,
                ..request.clone()
            };
            table.append(decode_archive(&contents, &nested)?);
        } else if lower.ends_with(".csv") {
            table.append(parse_report_csv(&contents, request.filter_column, &request.filter_value)?);
        }
    }

    Ok(table)
}

/// Rows of one report from a NEM multi-table CSV; the first match becomes the header.
pub fn parse_report_csv(
    contents: &[u8],
    filter_column: usize,
    filter_value: &str,
) -> Result<RawTable, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents);

    let mut matched = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SourceError::fetch("csv", e))?;
        if record.get(filter_column).map(str::trim) == Some(filter_value) {
            matched.push(record.iter().map(|f| f.trim().to_string()).collect::<Vec<_>>());
        }
    }

    let mut rows = matched.into_iter();
    match rows.next() {
        Some(headers) => Ok(RawTable::new(headers, rows.collect())),
        None => Ok(RawTable::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    const REPORT: &str = "\
C,NEMP.WORLD,PREDISPATCHIS,AEMO,PUBLIC,2024/01/15,12:02:32,0000000412345678,,0000000412345678
I,PREDISPATCH,REGION_PRICES,1,PREDISPATCHSEQNO,REGIONID,INTERVENTION,RRP,LASTCHANGED,DATETIME
D,PREDISPATCH,REGION_PRICES,1,2024011530,NSW1,0,85.5,2024/01/15 12:02:32,2024/01/15 13:00:00
D,PREDISPATCH,REGION_PRICES,1,2024011530,VIC1,0,70.1,2024/01/15 12:02:32,2024/01/15 13:00:00
I,PREDISPATCH,REGION_SOLUTION,1,PREDISPATCHSEQNO,REGIONID,TOTALDEMAND
D,PREDISPATCH,REGION_SOLUTION,1,2024011530,NSW1,8000
C,END OF REPORT,12
";

    fn zip_of(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn report_rows_are_filtered_and_headed() {
        let table = parse_report_csv(REPORT.as_bytes(), 2, "REGION_PRICES").unwrap();
        assert_eq!(table.headers()[5], "REGIONID");
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1][5], "VIC1");
    }

    #[test]
    fn missing_report_is_empty() {
        let table = parse_report_csv(REPORT.as_bytes(), 2, "PRICE").unwrap();
        assert!(table.is_empty());
        assert!(table.headers().is_empty());
    }

    #[test]
    fn nested_zips_are_unpacked() {
        let inner = zip_of(&[("PUBLIC_PREDISPATCHIS_202401151230_20240115120232.CSV", REPORT.into())]);
        let outer = zip_of(&[("PUBLIC_PREDISPATCHIS_202401151230_20240115120232.zip", inner)]);
        let request = FetchRequest::new("https://x/PUBLIC_PREDISPATCHIS_20240115.zip", "REGION_PRICES");

        let table = decode_archive(&outer, &request).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn as_of_picks_nearest_preceding_file() {
        let later = REPORT.replace("85.5", "99.9");
        let archive = zip_of(&[
            ("PUBLIC_PREDISPATCHIS_202401151200_20240115113000.CSV", REPORT.into()),
            ("PUBLIC_PREDISPATCHIS_202401151230_20240115120000.CSV", later.into_bytes()),
        ]);
        let at = crate::time::parse_field("2024/01/15 11:45:00");
        let request = FetchRequest::new("https://x/a.zip", "REGION_PRICES").with_as_of(at);

        let table = decode_archive(&archive, &request).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0][7], "85.5");
    }

    #[test]
    fn as_of_before_every_file_fails() {
        let archive = zip_of(&[("PUBLIC_X_202401151200_20240115113000.CSV", REPORT.into())]);
        let at = crate::time::parse_field("2024/01/01 00:00:00");
        let request = FetchRequest::new("https://x/a.zip", "REGION_PRICES").with_as_of(at);
        assert!(matches!(
            decode_archive(&archive, &request),
            Err(SourceError::NoPriorSnapshot { .. })
        ));
    }

    #[test]
    fn garbage_is_a_fetch_error() {
        let request = FetchRequest::new("https://x/a.zip", "PRICE");
        assert!(matches!(
            decode_archive(b"not a zip", &request),
            Err(SourceError::Fetch { .. })
        ));
    }
}

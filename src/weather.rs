//! Ambient weather context from a shared station log.
//!
//! The log holds up to three co-located stations per row,
//! each as a `(timestamp, temperature, humidity)` triple.
//! Timestamps of the three stations need not line up, so a
//! lookup scans every station column of every row.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use calamine::{open_workbook, DataType, Range, Reader, Xlsx};
use chrono::Timelike;
use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::*;
use tracing::debug;

use crate::{
    calibration::extract_first_number,
    error::{PipelineError, Result},
};

pub const STATIONS: usize = 3;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StationReading {
    pub timestamp: String,
    pub temperature: String,
    pub humidity: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WeatherRow {
    pub stations: [StationReading; STATIONS],
}

/// The whole log, loaded once per batch.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WeatherRecord {
    pub rows: Vec<WeatherRow>,
}

impl WeatherRow {
    fn from_cells<F: Fn(usize) -> String>(cell: F) -> Self {
        let mut row = WeatherRow::default();
        for (station, reading) in row.stations.iter_mut().enumerate() {
            *reading = StationReading {
                timestamp: cell(3 * station),
                temperature: cell(3 * station + 1),
                humidity: cell(3 * station + 2),
            };
        }
        row
    }
}

impl WeatherRecord {
    /// Load a `.xlsx` workbook or, for any other extension, a
    /// CSV file.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => Self::from_xlsx_path(path),
            _ => Self::from_csv_path(path),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Read a log with a header row followed by rows of nine
    /// cells. Missing trailing cells are read as empty.
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let mut rows = vec![];
        for record in reader.records() {
            let record = record?;
            rows.push(WeatherRow::from_cells(|idx| {
                record.get(idx).unwrap_or("").to_string()
            }));
        }
        debug!(rows = rows.len(), "loaded weather log");
        Ok(WeatherRecord { rows })
    }

    /// Read the first worksheet of a workbook.
    pub fn from_xlsx_path(path: &Path) -> Result<Self> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        let sheet = workbook.worksheet_range_at(0).ok_or_else(|| {
            PipelineError::parse("weather log", format!("{}: no worksheet", path.display()))
        })??;
        Ok(Self::from_range(&sheet))
    }

    /// Same layout as the CSV log: the first row is a header,
    /// then nine cells per row. Date cells are written as
    /// `YYYY-MM-DD HH:MM:SS`.
    pub fn from_range(sheet: &Range<DataType>) -> Self {
        let rows: Vec<_> = sheet
            .rows()
            .skip(1)
            .map(|cells| WeatherRow::from_cells(|idx| cells.get(idx).map(cell_text).unwrap_or_default()))
            .collect();
        debug!(rows = rows.len(), "loaded weather workbook");
        WeatherRecord { rows }
    }
}

fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::DateTime(_) => cell
            .as_datetime()
            .and_then(|dt| (dt + chrono::Duration::milliseconds(500)).with_nanosecond(0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        other => other.to_string().trim().to_string(),
    }
}

/// Ambient values found for one timestamp.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct WeatherMatch {
    pub row: usize,
    pub station: usize,
    pub temperature: f64,
    pub humidity: f64,
}

/// Which match wins when several rows carry the timestamp.
///
/// Within a row the lowest station column always wins.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPrecedence {
    /// Later rows overwrite earlier ones (the historical
    /// behaviour of the log lookup).
    LastRow,
    FirstRow,
}

impl Default for MatchPrecedence {
    fn default() -> Self {
        MatchPrecedence::LastRow
    }
}

pub struct WeatherLogMatcher<'a> {
    record: &'a WeatherRecord,
    precedence: MatchPrecedence,
}

impl<'a> WeatherLogMatcher<'a> {
    pub fn new(record: &'a WeatherRecord, precedence: MatchPrecedence) -> Self {
        WeatherLogMatcher { record, precedence }
    }

    /// Look up an exact timestamp. `Ok(None)` when no row
    /// matches; an error only when the winning cells hold no
    /// number.
    pub fn find(&self, timestamp: &str) -> Result<Option<WeatherMatch>> {
        let mut found = None;
        for (row_idx, row) in self.record.rows.iter().enumerate() {
            let hit = row
                .stations
                .iter()
                .position(|s| s.timestamp == timestamp);
            if let Some(station) = hit {
                found = Some((row_idx, station));
                if self.precedence == MatchPrecedence::FirstRow {
                    break;
                }
            }
        }

        let (row, station) = match found {
            Some(hit) => hit,
            None => return Ok(None),
        };
        let reading = &self.record.rows[row].stations[station];
        let temperature = extract_first_number(&reading.temperature).ok_or_else(|| {
            PipelineError::parse(
                "weather temperature",
                format!("row {}: `{}`", row, reading.temperature),
            )
        })?;
        let humidity = extract_first_number(&reading.humidity).ok_or_else(|| {
            PipelineError::parse(
                "weather humidity",
                format!("row {}: `{}`", row, reading.humidity),
            )
        })?;

        Ok(Some(WeatherMatch {
            row,
            station,
            temperature,
            humidity,
        }))
    }
}

/// Normalize a capture date and a `HHMMSS...` time to the
/// quarter-hour key of the log, e.g. `2019-07-15 10:15:00`.
pub fn normalize_capture_time(date: &str, time: &str) -> Option<String> {
    let hour = time.get(..2)?;
    if !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{} {}:15:00", date, hour))
}

/// Derive the log key of an image laid out as
/// `<root>/<YYYY-MM-DD>/<camera>/<a>_<b>_<HHMMSS>...`.
///
/// The date is the nearest ancestor directory named like a
/// date and the time is the third `_`-separated field of the
/// file stem.
pub fn capture_timestamp(path: &Path) -> Result<String> {
    lazy_static! {
        static ref DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    }
    let fail = || PipelineError::CaptureTime {
        path: path.to_path_buf(),
    };

    let date = path
        .ancestors()
        .skip(1)
        .filter_map(|p| p.file_name()?.to_str())
        .find(|name| DATE.is_match(name))
        .ok_or_else(fail)?;
    let time = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('_').nth(2))
        .ok_or_else(fail)?;

    normalize_capture_time(date, time).ok_or_else(fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
DateTime_1,Temp_1,RH_1,DateTime_2,Temp_2,RH_2,DateTime_3,Temp_3,RH_3
2019-07-15 10:00:00,24.1,55,2019-07-15 10:15:00,24.9,52,,,
2019-07-15 10:15:00,25.3 C,50 %,2019-07-15 10:15:00,26.0,49,2019-07-15 10:30:00,25.8,48
2019-07-15 11:15:00,27.0,45
";

    fn record() -> WeatherRecord {
        WeatherRecord::from_reader(LOG.as_bytes()).unwrap()
    }

    #[test]
    fn loads_rows_skipping_header() {
        let record = record();
        assert_eq!(record.rows.len(), 3);
        assert_eq!(record.rows[0].stations[2], StationReading::default());
        assert_eq!(record.rows[2].stations[0].temperature, "27.0");
        assert_eq!(record.rows[2].stations[1].timestamp, "");
    }

    #[test]
    fn later_row_wins() -> anyhow::Result<()> {
        let record = record();
        let found = WeatherLogMatcher::new(&record, MatchPrecedence::LastRow)
            .find("2019-07-15 10:15:00")?
            .expect("match");
        assert_eq!((found.row, found.station), (1, 0));
        assert_eq!(found.temperature, 25.3);
        assert_eq!(found.humidity, 50.);
        Ok(())
    }

    #[test]
    fn first_row_precedence() -> anyhow::Result<()> {
        let record = record();
        let found = WeatherLogMatcher::new(&record, MatchPrecedence::FirstRow)
            .find("2019-07-15 10:15:00")?
            .expect("match");
        assert_eq!((found.row, found.station), (0, 1));
        assert_eq!(found.temperature, 24.9);
        Ok(())
    }

    #[test]
    fn two_matching_rows_return_second() -> anyhow::Result<()> {
        let log = "h\n\
                   2020-01-01 09:15:00,10,80,,,,,,\n\
                   2020-01-01 09:15:00,12,70,,,,,,\n";
        let record = WeatherRecord::from_reader(log.as_bytes())?;
        let found = WeatherLogMatcher::new(&record, MatchPrecedence::default())
            .find("2020-01-01 09:15:00")?
            .expect("match");
        assert_eq!((found.temperature, found.humidity), (12., 70.));
        Ok(())
    }

    #[test]
    fn miss_is_not_an_error() -> anyhow::Result<()> {
        let record = record();
        let matcher = WeatherLogMatcher::new(&record, MatchPrecedence::LastRow);
        assert_eq!(matcher.find("2019-07-16 10:15:00")?, None);
        Ok(())
    }

    #[test]
    fn matches_third_station() -> anyhow::Result<()> {
        let record = record();
        let found = WeatherLogMatcher::new(&record, MatchPrecedence::LastRow)
            .find("2019-07-15 10:30:00")?
            .expect("match");
        assert_eq!((found.station, found.temperature), (2, 25.8));
        Ok(())
    }

    #[test]
    fn loads_workbook_sheet() -> anyhow::Result<()> {
        let mut sheet = Range::new((0, 0), (2, 8));
        sheet.set_value((0, 0), DataType::String("DateTime_1".into()));
        sheet.set_value((1, 0), DataType::DateTime(43661.427083333336));
        sheet.set_value((1, 1), DataType::Float(25.3));
        sheet.set_value((1, 2), DataType::Int(50));
        sheet.set_value((1, 3), DataType::String("2019-07-15 10:30:00".into()));
        sheet.set_value((1, 4), DataType::String("26.0 C".into()));
        sheet.set_value((1, 5), DataType::Float(49.));
        // a few milliseconds short of 11:15
        sheet.set_value((2, 0), DataType::DateTime(43661.46874999));
        sheet.set_value((2, 1), DataType::Float(27.));
        sheet.set_value((2, 2), DataType::Float(45.));

        let record = WeatherRecord::from_range(&sheet);
        assert_eq!(record.rows.len(), 2);
        assert_eq!(record.rows[0].stations[0].timestamp, "2019-07-15 10:15:00");
        assert_eq!(record.rows[1].stations[0].timestamp, "2019-07-15 11:15:00");
        assert_eq!(record.rows[0].stations[2], StationReading::default());

        let matcher = WeatherLogMatcher::new(&record, MatchPrecedence::LastRow);
        let found = matcher.find("2019-07-15 10:15:00")?.expect("match");
        assert_eq!((found.temperature, found.humidity), (25.3, 50.));
        let found = matcher.find("2019-07-15 10:30:00")?.expect("match");
        assert_eq!((found.station, found.temperature), (1, 26.));
        Ok(())
    }

    #[test]
    fn missing_workbook_is_an_error() {
        assert!(WeatherRecord::from_path(Path::new("/nonexistent/weather_data.xlsx")).is_err());
    }

    #[test]
    fn normalizes_capture_time() {
        assert_eq!(
            normalize_capture_time("2019-07-15", "104312"),
            Some("2019-07-15 10:15:00".into())
        );
        assert_eq!(normalize_capture_time("2019-07-15", "x"), None);
        assert_eq!(normalize_capture_time("2019-07-15", "ab1234"), None);
    }

    #[test]
    fn capture_timestamp_from_layout() -> anyhow::Result<()> {
        let path = Path::new("images/2019-07-15/Camera_1/FLIR_0042_104312.jpg");
        assert_eq!(capture_timestamp(path)?, "2019-07-15 10:15:00");

        let bad = Path::new("images/Camera_1/FLIR_0042_104312.jpg");
        assert!(matches!(
            capture_timestamp(bad),
            Err(PipelineError::CaptureTime { .. })
        ));
        Ok(())
    }
}

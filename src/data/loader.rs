//! CSV input and output for telemetry, weather and forecast tables

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::domain::{ForecastResult, TelemetryRecord, WeatherRecord};
use crate::error::{ForecastError, Result};

pub const TRAINING_COLUMNS: [&str; 8] = [
    "timestamp",
    "voltage",
    "current",
    "output_watt",
    "yield",
    "ghi",
    "temp_air",
    "wind_speed",
];

pub const WEATHER_COLUMNS: [&str; 4] = ["timestamp", "ghi", "temp_air", "wind_speed"];

pub const FORECAST_COLUMNS: [&str; 5] = [
    "timestamp",
    "predicted_power",
    "physics_component",
    "sequence_component",
    "degradation",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Historical dataset split into its telemetry and weather halves
#[derive(Debug, Clone, Default)]
pub struct TrainingTable {
    pub telemetry: Vec<TelemetryRecord>,
    pub weather: Vec<WeatherRecord>,
}

impl TrainingTable {
    pub fn new(telemetry: Vec<TelemetryRecord>, weather: Vec<WeatherRecord>) -> Self {
        Self { telemetry, weather }
    }

    pub fn is_empty(&self) -> bool {
        self.telemetry.is_empty() && self.weather.is_empty()
    }
}

/// Parse a timestamp into UTC
///
/// Offsets in the text win; naive timestamps are read in `tz`.
pub fn parse_timestamp(text: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return tz
                .from_local_datetime(&naive)
                .single()
                .map(|ts| ts.with_timezone(&Utc))
                .ok_or_else(|| {
                    ForecastError::InvalidTimestamp(format!("{} (ambiguous or skipped in {})", text, tz))
                });
        }
    }
    Err(ForecastError::InvalidTimestamp(text.to_string()))
}

/// Column positions resolved from a header row
struct Columns {
    index: HashMap<&'static str, usize>,
}

impl Columns {
    fn resolve(
        headers: &csv::StringRecord,
        required: &[&'static str],
        table: &'static str,
    ) -> Result<Self> {
        let mut index = HashMap::new();
        for &name in required {
            let pos = headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| ForecastError::MissingColumn {
                    column: name.to_string(),
                    table,
                })?;
            index.insert(name, pos);
        }
        Ok(Self { index })
    }

    fn text<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.index
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }

    /// Finite numeric cell, or None for empty / non-numeric / NaN
    fn number(&self, record: &csv::StringRecord, name: &str) -> Option<f64> {
        self.text(record, name)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

fn record_line(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn csv_error(table: &'static str, err: csv::Error) -> ForecastError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    ForecastError::InvalidRecord {
        table,
        line,
        detail: err.to_string(),
    }
}

fn reader_for<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(reader)
}

fn parse_row_timestamp(
    columns: &Columns,
    record: &csv::StringRecord,
    tz: Tz,
    table: &'static str,
) -> Result<DateTime<Utc>> {
    parse_timestamp(columns.text(record, "timestamp"), tz).map_err(|e| ForecastError::InvalidRecord {
        table,
        line: record_line(record),
        detail: e.to_string(),
    })
}

fn weather_from(columns: &Columns, record: &csv::StringRecord, timestamp: DateTime<Utc>) -> Option<WeatherRecord> {
    Some(WeatherRecord {
        timestamp,
        ghi: columns.number(record, "ghi")?,
        temp_air: columns.number(record, "temp_air")?,
        wind_speed: columns.number(record, "wind_speed")?,
    })
}

/// Read the historical table (`timestamp, voltage, current, output_watt, yield, ghi, temp_air, wind_speed`)
pub fn read_training_table<R: Read>(reader: R, tz: Tz) -> Result<TrainingTable> {
    const TABLE: &str = "training";
    let mut reader = reader_for(reader);
    let headers = reader.headers().map_err(|e| csv_error(TABLE, e))?.clone();
    let columns = Columns::resolve(&headers, &TRAINING_COLUMNS, TABLE)?;

    let mut table = TrainingTable::default();
    let mut incomplete = 0usize;
    for result in reader.records() {
        let record = result.map_err(|e| csv_error(TABLE, e))?;
        let timestamp = parse_row_timestamp(&columns, &record, tz, TABLE)?;

        let telemetry = (|| {
            Some(TelemetryRecord {
                timestamp,
                voltage: columns.number(&record, "voltage")?,
                current: columns.number(&record, "current")?,
                ac_power: columns.number(&record, "output_watt")?,
                cumulative_yield: columns.number(&record, "yield")?,
            })
        })();
        let weather = weather_from(&columns, &record, timestamp);

        if telemetry.is_none() || weather.is_none() {
            incomplete += 1;
        }
        table.telemetry.extend(telemetry);
        table.weather.extend(weather);
    }

    debug!(
        telemetry = table.telemetry.len(),
        weather = table.weather.len(),
        incomplete,
        "parsed training table"
    );
    Ok(table)
}

/// Read a weather table (`timestamp, ghi, temp_air, wind_speed`)
pub fn read_weather_table<R: Read>(reader: R, tz: Tz) -> Result<Vec<WeatherRecord>> {
    const TABLE: &str = "weather";
    let mut reader = reader_for(reader);
    let headers = reader.headers().map_err(|e| csv_error(TABLE, e))?.clone();
    let columns = Columns::resolve(&headers, &WEATHER_COLUMNS, TABLE)?;

    let mut out = Vec::new();
    let mut incomplete = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| csv_error(TABLE, e))?;
        let timestamp = parse_row_timestamp(&columns, &record, tz, TABLE)?;
        match weather_from(&columns, &record, timestamp) {
            Some(weather) => out.push(weather),
            None => incomplete.push(timestamp),
        }
    }

    // every requested step needs weather; dropping rows would shorten the horizon
    if !incomplete.is_empty() {
        return Err(ForecastError::MissingValues {
            table: TABLE,
            timestamps: incomplete,
        });
    }
    Ok(out)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ForecastError::io(path, e))
}

pub fn read_training_csv(path: &Path, tz: Tz) -> Result<TrainingTable> {
    let table = read_training_table(open(path)?, tz)?;
    info!(path = %path.display(), rows = table.telemetry.len(), "loaded training data");
    Ok(table)
}

pub fn read_weather_csv(path: &Path, tz: Tz) -> Result<Vec<WeatherRecord>> {
    let records = read_weather_table(open(path)?, tz)?;
    info!(path = %path.display(), rows = records.len(), "loaded weather forecast");
    Ok(records)
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write forecast rows. Unavailable components are empty cells.
pub fn write_forecast<W: Write>(writer: W, results: &[ForecastResult]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let to_err = |e: csv::Error| ForecastError::Serialization(e.to_string());

    writer.write_record(FORECAST_COLUMNS).map_err(to_err)?;
    for result in results {
        writer
            .write_record([
                result.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                result.predicted_power.to_string(),
                optional(result.physics_component),
                optional(result.sequence_component),
                result
                    .degradation
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            ])
            .map_err(to_err)?;
    }
    writer
        .flush()
        .map_err(|e| ForecastError::Serialization(e.to_string()))
}

pub fn write_forecast_csv(path: &Path, results: &[ForecastResult]) -> Result<()> {
    let file = File::create(path).map_err(|e| ForecastError::io(path, e))?;
    write_forecast(BufWriter::new(file), results)?;
    info!(path = %path.display(), rows = results.len(), "wrote forecast");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Degradation;
    use crate::error::ErrorKind;

    const TRAINING: &str = "\
timestamp,voltage,current,output_watt,yield,ghi,temp_air,wind_speed
2024-06-01T10:00:00Z,380.1,5.2,1900.5,100.0,720.0,21.5,2.0
2024-06-01T10:15:00Z,381.0,5.4,1950.0,100.5,735.0,21.7,2.1
2024-06-01T10:30:00Z,,5.4,1950.0,101.0,740.0,21.9,
";

    #[test]
    fn test_read_training_table_splits_incomplete_rows() {
        let table = read_training_table(TRAINING.as_bytes(), Tz::UTC).unwrap();
        assert_eq!(table.telemetry.len(), 2);
        assert_eq!(table.weather.len(), 2);
        assert_eq!(table.telemetry[1].ac_power, 1950.0);
        assert_eq!(table.weather[0].ghi, 720.0);
    }

    #[test]
    fn test_columns_are_found_by_name() {
        let csv = "ghi,wind_speed,timestamp,temp_air\n500,3.0,2024-06-01 12:00:00,20.0\n";
        let records = read_weather_table(csv.as_bytes(), Tz::UTC).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ghi, 500.0);
        assert_eq!(records[0].wind_speed, 3.0);
    }

    #[test]
    fn test_missing_ghi_column_is_data_error() {
        let csv = "timestamp,temp_air,wind_speed\n2024-06-01T12:00:00Z,20.0,1.0\n";
        let err = read_weather_table(csv.as_bytes(), Tz::UTC).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
        assert!(err.to_string().contains("ghi"));
    }

    #[test]
    fn test_incomplete_weather_rows_are_refused() {
        let csv = "\
timestamp,ghi,temp_air,wind_speed
2024-06-01T12:00:00Z,500,20.0,1.0
2024-06-01T12:15:00Z,,20.0,1.0
2024-06-01T12:30:00Z,480,,1.0
";
        let err = read_weather_table(csv.as_bytes(), Tz::UTC).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
        match err {
            ForecastError::MissingValues { table, timestamps } => {
                assert_eq!(table, "weather");
                assert_eq!(
                    timestamps,
                    vec![
                        Utc.with_ymd_and_hms(2024, 6, 1, 12, 15, 0).unwrap(),
                        Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap(),
                    ]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_bad_timestamp_reports_line() {
        let csv = "timestamp,ghi,temp_air,wind_speed\nyesterday,1,2,3\n";
        let err = read_weather_table(csv.as_bytes(), Tz::UTC).unwrap_err();
        match err {
            ForecastError::InvalidRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_naive_timestamps_use_configured_zone() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        let ts = parse_timestamp("2024-06-01 12:00:00", tz).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());

        let explicit = parse_timestamp("2024-06-01T12:00:00+00:00", tz).unwrap();
        assert_eq!(explicit, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_nonexistent_local_time_rejected() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        // Clocks jump from 02:00 to 03:00 on this date
        assert!(parse_timestamp("2024-03-31 02:30:00", tz).is_err());
    }

    #[test]
    fn test_write_forecast_marks_degradation() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let results = vec![
            ForecastResult {
                timestamp: ts,
                predicted_power: 1500.0,
                physics_component: Some(1400.0),
                sequence_component: Some(1600.0),
                degradation: None,
            },
            ForecastResult {
                timestamp: ts + chrono::Duration::minutes(15),
                predicted_power: 1550.0,
                physics_component: None,
                sequence_component: Some(1550.0),
                degradation: Some(Degradation::PhysicsUnavailable),
            },
        ];

        let mut buf = Vec::new();
        write_forecast(&mut buf, &results).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,predicted_power,physics_component,sequence_component,degradation"
        );
        assert_eq!(lines[1], "2024-06-01T12:00:00Z,1500,1400,1600,");
        assert_eq!(lines[2], "2024-06-01T12:15:00Z,1550,,1550,physics_unavailable");
    }
}

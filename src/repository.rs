use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FetchError, ParseError};
use crate::models::{GeoType, SignalSeries, TimeSeriesPoint, TimeType};

pub const DEFAULT_BASE_URL: &str = "https://api.delphi.cmu.edu/epidata";

pub struct SignalInfo {
    pub name: &'static str,
    pub source: &'static str,
    pub display_name: &'static str,
}

pub const SIGNAL_CATALOG: &[SignalInfo] = &[
    SignalInfo {
        name: "smoothed_wwearing_mask_7d",
        source: "fb-survey",
        display_name: "People Wearing Masks",
    },
    SignalInfo {
        name: "smoothed_wcovid_vaccinated_appointment_or_accept",
        source: "fb-survey",
        display_name: "Vaccine Acceptance",
    },
    SignalInfo {
        name: "sum_anosmia_ageusia_smoothed_search",
        source: "google-symptoms",
        display_name: "COVID Symptom Searches",
    },
    SignalInfo {
        name: "smoothed_wcli",
        source: "fb-survey",
        display_name: "COVID-Like Symptoms",
    },
    SignalInfo {
        name: "smoothed_whh_cmnty_cli",
        source: "fb-survey",
        display_name: "COVID-Like Symptoms in Community",
    },
    SignalInfo {
        name: "smoothed_adj_cli",
        source: "doctor-visits",
        display_name: "COVID-Related Doctor Visits",
    },
    SignalInfo {
        name: "confirmed_7dav_incidence_prop",
        source: "jhu-csse",
        display_name: "COVID Cases",
    },
    SignalInfo {
        name: "confirmed_admissions_covid_1d_prop_7dav",
        source: "hhs",
        display_name: "COVID Hospital Admissions",
    },
    SignalInfo {
        name: "deaths_7dav_incidence_prop",
        source: "doctor-visits",
        display_name: "COVID Deaths",
    },
];

// The key indicators a run reaches for when the request names no focus
// signals.
pub const DEFAULT_SIGNALS: &[&str] = &[
    "confirmed_7dav_incidence_prop",
    "smoothed_wcli",
    "smoothed_adj_cli",
    "confirmed_admissions_covid_1d_prop_7dav",
];

pub fn signal_source(name: &str) -> Option<&'static str> {
    SIGNAL_CATALOG
        .iter()
        .find(|info| info.name == name)
        .map(|info| info.source)
}

pub fn display_name(name: &str) -> &str {
    SIGNAL_CATALOG
        .iter()
        .find(|info| info.name == name)
        .map(|info| info.display_name)
        .unwrap_or(name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalQuery {
    pub signal: String,
    pub time_type: TimeType,
    pub geo_type: GeoType,
    pub geo_values: Vec<String>,
    /// YYYYMMDD
    pub start_time: String,
    /// YYYYMMDD
    pub end_time: String,
}

// Loose wire row; strict typing happens in parse_signal_payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSignalRow {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub geo_value: Option<String>,
    #[serde(default)]
    pub time_value: Option<serde_json::Value>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub stderr: Option<f64>,
    #[serde(default)]
    pub sample_size: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RawSignalPayload {
    pub time_type: TimeType,
    pub geo_type: GeoType,
    pub geo_values: Vec<String>,
    pub rows: Vec<RawSignalRow>,
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn fetch(&self, query: &SignalQuery) -> Result<RawSignalPayload, FetchError>;
}

#[derive(Debug, Deserialize)]
struct EpidataResponse {
    result: i64,
    #[serde(default)]
    epidata: Vec<RawSignalRow>,
    #[serde(default)]
    message: String,
}

pub struct EpidataRepository {
    client: reqwest::Client,
    base_url: String,
}

impl EpidataRepository {
    pub fn new(base_url: impl Into<String>) -> Self {
        EpidataRepository {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SignalRepository for EpidataRepository {
    async fn fetch(&self, query: &SignalQuery) -> Result<RawSignalPayload, FetchError> {
        let source = signal_source(&query.signal)
            .ok_or_else(|| FetchError::UnknownSignal(query.signal.clone()))?;

        let url = format!("{}/covidcast/", self.base_url.trim_end_matches('/'));
        let time_values = format!("{}-{}", query.start_time, query.end_time);
        let geo_value = if query.geo_values.is_empty() {
            "*".to_string()
        } else {
            query.geo_values.join(",")
        };

        debug!(
            signal = %query.signal,
            source,
            geo = %geo_value,
            range = %time_values,
            "fetching signal"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("data_source", source),
                ("signals", query.signal.as_str()),
                ("time_type", time_type_str(query.time_type)),
                ("geo_type", query.geo_type.as_str()),
                ("time_values", time_values.as_str()),
                ("geo_value", geo_value.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let envelope: EpidataResponse = response.json().await?;
        let rows = match envelope.result {
            1 => envelope.epidata,
            // "no results" is an empty payload, not a transport failure
            -2 => Vec::new(),
            _ => return Err(FetchError::Upstream(envelope.message)),
        };

        debug!(signal = %query.signal, rows = rows.len(), "fetch complete");
        Ok(RawSignalPayload {
            time_type: query.time_type,
            geo_type: query.geo_type,
            geo_values: query.geo_values.clone(),
            rows,
        })
    }
}

fn time_type_str(time_type: TimeType) -> &'static str {
    match time_type {
        TimeType::Day => "day",
        TimeType::Week => "week",
    }
}

// Serves cached fetches and offline runs from <dir>/<signal>.csv files.
pub struct CsvSignalRepository {
    dir: PathBuf,
}

impl CsvSignalRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvSignalRepository { dir: dir.into() }
    }
}

#[async_trait]
impl SignalRepository for CsvSignalRepository {
    async fn fetch(&self, query: &SignalQuery) -> Result<RawSignalPayload, FetchError> {
        let path = self.dir.join(format!("{}.csv", query.signal));
        if !path.exists() {
            return Err(FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no cached series at {}", path.display()),
            )));
        }
        let mut reader = csv::Reader::from_path(&path)?;

        let mut rows = Vec::new();
        for record in reader.deserialize::<RawSignalRow>() {
            rows.push(record?);
        }

        debug!(signal = %query.signal, rows = rows.len(), path = %path.display(), "read cached series");
        Ok(RawSignalPayload {
            time_type: query.time_type,
            geo_type: query.geo_type,
            geo_values: query.geo_values.clone(),
            rows,
        })
    }
}

pub fn write_series_csv(series: &SignalSeries, dir: &Path) -> Result<PathBuf, FetchError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", series.signal_name));
    let mut writer = csv::Writer::from_path(&path)?;

    for point in &series.points {
        writer.serialize(RawSignalRow {
            signal: Some(series.signal_name.clone()),
            geo_value: Some(point.geo_value.clone()),
            time_value: Some(serde_json::Value::String(
                point.time_value.format("%Y-%m-%d").to_string(),
            )),
            value: Some(point.value),
            stderr: point.stderr,
            sample_size: point.sample_size,
        })?;
    }
    writer.flush().map_err(FetchError::Io)?;

    Ok(path)
}

/// Strict parse-or-reject step at the orchestration boundary. The signal
/// name is taken from the payload rows, not the request: a payload that
/// cannot name its signal fails and is recorded under "unknown_signal".
pub fn parse_signal_payload(payload: &RawSignalPayload) -> Result<SignalSeries, ParseError> {
    let signal_name = payload
        .rows
        .iter()
        .find_map(|row| row.signal.clone())
        .ok_or(ParseError::MissingSignalName)?;

    let mut parsed: Vec<(NaiveDate, String, f64, Option<f64>, Option<f64>)> = Vec::new();
    for row in &payload.rows {
        // Rows without a value are upstream gaps, skipped as the source does.
        let value = match row.value {
            Some(value) => value,
            None => continue,
        };
        let date = parse_time_value(row.time_value.as_ref(), payload.time_type).map_err(
            |raw| ParseError::BadTimestamp {
                signal: signal_name.clone(),
                raw,
            },
        )?;
        let geo = row.geo_value.clone().ok_or_else(|| ParseError::MissingGeo {
            signal: signal_name.clone(),
            date,
        })?;
        parsed.push((date, geo, value, row.stderr, row.sample_size));
    }

    parsed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    // Requests spanning several geographies return one row per geography
    // per day; collapse each date to the mean so the series keeps its
    // no-duplicate-timestamps invariant.
    let mut points: Vec<TimeSeriesPoint> = Vec::new();
    let mut i = 0;
    while i < parsed.len() {
        let date = parsed[i].0;
        let mut j = i;
        while j < parsed.len() && parsed[j].0 == date {
            j += 1;
        }
        if j - i == 1 {
            let (_, geo, value, stderr, sample_size) = parsed[i].clone();
            points.push(TimeSeriesPoint {
                geo_value: geo,
                time_value: date,
                value,
                stderr,
                sample_size,
            });
        } else {
            let group = &parsed[i..j];
            let mean = group.iter().map(|entry| entry.2).sum::<f64>() / group.len() as f64;
            let mut geos: Vec<String> = group.iter().map(|entry| entry.1.clone()).collect();
            geos.sort();
            geos.dedup();
            points.push(TimeSeriesPoint {
                geo_value: geos.join(","),
                time_value: date,
                value: mean,
                stderr: None,
                sample_size: None,
            });
        }
        i = j;
    }

    Ok(SignalSeries {
        signal_name,
        geo_type: payload.geo_type,
        geo_values: payload.geo_values.clone(),
        points,
    })
}

fn parse_time_value(
    raw: Option<&serde_json::Value>,
    time_type: TimeType,
) -> Result<NaiveDate, String> {
    let raw = raw.ok_or_else(|| "missing".to_string())?;
    let text = match raw {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => return Err(other.to_string()),
    };

    match time_type {
        TimeType::Day => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&text, "%Y%m%d"))
            .map_err(|_| text),
        TimeType::Week => {
            // Epiweeks arrive as YYYYWW; pin each to its Monday.
            let digits: u32 = text.parse().map_err(|_| text.clone())?;
            let year = (digits / 100) as i32;
            let week = digits % 100;
            NaiveDate::from_isoywd_opt(year, week, chrono::Weekday::Mon).ok_or(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_row(signal: Option<&str>, geo: &str, date: &str, value: f64) -> RawSignalRow {
        RawSignalRow {
            signal: signal.map(str::to_string),
            geo_value: Some(geo.to_string()),
            time_value: Some(serde_json::Value::String(date.to_string())),
            value: Some(value),
            stderr: None,
            sample_size: None,
        }
    }

    fn payload(rows: Vec<RawSignalRow>) -> RawSignalPayload {
        RawSignalPayload {
            time_type: TimeType::Day,
            geo_type: GeoType::State,
            geo_values: vec!["ca".to_string()],
            rows,
        }
    }

    #[test]
    fn catalog_resolves_sources_and_display_names() {
        assert_eq!(signal_source("confirmed_7dav_incidence_prop"), Some("jhu-csse"));
        assert_eq!(signal_source("smoothed_wcli"), Some("fb-survey"));
        assert_eq!(signal_source("not_a_signal"), None);
        assert_eq!(display_name("smoothed_adj_cli"), "COVID-Related Doctor Visits");
        assert_eq!(display_name("something_else"), "something_else");
    }

    #[test]
    fn parse_orders_points_and_recovers_signal_name() {
        let rows = vec![
            day_row(Some("smoothed_wcli"), "ca", "2020-03-03", 2.0),
            day_row(None, "ca", "2020-03-01", 1.0),
            day_row(Some("smoothed_wcli"), "ca", "2020-03-02", 1.5),
        ];
        let series = parse_signal_payload(&payload(rows)).unwrap();
        assert_eq!(series.signal_name, "smoothed_wcli");
        assert_eq!(series.points.len(), 3);
        assert!(series
            .points
            .windows(2)
            .all(|pair| pair[0].time_value < pair[1].time_value));
        assert_eq!(series.latest_value(), Some(2.0));
    }

    #[test]
    fn parse_without_signal_name_is_rejected() {
        let rows = vec![day_row(None, "ca", "2020-03-01", 1.0)];
        let err = parse_signal_payload(&payload(rows)).unwrap_err();
        assert!(err.signal_name().is_none());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let err = parse_signal_payload(&payload(Vec::new())).unwrap_err();
        assert!(matches!(err, ParseError::MissingSignalName));
    }

    #[test]
    fn multi_geo_days_collapse_to_the_mean() {
        let rows = vec![
            day_row(Some("smoothed_wcli"), "ca", "2020-03-01", 2.0),
            day_row(Some("smoothed_wcli"), "ny", "2020-03-01", 4.0),
            day_row(Some("smoothed_wcli"), "ca", "2020-03-02", 6.0),
        ];
        let series = parse_signal_payload(&payload(rows)).unwrap();
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].value, 3.0);
        assert_eq!(series.points[0].geo_value, "ca,ny");
        assert_eq!(series.points[1].value, 6.0);
    }

    #[test]
    fn rows_without_values_are_skipped() {
        let mut gap = day_row(Some("smoothed_wcli"), "ca", "2020-03-02", 0.0);
        gap.value = None;
        let rows = vec![
            day_row(Some("smoothed_wcli"), "ca", "2020-03-01", 1.0),
            gap,
            day_row(Some("smoothed_wcli"), "ca", "2020-03-03", 3.0),
        ];
        let series = parse_signal_payload(&payload(rows)).unwrap();
        assert_eq!(series.points.len(), 2);
    }

    #[test]
    fn bad_timestamps_are_rejected_with_the_signal_name() {
        let row = day_row(Some("smoothed_wcli"), "ca", "not-a-date", 1.0);
        let err = parse_signal_payload(&payload(vec![row])).unwrap_err();
        assert_eq!(err.signal_name(), Some("smoothed_wcli"));
    }

    #[test]
    fn integer_timestamps_parse_for_days_and_weeks() {
        let mut row = day_row(Some("smoothed_wcli"), "ca", "", 1.0);
        row.time_value = Some(serde_json::Value::Number(20200315.into()));
        let series = parse_signal_payload(&payload(vec![row])).unwrap();
        assert_eq!(
            series.points[0].time_value,
            NaiveDate::from_ymd_opt(2020, 3, 15).unwrap()
        );

        let mut week_row = day_row(Some("smoothed_wcli"), "ca", "", 1.0);
        week_row.time_value = Some(serde_json::Value::Number(202012.into()));
        let mut week_payload = payload(vec![week_row]);
        week_payload.time_type = TimeType::Week;
        let series = parse_signal_payload(&week_payload).unwrap();
        assert_eq!(
            series.points[0].time_value,
            NaiveDate::from_isoywd_opt(2020, 12, chrono::Weekday::Mon).unwrap()
        );
    }

    #[tokio::test]
    async fn csv_repository_round_trips_a_series() {
        let dir = tempfile::tempdir().unwrap();
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let series = SignalSeries {
            signal_name: "smoothed_adj_cli".to_string(),
            geo_type: GeoType::State,
            geo_values: vec!["ca".to_string()],
            points: (0..5)
                .map(|i| TimeSeriesPoint {
                    geo_value: "ca".to_string(),
                    time_value: start + chrono::Duration::days(i),
                    value: 10.0 + i as f64,
                    stderr: Some(0.5),
                    sample_size: Some(1200.0),
                })
                .collect(),
        };
        write_series_csv(&series, dir.path()).unwrap();

        let repo = CsvSignalRepository::new(dir.path());
        let query = SignalQuery {
            signal: "smoothed_adj_cli".to_string(),
            time_type: TimeType::Day,
            geo_type: GeoType::State,
            geo_values: vec!["ca".to_string()],
            start_time: "20200301".to_string(),
            end_time: "20200305".to_string(),
        };
        let restored = parse_signal_payload(&repo.fetch(&query).await.unwrap()).unwrap();
        assert_eq!(restored.signal_name, series.signal_name);
        assert_eq!(restored.points, series.points);
    }

    #[tokio::test]
    async fn csv_repository_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CsvSignalRepository::new(dir.path());
        let query = SignalQuery {
            signal: "smoothed_wcli".to_string(),
            time_type: TimeType::Day,
            geo_type: GeoType::State,
            geo_values: Vec::new(),
            start_time: "20200301".to_string(),
            end_time: "20200401".to_string(),
        };
        assert!(matches!(
            repo.fetch(&query).await.unwrap_err(),
            FetchError::Io(_)
        ));
    }
}

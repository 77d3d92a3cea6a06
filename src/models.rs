use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Placeholder recorded when a payload cannot be mapped back to a known
// signal. Repeated entries are kept distinct, not merged.
pub const UNKNOWN_SIGNAL: &str = "unknown_signal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    Day,
    Week,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoType {
    State,
    County,
    Nation,
}

impl GeoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoType::State => "state",
            GeoType::County => "county",
            GeoType::Nation => "nation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub geo_value: String,
    pub time_value: NaiveDate,
    pub value: f64,
    pub stderr: Option<f64>,
    pub sample_size: Option<f64>,
}

// Points are ordered ascending by time_value with no duplicate timestamps;
// the repository parse step enforces this and downstream code relies on it.
#[derive(Debug, Clone, Serialize)]
pub struct SignalSeries {
    pub signal_name: String,
    pub geo_type: GeoType,
    pub geo_values: Vec<String>,
    pub points: Vec<TimeSeriesPoint>,
}

impl SignalSeries {
    pub fn latest_value(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    Success,
    InsufficientData,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    // Severity ordering for rollups: high > medium > low > unknown.
    pub fn severity(&self) -> u8 {
        match self {
            RiskLevel::High => 3,
            RiskLevel::Medium => 2,
            RiskLevel::Low => 1,
            RiskLevel::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RisingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RisingPeriod {
    pub fn covered_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

// On the wire a period is a [start, end] pair, not an object.
impl Serialize for RisingPeriod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.start, self.end).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RisingPeriod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (start, end) = <(NaiveDate, NaiveDate)>::deserialize(deserializer)?;
        Ok(RisingPeriod { start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysisResult {
    pub signal_name: String,
    pub rising_periods: Vec<RisingPeriod>,
    pub total_periods: usize,
    pub sample_log_slopes: Vec<f64>,
    pub status: TrendStatus,
}

impl TrendAnalysisResult {
    pub fn error(signal_name: impl Into<String>) -> Self {
        TrendAnalysisResult {
            signal_name: signal_name.into(),
            rising_periods: Vec::new(),
            total_periods: 0,
            sample_log_slopes: Vec::new(),
            status: TrendStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpidemiologicalSignal {
    pub signal_name: String,
    pub display_name: String,
    pub geographic_areas: Vec<String>,
    pub current_value: Option<f64>,
    pub trend_direction: TrendDirection,
    pub data_quality: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub overall_risk_level: RiskLevel,
    pub confidence_level: String,
    pub key_risk_factors: Vec<String>,
    pub geographic_distribution: String,
    pub trend_trajectory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub risk_score: u8,
    pub risk_reason: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub target_audience: String,
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RisingTrendSummary {
    pub signal_name: String,
    pub trend_direction: TrendDirection,
    pub rising_periods: Vec<RisingPeriod>,
    pub total_periods: usize,
    pub risk_level: RiskLevel,
    pub rising_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub success: bool,
    pub alerts: Vec<Alert>,
    pub rising_trends: Vec<RisingTrendSummary>,
    pub epidemiological_signals: Vec<EpidemiologicalSignal>,
    pub risk_assessment: RiskAssessment,
    pub recommendations: Vec<Recommendation>,
    pub tools_used: Vec<String>,
    pub generation_time_seconds: f64,
    pub timestamp: String,
    pub error: Option<String>,
}

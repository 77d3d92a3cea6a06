use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FetchError, OrchestrationError, ParseError};
use crate::evidence::{self, Evidence, Findings};
use crate::models::{
    DashboardReport, EpidemiologicalSignal, GeoType, RiskAssessment, RiskLevel,
    RisingTrendSummary, SignalSeries, TimeType, TrendAnalysisResult, UNKNOWN_SIGNAL,
};
use crate::planner::{Planner, PlannerAction};
use crate::report;
use crate::repository::{display_name, parse_signal_payload, SignalQuery, SignalRepository};
use crate::risk;
use crate::trend::{self, TrendParams};

pub const DEFAULT_MAX_ITERATIONS: usize = 8;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// YYYYMMDD
    pub start_time: String,
    /// YYYYMMDD
    pub end_time: String,
    pub time_type: TimeType,
    pub geo_type: GeoType,
    pub geo_values: Vec<String>,
    pub focus_signals: Vec<String>,
    pub max_iterations: usize,
    pub deadline: Option<Duration>,
    pub fetch_timeout: Duration,
}

impl Default for RunRequest {
    fn default() -> Self {
        RunRequest {
            start_time: "20200201".to_string(),
            end_time: "20220201".to_string(),
            time_type: TimeType::Day,
            geo_type: GeoType::State,
            geo_values: Vec::new(),
            focus_signals: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            deadline: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Init,
    Planning,
    Fetching(Vec<String>),
    Analyzing(Vec<FetchOutcome>),
    Finalizing,
    Done,
    Error,
}

#[derive(Debug)]
enum SignalFailure {
    Fetch(FetchError),
    Parse(ParseError),
}

impl SignalFailure {
    // Fetch failures keep the requested name; parse failures only know
    // what the payload itself said, which may be nothing.
    fn recorded_name(&self, requested: &str) -> String {
        match self {
            SignalFailure::Fetch(_) => requested.to_string(),
            SignalFailure::Parse(err) => {
                err.signal_name().unwrap_or(UNKNOWN_SIGNAL).to_string()
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            SignalFailure::Fetch(err) => err.to_string(),
            SignalFailure::Parse(err) => err.to_string(),
        }
    }
}

type FetchOutcome = (String, Result<SignalSeries, SignalFailure>);

// Owns one run's accumulated state. Each run gets its own instance; nothing
// is shared across concurrent runs.
pub struct DashboardOrchestrator {
    repository: Arc<dyn SignalRepository>,
    planner: Box<dyn Planner>,
    trend_params: TrendParams,
    fetch_concurrency: usize,
}

impl DashboardOrchestrator {
    pub fn new(repository: Arc<dyn SignalRepository>, planner: Box<dyn Planner>) -> Self {
        DashboardOrchestrator {
            repository,
            planner,
            trend_params: TrendParams::default(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_trend_params(mut self, params: TrendParams) -> Self {
        self.trend_params = params;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    /// Drives one run to completion. Always returns a well-formed report:
    /// terminal failures surface as `success = false` with `error` set,
    /// never as an Err.
    pub async fn run(&self, request: &RunRequest) -> DashboardReport {
        let started = Instant::now();
        let mut phase = Phase::Init;
        let mut evidence: Vec<Evidence> = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut iterations = 0usize;
        let mut failure: Option<OrchestrationError> = None;

        loop {
            phase = match phase {
                Phase::Init => {
                    info!(
                        range = %format!("{}-{}", request.start_time, request.end_time),
                        max_iterations = request.max_iterations,
                        "starting dashboard run"
                    );
                    Phase::Planning
                }
                Phase::Planning => {
                    if iterations >= request.max_iterations {
                        warn!(iterations, "iteration budget exhausted, finalizing");
                        Phase::Finalizing
                    } else if request
                        .deadline
                        .is_some_and(|deadline| started.elapsed() >= deadline)
                    {
                        warn!("deadline passed, finalizing with current evidence");
                        Phase::Finalizing
                    } else {
                        match self.planner.decide_next_action(&evidence, iterations) {
                            PlannerAction::FetchSignals(batch) if !batch.is_empty() => {
                                debug!(batch = ?batch, "planner requested fetch");
                                Phase::Fetching(batch)
                            }
                            _ => {
                                debug!("planner signaled completion");
                                Phase::Finalizing
                            }
                        }
                    }
                }
                Phase::Fetching(batch) => {
                    let outcomes = self.fetch_batch(&batch, request).await;
                    mark_tool_used(&mut tools_used, "fetch_epi_signal");
                    Phase::Analyzing(outcomes)
                }
                Phase::Analyzing(outcomes) => {
                    for (requested, outcome) in outcomes {
                        match outcome {
                            Ok(series) => {
                                mark_tool_used(&mut tools_used, "detect_rising_trend");
                                evidence.push(self.analyze(series, request));
                            }
                            Err(fail) => {
                                let name = fail.recorded_name(&requested);
                                warn!(
                                    signal = %requested,
                                    recorded_as = %name,
                                    reason = %fail.describe(),
                                    "signal failed, continuing"
                                );
                                evidence.push(failed_evidence(name, request));
                            }
                        }
                    }
                    iterations += 1;
                    Phase::Planning
                }
                Phase::Finalizing => {
                    let usable = evidence
                        .iter()
                        .any(|entry| entry.signal.data_quality != "error");
                    if !usable {
                        failure = Some(OrchestrationError::NoEvidence);
                    }

                    let findings = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                        evidence::aggregate(&evidence)
                    })) {
                        Ok(findings) => findings,
                        Err(_) => {
                            failure = Some(OrchestrationError::Finalize(
                                "evidence aggregation panicked".to_string(),
                            ));
                            empty_findings()
                        }
                    };

                    let terminal = if failure.is_none() {
                        Phase::Done
                    } else {
                        Phase::Error
                    };

                    let report = self.build_report(
                        &evidence,
                        findings,
                        tools_used,
                        started,
                        failure.as_ref(),
                    );
                    info!(
                        state = ?terminal,
                        success = report.success,
                        signals = report.epidemiological_signals.len(),
                        alerts = report.alerts.len(),
                        "dashboard run finished"
                    );
                    return report
                }
                // Both terminal states exit through Finalizing above.
                Phase::Done | Phase::Error => unreachable!("terminal state re-entered"),
            };
        }
    }

    // Sibling fetches are independent and read-only, so they run
    // concurrently under a bounded pool with a per-fetch timeout. Handles
    // are awaited in request order: evidence order never depends on which
    // fetch won the race.
    async fn fetch_batch(&self, batch: &[String], request: &RunRequest) -> Vec<FetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let mut handles: Vec<(String, JoinHandle<Result<SignalSeries, SignalFailure>>)> =
            Vec::with_capacity(batch.len());

        for signal in batch {
            let repository = Arc::clone(&self.repository);
            let semaphore = Arc::clone(&semaphore);
            let fetch_timeout = request.fetch_timeout;
            let query = SignalQuery {
                signal: signal.clone(),
                time_type: request.time_type,
                geo_type: request.geo_type,
                geo_values: request.geo_values.clone(),
                start_time: request.start_time.clone(),
                end_time: request.end_time.clone(),
            };

            handles.push((
                signal.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| {
                            SignalFailure::Fetch(FetchError::Upstream(
                                "fetch pool closed".to_string(),
                            ))
                        })?;
                    let payload =
                        match tokio::time::timeout(fetch_timeout, repository.fetch(&query)).await
                        {
                            Err(_) => {
                                return Err(SignalFailure::Fetch(FetchError::Timeout(
                                    fetch_timeout,
                                )))
                            }
                            Ok(Err(err)) => return Err(SignalFailure::Fetch(err)),
                            Ok(Ok(payload)) => payload,
                        };
                    parse_signal_payload(&payload).map_err(SignalFailure::Parse)
                }),
            ));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (signal, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(SignalFailure::Fetch(FetchError::Upstream(format!(
                    "fetch task failed: {join_err}"
                )))),
            };
            outcomes.push((signal, outcome));
        }
        outcomes
    }

    fn analyze(&self, series: SignalSeries, request: &RunRequest) -> Evidence {
        let result = trend::detect(&series, &self.trend_params);
        let classification = risk::classify(&result);
        let direction = risk::trend_direction(&result);

        debug!(
            signal = %series.signal_name,
            periods = result.rising_periods.len(),
            windows = result.total_periods,
            risk = ?classification.risk_level,
            "analyzed signal"
        );

        Evidence {
            signal: EpidemiologicalSignal {
                signal_name: series.signal_name.clone(),
                display_name: display_name(&series.signal_name).to_string(),
                geographic_areas: effective_areas(request),
                current_value: series.latest_value(),
                trend_direction: direction,
                data_quality: "high".to_string(),
            },
            result,
            risk: classification,
        }
    }

    fn build_report(
        &self,
        evidence: &[Evidence],
        findings: Findings,
        tools_used: Vec<String>,
        started: Instant,
        failure: Option<&OrchestrationError>,
    ) -> DashboardReport {
        let rising_trends: Vec<RisingTrendSummary> = evidence
            .iter()
            .map(|entry| RisingTrendSummary {
                signal_name: entry.result.signal_name.clone(),
                trend_direction: risk::trend_direction(&entry.result),
                rising_periods: entry.result.rising_periods.clone(),
                total_periods: entry.result.total_periods,
                risk_level: entry.risk.risk_level,
                rising_ratio: entry.risk.rising_ratio,
            })
            .collect();

        let recommendations =
            report::build_recommendations(&findings.risk_assessment, evidence.len());

        DashboardReport {
            success: failure.is_none(),
            alerts: findings.alerts,
            rising_trends,
            epidemiological_signals: evidence.iter().map(|e| e.signal.clone()).collect(),
            risk_assessment: findings.risk_assessment,
            recommendations,
            tools_used,
            generation_time_seconds: started.elapsed().as_secs_f64(),
            timestamp: Utc::now().to_rfc3339(),
            error: failure.map(|err| err.to_string()),
        }
    }
}

fn mark_tool_used(tools_used: &mut Vec<String>, tool: &str) {
    if !tools_used.iter().any(|used| used == tool) {
        tools_used.push(tool.to_string());
    }
}

fn effective_areas(request: &RunRequest) -> Vec<String> {
    if request.geo_values.is_empty() {
        vec!["us".to_string()]
    } else {
        request.geo_values.clone()
    }
}

fn failed_evidence(name: String, request: &RunRequest) -> Evidence {
    Evidence {
        signal: EpidemiologicalSignal {
            signal_name: name.clone(),
            display_name: display_name(&name).to_string(),
            geographic_areas: effective_areas(request),
            current_value: None,
            trend_direction: crate::models::TrendDirection::Unknown,
            data_quality: "error".to_string(),
        },
        result: TrendAnalysisResult::error(name),
        risk: risk::RiskClassification {
            risk_level: RiskLevel::Unknown,
            rising_ratio: 0.0,
        },
    }
}

fn empty_findings() -> Findings {
    Findings {
        alerts: Vec::new(),
        risk_assessment: RiskAssessment {
            overall_risk_level: RiskLevel::Unknown,
            confidence_level: "medium".to_string(),
            key_risk_factors: Vec::new(),
            geographic_distribution: "national".to_string(),
            trend_trajectory: "stable".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::RoundRobinPlanner;
    use crate::repository::{RawSignalPayload, RawSignalRow};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Script {
        Rising,
        Flat,
        Timeout,
        Refuse,
        Nameless,
    }

    struct ScriptedRepository {
        scripts: HashMap<String, Script>,
    }

    impl ScriptedRepository {
        fn new(entries: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(ScriptedRepository {
                scripts: entries
                    .iter()
                    .map(|(name, script)| (name.to_string(), script.clone()))
                    .collect(),
            })
        }

        fn rows(signal: &str, rising: bool) -> Vec<RawSignalRow> {
            let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
            (0..30)
                .map(|i| {
                    let value = if rising {
                        10.0 * (0.05 * i as f64).exp()
                    } else {
                        10.0
                    };
                    RawSignalRow {
                        signal: Some(signal.to_string()),
                        geo_value: Some("ca".to_string()),
                        time_value: Some(serde_json::Value::String(
                            (start + chrono::Duration::days(i))
                                .format("%Y-%m-%d")
                                .to_string(),
                        )),
                        value: Some(value),
                        stderr: None,
                        sample_size: None,
                    }
                })
                .collect()
        }
    }

    #[async_trait]
    impl SignalRepository for ScriptedRepository {
        async fn fetch(&self, query: &SignalQuery) -> Result<RawSignalPayload, FetchError> {
            let script = self
                .scripts
                .get(&query.signal)
                .cloned()
                .unwrap_or(Script::Refuse);
            let rows = match script {
                Script::Rising => Self::rows(&query.signal, true),
                Script::Flat => Self::rows(&query.signal, false),
                Script::Timeout => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Vec::new()
                }
                Script::Refuse => {
                    return Err(FetchError::Upstream("scripted failure".to_string()))
                }
                Script::Nameless => Self::rows(&query.signal, true)
                    .into_iter()
                    .map(|mut row| {
                        row.signal = None;
                        row
                    })
                    .collect(),
            };
            Ok(RawSignalPayload {
                time_type: query.time_type,
                geo_type: query.geo_type,
                geo_values: query.geo_values.clone(),
                rows,
            })
        }
    }

    struct GreedyPlanner;

    impl Planner for GreedyPlanner {
        fn decide_next_action(&self, _evidence: &[Evidence], _iterations: usize) -> PlannerAction {
            PlannerAction::FetchSignals(vec!["confirmed_7dav_incidence_prop".to_string()])
        }
    }

    fn request(focus: &[&str]) -> RunRequest {
        RunRequest {
            start_time: "20200301".to_string(),
            end_time: "20200330".to_string(),
            geo_values: vec!["ca".to_string()],
            focus_signals: focus.iter().map(|s| s.to_string()).collect(),
            fetch_timeout: Duration::from_millis(100),
            ..RunRequest::default()
        }
    }

    fn orchestrator(
        repository: Arc<dyn SignalRepository>,
        focus: &[&str],
    ) -> DashboardOrchestrator {
        let planner = RoundRobinPlanner::new(focus.iter().map(|s| s.to_string()).collect(), 4);
        DashboardOrchestrator::new(repository, Box::new(planner))
    }

    #[tokio::test]
    async fn rising_signals_produce_a_high_risk_report() {
        let repository = ScriptedRepository::new(&[
            ("confirmed_7dav_incidence_prop", Script::Rising),
            ("smoothed_wcli", Script::Flat),
        ]);
        let focus = ["confirmed_7dav_incidence_prop", "smoothed_wcli"];
        let report = orchestrator(repository, &focus).run(&request(&focus)).await;

        assert!(report.success);
        assert_eq!(report.epidemiological_signals.len(), 2);
        assert_eq!(
            report.risk_assessment.overall_risk_level,
            RiskLevel::High
        );
        assert_eq!(
            report.risk_assessment.key_risk_factors,
            vec!["confirmed_7dav_incidence_prop".to_string()]
        );
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].location, "CA");
        assert_eq!(
            report.tools_used,
            vec!["fetch_epi_signal".to_string(), "detect_rising_trend".to_string()]
        );
        assert_eq!(report.recommendations[0].priority, crate::models::Priority::Urgent);
    }

    #[tokio::test]
    async fn budget_cuts_the_run_after_exactly_max_iterations() {
        let repository =
            ScriptedRepository::new(&[("confirmed_7dav_incidence_prop", Script::Flat)]);
        let mut run_request = request(&[]);
        run_request.max_iterations = 2;

        let orchestrator =
            DashboardOrchestrator::new(repository, Box::new(GreedyPlanner));
        let report = orchestrator.run(&run_request).await;

        assert!(report.success);
        // The greedy planner never stops asking; the budget stops it after
        // two completed analyzing steps.
        assert_eq!(report.epidemiological_signals.len(), 2);
    }

    #[tokio::test]
    async fn one_failed_fetch_does_not_fail_the_run() {
        let repository = ScriptedRepository::new(&[
            ("confirmed_7dav_incidence_prop", Script::Rising),
            ("smoothed_wcli", Script::Timeout),
            ("smoothed_adj_cli", Script::Flat),
        ]);
        let focus = [
            "confirmed_7dav_incidence_prop",
            "smoothed_wcli",
            "smoothed_adj_cli",
        ];
        let report = orchestrator(repository, &focus).run(&request(&focus)).await;

        assert!(report.success);
        assert_eq!(report.epidemiological_signals.len(), 3);
        // Request order survives even though the timed-out fetch finished
        // last.
        assert_eq!(
            report.epidemiological_signals[1].signal_name,
            "smoothed_wcli"
        );
        assert_eq!(report.epidemiological_signals[1].data_quality, "error");
        assert_eq!(report.rising_trends[1].risk_level, RiskLevel::Unknown);
        assert_eq!(report.epidemiological_signals[0].data_quality, "high");
        assert_eq!(report.epidemiological_signals[2].data_quality, "high");
    }

    #[tokio::test]
    async fn total_fetch_failure_yields_a_failed_report_with_partial_evidence() {
        let repository = ScriptedRepository::new(&[
            ("confirmed_7dav_incidence_prop", Script::Refuse),
            ("smoothed_wcli", Script::Refuse),
        ]);
        let focus = ["confirmed_7dav_incidence_prop", "smoothed_wcli"];
        let report = orchestrator(repository, &focus).run(&request(&focus)).await;

        assert!(!report.success);
        assert!(report.error.is_some());
        assert_eq!(report.epidemiological_signals.len(), 2);
        assert_eq!(
            report.risk_assessment.overall_risk_level,
            RiskLevel::Unknown
        );
    }

    #[tokio::test]
    async fn nameless_payloads_are_recorded_as_unknown_signal() {
        let repository = ScriptedRepository::new(&[
            ("confirmed_7dav_incidence_prop", Script::Rising),
            ("smoothed_wcli", Script::Nameless),
        ]);
        let focus = ["confirmed_7dav_incidence_prop", "smoothed_wcli"];
        let report = orchestrator(repository, &focus).run(&request(&focus)).await;

        assert!(report.success);
        let unknown = &report.epidemiological_signals[1];
        assert_eq!(unknown.signal_name, UNKNOWN_SIGNAL);
        assert_eq!(unknown.data_quality, "error");
        assert_eq!(report.rising_trends[1].signal_name, UNKNOWN_SIGNAL);
        assert!(matches!(
            report
                .rising_trends
                .iter()
                .find(|t| t.signal_name == UNKNOWN_SIGNAL)
                .map(|t| t.total_periods),
            Some(0)
        ));
    }

    #[tokio::test]
    async fn expired_deadline_finalizes_immediately() {
        let repository =
            ScriptedRepository::new(&[("confirmed_7dav_incidence_prop", Script::Rising)]);
        let mut run_request = request(&["confirmed_7dav_incidence_prop"]);
        run_request.deadline = Some(Duration::ZERO);

        let report = orchestrator(repository, &["confirmed_7dav_incidence_prop"])
            .run(&run_request)
            .await;

        // Nothing was fetched before the deadline, so the run reports
        // failure but still returns a complete report shape.
        assert!(!report.success);
        assert!(report.epidemiological_signals.is_empty());
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn detect_status_flows_into_the_trend_summaries() {
        let repository =
            ScriptedRepository::new(&[("confirmed_7dav_incidence_prop", Script::Rising)]);
        let focus = ["confirmed_7dav_incidence_prop"];
        let report = orchestrator(repository, &focus).run(&request(&focus)).await;

        assert_eq!(report.rising_trends.len(), 1);
        let summary = &report.rising_trends[0];
        assert_eq!(summary.rising_periods.len(), 1);
        assert!(summary.total_periods > 0);
        assert!(summary.rising_ratio > 0.7);
    }
}

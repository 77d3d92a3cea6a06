use std::fmt::Write;

use crate::models::{DashboardReport, Priority, Recommendation, RiskAssessment, RiskLevel};

const MAX_RECOMMENDATIONS: usize = 5;

pub fn build_recommendations(
    assessment: &RiskAssessment,
    signal_count: usize,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if !assessment.key_risk_factors.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::Urgent,
            action: format!(
                "Enhance surveillance for rising epidemiological trends: {}",
                assessment.key_risk_factors.join(", ")
            ),
            target_audience: "Public Health Officials".to_string(),
            timeframe: "Immediate".to_string(),
        });
    }

    if signal_count > 0 {
        recommendations.push(Recommendation {
            priority: Priority::Medium,
            action: format!(
                "Continue monitoring {} active epidemiological signals",
                signal_count
            ),
            target_audience: "Epidemiologists".to_string(),
            timeframe: "Ongoing".to_string(),
        });
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::Low,
            action: "Maintain routine epidemiological surveillance".to_string(),
            target_audience: "Public Health Officials".to_string(),
            timeframe: "Ongoing".to_string(),
        });
    }

    recommendations.truncate(MAX_RECOMMENDATIONS);
    recommendations
}

pub fn render_markdown(report: &DashboardReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Epidemiological Situation Report");
    let _ = writeln!(
        output,
        "Generated {} in {:.2}s (tools: {})",
        report.timestamp,
        report.generation_time_seconds,
        if report.tools_used.is_empty() {
            "none".to_string()
        } else {
            report.tools_used.join(", ")
        }
    );

    if let Some(error) = &report.error {
        let _ = writeln!(output);
        let _ = writeln!(output, "**Run failed:** {}", error);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Assessment");
    let assessment = &report.risk_assessment;
    let _ = writeln!(
        output,
        "- Overall risk: {} (confidence {})",
        risk_label(assessment.overall_risk_level),
        assessment.confidence_level
    );
    let _ = writeln!(output, "- Trajectory: {}", assessment.trend_trajectory);
    let _ = writeln!(
        output,
        "- Geographic distribution: {}",
        assessment.geographic_distribution
    );
    if !assessment.key_risk_factors.is_empty() {
        let _ = writeln!(
            output,
            "- Key risk factors: {}",
            assessment.key_risk_factors.join(", ")
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts");
    if report.alerts.is_empty() {
        let _ = writeln!(output, "No active alerts for this window.");
    } else {
        for alert in &report.alerts {
            let _ = writeln!(
                output,
                "- [{}] {} (risk {}/10): {}",
                alert.location, alert.name, alert.risk_score, alert.risk_reason
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rising Trends");
    if report.rising_trends.is_empty() {
        let _ = writeln!(output, "No trend analyses completed.");
    } else {
        for trend in &report.rising_trends {
            let _ = writeln!(
                output,
                "- {}: {} rising period(s) over {} windows, risk {}",
                trend.signal_name,
                trend.rising_periods.len(),
                trend.total_periods,
                risk_label(trend.risk_level)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Signals");
    if report.epidemiological_signals.is_empty() {
        let _ = writeln!(output, "No signals fetched.");
    } else {
        for signal in &report.epidemiological_signals {
            let _ = writeln!(
                output,
                "- {} ({}) in {}: data quality {}",
                signal.display_name,
                signal.signal_name,
                signal.geographic_areas.join(", "),
                signal.data_quality
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    for recommendation in &report.recommendations {
        let _ = writeln!(
            output,
            "- [{}] {} (target: {}, timeframe: {})",
            priority_label(recommendation.priority),
            recommendation.action,
            recommendation.target_audience,
            recommendation.timeframe
        );
    }

    output
}

fn risk_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Unknown => "unknown",
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "URGENT",
        Priority::High => "HIGH",
        Priority::Medium => "MEDIUM",
        Priority::Low => "LOW",
    }
}

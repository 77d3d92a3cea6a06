use uuid::Uuid;

use crate::models::{
    Alert, EpidemiologicalSignal, RiskAssessment, RiskLevel, TrendAnalysisResult,
};
use crate::repository::display_name;
use crate::risk::RiskClassification;

pub const MIN_SIGNALS_FOR_ASSESSMENT: usize = 1;

// One classified signal's worth of evidence. Appended in request order and
// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub signal: EpidemiologicalSignal,
    pub result: TrendAnalysisResult,
    pub risk: RiskClassification,
}

#[derive(Debug, Clone)]
pub struct Findings {
    pub alerts: Vec<Alert>,
    pub risk_assessment: RiskAssessment,
}

pub fn aggregate(evidence: &[Evidence]) -> Findings {
    Findings {
        alerts: synthesize_alerts(evidence),
        risk_assessment: assess_risk(evidence),
    }
}

fn assess_risk(evidence: &[Evidence]) -> RiskAssessment {
    let overall_risk_level = if evidence.len() < MIN_SIGNALS_FOR_ASSESSMENT {
        RiskLevel::Unknown
    } else {
        evidence
            .iter()
            .map(|entry| entry.risk.risk_level)
            .max_by_key(|level| level.severity())
            .unwrap_or(RiskLevel::Unknown)
    };

    let confidence_level = if evidence.len() >= 2 { "high" } else { "medium" };

    // Discovery order, repeats preserved: the same name can appear twice
    // when a signal was analyzed more than once in a run.
    let key_risk_factors: Vec<String> = evidence
        .iter()
        .filter(|entry| entry.risk.risk_level == RiskLevel::High)
        .map(|entry| entry.result.signal_name.clone())
        .collect();

    let any_high = !key_risk_factors.is_empty();

    RiskAssessment {
        overall_risk_level,
        confidence_level: confidence_level.to_string(),
        key_risk_factors,
        geographic_distribution: describe_geography(evidence),
        trend_trajectory: if any_high { "rising" } else { "stable" }.to_string(),
    }
}

fn describe_geography(evidence: &[Evidence]) -> String {
    let mut areas: Vec<String> = evidence
        .iter()
        .flat_map(|entry| entry.signal.geographic_areas.iter())
        .map(|area| area.to_lowercase())
        .collect();
    areas.sort();
    areas.dedup();

    if areas.is_empty() || areas.iter().any(|area| area == "us" || area == "nation") {
        "national".to_string()
    } else {
        areas.join(", ")
    }
}

fn synthesize_alerts(evidence: &[Evidence]) -> Vec<Alert> {
    // Geography groups in discovery order so two runs over the same
    // evidence emit identically ordered alerts.
    let mut groups: Vec<(String, Vec<&Evidence>)> = Vec::new();
    for entry in evidence {
        for area in &entry.signal.geographic_areas {
            match groups.iter_mut().find(|(name, _)| name == area) {
                Some((_, members)) => members.push(entry),
                None => groups.push((area.clone(), vec![entry])),
            }
        }
    }

    let mut alerts: Vec<Alert> = Vec::new();
    for (area, members) in groups {
        let triggering: Vec<&&Evidence> = members
            .iter()
            .filter(|entry| {
                matches!(entry.risk.risk_level, RiskLevel::High | RiskLevel::Medium)
            })
            .collect();
        if triggering.is_empty() {
            continue;
        }

        let peak_ratio = triggering
            .iter()
            .map(|entry| entry.risk.rising_ratio)
            .fold(0.0_f64, f64::max);
        let risk_score = ((peak_ratio * 10.0).round() as i64).clamp(1, 10) as u8;

        let mut names: Vec<String> = triggering
            .iter()
            .map(|entry| display_name(&entry.result.signal_name).to_string())
            .collect();
        names.dedup();
        let location = area.to_uppercase();
        let risk_reason = format!("Rising trends detected in {}", names.join(", "));

        // Candidates identical in (location, score, triggering signals)
        // collapse into one alert; differing scores stay separate.
        if alerts.iter().any(|existing| {
            existing.location == location
                && existing.risk_score == risk_score
                && existing.risk_reason == risk_reason
        }) {
            continue;
        }

        let (latitude, longitude) = match state_centroid(&area.to_lowercase()) {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        };

        alerts.push(Alert {
            id: Uuid::new_v4(),
            name: format!("Rising epidemiological activity in {}", location),
            description: format!(
                "{} of {} monitored signals show sustained rising trends in {}.",
                triggering.len(),
                members.len(),
                location
            ),
            risk_score,
            risk_reason,
            location,
            latitude,
            longitude,
        });
    }

    alerts
}

// Approximate geographic centers for commonly monitored states; locations
// outside the table get no coordinates.
fn state_centroid(code: &str) -> Option<(f64, f64)> {
    const CENTROIDS: &[(&str, f64, f64)] = &[
        ("az", 34.29, -111.66),
        ("ca", 37.18, -119.47),
        ("fl", 28.63, -82.45),
        ("ga", 32.64, -83.44),
        ("il", 40.04, -89.20),
        ("ma", 42.26, -71.81),
        ("mi", 44.35, -85.41),
        ("nc", 35.56, -79.39),
        ("nj", 40.19, -74.67),
        ("ny", 42.95, -75.53),
        ("oh", 40.29, -82.79),
        ("pa", 40.88, -77.80),
        ("tx", 31.48, -99.33),
        ("va", 37.52, -78.85),
        ("wa", 47.38, -120.45),
    ];
    CENTROIDS
        .iter()
        .find(|(state, _, _)| *state == code)
        .map(|(_, lat, lon)| (*lat, *lon))
}

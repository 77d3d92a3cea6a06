use crate::models::{RiskLevel, TrendAnalysisResult, TrendDirection, TrendStatus};

pub const HIGH_RISK_RATIO: f64 = 0.7;
pub const MEDIUM_RISK_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskClassification {
    pub risk_level: RiskLevel,
    pub rising_ratio: f64,
}

// Pure function of the analysis result. The ratio weighs each rising period
// by the days it covers, so a long sustained climb outweighs a blip even
// after contiguous windows have been merged.
pub fn classify(result: &TrendAnalysisResult) -> RiskClassification {
    if result.status != TrendStatus::Success {
        return RiskClassification {
            risk_level: RiskLevel::Unknown,
            rising_ratio: 0.0,
        };
    }

    let rising_days: i64 = result.rising_periods.iter().map(|p| p.covered_days()).sum();
    let rising_ratio = rising_days as f64 / result.total_periods.max(1) as f64;

    let risk_level = if rising_ratio >= HIGH_RISK_RATIO {
        RiskLevel::High
    } else if rising_ratio >= MEDIUM_RISK_RATIO {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskClassification {
        risk_level,
        rising_ratio,
    }
}

pub fn trend_direction(result: &TrendAnalysisResult) -> TrendDirection {
    if result.status != TrendStatus::Success {
        return TrendDirection::Unknown;
    }
    if !result.rising_periods.is_empty() {
        return TrendDirection::Rising;
    }
    if !result.sample_log_slopes.is_empty() && result.sample_log_slopes.iter().all(|s| *s < 0.0) {
        return TrendDirection::Falling;
    }
    TrendDirection::Stable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoType, RisingPeriod, SignalSeries, TimeSeriesPoint};
    use crate::trend::{self, TrendParams};
    use chrono::NaiveDate;

    fn result_with_ratio(rising_days: i64, total_periods: usize) -> TrendAnalysisResult {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let rising_periods = if rising_days > 0 {
            vec![RisingPeriod {
                start,
                end: start + chrono::Duration::days(rising_days - 1),
            }]
        } else {
            Vec::new()
        };
        TrendAnalysisResult {
            signal_name: "smoothed_adj_cli".to_string(),
            rising_periods,
            total_periods,
            sample_log_slopes: vec![0.02],
            status: TrendStatus::Success,
        }
    }

    fn daily_series(values: &[f64]) -> SignalSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        SignalSeries {
            signal_name: "confirmed_7dav_incidence_prop".to_string(),
            geo_type: GeoType::State,
            geo_values: vec!["ca".to_string()],
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| TimeSeriesPoint {
                    geo_value: "ca".to_string(),
                    time_value: start + chrono::Duration::days(i as i64),
                    value: *v,
                    stderr: None,
                    sample_size: None,
                })
                .collect(),
        }
    }

    #[test]
    fn ratio_at_boundary_is_high() {
        let classification = classify(&result_with_ratio(7000, 10000));
        assert_eq!(classification.risk_level, RiskLevel::High);
        assert!((classification.rising_ratio - 0.7).abs() < 1e-12);
    }

    #[test]
    fn ratio_just_below_boundary_is_medium() {
        let classification = classify(&result_with_ratio(6999, 10000));
        assert_eq!(classification.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn low_ratio_is_low() {
        let classification = classify(&result_with_ratio(2, 10));
        assert_eq!(classification.risk_level, RiskLevel::Low);
    }

    #[test]
    fn non_success_status_is_unknown() {
        let result = TrendAnalysisResult::error("smoothed_wcli");
        let classification = classify(&result);
        assert_eq!(classification.risk_level, RiskLevel::Unknown);
        assert_eq!(classification.rising_ratio, 0.0);
    }

    #[test]
    fn monotone_climb_classifies_high() {
        let values: Vec<f64> = (0..20).map(|i| 50.0 + 15.0 * i as f64 / 19.0).collect();
        let result = trend::detect(&daily_series(&values), &TrendParams::default());
        assert_eq!(result.status, TrendStatus::Success);
        assert_eq!(result.rising_periods.len(), 1);

        let classification = classify(&result);
        assert_eq!(classification.risk_level, RiskLevel::High);
        assert_eq!(trend_direction(&result), TrendDirection::Rising);
    }

    #[test]
    fn flat_series_classifies_low() {
        let result = trend::detect(&daily_series(&[37.5; 20]), &TrendParams::default());
        assert_eq!(result.status, TrendStatus::Success);
        assert!(result.rising_periods.is_empty());

        let classification = classify(&result);
        assert_eq!(classification.risk_level, RiskLevel::Low);
        assert_eq!(trend_direction(&result), TrendDirection::Stable);
    }

    #[test]
    fn steady_decline_reads_as_falling() {
        let values: Vec<f64> = (0..20).map(|i| 80.0 * (-0.05 * i as f64).exp()).collect();
        let result = trend::detect(&daily_series(&values), &TrendParams::default());
        assert_eq!(trend_direction(&result), TrendDirection::Falling);
    }
}

use chrono::NaiveDate;

use crate::models::{RisingPeriod, SignalSeries, TrendAnalysisResult, TrendStatus};

// Values at or below zero are clamped to this floor before the log
// transform instead of being discarded. Callers see a sharp dip at such
// points, not a silent gap.
pub const LOG_FLOOR: f64 = 1e-6;

const SLOPE_SAMPLE_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct TrendParams {
    pub window_size: usize,
    pub min_log_slope: f64,
    pub smooth: bool,
    pub smoothing_window: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        TrendParams {
            window_size: 7,
            min_log_slope: 0.01,
            smooth: true,
            smoothing_window: 3,
        }
    }
}

// One regression fit over a sliding window. Never leaves this module.
#[derive(Debug, Clone, Copy)]
struct TrendWindow {
    start: NaiveDate,
    end: NaiveDate,
    log_slope: f64,
}

pub fn detect(series: &SignalSeries, params: &TrendParams) -> TrendAnalysisResult {
    let signal_name = series.signal_name.clone();

    if params.window_size < 2
        || !params.min_log_slope.is_finite()
        || (params.smooth && params.smoothing_window == 0)
    {
        return TrendAnalysisResult::error(signal_name);
    }

    let timestamps: Vec<NaiveDate> = series.points.iter().map(|p| p.time_value).collect();
    if timestamps.windows(2).any(|pair| pair[0] >= pair[1]) {
        return TrendAnalysisResult::error(signal_name);
    }

    let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
    let (dates, values) = if params.smooth {
        centered_moving_average(&timestamps, &values, params.smoothing_window)
    } else {
        (timestamps, values)
    };

    if values.len() < params.window_size {
        return TrendAnalysisResult {
            signal_name,
            rising_periods: Vec::new(),
            total_periods: 0,
            sample_log_slopes: Vec::new(),
            status: TrendStatus::InsufficientData,
        };
    }

    let log_values: Vec<f64> = values.iter().map(|v| v.max(LOG_FLOOR).ln()).collect();

    let total_periods = log_values.len() - params.window_size + 1;
    let mut windows = Vec::with_capacity(total_periods);
    for i in 0..total_periods {
        let slope = ols_slope(&log_values[i..i + params.window_size]);
        windows.push(TrendWindow {
            start: dates[i],
            end: dates[i + params.window_size - 1],
            log_slope: slope,
        });
    }

    let sample_log_slopes = windows
        .iter()
        .take(SLOPE_SAMPLE_LEN)
        .map(|w| w.log_slope)
        .collect();

    TrendAnalysisResult {
        signal_name,
        rising_periods: merge_rising(&windows, params.min_log_slope),
        total_periods,
        sample_log_slopes,
        status: TrendStatus::Success,
    }
}

// A maximal run of contiguous rising windows collapses into one period:
// the first window's start through the last window's end. Any non-rising
// window in between splits the run.
fn merge_rising(windows: &[TrendWindow], min_log_slope: f64) -> Vec<RisingPeriod> {
    let mut periods: Vec<RisingPeriod> = Vec::new();
    let mut in_run = false;

    for window in windows {
        if window.log_slope >= min_log_slope {
            if in_run {
                if let Some(current) = periods.last_mut() {
                    current.end = window.end;
                }
            } else {
                periods.push(RisingPeriod {
                    start: window.start,
                    end: window.end,
                });
                in_run = true;
            }
        } else {
            in_run = false;
        }
    }

    periods
}

// Centered moving average; edge points without a full window are dropped,
// so the output is shorter than the input by window - 1 points.
fn centered_moving_average(
    dates: &[NaiveDate],
    values: &[f64],
    window: usize,
) -> (Vec<NaiveDate>, Vec<f64>) {
    if values.len() < window {
        return (Vec::new(), Vec::new());
    }

    let left = (window - 1) / 2;
    let right = window / 2;
    let mut out_dates = Vec::with_capacity(values.len() - window + 1);
    let mut out_values = Vec::with_capacity(values.len() - window + 1);

    for i in left..values.len() - right {
        let sum: f64 = values[i - left..=i + right].iter().sum();
        out_dates.push(dates[i]);
        out_values.push(sum / window as f64);
    }

    (out_dates, out_values)
}

// Ordinary least squares slope of y against its index.
fn ols_slope(y: &[f64]) -> f64 {
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean: f64 = y.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, value) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (value - y_mean);
        denominator += dx * dx;
    }

    numerator / denominator
}

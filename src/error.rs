use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

/// Per-signal fetch failures. Never fatal to a run: the orchestrator records
/// the failing signal with an error status and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream rejected request: {0}")]
    Upstream(String),
    #[error("unknown signal {0:?}, not in the catalog")]
    UnknownSignal(String),
    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Payload-to-series mapping failures at the orchestration boundary. A
/// payload that cannot name its signal is recorded under "unknown_signal"
/// rather than dropped.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload rows carry no recognizable signal name")]
    MissingSignalName,
    #[error("signal {signal}: unparseable timestamp {raw:?}")]
    BadTimestamp { signal: String, raw: String },
    #[error("signal {signal}: row without a geographic value on {date}")]
    MissingGeo { signal: String, date: NaiveDate },
}

impl ParseError {
    /// Signal name recovered from the payload, when the rows carried one.
    pub fn signal_name(&self) -> Option<&str> {
        match self {
            ParseError::MissingSignalName => None,
            ParseError::BadTimestamp { signal, .. } => Some(signal),
            ParseError::MissingGeo { signal, .. } => Some(signal),
        }
    }
}

/// Terminal failures. Surfaced as a report with success = false, never as a
/// raw error to the caller.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("no signals could be fetched")]
    NoEvidence,
    #[error("finalization failed: {0}")]
    Finalize(String),
}

use crate::evidence::Evidence;
use crate::repository::DEFAULT_SIGNALS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerAction {
    /// One FETCHING step's batch; sibling fetches run concurrently.
    FetchSignals(Vec<String>),
    Finalize,
}

// Pluggable replacement for the free-form reasoning step. The orchestrator
// owns the iteration budget; a planner only proposes the next action.
pub trait Planner: Send + Sync {
    fn decide_next_action(&self, evidence: &[Evidence], iterations_used: usize) -> PlannerAction;
}

// Walks the focus list (or the catalog defaults) a batch at a time and
// finalizes once every signal has been requested. Every fetch request
// yields exactly one evidence entry, so the evidence length tells us how
// far along the list we are.
pub struct RoundRobinPlanner {
    signals: Vec<String>,
    batch_size: usize,
}

impl RoundRobinPlanner {
    pub fn new(focus_signals: Vec<String>, batch_size: usize) -> Self {
        let signals = if focus_signals.is_empty() {
            DEFAULT_SIGNALS.iter().map(|s| s.to_string()).collect()
        } else {
            focus_signals
        };
        RoundRobinPlanner {
            signals,
            batch_size: batch_size.max(1),
        }
    }
}

impl Planner for RoundRobinPlanner {
    fn decide_next_action(&self, evidence: &[Evidence], _iterations_used: usize) -> PlannerAction {
        let consumed = evidence.len();
        if consumed >= self.signals.len() {
            return PlannerAction::Finalize;
        }
        let batch = self.signals[consumed..]
            .iter()
            .take(self.batch_size)
            .cloned()
            .collect();
        PlannerAction::FetchSignals(batch)
    }
}

//! BatchRun state machine
//!
//! `Idle → Running → (Completed | Stopped | Failed)`
//!
//! Counters only ever move forward: `dispatched` grows as workers pick up
//! worklist entries, `completed`/`errored` grow as they finish. At every
//! observation `completed + errored + pending == worklist.len()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagiato_common::{AiOperation, BatchState};
use uuid::Uuid;

/// How many upcoming filenames a progress snapshot previews
const QUEUE_PREVIEW_LEN: usize = 10;

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub batch_id: Uuid,
    pub old_state: BatchState,
    pub new_state: BatchState,
    pub transitioned_at: DateTime<Utc>,
}

/// One coordinated execution of an operation across a worklist
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub batch_id: Uuid,
    pub operation: AiOperation,
    pub state: BatchState,
    /// Ordered photo filenames
    pub worklist: Vec<String>,
    /// Entries handed to workers so far (always a worklist prefix)
    pub dispatched: usize,
    pub completed: usize,
    pub errored: usize,
    pub stop_requested: bool,
    /// Fatal error that aborted the run
    pub failure: Option<String>,
    /// Most recent state-file write failure, if any
    pub last_save_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(operation: AiOperation, worklist: Vec<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            operation,
            state: BatchState::Idle,
            worklist,
            dispatched: 0,
            completed: 0,
            errored: 0,
            stop_requested: false,
            failure: None,
            last_save_error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.worklist.len()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatched - self.completed - self.errored
    }

    pub fn not_started(&self) -> usize {
        self.total() - self.dispatched
    }

    /// Not yet finished: in flight plus never dispatched
    pub fn pending(&self) -> usize {
        self.total() - self.completed - self.errored
    }

    pub fn is_running(&self) -> bool {
        self.state == BatchState::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: BatchState) -> StateTransition {
        let transition = StateTransition {
            batch_id: self.batch_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    /// Next worklist entry to dispatch, advancing the dispatch cursor
    pub fn next_dispatch(&mut self) -> Option<String> {
        let filename = self.worklist.get(self.dispatched)?.clone();
        self.dispatched += 1;
        Some(filename)
    }

    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.errored += 1;
        }
    }

    /// Terminal state once nothing is in flight
    ///
    /// A requested stop is reported even when the worklist was already fully
    /// dispatched.
    pub fn settled_state(&self) -> BatchState {
        if self.failure.is_some() {
            BatchState::Failed
        } else if self.stop_requested {
            BatchState::Stopped
        } else {
            BatchState::Completed
        }
    }

    pub fn progress(&self) -> BatchProgress {
        let total = self.total();
        let finished = self.completed + self.errored;
        BatchProgress {
            batch_id: self.batch_id,
            operation: self.operation,
            state: self.state,
            total,
            completed: self.completed,
            errored: self.errored,
            in_flight: self.in_flight(),
            not_started: self.not_started(),
            percentage: if total > 0 {
                (finished as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            stop_requested: self.stop_requested,
            failure: self.failure.clone(),
            last_save_error: self.last_save_error.clone(),
            upcoming: self
                .worklist
                .iter()
                .skip(self.dispatched)
                .take(QUEUE_PREVIEW_LEN)
                .cloned()
                .collect(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Read-only snapshot of a BatchRun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub operation: AiOperation,
    pub state: BatchState,
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub in_flight: usize,
    pub not_started: usize,
    pub percentage: f64,
    pub stop_requested: bool,
    pub failure: Option<String>,
    pub last_save_error: Option<String>,
    /// Preview of the next undispatched filenames
    pub upcoming: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    /// In flight plus never dispatched
    pub fn pending(&self) -> usize {
        self.in_flight + self.not_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_of(n: usize) -> BatchRun {
        BatchRun::new(
            AiOperation::Describe,
            (0..n).map(|i| format!("{i}.jpg")).collect(),
        )
    }

    #[test]
    fn test_counters_balance() {
        let mut run = run_of(5);
        run.transition_to(BatchState::Running);

        assert_eq!(run.next_dispatch().as_deref(), Some("0.jpg"));
        assert_eq!(run.next_dispatch().as_deref(), Some("1.jpg"));
        assert_eq!(run.in_flight(), 2);
        assert_eq!(run.not_started(), 3);

        run.record_outcome(true);
        run.record_outcome(false);
        let progress = run.progress();
        assert_eq!(progress.completed + progress.errored + progress.pending(), 5);
        assert_eq!(progress.upcoming, vec!["2.jpg", "3.jpg", "4.jpg"]);
    }

    #[test]
    fn test_dispatch_exhausts() {
        let mut run = run_of(1);
        assert!(run.next_dispatch().is_some());
        assert!(run.next_dispatch().is_none());
        assert_eq!(run.dispatched, 1);
    }

    #[test]
    fn test_settled_state() {
        let mut run = run_of(3);
        run.next_dispatch();
        run.record_outcome(true);
        run.stop_requested = true;
        assert_eq!(run.settled_state(), BatchState::Stopped);

        run.failure = Some("spawn failed".to_string());
        assert_eq!(run.settled_state(), BatchState::Failed);

        let mut run = run_of(1);
        run.next_dispatch();
        run.record_outcome(false);
        run.stop_requested = true;
        // Stop arrived after everything was dispatched
        assert_eq!(run.settled_state(), BatchState::Stopped);

        let mut run = run_of(1);
        run.next_dispatch();
        run.record_outcome(true);
        assert_eq!(run.settled_state(), BatchState::Completed);
    }

    #[test]
    fn test_terminal_transition_sets_end_time() {
        let mut run = run_of(0);
        let transition = run.transition_to(BatchState::Running);
        assert_eq!(transition.old_state, BatchState::Idle);
        assert!(run.ended_at.is_none());

        run.transition_to(BatchState::Completed);
        assert!(run.is_terminal());
        assert!(run.ended_at.is_some());
    }
}

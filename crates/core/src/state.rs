//! Execution state machine.
//!
//! [`ExecutionState`] is a pure reducer over classified inbound
//! messages: [`ExecutionState::apply`] folds one message into the
//! state. Transports feed it; they never mutate the state directly.
//!
//! Terminal statuses are absorbing: once a run is `Completed` or
//! `Failed`, every message except a fresh `start` is ignored until
//! [`ExecutionState::reset`] re-arms the machine.

use serde::Serialize;

use crate::message::{ExecutionMessage, InboundMessage};
use crate::types::Timestamp;

/// Lifecycle status of one watched execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Whether no further progress is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Verdict of a single test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Unknown,
}

impl StepStatus {
    /// Map a backend verdict string; anything unrecognized is `Unknown`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("passed") => Self::Passed,
            Some("failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Outcome of one finished test step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// 1-based index within the run.
    pub step_index: u32,
    pub step_name: String,
    pub status: StepStatus,
    pub message: Option<String>,
    /// When the `step_end` frame was received.
    pub timestamp: Timestamp,
}

/// Aggregate step counters derived from [`ExecutionState::step_results`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Rounded percentage of passed steps; 0 when no steps finished.
    pub pass_rate: u8,
}

/// Observable state of one watched execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    /// Completion percentage, clamped to 0..=100 and non-decreasing
    /// while the run is `Running`.
    pub progress: u8,
    /// 1-based index of the step currently running (0 before the first).
    pub current_step: u32,
    pub total_steps: u32,
    /// Label of the current step, or the failure message once failed.
    pub current_step_name: Option<String>,
    /// Ordered step outcomes, appended on each `step_end` frame.
    pub step_results: Vec<StepResult>,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

impl ExecutionState {
    /// Fold one classified message into the state.
    ///
    /// `now` is the receipt time of the message; passing it explicitly
    /// keeps the reducer deterministic under test.
    pub fn apply(&mut self, message: &InboundMessage, now: Timestamp) {
        let InboundMessage::Execution(message) = message else {
            // Text and unknown frames never transition the state.
            return;
        };

        // Absorbing terminal states: only a fresh `start` re-arms.
        if self.status.is_terminal() && !matches!(message, ExecutionMessage::Start(_)) {
            return;
        }

        match message {
            ExecutionMessage::Start(data) => {
                *self = Self {
                    status: ExecutionStatus::Running,
                    progress: 0,
                    current_step: 0,
                    total_steps: data.total_steps.unwrap_or(0),
                    current_step_name: None,
                    step_results: Vec::new(),
                    started_at: Some(now),
                    ended_at: None,
                };
            }
            ExecutionMessage::Progress(data) => {
                self.bump_progress(data.progress);
                if let Some(step) = data.current_step {
                    self.current_step = step;
                }
                if let Some(total) = data.total_steps {
                    self.total_steps = total;
                }
                if let Some(name) = &data.step_name {
                    self.current_step_name = Some(name.clone());
                }
            }
            ExecutionMessage::StepStart(data) => {
                if let Some(step) = data.current_step {
                    self.current_step = step;
                }
                if let Some(total) = data.total_steps {
                    self.total_steps = total;
                }
                if let Some(name) = &data.step_name {
                    self.current_step_name = Some(name.clone());
                }
                self.bump_progress(data.progress);
            }
            ExecutionMessage::StepEnd(data) => {
                if let Some(step) = data.current_step {
                    self.current_step = step;
                }
                self.step_results.push(StepResult {
                    step_index: data.current_step.unwrap_or(self.current_step),
                    step_name: data.step_name.clone().unwrap_or_default(),
                    status: StepStatus::parse(data.status.as_deref()),
                    message: data.message.clone(),
                    timestamp: now,
                });
                self.bump_progress(data.progress);
            }
            ExecutionMessage::Complete(data) => {
                self.status = if data.status.as_deref() == Some("failed") {
                    ExecutionStatus::Failed
                } else {
                    ExecutionStatus::Completed
                };
                self.progress = 100;
                self.ended_at = Some(now);
            }
            ExecutionMessage::Error(data) | ExecutionMessage::Failed(data) => {
                self.status = ExecutionStatus::Failed;
                self.ended_at = Some(now);
                if let Some(text) = data.message.clone().or_else(|| data.error.clone()) {
                    self.current_step_name = Some(text);
                }
            }
        }
    }

    /// Return to `Idle`, discarding the previous run entirely.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Elapsed run time in whole seconds; 0 if the run never started.
    /// Uses `ended_at` once the run is terminal, `now` otherwise.
    pub fn duration_secs(&self, now: Timestamp) -> i64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.ended_at.unwrap_or(now);
        (end - started).num_seconds().max(0)
    }

    /// Aggregate counters over the finished steps.
    pub fn step_stats(&self) -> StepStats {
        let total = self.step_results.len();
        let passed = self
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Passed)
            .count();
        let failed = self
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .count();
        let pass_rate = if total > 0 {
            ((passed as f64 / total as f64) * 100.0).round() as u8
        } else {
            0
        };
        StepStats {
            total,
            passed,
            failed,
            pass_rate,
        }
    }

    /// Raise progress to `value` clamped into 0..=100.
    ///
    /// Progress never moves backwards within a run; stale or
    /// out-of-order frames cannot regress the bar.
    fn bump_progress(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            let clamped = value.clamp(0.0, 100.0) as u8;
            self.progress = self.progress.max(clamped);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::message::classify;

    fn apply_raw(state: &mut ExecutionState, raw: &str) {
        state.apply(&classify(raw), Utc::now());
    }

    #[test]
    fn start_from_idle_initializes_run() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":5}"#);

        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.progress, 0);
        assert_eq!(state.total_steps, 5);
        assert!(state.step_results.is_empty());
        assert!(state.started_at.is_some());
        assert!(state.ended_at.is_none());
    }

    #[test]
    fn start_defaults_total_steps_to_zero() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start"}"#);
        assert_eq!(state.total_steps, 0);
    }

    #[test]
    fn progress_is_clamped_to_valid_range() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":2}"#);

        apply_raw(&mut state, r#"{"type":"progress","progress":250}"#);
        assert_eq!(state.progress, 100);

        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":2}"#);
        apply_raw(&mut state, r#"{"type":"progress","progress":-10}"#);
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn progress_never_decreases_while_running() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":4}"#);
        apply_raw(&mut state, r#"{"type":"progress","progress":60}"#);
        apply_raw(&mut state, r#"{"type":"progress","progress":25}"#);
        assert_eq!(state.progress, 60);
    }

    #[test]
    fn step_end_appends_ordered_results() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":2}"#);
        apply_raw(
            &mut state,
            r#"{"type":"step_end","current_step":1,"step_name":"login","status":"passed"}"#,
        );
        apply_raw(
            &mut state,
            r#"{"type":"step_end","current_step":2,"step_name":"logout","status":"failed","message":"401"}"#,
        );

        assert_eq!(state.step_results.len(), 2);
        assert_eq!(state.step_results[0].step_name, "login");
        assert_eq!(state.step_results[0].status, StepStatus::Passed);
        assert_eq!(state.step_results[1].status, StepStatus::Failed);
        assert_eq!(state.step_results[1].message.as_deref(), Some("401"));
    }

    #[test]
    fn complete_with_failed_status_marks_run_failed() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":1}"#);
        apply_raw(&mut state, r#"{"type":"complete","status":"failed"}"#);

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.progress, 100);
        assert!(state.ended_at.is_some());
    }

    #[test]
    fn error_frame_records_failure_message() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start"}"#);
        apply_raw(&mut state, r#"{"type":"error","message":"engine crashed"}"#);

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.current_step_name.as_deref(), Some("engine crashed"));
    }

    #[test]
    fn terminal_state_absorbs_further_messages() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":2}"#);
        apply_raw(&mut state, r#"{"type":"complete","status":"passed"}"#);
        assert_eq!(state.status, ExecutionStatus::Completed);

        apply_raw(&mut state, r#"{"type":"progress","progress":10}"#);
        apply_raw(
            &mut state,
            r#"{"type":"step_end","current_step":1,"status":"failed"}"#,
        );
        apply_raw(&mut state, r#"{"type":"error","message":"late"}"#);

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.progress, 100);
        assert!(state.step_results.is_empty());
    }

    #[test]
    fn fresh_start_rearms_a_terminal_state() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":1}"#);
        apply_raw(&mut state, r#"{"type":"complete"}"#);
        apply_raw(&mut state, r#"{"type":"start","total_steps":3}"#);

        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.total_steps, 3);
        assert_eq!(state.progress, 0);
        assert!(state.ended_at.is_none());
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":1}"#);
        apply_raw(&mut state, r#"{"type":"complete"}"#);

        state.reset();
        assert_eq!(state.status, ExecutionStatus::Idle);
        assert!(state.started_at.is_none());
        assert!(state.step_results.is_empty());
    }

    #[test]
    fn text_frames_cause_no_transitions() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":1}"#);
        let before = state.clone();

        apply_raw(&mut state, "pong");

        assert_eq!(state.status, before.status);
        assert_eq!(state.progress, before.progress);
        assert_eq!(state.step_results.len(), before.step_results.len());
    }

    #[test]
    fn script_frames_cause_no_transitions() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":1}"#);
        apply_raw(&mut state, r#"{"type":"script_start","script":"pre"}"#);
        apply_raw(&mut state, r#"{"type":"script_end","script":"pre"}"#);

        assert_eq!(state.status, ExecutionStatus::Running);
        assert!(state.step_results.is_empty());
    }

    #[test]
    fn failed_scenario_aggregates_step_stats() {
        let mut state = ExecutionState::default();
        apply_raw(&mut state, r#"{"type":"start","total_steps":5}"#);
        for (idx, verdict) in ["passed", "passed", "failed", "passed"].iter().enumerate() {
            let frame = format!(
                r#"{{"type":"step_end","current_step":{},"step_name":"step {}","status":"{verdict}"}}"#,
                idx + 1,
                idx + 1,
            );
            apply_raw(&mut state, &frame);
        }
        apply_raw(&mut state, r#"{"type":"complete","status":"failed"}"#);

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.step_results.len(), 4);
        assert_eq!(
            state.step_stats(),
            StepStats {
                total: 4,
                passed: 3,
                failed: 1,
                pass_rate: 75,
            }
        );
    }

    #[test]
    fn duration_uses_ended_at_once_terminal() {
        let start = Utc::now();
        let mut state = ExecutionState::default();
        state.apply(&classify(r#"{"type":"start"}"#), start);
        state.apply(
            &classify(r#"{"type":"complete","status":"passed"}"#),
            start + Duration::seconds(7),
        );

        // `now` long after the end must not stretch the duration.
        assert_eq!(state.duration_secs(start + Duration::seconds(100)), 7);
    }

    #[test]
    fn duration_is_zero_before_start() {
        let state = ExecutionState::default();
        assert_eq!(state.duration_secs(Utc::now()), 0);
    }

    #[test]
    fn step_stats_empty_run_has_zero_pass_rate() {
        let state = ExecutionState::default();
        let stats = state.step_stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pass_rate, 0);
    }
}

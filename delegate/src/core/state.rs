//! Task state and the pure transitions of the delegation state machine.
//!
//! Every state function consumes a [`TaskState`] and returns the updated
//! state. Once the status is terminal (`verification_passed` or `escalated`)
//! the functions return the state untouched.

use std::path::{Path, PathBuf};

use crate::core::types::{Stage, TaskStatus};
use crate::error::OrchestrationError;

/// Default retry ceiling for the circuit breaker.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Case-insensitive marker an execution result uses to report failure.
pub const FAILURE_MARKER: &str = "FAIL";

/// Diagnostic stored in `verification_errors` when verification fails.
pub const VERIFICATION_DIAGNOSTIC: &str = "Execution agent indicated failure or tests failed.";

/// State of one delegation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    task_description: String,
    target_dir: PathBuf,
    plan: String,
    execution_result: String,
    verification_errors: String,
    retry_count: u32,
    attempts: u32,
    escalation_report: Option<String>,
    status: TaskStatus,
}

impl TaskState {
    /// Create a fresh state. `target_dir` must be absolute.
    pub fn new(
        task_description: impl Into<String>,
        target_dir: impl Into<PathBuf>,
    ) -> Result<Self, OrchestrationError> {
        let target_dir = target_dir.into();
        if !target_dir.is_absolute() {
            return Err(OrchestrationError::InvalidTarget {
                path: target_dir,
                reason: "target directory must be an absolute path".to_string(),
            });
        }
        Ok(Self {
            task_description: task_description.into(),
            target_dir,
            plan: String::new(),
            execution_result: String::new(),
            verification_errors: String::new(),
            retry_count: 0,
            attempts: 0,
            escalation_report: None,
            status: TaskStatus::Started,
        })
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn execution_result(&self) -> &str {
        &self.execution_result
    }

    pub fn verification_errors(&self) -> &str {
        &self.verification_errors
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Number of Execute invocations so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn escalation_report(&self) -> Option<&str> {
        self.escalation_report.as_deref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True once every execution the ceiling allows has been spent.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.attempts > max_retries
    }
}

/// Record the plan produced by the Plan state.
pub fn apply_plan(mut state: TaskState, plan: impl Into<String>) -> TaskState {
    if state.is_terminal() {
        return state;
    }
    state.plan = plan.into();
    state.status = TaskStatus::PlanningComplete;
    state
}

/// Build the task string handed to the execution agent.
///
/// Carries the previous verification errors so a retry gets corrective context.
pub fn augmented_task(state: &TaskState) -> String {
    let mut task = format!(
        "Plan: {}\nTask: {}",
        state.plan.trim(),
        state.task_description.trim()
    );
    if !state.verification_errors.is_empty() {
        task.push_str("\n\nCRITICAL FIX REQUIRED: Previous run failed with:\n");
        task.push_str(&state.verification_errors);
    }
    task
}

/// Record the result of one Execute invocation.
pub fn apply_execution(mut state: TaskState, result: impl Into<String>) -> TaskState {
    if state.is_terminal() {
        return state;
    }
    state.execution_result = result.into();
    state.attempts += 1;
    state.status = TaskStatus::ExecutionComplete;
    state
}

/// True if `result` carries the failure marker (case-insensitive).
pub fn reports_failure(result: &str) -> bool {
    result.to_uppercase().contains(FAILURE_MARKER)
}

/// Verify the last execution result.
///
/// On failure `retry_count` moves forward only when another execution will
/// follow, so it never exceeds `max_retries`.
pub fn verify(mut state: TaskState, max_retries: u32) -> TaskState {
    if state.is_terminal() {
        return state;
    }
    if reports_failure(&state.execution_result) {
        state.verification_errors = VERIFICATION_DIAGNOSTIC.to_string();
        state.status = TaskStatus::VerificationFailed;
        if !state.retries_exhausted(max_retries) {
            state.retry_count += 1;
        }
    } else {
        state.verification_errors.clear();
        state.status = TaskStatus::VerificationPassed;
    }
    state
}

/// Render the human-readable escalation report and mark the task escalated.
pub fn escalate(mut state: TaskState) -> TaskState {
    if state.is_terminal() {
        return state;
    }
    state.escalation_report = Some(format!(
        "Escalation report: could not verify changes after {} retries ({} attempts).\nLast result: {}",
        state.retry_count, state.attempts, state.execution_result
    ));
    state.status = TaskStatus::Escalated;
    state
}

/// Transition function of the orchestration loop (the circuit breaker lives
/// in the `Verify` arm).
pub fn next_stage(stage: Stage, state: &TaskState, max_retries: u32) -> Stage {
    match stage {
        Stage::Plan => Stage::Execute,
        Stage::Execute => Stage::Verify,
        Stage::Verify => match state.status {
            TaskStatus::VerificationPassed => Stage::Done,
            _ if state.retries_exhausted(max_retries) => Stage::Escalate,
            _ => Stage::Execute,
        },
        Stage::Escalate | Stage::Done => Stage::Done,
    }
}

//! Plan → Execute → Verify loop with a retry circuit breaker.
//!
//! The orchestrator owns no I/O of its own: planning goes through a
//! [`Completer`], code changes through an [`ExecutionAgent`], and every state
//! transition is decided by the pure functions in [`crate::core::state`].

use std::path::Path;

use tracing::{debug, error, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::state::{
    DEFAULT_MAX_RETRIES, FAILURE_MARKER, TaskState, apply_execution, apply_plan, augmented_task,
    escalate, next_stage, verify,
};
use crate::core::types::{Stage, TaskStatus};
use crate::error::{FsError, OrchestrationError};
use crate::io::agent::ExecutionAgent;
use crate::io::completer::{Completer, Message};
use crate::io::prompt::PromptEngine;
use crate::io::trace::{TraceCollector, TraceOutcome};

/// Default model handed to the completer.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Drives one task through the state machine.
pub struct Orchestrator<'a, C, A> {
    completer: C,
    agent: A,
    model: String,
    max_retries: u32,
    trace: &'a TraceCollector,
    cancel: CancelToken,
    prompts: PromptEngine,
}

impl<'a, C: Completer, A: ExecutionAgent> Orchestrator<'a, C, A> {
    pub fn new(completer: C, agent: A, trace: &'a TraceCollector) -> Self {
        Self {
            completer,
            agent,
            model: DEFAULT_MODEL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            trace,
            cancel: CancelToken::new(),
            prompts: PromptEngine::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `task_description` against `target_dir` until verification passes
    /// or the retry ceiling escalates it.
    pub fn run(
        &self,
        task_description: &str,
        target_dir: &Path,
    ) -> Result<TaskState, OrchestrationError> {
        let canonical =
            target_dir
                .canonicalize()
                .map_err(|e| OrchestrationError::InvalidTarget {
                    path: target_dir.to_path_buf(),
                    reason: e.to_string(),
                })?;
        if !canonical.is_dir() {
            return Err(OrchestrationError::InvalidTarget {
                path: target_dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        self.run_state(TaskState::new(task_description, canonical)?)
    }

    /// Drive a prepared state from `Plan` to a terminal status.
    #[instrument(skip_all, fields(session = %self.trace.session_id(), max_retries = self.max_retries))]
    pub fn run_state(&self, mut state: TaskState) -> Result<TaskState, OrchestrationError> {
        if state.is_terminal() {
            debug!(status = %state.status(), "state already terminal");
            return Ok(state);
        }

        let mut stage = Stage::Plan;
        while stage != Stage::Done {
            if self.cancel.is_cancelled() {
                warn!(%stage, "delegation cancelled");
                return Err(OrchestrationError::Cancelled { stage });
            }

            let timer = self.trace.start(stage);
            state = match stage {
                Stage::Plan => match self.plan(&state) {
                    Ok(plan) => apply_plan(state, plan),
                    Err(err) => {
                        self.trace.finish(
                            timer,
                            TraceOutcome::Failed {
                                message: format!("{err:#}"),
                            },
                        );
                        return Err(OrchestrationError::Planning(err));
                    }
                },
                Stage::Execute => match self.execute(&state) {
                    Ok(result) => apply_execution(state, result),
                    Err(err) => {
                        self.trace.finish(
                            timer,
                            TraceOutcome::Failed {
                                message: err.to_string(),
                            },
                        );
                        return Err(err);
                    }
                },
                Stage::Verify => verify(state, self.max_retries),
                Stage::Escalate => escalate(state),
                Stage::Done => state,
            };
            self.trace.finish(timer, outcome_of(stage, &state));

            let next = next_stage(stage, &state, self.max_retries);
            info!(
                from = %stage,
                to = %next,
                status = %state.status(),
                retry_count = state.retry_count(),
                attempts = state.attempts(),
                "transition"
            );
            stage = next;
        }
        Ok(state)
    }

    fn plan(&self, state: &TaskState) -> anyhow::Result<String> {
        let prompt = self
            .prompts
            .render_plan(state.task_description(), state.target_dir())?;
        let plan = self
            .completer
            .complete(&self.model, &[Message::user(prompt)])?;
        debug!(bytes = plan.len(), "plan received");
        Ok(plan)
    }

    /// Agent errors count as a failed attempt, except sandbox violations,
    /// which end the run.
    fn execute(&self, state: &TaskState) -> Result<String, OrchestrationError> {
        let task = augmented_task(state);
        let err = match self.agent.run(&task, state.target_dir()) {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let err = match err.downcast::<FsError>() {
            Ok(violation) if violation.is_safety_violation() => {
                error!(err = %violation, "execution agent left the sandbox");
                return Err(OrchestrationError::SandboxViolation(violation));
            }
            Ok(other) => anyhow::Error::new(other),
            Err(err) => err,
        };
        warn!(err = %format!("{err:#}"), "execution agent error");
        Ok(format!("{FAILURE_MARKER}: execution agent error: {err:#}"))
    }
}

fn outcome_of(stage: Stage, state: &TaskState) -> TraceOutcome {
    match (stage, state.status()) {
        (Stage::Verify, TaskStatus::VerificationFailed) => TraceOutcome::Failed {
            message: state.verification_errors().to_string(),
        },
        (Stage::Escalate, _) => TraceOutcome::Failed {
            message: "retry ceiling reached".to_string(),
        },
        _ => TraceOutcome::Success,
    }
}

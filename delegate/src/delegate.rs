//! One delegation request end to end.
//!
//! Lock the target directory, enter repository isolation, run the
//! orchestrator, hand off the diff, optionally open a draft pull request and
//! render the report. Once isolation has been entered the caller always gets
//! a report naming the branch, even when the run itself was aborted.

use std::path::PathBuf;
use std::sync::PoisonError;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::state::TaskState;
use crate::core::types::TaskStatus;
use crate::io::agent::ExecutionAgent;
use crate::io::completer::Completer;
use crate::io::config::DelegateConfig;
use crate::io::isolation::{HandoffDiff, RepositoryIsolation};
use crate::io::locks::DirectoryLocks;
use crate::io::prompt::{PromptEngine, ReportContext};
use crate::io::pull_request::{PrOutcome, PullRequest, PullRequestPublisher};
use crate::io::trace::TraceCollector;
use crate::orchestrator::Orchestrator;

/// Input of one delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRequest {
    pub task: String,
    pub target_dir: PathBuf,
    pub task_id: String,
    /// Work on a dedicated branch (default) or directly on the current one.
    pub isolate: bool,
}

impl DelegationRequest {
    pub fn new(
        task: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            target_dir: target_dir.into(),
            task_id: task_id.into(),
            isolate: true,
        }
    }

    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }
}

/// How the orchestrator run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationOutcome {
    Completed(TaskState),
    /// Planning failed or the run was cancelled after isolation was entered.
    Aborted { reason: String },
}

impl DelegationOutcome {
    pub fn status_text(&self) -> String {
        match self {
            DelegationOutcome::Completed(state) => state.status().to_string(),
            DelegationOutcome::Aborted { reason } => format!("aborted: {reason}"),
        }
    }

    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            DelegationOutcome::Completed(state) => Some(state.status()),
            DelegationOutcome::Aborted { .. } => None,
        }
    }
}

/// Everything a caller learns from a delegation.
#[derive(Debug, Clone)]
pub struct DelegationReport {
    pub task_id: String,
    pub branch: Option<String>,
    pub outcome: DelegationOutcome,
    pub diff: String,
    pub pull_request: PrOutcome,
    /// Rendered text of the whole report.
    pub text: String,
}

impl DelegationReport {
    pub fn verification_passed(&self) -> bool {
        self.outcome.task_status() == Some(TaskStatus::VerificationPassed)
    }

    pub fn escalated(&self) -> bool {
        self.outcome.task_status() == Some(TaskStatus::Escalated)
    }
}

/// Runs delegation requests with a fixed set of collaborators.
pub struct Delegator<'a, C, A> {
    completer: C,
    agent: A,
    publisher: Option<Box<dyn PullRequestPublisher + 'a>>,
    config: &'a DelegateConfig,
    locks: &'a DirectoryLocks,
    trace: &'a TraceCollector,
    cancel: CancelToken,
    prompts: PromptEngine,
}

impl<'a, C: Completer, A: ExecutionAgent> Delegator<'a, C, A> {
    pub fn new(
        completer: C,
        agent: A,
        config: &'a DelegateConfig,
        locks: &'a DirectoryLocks,
        trace: &'a TraceCollector,
    ) -> Self {
        Self {
            completer,
            agent,
            publisher: None,
            config,
            locks,
            trace,
            cancel: CancelToken::new(),
            prompts: PromptEngine::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: Box<dyn PullRequestPublisher + 'a>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `request` to completion and render its report.
    ///
    /// Version-control failures abort with an error; orchestration failures
    /// after isolation still produce a report.
    #[instrument(skip_all, fields(task_id = %request.task_id, isolate = request.isolate))]
    pub fn delegate(&self, request: &DelegationRequest) -> Result<DelegationReport> {
        let target = request
            .target_dir
            .canonicalize()
            .with_context(|| format!("resolve target {}", request.target_dir.display()))?;

        let lock = self.locks.lock_for(&target);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let isolation = RepositoryIsolation::new(&target)?;
        let session = isolation.enter(&request.task_id, request.isolate, &self.config.branch_prefix)?;
        let branch = session.working_branch().map(str::to_string);
        info!(branch = ?branch, "isolation entered");

        let orchestrator = Orchestrator::new(&self.completer, &self.agent, self.trace)
            .with_model(self.config.model.clone())
            .with_max_retries(self.config.max_retries)
            .with_cancel(self.cancel.clone());
        let outcome = match orchestrator.run(&request.task, &target) {
            Ok(state) => DelegationOutcome::Completed(state),
            Err(err) => {
                warn!(err = %err, "delegation aborted");
                DelegationOutcome::Aborted {
                    reason: err.to_string(),
                }
            }
        };

        let handoff = session.handoff_diff().with_context(|| match &branch {
            Some(branch) => format!("hand off changes on {branch}"),
            None => "hand off changes".to_string(),
        })?;
        let pull_request = self.pull_request(request, &handoff, &outcome);

        let text = self.render(request, &outcome, &handoff, &pull_request)?;
        info!(status = %outcome.status_text(), "delegation finished");
        Ok(DelegationReport {
            task_id: request.task_id.clone(),
            branch,
            outcome,
            diff: handoff.diff,
            pull_request,
            text,
        })
    }

    fn pull_request(
        &self,
        request: &DelegationRequest,
        handoff: &HandoffDiff,
        outcome: &DelegationOutcome,
    ) -> PrOutcome {
        if !handoff.isolated() {
            return PrOutcome::skipped("direct mode has no working branch to publish");
        }
        let Some(branch) = handoff.branch.as_deref() else {
            return PrOutcome::skipped("no working branch to publish");
        };
        let Some(publisher) = &self.publisher else {
            return PrOutcome::skipped("GITHUB_TOKEN or GITHUB_REPO is not set");
        };
        if matches!(outcome, DelegationOutcome::Aborted { .. }) {
            return PrOutcome::skipped("delegation was aborted");
        }
        if handoff.is_empty() {
            return PrOutcome::skipped("no changes to publish");
        }

        let pr = PullRequest {
            branch,
            title: format!("delegate: {}", request.task_id),
            body: format!(
                "Automated delegation.\n\nTask: {}\nStatus: {}",
                request.task.trim(),
                outcome.status_text()
            ),
        };
        match publisher.publish(&handoff.root, &pr) {
            Ok(url) => PrOutcome::Created { url },
            Err(err) => {
                warn!(err = %format!("{err:#}"), "pull request failed");
                PrOutcome::Failed {
                    message: format!("{err:#}"),
                }
            }
        }
    }

    fn render(
        &self,
        request: &DelegationRequest,
        outcome: &DelegationOutcome,
        handoff: &HandoffDiff,
        pull_request: &PrOutcome,
    ) -> Result<String> {
        let status = outcome.status_text();
        let (retry_count, attempts, notes) = match outcome {
            DelegationOutcome::Completed(state) => (
                Some(state.retry_count()),
                Some(state.attempts()),
                state.escalation_report().map(str::to_string),
            ),
            DelegationOutcome::Aborted { reason } => (None, None, Some(reason.clone())),
        };
        let notes = match (notes, &handoff.note) {
            (Some(notes), Some(note)) => Some(format!("{notes}\n\n{note}")),
            (notes, note) => notes.or_else(|| note.clone()),
        };
        let pr_text = pull_request.render();
        self.prompts
            .render_report(&ReportContext {
                task_id: &request.task_id,
                status: &status,
                branch: handoff.branch.as_deref(),
                isolated: handoff.isolated(),
                retry_count,
                attempts,
                notes: notes.as_deref(),
                pull_request: Some(&pr_text),
                diff: Some(&handoff.diff),
            })
            .context("render report")
    }
}

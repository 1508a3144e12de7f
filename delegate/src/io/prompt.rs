//! Prompt and report rendering with minijinja templates.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const FILE_BLOCKS_TEMPLATE: &str = include_str!("prompts/file_blocks.md");
const REPORT_TEMPLATE: &str = include_str!("prompts/report.md");

/// Values rendered into the delegation report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportContext<'a> {
    pub task_id: &'a str,
    pub status: &'a str,
    /// Branch that received the changes.
    pub branch: Option<&'a str>,
    /// False in direct mode, where nothing is committed.
    pub isolated: bool,
    pub retry_count: Option<u32>,
    pub attempts: Option<u32>,
    pub notes: Option<&'a str>,
    pub pull_request: Option<&'a str>,
    pub diff: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("file_blocks", FILE_BLOCKS_TEMPLATE)
            .expect("file_blocks template should be valid");
        env.add_template("report", REPORT_TEMPLATE)
            .expect("report template should be valid");
        Self { env }
    }

    pub fn render_plan(&self, task: &str, target_dir: &Path) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let rendered = template.render(context! {
            task => task.trim(),
            target_dir => target_dir.display().to_string(),
        })?;
        Ok(rendered)
    }

    pub fn render_file_blocks(&self, target_dir: &Path, tree: &str) -> Result<String> {
        let template = self.env.get_template("file_blocks")?;
        let rendered = template.render(context! {
            target_dir => target_dir.display().to_string(),
            tree => (!tree.trim().is_empty()).then(|| tree.trim_end()),
        })?;
        Ok(rendered)
    }

    pub fn render_report(&self, report: &ReportContext<'_>) -> Result<String> {
        let template = self.env.get_template("report")?;
        let rendered = template.render(context! {
            task_id => report.task_id,
            status => report.status,
            branch => report.branch,
            isolated => report.isolated,
            retry_count => report.retry_count,
            attempts => report.attempts,
            notes => report.notes.map(str::trim).filter(|s| !s.is_empty()),
            pull_request => report.pull_request.map(str::trim).filter(|s| !s.is_empty()),
            diff => report.diff.map(str::trim_end).filter(|s| !s.trim().is_empty()),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report<'a>() -> ReportContext<'a> {
        ReportContext {
            task_id: "t1",
            status: "verification_passed",
            branch: Some("delegate/t1"),
            isolated: true,
            retry_count: Some(0),
            attempts: Some(1),
            notes: None,
            pull_request: None,
            diff: Some("diff --git a/hello.py b/hello.py\n+print('hi')\n"),
        }
    }

    #[test]
    fn plan_prompt_embeds_task_and_target() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_plan("  add hello.py  ", Path::new("/repo"))
            .expect("render");
        assert!(prompt.contains("`/repo`"));
        assert!(prompt.ends_with("add hello.py"));
    }

    #[test]
    fn file_block_prompt_omits_empty_tree() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_file_blocks(Path::new("/repo"), "")
            .expect("render");
        assert!(prompt.contains("FILE: <path"));
        assert!(!prompt.contains("Repository layout"));
    }

    #[test]
    fn report_includes_branch_diff_and_merge_hint() {
        let engine = PromptEngine::new();
        let text = engine.render_report(&report()).expect("render");
        assert!(text.contains("Status: verification_passed"));
        assert!(text.contains("Working branch: delegate/t1"));
        assert!(text.contains("Retries: 0 (attempts: 1)"));
        assert!(text.contains("+print('hi')"));
        assert!(text.contains("git merge delegate/t1"));
    }

    #[test]
    fn report_without_changes_says_so() {
        let engine = PromptEngine::new();
        let ctx = ReportContext {
            branch: None,
            diff: Some("  \n"),
            ..report()
        };
        let text = engine.render_report(&ctx).expect("render");
        assert!(text.contains("No codebase changes detected."));
        assert!(text.contains("Working branch: none"));
        assert!(!text.contains("git merge"));
    }

    #[test]
    fn direct_mode_report_names_current_branch_without_merge_hint() {
        let engine = PromptEngine::new();
        let ctx = ReportContext {
            branch: Some("main"),
            isolated: false,
            ..report()
        };
        let text = engine.render_report(&ctx).expect("render");
        assert!(text.contains("Working branch: main (direct mode"));
        assert!(!text.contains("git merge"));
    }

    #[test]
    fn aborted_report_skips_retry_line() {
        let engine = PromptEngine::new();
        let ctx = ReportContext {
            status: "aborted: planning failed: offline",
            retry_count: None,
            attempts: None,
            notes: Some("planning failed: offline"),
            diff: None,
            ..report()
        };
        let text = engine.render_report(&ctx).expect("render");
        assert!(text.contains("Status: aborted: planning failed: offline"));
        assert!(!text.contains("Retries:"));
        assert!(text.contains("## Notes"));
    }
}

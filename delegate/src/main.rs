//! Task delegation CLI.
//!
//! `delegate run` hands one task to the execution agent inside an isolated
//! branch and prints the report. The other subcommands expose the sandboxes
//! directly for inspection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use delegate::delegate::{DelegationRequest, Delegator};
use delegate::exit_codes;
use delegate::io::agent::{CommandAgent, ExecutionAgent, FileBlockAgent};
use delegate::io::command::CommandRunner;
use delegate::io::completer::CommandCompleter;
use delegate::io::config::{
    AgentKind, DelegateConfig, default_config_path, load_config, write_config,
};
use delegate::io::fs::ConfinedFs;
use delegate::io::locks::DirectoryLocks;
use delegate::io::pull_request::GhPublisher;
use delegate::io::trace::TraceCollector;
use delegate::logging;

#[derive(Parser)]
#[command(
    name = "delegate",
    version,
    about = "Delegate coding tasks to an agent inside sandboxed git branches"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, execute and verify one task, then print the report.
    Run {
        /// Natural-language task description.
        #[arg(long)]
        task: String,
        /// Root of the target git repository.
        #[arg(long)]
        target_dir: PathBuf,
        /// Identifier used to derive the working branch.
        #[arg(long)]
        task_id: String,
        /// Work directly on the current branch.
        #[arg(long)]
        no_isolate: bool,
        /// Config file (default: `<target-dir>/.delegate/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the configured model.
        #[arg(long)]
        model: Option<String>,
        /// Append per-stage trace records (JSON lines) to this file.
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Print the sandboxed directory tree.
    Tree {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Print type and function declarations of source files.
    Outline {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Run a shell command through the bounded command runner.
    Exec {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Timeout in seconds (default from config).
        #[arg(long)]
        timeout: Option<u64>,
        command: String,
    },
    /// Write the default config file.
    InitConfig {
        /// Destination (default: `./.delegate/config.toml`).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            target_dir,
            task_id,
            no_isolate,
            config,
            model,
            trace,
        } => {
            let request =
                DelegationRequest::new(task, target_dir, task_id).with_isolation(!no_isolate);
            cmd_run(&request, config.as_deref(), model, trace.as_deref())
        }
        Command::Tree { root, path } => {
            let fs = ConfinedFs::new(&root)?;
            println!("{}", fs.list_tree(&path)?);
            Ok(exit_codes::OK)
        }
        Command::Outline { root, path } => {
            let fs = ConfinedFs::new(&root)?;
            println!("{}", fs.read_outline(&path)?.render());
            Ok(exit_codes::OK)
        }
        Command::Exec {
            root,
            timeout,
            command,
        } => cmd_exec(&root, timeout, &command),
        Command::InitConfig { path, force } => cmd_init_config(path, force),
    }
}

fn cmd_run(
    request: &DelegationRequest,
    config_path: Option<&Path>,
    model: Option<String>,
    trace_path: Option<&Path>,
) -> Result<i32> {
    let config_path = config_path.map_or_else(
        || default_config_path(&request.target_dir),
        Path::to_path_buf,
    );
    let mut cfg = load_config(&config_path)?.with_env_overrides();
    if let Some(model) = model {
        cfg.model = model;
    }
    cfg.validate()?;
    debug!(config = %config_path.display(), model = %cfg.model, "config loaded");

    let session_id = format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ"),
        request.task_id
    );
    let trace = TraceCollector::new(session_id);
    let locks = DirectoryLocks::new();

    let completer = CommandCompleter::new(&cfg.completer, cfg.agent.output_limit_bytes);
    let agent: Box<dyn ExecutionAgent> = match cfg.agent.kind {
        AgentKind::Command => Box::new(CommandAgent::new(&cfg.agent)),
        AgentKind::FileBlocks => Box::new(FileBlockAgent::new(
            CommandCompleter::new(&cfg.completer, cfg.agent.output_limit_bytes),
            cfg.model.clone(),
            &cfg.agent,
            &cfg.command,
        )),
    };

    let mut delegator = Delegator::new(&completer, agent.as_ref(), &cfg, &locks, &trace);
    if let Some(publisher) = GhPublisher::from_env(&cfg.pull_request.base) {
        delegator = delegator.with_publisher(Box::new(publisher));
    }

    let report = delegator.delegate(request);
    if let Some(path) = trace_path {
        trace
            .write_jsonl(path)
            .with_context(|| format!("write trace {}", path.display()))?;
    }
    let report = report?;
    println!("{}", report.text);

    let code = if report.verification_passed() {
        exit_codes::OK
    } else if report.escalated() {
        exit_codes::ESCALATED
    } else {
        exit_codes::INVALID
    };
    info!(code, "delegate run finished");
    Ok(code)
}

fn cmd_exec(root: &Path, timeout: Option<u64>, command: &str) -> Result<i32> {
    let cfg = DelegateConfig::default();
    let runner = CommandRunner::new(root)?.with_output_limit(cfg.command.output_limit_bytes);
    let timeout = Duration::from_secs(timeout.unwrap_or(cfg.command.timeout_secs));
    let result = runner.run(command, timeout)?;
    println!("{}", result.render());
    Ok(if result.status.is_success() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) -> Result<i32> {
    let path = match path {
        Some(path) => path,
        None => default_config_path(&std::env::current_dir().context("read current dir")?),
    };
    if path.exists() && !force {
        bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    write_config(&path, &DelegateConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

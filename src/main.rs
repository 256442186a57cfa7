//! Orchestrated user-agent session runner.
//!
//! `run` drives one full session on a task directory and writes the session
//! artifacts under the jobs directory. `validate-tree` checks a task tree
//! file against the bundled schema. `init` writes a default config file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use simuser::core::task::{focus_order, summarize};
use simuser::io::artifact::{create_save_dir, save_history, save_task_tree, write_json};
use simuser::io::config::{Mode, SessionConfig, load_config, write_config};
use simuser::io::env::LocalEnvironment;
use simuser::io::model::CommandModel;
use simuser::io::task_spec::{TaskSpec, load_task_tree};
use simuser::io::verify::run_verification;
use simuser::logging;
use simuser::orchestrator::{Orchestrator, SessionOutcome};
use simuser::policy::{JudgedPolicy, Policy, SymbolicPolicy};
use simuser::user::User;

#[derive(Parser)]
#[command(
    name = "simuser",
    version,
    about = "Simulated user-agent session orchestrator"
)]
struct Cli {
    /// Path to the session config file.
    #[arg(long, default_value = "simuser.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Judged,
    Symbolic,
}

#[derive(Subcommand)]
enum Command {
    /// Run one session on a task and save its artifacts.
    Run {
        /// Directory containing task subdirectories.
        #[arg(long)]
        task_dir: PathBuf,
        /// Task subdirectory name.
        #[arg(long)]
        task_name: String,
        /// Override the configured orchestration mode.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Override the configured user persona.
        #[arg(long)]
        user_profile: Option<String>,
        /// Override the configured turn budget.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Override the environment working directory.
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Validate a task tree file against the bundled schema.
    ValidateTree {
        /// Path to a task_tree.json file.
        path: PathBuf,
    },
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task_dir,
            task_name,
            mode,
            user_profile,
            max_turns,
            work_dir,
        } => cmd_run(&cli.config, task_dir, task_name, mode, user_profile, max_turns, work_dir),
        Command::ValidateTree { path } => cmd_validate_tree(&path),
        Command::Init { force } => cmd_init(&cli.config, force),
    }
}

fn cmd_run(
    config_path: &PathBuf,
    task_dir: PathBuf,
    task_name: String,
    mode: Option<ModeArg>,
    user_profile: Option<String>,
    max_turns: Option<u32>,
    work_dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(mode) = mode {
        config.mode = match mode {
            ModeArg::Judged => Mode::Judged,
            ModeArg::Symbolic => Mode::Symbolic,
        };
    }
    if let Some(profile) = user_profile {
        config.user.profile = profile;
    }
    if let Some(max_turns) = max_turns {
        config.max_turns = max_turns;
    }
    config.validate()?;

    let task = TaskSpec::load(&task_dir, &task_name)?;

    // Per-task environment overrides win over the session config.
    let env_config = task.environment.clone().unwrap_or_else(|| config.environment.clone());
    let env_work_dir = work_dir.unwrap_or_else(|| {
        if env_config.work_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&env_config.work_dir)
        }
    });
    let env = LocalEnvironment::new(
        env_work_dir,
        std::time::Duration::from_secs(env_config.timeout_secs),
        env_config.output_limit_bytes,
    );

    let model = CommandModel::new(
        config.model.command.clone(),
        config.model_timeout(),
        config.model.output_limit_bytes,
    )
    .context("configure model backend")?;

    let policy: Box<dyn Policy> = match config.mode {
        Mode::Judged => Box::new(JudgedPolicy::new(config.validation, config.recent_history_messages)),
        Mode::Symbolic => Box::new(SymbolicPolicy::new(
            config.advance_every_turns,
            config.perceive_word_budget,
        )),
    };

    let mut orchestrator = Orchestrator::new(
        &model,
        &env,
        policy,
        User::new(config.user.clone()),
        task.instruction.clone(),
        config.max_turns,
        task.task_tree.clone(),
    )?;
    let report = orchestrator.run()?;

    let save_dir = create_save_dir(config.jobs_dir.as_ref(), &task_name, config.mode.as_str())?;
    save_history(&save_dir, &report.messages)?;
    save_task_tree(&save_dir, &report.tree)?;
    write_json(
        &save_dir.join("session.json"),
        &serde_json::json!({
            "task": task_name,
            "mode": config.mode.as_str(),
            "turns": report.turns,
            "outcome": report.outcome,
            "complete": report.is_complete(),
        }),
    )?;

    // Artifacts are already on disk; a verification failure should not
    // discard the session.
    if let Err(err) = run_verification(&env, &task, &save_dir) {
        tracing::warn!(err = format!("{err:#}"), "verification failed");
    }

    println!(
        "session {} after {} turns ({}), artifacts in {}",
        match report.outcome {
            SessionOutcome::Exited => "exited",
            SessionOutcome::StepLimit => "hit the step limit",
        },
        report.turns,
        if report.is_complete() { "task tree complete" } else { "task tree incomplete" },
        save_dir.display()
    );
    Ok(())
}

fn cmd_validate_tree(path: &PathBuf) -> Result<()> {
    let tree = load_task_tree(path)?;
    println!("{}: valid ({} focus nodes)", path.display(), focus_order(&tree).len());
    println!("{}", summarize(&tree, 200));
    Ok(())
}

fn cmd_init(config_path: &PathBuf, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(());
    }
    write_config(config_path, &SessionConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "simuser",
            "run",
            "--task-dir",
            "tasks",
            "--task-name",
            "cron",
            "--mode",
            "symbolic",
            "--max-turns",
            "20",
        ]);
        match cli.command {
            Command::Run {
                task_name,
                mode,
                max_turns,
                ..
            } => {
                assert_eq!(task_name, "cron");
                assert!(matches!(mode, Some(ModeArg::Symbolic)));
                assert_eq!(max_turns, Some(20));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["simuser", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }
}

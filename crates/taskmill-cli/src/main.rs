use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use taskmill_core::config::TaskmillConfig;
use taskmill_scheduler::rules::RawRules;
use taskmill_scheduler::store::StateFilter;
use taskmill_scheduler::{
    ExitStatus, ListConfig, RunReport, Scheduler, SchedulerOptions, SqliteTaskStore,
    TaskDefinition, TaskFilters, TaskState,
};

mod routines;

#[derive(Parser)]
#[command(name = "taskmill", version, about = "Database-backed task scheduler")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scheduled task now. Without a selector, runs the next due task.
    Run(RunArgs),
    /// List task records.
    List(ListArgs),
    /// Create a new task.
    Add(AddArgs),
    /// Enable, disable or trash a task.
    SetState(SetStateArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Run the task with this id, due or not.
    #[arg(long, conflicts_with_all = ["title", "all"])]
    id: Option<i64>,
    /// Run the task whose title matches this string.
    #[arg(long, conflicts_with = "all")]
    title: Option<String>,
    /// Run every currently due task.
    #[arg(long)]
    all: bool,
    /// Allow running a disabled task (id/title selectors only).
    #[arg(long)]
    allow_disabled: bool,
}

#[derive(clap::Args)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = StateArg::All)]
    state: StateArg,
    /// Filter by task type.
    #[arg(long)]
    task_type: Option<String>,
    /// Filter by title substring.
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(clap::Args)]
struct AddArgs {
    #[arg(long)]
    title: String,
    /// Routine type, e.g. `taskmill.delay`.
    #[arg(long)]
    task_type: String,
    /// Raw execution rules as JSON, e.g.
    /// `{"rule-type":"interval-hours","interval-hours":3}`.
    #[arg(long)]
    rules: String,
    /// Routine parameters as JSON.
    #[arg(long)]
    params: Option<String>,
    #[arg(long, default_value_t = 0)]
    priority: i64,
    #[arg(long)]
    note: Option<String>,
    /// Create the task disabled.
    #[arg(long)]
    disabled: bool,
}

#[derive(clap::Args)]
struct SetStateArgs {
    #[arg(long)]
    id: i64,
    #[arg(long, value_enum)]
    state: StateArg,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StateArg {
    Enabled,
    Disabled,
    Trashed,
    All,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskmill_cli=info,taskmill_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: explicit path > TASKMILL_CONFIG env > ~/.taskmill/taskmill.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TASKMILL_CONFIG").ok());
    let config = TaskmillConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TaskmillConfig::default()
    });

    ensure_parent_dir(&config.database.path);
    info!(path = %config.database.path, "opening SQLite database");
    let store = Arc::new(SqliteTaskStore::open(&config.database.path)?);
    let scheduler = Scheduler::new(
        store,
        routines::builtin_registry(),
        SchedulerOptions::from(&config.scheduler),
    );

    match cli.command {
        Command::Run(args) => run(&scheduler, &args),
        Command::List(args) => list(&scheduler, &args),
        Command::Add(args) => add(&scheduler, &args),
        Command::SetState(args) => set_state(&scheduler, &args),
    }
}

fn run(scheduler: &Scheduler, args: &RunArgs) -> anyhow::Result<ExitCode> {
    if args.all {
        let reports = scheduler.run_due_tasks()?;
        if reports.is_empty() {
            println!("No tasks due.{}", next_due_hint(scheduler)?);
            return Ok(ExitCode::SUCCESS);
        }
        let mut failed = false;
        for report in &reports {
            println!("{}", report_line(report));
            failed |= !matches!(report.status(), ExitStatus::Ok | ExitStatus::NoLock);
        }
        return Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let id = match (args.id, &args.title) {
        (Some(id), _) => id,
        (None, Some(title)) => find_by_title(scheduler, title)?,
        // Lazy-trigger mode: pick from the due queue.
        (None, None) => 0,
    };

    match scheduler.run_task(id, args.allow_disabled)? {
        Some(report) => {
            println!("{}", report_line(&report));
            Ok(ExitCode::from(report.status().code() as u8))
        }
        None => {
            println!("No matching due task found.{}", next_due_hint(scheduler)?);
            Ok(ExitCode::from(ExitStatus::NoTask.code() as u8))
        }
    }
}

fn next_due_hint(scheduler: &Scheduler) -> anyhow::Result<String> {
    Ok(
        match taskmill_scheduler::scheduler::next_due(scheduler.store().as_ref())? {
            Some(next) => format!(" Next task is due at {}.", next.format("%Y-%m-%d %H:%M UTC")),
            None => String::new(),
        },
    )
}

fn find_by_title(scheduler: &Scheduler, title: &str) -> anyhow::Result<i64> {
    let filters = TaskFilters {
        search: Some(title.to_string()),
        state: StateFilter::NotTrashed,
        ..TaskFilters::default()
    };
    let list = ListConfig {
        limit: Some(2),
        ..ListConfig::default()
    };
    let matches = scheduler.fetch_task_records(&filters, &list)?;
    match matches.as_slice() {
        [] => anyhow::bail!("no task with title matching '{title}'"),
        [only] => Ok(only.id),
        _ => anyhow::bail!("multiple tasks match title '{title}', select one with --id"),
    }
}

fn report_line(report: &RunReport) -> String {
    let t = &report.task;
    match report.status() {
        ExitStatus::Ok => format!(
            "Task #{} '{}' processed in {:.2} seconds.",
            t.id, t.title, report.snapshot.net_duration
        ),
        ExitStatus::NoLock => format!("Task #{} '{}' is already running!", t.id, t.title),
        ExitStatus::NoRoutine => format!(
            "Task #{} '{}' has no registered routine! Check its type.",
            t.id, t.title
        ),
        other => format!("Task #{} '{}' exited with code {}!", t.id, t.title, other.code()),
    }
}

fn list(scheduler: &Scheduler, args: &ListArgs) -> anyhow::Result<ExitCode> {
    let filters = TaskFilters {
        state: match args.state {
            StateArg::Enabled => StateFilter::Exact(TaskState::Enabled),
            StateArg::Disabled => StateFilter::Exact(TaskState::Disabled),
            StateArg::Trashed => StateFilter::Exact(TaskState::Trashed),
            StateArg::All => StateFilter::NotTrashed,
        },
        task_type: args.task_type.clone(),
        search: args.search.clone(),
        ..TaskFilters::default()
    };
    let list = ListConfig {
        limit: args.limit,
        ..ListConfig::default()
    };

    let tasks = scheduler.fetch_task_records(&filters, &list)?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:>5}  {:<8}  {:<28}  {:<24}  {:<17}  {:>4}",
        "ID", "STATE", "TITLE", "TYPE", "NEXT RUN", "EXIT"
    );
    for t in &tasks {
        println!(
            "{:>5}  {:<8}  {:<28}  {:<24}  {:<17}  {:>4}",
            t.id,
            state_label(t.state),
            t.title,
            t.task_type,
            t.next_execution
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".into()),
            t.last_exit_code,
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn add(scheduler: &Scheduler, args: &AddArgs) -> anyhow::Result<ExitCode> {
    let rules: RawRules = serde_json::from_str(&args.rules).context("invalid --rules JSON")?;
    let params = match &args.params {
        Some(p) => serde_json::from_str(p).context("invalid --params JSON")?,
        None => serde_json::json!({}),
    };

    if !scheduler
        .routine_types()
        .any(|known| known == args.task_type)
    {
        let known: Vec<&str> = scheduler.routine_types().collect();
        tracing::warn!(
            "no routine registered for '{}' (available: {}); the task will report no_routine",
            args.task_type,
            known.join(", "),
        );
    }

    let task = scheduler.create_task(TaskDefinition {
        title: args.title.clone(),
        task_type: args.task_type.clone(),
        state: if args.disabled {
            TaskState::Disabled
        } else {
            TaskState::Enabled
        },
        rules,
        ordering: 0,
        priority: args.priority,
        note: args.note.clone(),
        params,
    })?;

    println!(
        "Created task #{} '{}', first run at {}.",
        task.id,
        task.title,
        task.next_execution
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".into()),
    );
    Ok(ExitCode::SUCCESS)
}

fn set_state(scheduler: &Scheduler, args: &SetStateArgs) -> anyhow::Result<ExitCode> {
    let state = match args.state {
        StateArg::Enabled => TaskState::Enabled,
        StateArg::Disabled => TaskState::Disabled,
        StateArg::Trashed => TaskState::Trashed,
        StateArg::All => anyhow::bail!("--state must be enabled, disabled or trashed"),
    };
    if !scheduler.store().set_state(args.id, state)? {
        anyhow::bail!("no task with id {}", args.id);
    }
    println!("Task #{} is now {}.", args.id, state_label(state));
    Ok(ExitCode::SUCCESS)
}

fn state_label(state: TaskState) -> &'static str {
    match state {
        TaskState::Enabled => "enabled",
        TaskState::Disabled => "disabled",
        TaskState::Trashed => "trashed",
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

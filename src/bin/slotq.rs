//! slotq CLI: run commands or synthetic jobs under a concurrency limit.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use slotq::config::Config;
use slotq::telemetry::limiter::{record_run_elapsed, start_run_span};
use slotq::telemetry::{TelemetryConfig, init_telemetry};
use slotq::{
    Admission, Completion, Limit, Limiter, LimiterStats, Mode, Priority, PriorityLimiter, WorkItem,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as Process;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, info, warn};

#[derive(Parser)]
#[command(name = "slotq", about = "Run work under a slot-based concurrency limit")]
struct Cli {
    /// TOML config file (overrides environment, overridden by flags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run synthetic sleeping jobs and report when each one started
    Simulate {
        #[command(flatten)]
        limiter: LimiterArgs,
        /// Number of low-priority jobs, submitted first
        #[arg(long, default_value_t = 10)]
        items: usize,
        /// Number of high-priority jobs, submitted after the low ones
        #[arg(long, default_value_t = 0)]
        high: usize,
        /// How long each job sleeps
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        /// Print a JSON report instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run shell commands, one per line, from FILE or stdin
    Exec {
        #[command(flatten)]
        limiter: LimiterArgs,
        /// Command file; lines starting with '!' are high priority
        file: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LimiterArgs {
    /// Maximum concurrent jobs (non-positive values mean 1)
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<Limit>,
    /// Queue discipline: single or priority
    #[arg(long)]
    mode: Option<Mode>,
}

impl LimiterArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(limit) = self.limit {
            config.limit = limit;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
    }
}

/// Either limiter variant behind one submit call.
enum Runner {
    Single(Limiter),
    Priority(PriorityLimiter),
}

impl Runner {
    fn new(mode: Mode, limit: Limit) -> (Self, Completion) {
        match mode {
            Mode::Single => {
                let (limiter, completion) = slotq::create_limiter(limit);
                (Runner::Single(limiter), completion)
            }
            Mode::Priority => {
                let (limiter, completion) = slotq::create_priority_limiter(limit);
                (Runner::Priority(limiter), completion)
            }
        }
    }

    fn submit(&self, item: WorkItem, priority: Priority) -> Admission {
        match self {
            Runner::Single(limiter) => limiter.enqueue(item),
            Runner::Priority(limiter) => limiter.enqueue(item, priority),
        }
    }

    fn stats(&self) -> LimiterStats {
        match self {
            Runner::Single(limiter) => limiter.stats(),
            Runner::Priority(limiter) => limiter.stats(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Simulate { limiter, .. } | Command::Exec { limiter, .. } => {
            limiter.apply(&mut config)
        }
    }

    let _guard = init_telemetry(
        TelemetryConfig {
            endpoint: config.otel_endpoint.clone(),
            log_level: config.log_level.clone(),
            ..TelemetryConfig::new("slotq")
        }
        .with_limiter(config.mode, config.limit),
    )?;

    match cli.command {
        Command::Simulate {
            items,
            high,
            delay_ms,
            json,
            ..
        } => cmd_simulate(&config, items, high, Duration::from_millis(delay_ms), json).await,
        Command::Exec { file, .. } => cmd_exec(&config, file.as_deref()).await,
    }
}

#[derive(Debug, Serialize)]
struct JobRecord {
    job: usize,
    priority: Priority,
    started_ms: u64,
    finished_ms: u64,
}

#[derive(Debug, Serialize)]
struct SimulateReport {
    mode: Mode,
    limit: usize,
    delay_ms: u64,
    elapsed_ms: u64,
    jobs: Vec<JobRecord>,
}

async fn cmd_simulate(
    config: &Config,
    items: usize,
    high: usize,
    delay: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let span = start_run_span("simulate", config.mode, config.limit);
    let (runner, completion) = Runner::new(config.mode, config.limit);
    let (tx, mut rx) = mpsc::unbounded_channel::<JobRecord>();
    let total = items + high;
    let clock = Instant::now();

    async {
        for job in 0..total {
            let priority = if job < items {
                Priority::Low
            } else {
                Priority::High
            };
            let tx = tx.clone();
            let item = WorkItem::try_task(completion.clone(), move || {
                let tx = tx.clone();
                async move {
                    let started = clock.elapsed();
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(JobRecord {
                        job,
                        priority,
                        started_ms: started.as_millis() as u64,
                        finished_ms: clock.elapsed().as_millis() as u64,
                    });
                }
            })?;
            runner.submit(item, priority);
        }
        info!(submitted = total, stats = ?runner.stats(), "jobs submitted");
        Ok::<_, slotq::error::Error>(())
    }
    .instrument(span.clone())
    .await?;

    let mut jobs = Vec::with_capacity(total);
    while jobs.len() < total {
        match rx.recv().await {
            Some(record) => jobs.push(record),
            None => break,
        }
    }
    jobs.sort_by_key(|record| (record.started_ms, record.job));

    let elapsed_ms = clock.elapsed().as_millis() as u64;
    record_run_elapsed(&span, elapsed_ms);

    if json {
        let report = SimulateReport {
            mode: config.mode,
            limit: config.limit.get(),
            delay_ms: delay.as_millis() as u64,
            elapsed_ms,
            jobs,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{:<5}  {:<8}  {:>10}  {:>10}",
        "JOB", "PRIORITY", "STARTED", "FINISHED"
    );
    println!("{}", "-".repeat(40));
    for record in &jobs {
        println!(
            "{:<5}  {:<8}  {:>8}ms  {:>8}ms",
            record.job,
            record.priority.as_str(),
            record.started_ms,
            record.finished_ms
        );
    }
    println!(
        "\n{} job(s), mode {}, limit {}, elapsed {}ms",
        jobs.len(),
        config.mode,
        config.limit,
        elapsed_ms
    );
    Ok(())
}

#[derive(Debug)]
struct CommandResult {
    index: usize,
    command: String,
    outcome: Result<i32, String>,
    duration_ms: u64,
}

/// Split a command line into its priority class and the command itself.
fn parse_line(line: &str) -> Option<(Priority, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.strip_prefix('!') {
        Some(rest) => Some((Priority::High, rest.trim().to_string())),
        None => Some((Priority::Low, line.to_string())),
    }
}

async fn read_commands(file: Option<&Path>) -> anyhow::Result<Vec<(Priority, String)>> {
    async fn collect<R: AsyncRead + Unpin>(reader: R) -> anyhow::Result<Vec<(Priority, String)>> {
        let mut lines = BufReader::new(reader).lines();
        let mut commands = Vec::new();
        while let Some(line) = lines.next_line().await? {
            commands.extend(parse_line(&line));
        }
        Ok(commands)
    }

    match file {
        Some(path) => collect(tokio::fs::File::open(path).await?).await,
        None => collect(tokio::io::stdin()).await,
    }
}

async fn run_command(command: &str) -> Result<i32, String> {
    let status = Process::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("spawn failed: {e}"))?;
    Ok(status.code().unwrap_or(-1))
}

async fn cmd_exec(config: &Config, file: Option<&Path>) -> anyhow::Result<()> {
    let commands = read_commands(file).await?;
    if commands.is_empty() {
        println!("No commands to run.");
        return Ok(());
    }

    let span = start_run_span("exec", config.mode, config.limit);
    let (runner, completion) = Runner::new(config.mode, config.limit);
    let (tx, mut rx) = mpsc::unbounded_channel::<CommandResult>();
    let total = commands.len();
    let clock = Instant::now();

    if config.mode == Mode::Single && commands.iter().any(|(p, _)| *p == Priority::High) {
        warn!("'!' markers are ignored in single mode");
    }

    async {
        for (index, (priority, command)) in commands.into_iter().enumerate() {
            let tx = tx.clone();
            let item = WorkItem::try_task(completion.clone(), move || {
                let tx = tx.clone();
                let command = command.clone();
                async move {
                    let started = Instant::now();
                    info!(index, %command, "command started");
                    let outcome = run_command(&command).await;
                    let _ = tx.send(CommandResult {
                        index,
                        command,
                        outcome,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
            })?;
            runner.submit(item, priority);
        }
        Ok::<_, slotq::error::Error>(())
    }
    .instrument(span.clone())
    .await?;

    let mut failed = 0;
    for _ in 0..total {
        let Some(result) = rx.recv().await else {
            break;
        };
        let label = match &result.outcome {
            Ok(0) => "ok".to_string(),
            Ok(code) => format!("exit {code}"),
            Err(e) => e.clone(),
        };
        if !matches!(result.outcome, Ok(0)) {
            failed += 1;
        }
        println!(
            "[{:>3}] {:<10} {:>6}ms  {}",
            result.index, label, result.duration_ms, result.command
        );
    }

    let elapsed_ms = clock.elapsed().as_millis() as u64;
    record_run_elapsed(&span, elapsed_ms);
    println!("\n{total} command(s) in {elapsed_ms}ms, {failed} failed");

    if failed > 0 {
        anyhow::bail!("{failed} of {total} commands failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_reads_priority_marker() {
        assert_eq!(
            parse_line("!make release"),
            Some((Priority::High, "make release".to_string()))
        );
        assert_eq!(
            parse_line("  echo hi "),
            Some((Priority::Low, "echo hi".to_string()))
        );
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("   "), None);
    }
}

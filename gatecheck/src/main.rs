//! Manual approval gate verifier.
//!
//! Runs scenario files against a cluster (`gatecheck run`) and re-derives the
//! displayed status of a saved task snapshot (`gatecheck project`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatecheck::context::RunContext;
use gatecheck::core::projector::ListState;
use gatecheck::core::types::ApprovalTask;
use gatecheck::exit_codes;
use gatecheck::io::config::{DEFAULT_CONFIG_PATH, load_config};
use gatecheck::logging;
use gatecheck::scenario::{ScenarioReport, load_scenario, run_all};
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "gatecheck",
    version,
    about = "Verification engine for manual approval gates"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run scenario files against the current cluster.
    Run {
        /// Scenario TOML files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Number of scenarios run concurrently.
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
        /// Config file (defaults to `.gatecheck.toml` if present).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print required/pending/rejected/status derived from a task snapshot.
    Project {
        /// `ApprovalTask` JSON, e.g. from `oc get approvaltask <name> -o json`.
        task: PathBuf,
        /// Print JSON instead of the one-line summary.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            files,
            jobs,
            config,
        } => cmd_run(&files, jobs, config.as_deref()),
        Command::Project { task, json } => cmd_project(&task, json),
    };
    std::process::exit(code);
}

fn cmd_run(files: &[PathBuf], jobs: usize, config: Option<&Path>) -> i32 {
    let config_path = config.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };
    let scenarios = match files
        .iter()
        .map(|path| load_scenario(path))
        .collect::<Result<Vec<_>>>()
    {
        Ok(scenarios) => scenarios,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };

    let ctx = RunContext::production(cfg);
    let reports = run_all(&ctx, &scenarios, jobs);
    if let Err(err) = ctx.teardown() {
        warn!(err = %format!("{err:#}"), "teardown failed");
    }
    let reports = match reports {
        Ok(reports) => reports,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::FAILED;
        }
    };

    for report in &reports {
        println!("{}", summary_line(report));
    }
    let failed = reports.iter().filter(|report| !report.passed).count();
    println!("{} passed, {failed} failed", reports.len() - failed);
    if failed > 0 {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    }
}

fn summary_line(report: &ScenarioReport) -> String {
    let elapsed = report.elapsed.as_secs_f64();
    match &report.failure {
        None => format!(
            "PASS {} ({} steps, {elapsed:.1}s)",
            report.name, report.steps_run
        ),
        Some(failure) => format!("FAIL {} ({elapsed:.1}s): {failure}", report.name),
    }
}

fn cmd_project(path: &Path, json: bool) -> i32 {
    match project(path, json) {
        Ok(line) => {
            println!("{line}");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn project(path: &Path, json: bool) -> Result<String> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let task: ApprovalTask =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let projected = ListState::project(&task);
    if json {
        return serde_json::to_string(&projected).context("serialize projection");
    }
    Ok(format!("{} {projected}", task.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_jobs_and_config() {
        let cli = Cli::parse_from([
            "gatecheck",
            "run",
            "a.toml",
            "b.toml",
            "--jobs",
            "4",
            "--config",
            "ci.toml",
        ]);
        match cli.command {
            Command::Run {
                files,
                jobs,
                config,
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(jobs, 4);
                assert_eq!(config, Some(PathBuf::from("ci.toml")));
            }
            Command::Project { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_files() {
        assert!(Cli::try_parse_from(["gatecheck", "run"]).is_err());
    }

    #[test]
    fn parse_project() {
        let cli = Cli::parse_from(["gatecheck", "project", "task.json", "--json"]);
        assert!(matches!(cli.command, Command::Project { json: true, .. }));
    }
}

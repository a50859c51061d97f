//! prolog-bridge CLI
//!
//! Usage:
//!   plbridge 'member(X, [a, b, c])' --all
//!   plbridge --consult family.pl 'parent(tom, Who)'
//!   plbridge --config engine.yaml 'length([a, b], N)'

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

use prolog_bridge::{EngineOptions, Runtime};

/// Run a Prolog goal and print its solutions as JSON
#[derive(Parser, Debug)]
#[command(name = "plbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Goal to run, e.g. 'append(X, Y, [1, 2])'
    goal: String,

    /// Engine options YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Program file to load before running the goal (repeatable)
    #[arg(short = 'l', long = "consult")]
    consult: Vec<PathBuf>,

    /// Print every solution instead of the first
    #[arg(short, long)]
    all: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => tracing::Level::ERROR,
        (_, 0) => tracing::Level::WARN,
        (_, 1) => tracing::Level::INFO,
        (_, 2) => tracing::Level::DEBUG,
        (_, _) => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = load_options(cli.config.as_ref())?;
    let rt = Runtime::init(options).context("Failed to start the engine")?;

    for path in &cli.consult {
        let clauses = rt
            .consult_file(path)
            .with_context(|| format!("Failed to consult {}", path.display()))?;
        tracing::info!(path = %path.display(), clauses, "Loaded program");
    }

    let solutions = run_goal(&rt, &cli.goal, cli.all)?;
    for solution in &solutions {
        println!("{}", serde_json::to_string(solution)?);
    }
    rt.shutdown()?;

    if solutions.is_empty() {
        if !cli.quiet {
            eprintln!("false.");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn load_options(path: Option<&PathBuf>) -> Result<EngineOptions> {
    let options = match path {
        Some(path) => EngineOptions::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineOptions::default(),
    };
    let options = options.apply_env()?;
    options.validate()?;
    Ok(options)
}

/// Solutions as JSON objects of the goal's named variables
fn run_goal(rt: &Runtime, goal: &str, all: bool) -> Result<Vec<JsonValue>> {
    if goal.trim().is_empty() {
        bail!("Goal must not be empty");
    }
    // One terminating full stop, as typed at a toplevel
    let goal = goal.trim();
    let goal = goal.strip_suffix('.').unwrap_or(goal);

    if all {
        rt.solve_all(goal)
            .with_context(|| format!("Goal raised an exception: {}", goal))?
            .iter()
            .map(|solution| Ok(solution.to_json()?))
            .collect()
    } else {
        match rt
            .solve_once(goal)
            .with_context(|| format!("Goal raised an exception: {}", goal))?
        {
            Some(bindings) => Ok(vec![bindings.to_json()?]),
            None => Ok(Vec::new()),
        }
    }
}

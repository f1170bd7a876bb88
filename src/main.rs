//! gepa CLI - optimize text instructions against an external evaluator
//!
//! ## Usage
//!
//! ```bash
//! # Optimize the components in seed.md, scoring with eval.py
//! gepa run --seed-candidate seed.md --trainset train.json \
//!     --evaluator "python eval.py" --max-metric-calls 500 --run-dir runs/qa
//!
//! # Same run, resumed after an interruption (touch runs/qa/gepa.stop to halt)
//! gepa run --seed-candidate seed.md --trainset train.json \
//!     --evaluator "python eval.py" --max-metric-calls 1000 --run-dir runs/qa
//!
//! # Inspect a checkpoint
//! gepa show --run-dir runs/qa
//! ```
//!
//! The evaluator protocol is documented in `gepa::adapter::command`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gepa::adapter::{Agent, AgentOracle, CommandAdapter};
use gepa::state::{GepaState, lineage};
use gepa::{
    CandidateSelection, ComponentSelection, EngineConfig, OptimizationResult, candidate, optimize,
};

#[derive(Parser, Debug)]
#[command(name = "gepa")]
#[command(version)]
#[command(about = "Genetic-Pareto optimizer for text instructions")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "gepa=info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Optimize a seed candidate
    Run(RunArgs),

    /// Print the population stored in a run directory
    Show {
        #[arg(long)]
        run_dir: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Seed candidate (.md with `## component` sections, .toml or .json)
    #[arg(long)]
    seed_candidate: PathBuf,

    /// Training examples (JSON array or JSON lines)
    #[arg(long)]
    trainset: PathBuf,

    /// Validation examples; the training set is reused when omitted
    #[arg(long)]
    valset: Option<PathBuf>,

    /// Evaluator command line, spawned once per call
    #[arg(long)]
    evaluator: String,

    /// Let the evaluator rewrite instructions itself instead of an agent
    #[arg(long)]
    native_proposal: bool,

    /// Agent to use for reflection (claude, gemini, codex)
    #[arg(long, default_value = "claude")]
    agent: String,

    /// Model passed to the agent CLI
    #[arg(long)]
    model: Option<String>,

    /// Config file (default: gepa.toml or pyproject.toml [tool.gepa])
    #[arg(long)]
    config: Option<PathBuf>,

    /// Candidate selection: pareto, current-best or epsilon-greedy
    #[arg(long)]
    candidate_selection: Option<CandidateSelection>,

    /// Component selection: round-robin or all
    #[arg(long)]
    component_selector: Option<ComponentSelection>,

    #[arg(long)]
    max_metric_calls: Option<usize>,

    #[arg(long)]
    max_iterations: Option<usize>,

    /// Enable merging of candidates that share an ancestor
    #[arg(long)]
    use_merge: bool,

    /// Checkpoint directory (resumes when a checkpoint exists)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Write the best candidate here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Command::Run(args) => run(args),
        Command::Show { run_dir } => show(&run_dir),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_file(path)?,
        None => EngineConfig::load(&std::env::current_dir()?)?,
    };
    if let Some(n) = args.max_metric_calls {
        config.max_metric_calls = Some(n);
    }
    if let Some(n) = args.max_iterations {
        config.max_iterations = Some(n);
    }
    if let Some(strategy) = args.candidate_selection {
        config.candidate_selection_strategy = strategy;
    }
    if let Some(selector) = args.component_selector {
        config.component_selector = selector;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.run_dir.is_some() {
        config.run_dir = args.run_dir.clone();
    }
    config.use_merge |= args.use_merge;

    let seed_candidate = candidate::load(&args.seed_candidate)
        .with_context(|| format!("loading seed candidate {:?}", args.seed_candidate))?;
    let trainset = load_examples(&args.trainset)?;
    let valset = args.valset.as_deref().map(load_examples).transpose()?;

    let agent: Agent = args.agent.parse().map_err(anyhow::Error::msg)?;
    let adapter =
        CommandAdapter::from_command_line(&args.evaluator)?.with_text_proposal(args.native_proposal);
    let oracle = AgentOracle::new(agent, args.model.clone());

    eprintln!();
    eprintln!("{}", " GEPA OPTIMIZER ".bold().on_magenta());
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("{}", config.display_summary());
    eprintln!("   Evaluator: {}", args.evaluator);
    if args.native_proposal {
        eprintln!("   Proposal: evaluator-native");
    } else {
        eprintln!(
            "   Proposal: {} ({})",
            agent,
            args.model.as_deref().unwrap_or("default model")
        );
    }
    eprintln!(
        "   Examples: {} train, {} val",
        trainset.len(),
        valset.as_ref().map_or(trainset.len(), Vec::len)
    );
    eprintln!();

    let oracle_ref: Option<&dyn gepa::adapter::ReflectionOracle> = if args.native_proposal {
        None
    } else {
        Some(&oracle)
    };
    let result = optimize(
        &adapter,
        &trainset,
        valset.as_deref(),
        seed_candidate,
        oracle_ref,
        config,
    )?;

    print_summary(&result);

    match &args.output {
        Some(path) => {
            candidate::save(result.best_candidate(), path)?;
            eprintln!("\nBest candidate saved to: {:?}", path);
        }
        None => println!("{}", candidate::render(result.best_candidate())),
    }

    Ok(())
}

/// Examples from a JSON array, or one JSON value per line.
fn load_examples(path: &Path) -> Result<Vec<Value>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading examples {:?}", path))?;

    let examples = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => items,
        _ => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<Value>, _>>()
            .with_context(|| format!("parsing examples {:?}", path))?,
    };

    if examples.is_empty() {
        bail!("no examples in {:?}", path);
    }
    Ok(examples)
}

fn print_summary(result: &OptimizationResult) {
    eprintln!("{}", "─".repeat(65));
    eprintln!("{}", " OPTIMIZATION COMPLETE ".bold().on_green());
    eprintln!("{}", "─".repeat(65));
    eprintln!();

    let seed_score = result.val_aggregate_scores.first().copied().unwrap_or(0.0);
    eprintln!("Iterations:       {}", result.iterations);
    eprintln!("Candidates:       {}", result.num_candidates());
    eprintln!(
        "Metric calls:     {} ({} full validation evals)",
        result.total_metric_calls, result.num_full_val_evals
    );
    eprintln!(
        "Best score:       {:.4} → {:.4} (candidate {})",
        seed_score,
        result.best_score(),
        result.best_idx.to_string().bold()
    );

    let lineage = result.lineage(result.best_idx);
    if !lineage.is_empty() {
        let path: Vec<String> = lineage.iter().map(|id| id.to_string()).collect();
        eprintln!("Lineage:          {} → {}", path.join(" → "), result.best_idx);
    }

    let changes = result.changes_from_seed();
    if !changes.is_empty() {
        eprintln!("\nChanged components:");
        for change in &changes {
            eprintln!("  • {}", change.summary().cyan());
        }
    }

    if let Some(dir) = &result.run_dir {
        eprintln!("\nCheckpoint: {:?}", dir);
    }
    eprintln!();
}

fn show(run_dir: &Path) -> Result<()> {
    let Some(state) = GepaState::load(run_dir)? else {
        bail!("no checkpoint in {:?}", run_dir);
    };

    let best = state.best_idx();
    let on_front: std::collections::BTreeSet<usize> =
        state.pareto_front().iter().flatten().copied().collect();

    println!(
        "{} iterations, {} candidates, {} metric calls\n",
        state.i,
        state.len(),
        state.total_num_evals
    );

    for (id, score) in state.agg_scores().iter().enumerate() {
        let marker = if id == best {
            "★".yellow().to_string()
        } else if on_front.contains(&id) {
            "◆".cyan().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:>3}  {:.4}  {}  found at {} calls",
            marker,
            id,
            score,
            describe_origin(&state, id),
            state.metric_calls_by_discovery()[id]
        );
    }

    let front_scores: Vec<String> = state
        .pareto_front_scores()
        .iter()
        .map(|score| format!("{:.2}", score))
        .collect();
    println!("\nBest per validation example: [{}]", front_scores.join(", "));

    println!("\n{}", format!(" BEST: candidate {} ", best).bold().on_green());
    println!("{}", candidate::render(state.candidate(best)?));
    Ok(())
}

/// Where a candidate came from, with the size of its ancestor set.
fn describe_origin(state: &GepaState, id: usize) -> String {
    let parents = &state.parents()[id];
    let origin = match parents.len() {
        0 => "seed".to_string(),
        1 => format!("from {}", parents[0]),
        _ => format!(
            "merge of {}",
            parents
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        ),
    };
    format!(
        "{:<16} {} ancestors",
        origin,
        lineage::ancestors(state.parents(), id).len()
    )
}

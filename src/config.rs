//! Engine configuration from gepa.toml or pyproject.toml.
//!
//! Follows the ruff / black / mypy conventions:
//! - standalone `gepa.toml` in the working directory
//! - `[tool.gepa]` section in `pyproject.toml`, searched upward
//!
//! ## Example
//!
//! ```toml
//! [tool.gepa]
//! seed = 7
//! reflection-minibatch-size = 4
//! candidate-selection-strategy = "pareto"
//! use-merge = true
//! max-metric-calls = 500
//! run-dir = "runs/qa"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GepaError, GepaResult};

/// Independent RNG streams derived from the master seed.
pub const SAMPLER_STREAM: u64 = 1;
pub const CANDIDATE_STREAM: u64 = 2;
pub const MERGE_STREAM: u64 = 3;

/// How the next candidate to improve is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSelection {
    /// Sample from the per-example Pareto front, weighted by aggregate score.
    #[default]
    Pareto,
    /// Always the best aggregate score.
    CurrentBest,
    /// Best aggregate score, with probability `epsilon` a random candidate.
    EpsilonGreedy,
}

impl FromStr for CandidateSelection {
    type Err = GepaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "pareto" => Ok(CandidateSelection::Pareto),
            "current-best" | "best" => Ok(CandidateSelection::CurrentBest),
            "epsilon-greedy" => Ok(CandidateSelection::EpsilonGreedy),
            _ => Err(GepaError::Config(format!(
                "unknown candidate selection strategy: {}. Use 'pareto', 'current-best' or 'epsilon-greedy'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for CandidateSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateSelection::Pareto => write!(f, "pareto"),
            CandidateSelection::CurrentBest => write!(f, "current-best"),
            CandidateSelection::EpsilonGreedy => write!(f, "epsilon-greedy"),
        }
    }
}

/// Which components of a candidate a mutation rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentSelection {
    #[default]
    RoundRobin,
    All,
}

impl FromStr for ComponentSelection {
    type Err = GepaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" => Ok(ComponentSelection::RoundRobin),
            "all" => Ok(ComponentSelection::All),
            _ => Err(GepaError::Config(format!(
                "unknown component selector: {}. Use 'round-robin' or 'all'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ComponentSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentSelection::RoundRobin => write!(f, "round-robin"),
            ComponentSelection::All => write!(f, "all"),
        }
    }
}

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// File this config was read from (for display).
    #[serde(skip)]
    pub source: Option<PathBuf>,

    pub seed: u64,
    pub reflection_minibatch_size: usize,
    pub candidate_selection_strategy: CandidateSelection,
    pub epsilon: f64,
    pub component_selector: ComponentSelection,
    pub skip_perfect_score: bool,
    pub perfect_score: f64,

    pub use_merge: bool,
    pub max_merge_invocations: usize,
    pub merge_subsample_size: usize,

    // Stop conditions; at least one must be set.
    pub max_metric_calls: Option<usize>,
    pub max_iterations: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub score_threshold: Option<f64>,
    pub no_improvement_patience: Option<usize>,

    /// Checkpoints and the `gepa.stop` file live here.
    pub run_dir: Option<PathBuf>,

    /// Stop the run on any iteration error, not only contract violations.
    pub raise_on_exception: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: None,
            seed: 0,
            reflection_minibatch_size: 3,
            candidate_selection_strategy: CandidateSelection::Pareto,
            epsilon: 0.1,
            component_selector: ComponentSelection::RoundRobin,
            skip_perfect_score: true,
            perfect_score: 1.0,
            use_merge: false,
            max_merge_invocations: 5,
            merge_subsample_size: 5,
            max_metric_calls: None,
            max_iterations: None,
            timeout_secs: None,
            score_threshold: None,
            no_improvement_patience: None,
            run_dir: None,
            raise_on_exception: true,
        }
    }
}

/// Wrapper for pyproject.toml structure.
#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    gepa: Option<EngineConfig>,
}

impl EngineConfig {
    /// Load configuration for the given directory.
    ///
    /// Search order:
    /// 1. gepa.toml in directory
    /// 2. pyproject.toml [tool.gepa] in directory
    /// 3. Walk up to find a pyproject.toml with [tool.gepa]
    /// 4. Defaults if nothing found
    ///
    /// A file that exists but does not parse is an error.
    pub fn load(directory: &Path) -> GepaResult<Self> {
        let gepa_toml = directory.join("gepa.toml");
        if gepa_toml.exists() {
            return Self::load_file(&gepa_toml);
        }

        let mut current = Some(directory.to_path_buf());
        while let Some(dir) = current {
            let pyproject = dir.join("pyproject.toml");
            if pyproject.exists() {
                if let Some(config) = Self::load_pyproject(&pyproject)? {
                    return Ok(config);
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        Ok(Self::default())
    }

    /// Load an explicit config file (`gepa.toml` layout or a pyproject).
    pub fn load_file(path: &Path) -> GepaResult<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some("pyproject.toml") {
            return Self::load_pyproject(path)?.ok_or_else(|| {
                GepaError::Config(format!("{} has no [tool.gepa] section", path.display()))
            });
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn load_pyproject(path: &Path) -> GepaResult<Option<Self>> {
        let content = std::fs::read_to_string(path)?;
        let pyproject: PyProject = toml::from_str(&content)?;
        Ok(pyproject.tool.and_then(|t| t.gepa).map(|mut config| {
            config.source = Some(path.to_path_buf());
            config
        }))
    }

    pub fn has_stop_condition(&self) -> bool {
        self.max_metric_calls.is_some()
            || self.max_iterations.is_some()
            || self.timeout_secs.is_some()
            || self.score_threshold.is_some()
            || self.no_improvement_patience.is_some()
            || self.run_dir.is_some()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> GepaResult<()> {
        if self.reflection_minibatch_size == 0 {
            return Err(GepaError::Config(
                "reflection-minibatch-size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(GepaError::Config(format!(
                "epsilon must be in [0, 1], got {}",
                self.epsilon
            )));
        }
        if self.use_merge && self.merge_subsample_size == 0 {
            return Err(GepaError::Config(
                "merge-subsample-size must be positive".to_string(),
            ));
        }
        if !self.has_stop_condition() {
            return Err(GepaError::Config(
                "no stop condition: set max-metric-calls, max-iterations, timeout-secs, \
                 score-threshold, no-improvement-patience or run-dir"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Seed for one RNG stream, so components draw independent sequences.
    pub fn derived_seed(&self, stream: u64) -> u64 {
        self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ stream
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();

        match self.source {
            Some(ref source) => lines.push(format!("   Config: {}", source.display())),
            None => lines.push("   Config: (defaults)".to_string()),
        }

        lines.push(format!(
            "   Seed: {}  Minibatch: {}  Selection: {}  Components: {}",
            self.seed,
            self.reflection_minibatch_size,
            self.candidate_selection_strategy,
            self.component_selector
        ));

        if self.use_merge {
            lines.push(format!(
                "   Merge: up to {} (subsample {})",
                self.max_merge_invocations, self.merge_subsample_size
            ));
        }

        let mut stops = Vec::new();
        if let Some(n) = self.max_metric_calls {
            stops.push(format!("{} metric calls", n));
        }
        if let Some(n) = self.max_iterations {
            stops.push(format!("{} iterations", n));
        }
        if let Some(s) = self.timeout_secs {
            stops.push(format!("{}s", s));
        }
        if let Some(t) = self.score_threshold {
            stops.push(format!("score >= {}", t));
        }
        if let Some(p) = self.no_improvement_patience {
            stops.push(format!("{} stale iterations", p));
        }
        if !stops.is_empty() {
            lines.push(format!("   Stop: {}", stops.join(", ")));
        }

        if let Some(ref dir) = self.run_dir {
            lines.push(format!("   Run dir: {}", dir.display()));
        }

        lines.join("\n")
    }
}

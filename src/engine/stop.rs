//! Stop conditions for the optimization loop.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::state::GepaState;

/// Name of the file that stops a run when it appears in the run directory.
pub const STOP_FILE: &str = "gepa.stop";

/// Checked once before every iteration.
pub trait StopCondition {
    fn should_stop(&mut self, state: &GepaState) -> bool;

    /// Human-readable reason, for the log line when the run ends.
    fn describe(&self) -> String;
}

/// Metric-call budget, counted in evaluated examples.
#[derive(Debug, Clone)]
pub struct MaxMetricCalls(pub usize);

impl StopCondition for MaxMetricCalls {
    fn should_stop(&mut self, state: &GepaState) -> bool {
        state.total_num_evals >= self.0
    }

    fn describe(&self) -> String {
        format!("metric call budget of {} reached", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MaxIterations(pub usize);

impl StopCondition for MaxIterations {
    fn should_stop(&mut self, state: &GepaState) -> bool {
        state.i >= self.0
    }

    fn describe(&self) -> String {
        format!("{} iterations completed", self.0)
    }
}

/// Wall-clock limit, measured from construction.
#[derive(Debug, Clone)]
pub struct Timeout {
    limit: Duration,
    started: Instant,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: Instant::now(),
        }
    }
}

impl StopCondition for Timeout {
    fn should_stop(&mut self, _state: &GepaState) -> bool {
        self.started.elapsed() >= self.limit
    }

    fn describe(&self) -> String {
        format!("timeout of {:?} reached", self.limit)
    }
}

/// Best aggregate validation score reached a target.
#[derive(Debug, Clone)]
pub struct ScoreThreshold(pub f64);

impl StopCondition for ScoreThreshold {
    fn should_stop(&mut self, state: &GepaState) -> bool {
        state.best_score() >= self.0
    }

    fn describe(&self) -> String {
        format!("score threshold {} reached", self.0)
    }
}

/// No new best program for `patience` iterations.
#[derive(Debug, Clone)]
pub struct NoImprovement {
    patience: usize,
    best: f64,
    improved_at: usize,
}

impl NoImprovement {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::NEG_INFINITY,
            improved_at: 0,
        }
    }
}

impl StopCondition for NoImprovement {
    fn should_stop(&mut self, state: &GepaState) -> bool {
        let score = state.best_score();
        if score > self.best {
            self.best = score;
            self.improved_at = state.i;
        }
        state.i.saturating_sub(self.improved_at) >= self.patience
    }

    fn describe(&self) -> String {
        format!("no improvement for {} iterations", self.patience)
    }
}

/// Stop when a file appears (`touch <run-dir>/gepa.stop`).
#[derive(Debug, Clone)]
pub struct StopFile(pub PathBuf);

impl StopFile {
    pub fn in_dir(dir: &Path) -> Self {
        Self(dir.join(STOP_FILE))
    }
}

impl StopCondition for StopFile {
    fn should_stop(&mut self, _state: &GepaState) -> bool {
        self.0.exists()
    }

    fn describe(&self) -> String {
        format!("stop file {} found", self.0.display())
    }
}

/// Stops when any inner condition does. Every condition is polled each time
/// so stateful ones stay current.
#[derive(Default)]
pub struct AnyStop {
    conditions: Vec<Box<dyn StopCondition>>,
    fired: Option<String>,
}

impl AnyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: impl StopCondition + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    /// Every stop condition set in the config.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut stop = Self::new();
        if let Some(n) = config.max_metric_calls {
            stop = stop.with(MaxMetricCalls(n));
        }
        if let Some(n) = config.max_iterations {
            stop = stop.with(MaxIterations(n));
        }
        if let Some(secs) = config.timeout_secs {
            stop = stop.with(Timeout::new(Duration::from_secs(secs)));
        }
        if let Some(t) = config.score_threshold {
            stop = stop.with(ScoreThreshold(t));
        }
        if let Some(p) = config.no_improvement_patience {
            stop = stop.with(NoImprovement::new(p));
        }
        if let Some(ref dir) = config.run_dir {
            stop = stop.with(StopFile::in_dir(dir));
        }
        stop
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Reason of the first condition that fired.
    pub fn reason(&self) -> Option<&str> {
        self.fired.as_deref()
    }
}

impl StopCondition for AnyStop {
    fn should_stop(&mut self, state: &GepaState) -> bool {
        let mut stop = false;
        for condition in &mut self.conditions {
            if condition.should_stop(state) && !stop {
                stop = true;
                self.fired = Some(condition.describe());
            }
        }
        stop
    }

    fn describe(&self) -> String {
        self.fired.clone().unwrap_or_else(|| "not stopped".to_string())
    }
}

//! Scripted collaborators for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::adapter::Adapter;
use crate::error::{GepaError, GepaResult};
use crate::types::{Candidate, ComponentTexts, EvaluationBatch, ReflectiveDataset};

/// Build a candidate from `(component, text)` pairs.
pub fn candidate(pairs: &[(&str, &str)]) -> Candidate {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Key used to script scores per candidate: component texts joined by `|`.
pub fn fingerprint(candidate: &Candidate) -> String {
    candidate.values().cloned().collect::<Vec<_>>().join("|")
}

/// Adapter over example ids with scripted scores.
///
/// Scores come from, in priority order: a queue of per-call responses, a
/// fixed response, or a table keyed by candidate fingerprint and indexed by
/// example id (unscripted candidates score 0). Every evaluate call is
/// recorded.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    scores: HashMap<String, Vec<f64>>,
    responses: RefCell<VecDeque<Vec<f64>>>,
    fixed: Option<Vec<f64>>,
    traces: bool,
    fail_reflection: bool,
    fail_evals_after: Option<usize>,
    native_texts: Option<ComponentTexts>,
    pub calls: RefCell<Vec<(Vec<usize>, bool)>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            traces: true,
            ..Default::default()
        }
    }

    pub fn candidate(pairs: &[(&str, &str)]) -> Candidate {
        candidate(pairs)
    }

    /// Return `scores` verbatim from every evaluate call.
    pub fn with_eval(mut self, scores: Vec<f64>, traces: bool) -> Self {
        self.fixed = Some(scores);
        self.traces = traces;
        self
    }

    /// Answer successive evaluate calls with these score vectors.
    pub fn with_responses(self, responses: Vec<Vec<f64>>) -> Self {
        self.responses.borrow_mut().extend(responses);
        self
    }

    /// Script per-example scores for the candidate with these component texts.
    pub fn with_scores(mut self, texts: &[&str], scores: Vec<f64>) -> Self {
        self.scores.insert(texts.join("|"), scores);
        self
    }

    pub fn with_traces(mut self, traces: bool) -> Self {
        self.traces = traces;
        self
    }

    pub fn failing_reflection(mut self) -> Self {
        self.fail_reflection = true;
        self
    }

    /// Fail every evaluate call after the first `n`.
    pub fn failing_evals_after(mut self, n: usize) -> Self {
        self.fail_evals_after = Some(n);
        self
    }

    pub fn with_native_texts(mut self, texts: &[(&str, &str)]) -> Self {
        self.native_texts = Some(candidate(texts));
        self
    }

    /// Number of examples evaluated so far.
    pub fn examples_evaluated(&self) -> usize {
        self.calls.borrow().iter().map(|(ids, _)| ids.len()).sum()
    }
}

impl Adapter for ScriptedAdapter {
    type Example = usize;
    type Trajectory = String;

    fn evaluate(
        &self,
        batch: &[usize],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> GepaResult<EvaluationBatch<String>> {
        if self.fail_evals_after.is_some_and(|n| self.calls.borrow().len() >= n) {
            return Err(GepaError::Evaluation("scripted evaluator failure".to_string()));
        }
        self.calls.borrow_mut().push((batch.to_vec(), capture_traces));

        let queued = self.responses.borrow_mut().pop_front();
        let scores = match (queued, &self.fixed) {
            (Some(scores), _) => scores,
            (None, Some(fixed)) => fixed.clone(),
            (None, None) => {
                let table = self.scores.get(&fingerprint(candidate));
                batch
                    .iter()
                    .map(|&id| table.and_then(|t| t.get(id)).copied().unwrap_or(0.0))
                    .collect()
            }
        };

        let trajectories = (capture_traces && self.traces).then(|| {
            batch
                .iter()
                .map(|id| format!("trace for example {}", id))
                .collect()
        });

        Ok(EvaluationBatch::new(scores, trajectories))
    }

    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval: &EvaluationBatch<String>,
        components: &[String],
    ) -> GepaResult<ReflectiveDataset> {
        if self.fail_reflection {
            return Err(GepaError::Reflection("scripted failure".to_string()));
        }
        let trajectories = eval.trajectories.clone().unwrap_or_default();
        Ok(components
            .iter()
            .map(|name| {
                let records = trajectories
                    .iter()
                    .zip(&eval.scores)
                    .map(|(trace, score)| {
                        json!({
                            "Inputs": {"instruction": candidate.get(name).cloned().unwrap_or_default()},
                            "Generated Outputs": trace,
                            "Feedback": format!("scored {}", score),
                        })
                    })
                    .collect();
                (name.clone(), records)
            })
            .collect())
    }

    fn supports_text_proposal(&self) -> bool {
        self.native_texts.is_some()
    }

    fn propose_new_texts(
        &self,
        _candidate: &Candidate,
        _dataset: &ReflectiveDataset,
        _components: &[String],
    ) -> GepaResult<ComponentTexts> {
        self.native_texts
            .clone()
            .ok_or_else(|| GepaError::Reflection("no native texts scripted".to_string()))
    }
}

/// Oracle that answers every prompt with `text` fenced in backticks.
pub fn fenced_oracle(text: &'static str) -> impl Fn(&str) -> GepaResult<String> {
    move |_prompt: &str| Ok(format!("Here is the improved instruction:\n```\n{}\n```", text))
}

pub fn failing_oracle(_prompt: &str) -> GepaResult<String> {
    Err(GepaError::Agent("oracle unavailable".to_string()))
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a debug-level subscriber and return everything it logged,
/// including one line per closed span with its recorded fields.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(Level::DEBUG)
        .finish();

    let value = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
    (value, output)
}

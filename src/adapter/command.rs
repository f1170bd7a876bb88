//! Adapter that drives an external evaluator program over JSON.
//!
//! The program is spawned once per call. It reads one request object on
//! stdin and writes one response object on stdout:
//!
//! ```text
//! {"mode": "evaluate", "candidate": {..}, "batch": [..], "capture_traces": true}
//!   -> {"scores": [..], "trajectories": [..] | null}
//! {"mode": "reflect", "candidate": {..}, "components": [..], "scores": [..], "trajectories": [..]}
//!   -> {"dataset": {"component": [record, ..]}}
//! {"mode": "propose", "candidate": {..}, "components": [..], "dataset": {..}}
//!   -> {"texts": {"component": "new text"}}
//! ```
//!
//! `propose` is only sent when the adapter was built with
//! [`CommandAdapter::with_text_proposal`].

use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::Adapter;
use crate::error::{GepaError, GepaResult};
use crate::types::{Candidate, ComponentTexts, EvaluationBatch, ReflectiveDataset};

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Request<'a> {
    Evaluate {
        candidate: &'a Candidate,
        batch: &'a [Value],
        capture_traces: bool,
    },
    Reflect {
        candidate: &'a Candidate,
        components: &'a [String],
        scores: &'a [f64],
        trajectories: Option<&'a [Value]>,
    },
    Propose {
        candidate: &'a Candidate,
        components: &'a [String],
        dataset: &'a ReflectiveDataset,
    },
}

impl Request<'_> {
    fn mode(&self) -> &'static str {
        match self {
            Request::Evaluate { .. } => "evaluate",
            Request::Reflect { .. } => "reflect",
            Request::Propose { .. } => "propose",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    scores: Vec<f64>,
    #[serde(default)]
    trajectories: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ReflectResponse {
    dataset: ReflectiveDataset,
}

#[derive(Debug, Deserialize)]
struct ProposeResponse {
    texts: ComponentTexts,
}

/// Runs `program args..` as the evaluator for JSON examples.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    program: String,
    args: Vec<String>,
    text_proposal: bool,
}

impl CommandAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            text_proposal: false,
        }
    }

    /// Parse a whitespace-separated command line (`"python eval.py --fast"`).
    pub fn from_command_line(line: &str) -> GepaResult<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| GepaError::Config("evaluator command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Let the program rewrite instructions itself (`propose` mode).
    pub fn with_text_proposal(mut self, enabled: bool) -> Self {
        self.text_proposal = enabled;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Spawn the program, send `request`, return its raw stdout.
    fn exchange(&self, request: &Request<'_>) -> Result<Vec<u8>, String> {
        let payload = serde_json::to_vec(request).map_err(|e| e.to_string())?;
        debug!(
            program = %self.program,
            mode = request.mode(),
            bytes = payload.len(),
            "calling evaluator program"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to execute {}: {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|e| format!("failed to write to {} stdin: {}", self.program, e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("failed to wait for {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} {} returned error: {}",
                self.program,
                request.mode(),
                stderr.trim()
            ));
        }
        Ok(output.stdout)
    }

    fn call<R: for<'de> Deserialize<'de>>(&self, request: &Request<'_>) -> Result<R, String> {
        let stdout = self.exchange(request)?;
        serde_json::from_slice(&stdout).map_err(|e| {
            format!(
                "malformed {} response from {}: {}",
                request.mode(),
                self.program,
                e
            )
        })
    }
}

impl Adapter for CommandAdapter {
    type Example = Value;
    type Trajectory = Value;

    fn evaluate(
        &self,
        batch: &[Value],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> GepaResult<EvaluationBatch<Value>> {
        let request = Request::Evaluate {
            candidate,
            batch,
            capture_traces,
        };
        let response: EvaluateResponse = self.call(&request).map_err(GepaError::Evaluation)?;
        let trajectories = if capture_traces {
            response.trajectories
        } else {
            None
        };
        Ok(EvaluationBatch::new(response.scores, trajectories))
    }

    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval: &EvaluationBatch<Value>,
        components: &[String],
    ) -> GepaResult<ReflectiveDataset> {
        let request = Request::Reflect {
            candidate,
            components,
            scores: &eval.scores,
            trajectories: eval.trajectories.as_deref(),
        };
        let response: ReflectResponse = self.call(&request).map_err(GepaError::Reflection)?;
        Ok(response.dataset)
    }

    fn supports_text_proposal(&self) -> bool {
        self.text_proposal
    }

    fn propose_new_texts(
        &self,
        candidate: &Candidate,
        dataset: &ReflectiveDataset,
        components: &[String],
    ) -> GepaResult<ComponentTexts> {
        if !self.text_proposal {
            return Err(GepaError::Reflection(format!(
                "{} was not configured to propose texts",
                self.program
            )));
        }
        let request = Request::Propose {
            candidate,
            components,
            dataset,
        };
        let response: ProposeResponse = self.call(&request).map_err(GepaError::Reflection)?;
        Ok(response.texts)
    }
}

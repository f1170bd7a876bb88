//! Reflection oracle backed by coding-agent CLIs.
//!
//! Supports multiple LLM backends via `--agent`:
//! - `claude` (default): `claude --print -p <prompt>`
//! - `gemini`: `gemini -o text -y <prompt>`
//! - `codex`: `codex exec` with the prompt on stdin and the reply in a file

use std::io::Write;
use std::process::{Command, Stdio};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ReflectionOracle;
use crate::error::{GepaError, GepaResult};

/// Which LLM agent answers reflection prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    #[default]
    Claude,
    Gemini,
    /// OpenAI Codex CLI
    Codex,
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Agent::Claude),
            "gemini" => Ok(Agent::Gemini),
            "codex" | "openai" => Ok(Agent::Codex),
            _ => Err(format!(
                "Unknown agent: {}. Use 'claude', 'gemini', or 'codex'",
                s
            )),
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Agent::Claude => write!(f, "claude"),
            Agent::Gemini => write!(f, "gemini"),
            Agent::Codex => write!(f, "codex"),
        }
    }
}

fn check_output(name: &str, output: &std::process::Output) -> GepaResult<()> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GepaError::Agent(format!(
            "{} returned error: {}",
            name,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Call Claude CLI and return the response.
pub fn call_claude(prompt: &str, model: Option<&str>) -> GepaResult<String> {
    let mut cmd = Command::new("claude");
    if let Some(m) = model {
        cmd.args(["--model", m]);
    }
    cmd.args(["--print", "-p", prompt]);

    let output = cmd
        .output()
        .map_err(|e| GepaError::Agent(format!("Failed to execute claude: {}", e)))?;
    check_output("claude", &output)?;

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Call Gemini CLI in plain-text mode and return the response.
pub fn call_gemini(prompt: &str, model: Option<&str>) -> GepaResult<String> {
    let mut cmd = Command::new("gemini");
    cmd.args(["-o", "text", "-y"]);
    if let Some(m) = model {
        cmd.args(["-m", m]);
    }
    cmd.arg(prompt);

    let output = cmd
        .output()
        .map_err(|e| GepaError::Agent(format!("Failed to execute gemini: {}", e)))?;
    check_output("gemini", &output)?;

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Call Codex CLI and return the response.
///
/// `codex exec` reads the prompt from stdin and writes its final message to
/// the `-o` file.
pub fn call_codex(prompt: &str, model: Option<&str>) -> GepaResult<String> {
    let output_file =
        std::env::temp_dir().join(format!("gepa_codex_{}.txt", std::process::id()));

    let mut cmd = Command::new("codex");
    cmd.args(["exec", "--skip-git-repo-check"]);
    if let Some(m) = model {
        cmd.args(["-m", m]);
    }
    cmd.arg("-o").arg(&output_file).arg("-");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GepaError::Agent(format!("Failed to execute codex: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(prompt.as_bytes())
            .map_err(|e| GepaError::Agent(format!("Failed to write to codex stdin: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| GepaError::Agent(format!("Failed to wait for codex: {}", e)))?;

    let result = check_output("codex", &output).and_then(|_| {
        std::fs::read_to_string(&output_file)
            .map_err(|e| GepaError::Agent(format!("Failed to read codex output: {}", e)))
    });
    let _ = std::fs::remove_file(&output_file);

    Ok(result?.trim().to_string())
}

/// Call the specified LLM agent and return the response.
pub fn call_agent(agent: Agent, prompt: &str, model: Option<&str>) -> GepaResult<String> {
    match agent {
        Agent::Claude => call_claude(prompt, model),
        Agent::Gemini => call_gemini(prompt, model),
        Agent::Codex => call_codex(prompt, model),
    }
}

/// A [`ReflectionOracle`] that shells out to an agent CLI per prompt.
#[derive(Debug, Clone, Default)]
pub struct AgentOracle {
    pub agent: Agent,
    pub model: Option<String>,
}

impl AgentOracle {
    pub fn new(agent: Agent, model: Option<String>) -> Self {
        Self { agent, model }
    }
}

impl ReflectionOracle for AgentOracle {
    fn reflect(&self, prompt: &str) -> GepaResult<String> {
        debug!(
            agent = %self.agent,
            model = self.model.as_deref().unwrap_or("default"),
            prompt_chars = prompt.len(),
            "calling reflection agent"
        );
        call_agent(self.agent, prompt, self.model.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_parse_and_display() {
        assert_eq!("Claude".parse::<Agent>().unwrap(), Agent::Claude);
        assert_eq!("openai".parse::<Agent>().unwrap(), Agent::Codex);
        assert!("gpt".parse::<Agent>().is_err());
        for agent in [Agent::Claude, Agent::Gemini, Agent::Codex] {
            assert_eq!(agent.to_string().parse::<Agent>().unwrap(), agent);
        }
    }

    #[test]
    fn test_agent_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Agent::Gemini).unwrap(), "\"gemini\"");
    }

    #[test]
    fn test_default_oracle_is_claude() {
        let oracle = AgentOracle::default();
        assert_eq!(oracle.agent, Agent::Claude);
        assert!(oracle.model.is_none());
    }
}

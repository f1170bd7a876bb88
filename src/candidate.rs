//! Candidates as documents: loading seed programs, rendering, diffing.
//!
//! A candidate is a set of named components, each holding instruction text.
//! On disk a candidate is either markdown with one `## <component>` header
//! per component, or a flat TOML / JSON table of `component = "text"`.
//!
//! ```markdown
//! ## question_answerer
//! Answer the question using only the passage.
//!
//! ## summarizer
//! Summarize the answer in one sentence.
//! ```

use std::path::Path;

use crate::error::{GepaError, GepaResult};
use crate::types::Candidate;

/// Parse a candidate from markdown with `## <component>` section headers.
///
/// Text before the first header is ignored. Component order follows the
/// document.
pub fn from_markdown(content: &str) -> Candidate {
    let mut candidate = Candidate::new();
    let mut current: Option<String> = None;
    let mut body = String::new();

    for line in content.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            if let Some(name) = current.take() {
                candidate.insert(name, body.trim().to_string());
                body.clear();
            }
            current = Some(header.trim().to_string());
        } else if current.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }

    if let Some(name) = current {
        candidate.insert(name, body.trim().to_string());
    }

    candidate
}

/// Render a candidate back to markdown sections.
pub fn render(candidate: &Candidate) -> String {
    let mut output = String::new();
    for (name, text) in candidate {
        output.push_str(&format!("## {}\n\n", name));
        output.push_str(text);
        output.push_str("\n\n");
    }
    output.trim().to_string()
}

/// Load a candidate from `.md`, `.toml` or `.json`.
pub fn load(path: impl AsRef<Path>) -> GepaResult<Candidate> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    let candidate = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        _ => from_markdown(&content),
    };

    if candidate.is_empty() {
        return Err(GepaError::Config(format!(
            "candidate file {} defines no components",
            path.display()
        )));
    }
    Ok(candidate)
}

/// Save a candidate as markdown.
pub fn save(candidate: &Candidate, path: impl AsRef<Path>) -> GepaResult<()> {
    std::fs::write(path.as_ref(), render(candidate))?;
    Ok(())
}

/// A component whose text differs between two candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDiff {
    pub component: String,
    pub before: String,
    pub after: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl ComponentDiff {
    /// Compact one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "[~{}] modified (+{}/-{})",
            self.component, self.lines_added, self.lines_removed
        )
    }
}

/// Components whose text changed from `a` to `b`, in `a`'s component order.
pub fn diff(a: &Candidate, b: &Candidate) -> Vec<ComponentDiff> {
    a.iter()
        .filter_map(|(name, before)| {
            let after = b.get(name)?;
            if before == after {
                return None;
            }
            let (lb, la) = (before.lines().count(), after.lines().count());
            Some(ComponentDiff {
                component: name.clone(),
                before: before.clone(),
                after: after.clone(),
                lines_added: la.saturating_sub(lb),
                lines_removed: lb.saturating_sub(la),
            })
        })
        .collect()
}

//! Prompt rendering and output extraction for instruction rewriting.
//!
//! The reflection prompt shows the oracle the current instruction and a
//! markdown dump of the reflective records (inputs, outputs, feedback), then
//! asks for a new instruction between triple backticks. Extraction is lenient:
//! oracles do not fence reliably.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::adapter::ReflectionOracle;
use crate::error::GepaResult;

pub const CURRENT_INSTRUCTION_PLACEHOLDER: &str = "<curr_instructions>";
pub const RECORDS_PLACEHOLDER: &str = "<inputs_outputs_feedback>";

pub const INSTRUCTION_PROMPT_TEMPLATE: &str = r#"I provided an assistant with the following instructions to perform a task for me:
```
<curr_instructions>
```

The following are examples of different task inputs provided to the assistant along with the assistant's response for each of them, and some feedback on how the assistant's response could be better:
```
<inputs_outputs_feedback>
```

Your task is to write a new instruction for the assistant.

Read the inputs carefully and identify the input format and infer detailed task description about the task I wish to solve with the assistant.

Read all the assistant responses and the corresponding feedback. Identify all niche and domain specific factual information about the task and include it in the instruction, as a lot of it may not be available to the assistant in the future. The assistant may have utilized a generalizable strategy to solve the task, if so, include that in the instruction as well.

Provide the new instructions within ``` blocks."#;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```\S*\n?").expect("Invalid leading fence regex"));

static LANGUAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S*\n").expect("Invalid language tag regex"));

const MAX_HEADER_LEVEL: usize = 6;

/// Render reflective records as nested markdown sections.
///
/// Each record becomes `# Example n`, each top-level key a `##` section, and
/// nested mappings and lists deeper headers (capped at `######`).
pub fn format_samples(samples: &[Value]) -> String {
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| render_sample(sample, i + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_sample(sample: &Value, number: usize) -> String {
    let mut out = format!("# Example {}\n", number);
    match sample {
        Value::Object(fields) => {
            for (key, value) in fields {
                out.push_str(&format!("## {}\n", key));
                render_value(value, 3, &mut out);
            }
        }
        other => render_value(other, 2, &mut out),
    }
    out
}

fn render_value(value: &Value, level: usize, out: &mut String) {
    let hashes = "#".repeat(level);
    let next = (level + 1).min(MAX_HEADER_LEVEL);
    match value {
        Value::Object(fields) => {
            for (key, nested) in fields {
                out.push_str(&format!("{} {}\n", hashes, key));
                render_value(nested, next, out);
            }
            if fields.is_empty() {
                out.push('\n');
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                out.push_str(&format!("{} Item {}\n", hashes, i + 1));
                render_value(item, next, out);
            }
            if items.is_empty() {
                out.push('\n');
            }
        }
        Value::String(s) => {
            out.push_str(s.trim());
            out.push_str("\n\n");
        }
        scalar => {
            out.push_str(scalar.to_string().trim());
            out.push_str("\n\n");
        }
    }
}

/// Fill the reflection template for one component.
pub fn build_prompt(current_instruction: &str, samples: &[Value]) -> String {
    INSTRUCTION_PROMPT_TEMPLATE
        .replace(CURRENT_INSTRUCTION_PLACEHOLDER, current_instruction)
        .replace(RECORDS_PLACEHOLDER, &format_samples(samples))
}

/// Pull the new instruction out of an oracle response.
///
/// With two or more fences, the text between the first and the last fence
/// (minus a language tag). Otherwise a lone leading or trailing fence is
/// stripped and the rest returned trimmed.
pub fn extract_instruction(output: &str) -> String {
    let first = output.find("```");
    let last = output.rfind("```");

    match (first, last) {
        (Some(first), Some(last)) if first + 3 < last => {
            let inner = &output[first + 3..last];
            LANGUAGE_TAG.replace(inner, "").trim().to_string()
        }
        _ => {
            let stripped = output.trim();
            if stripped.starts_with("```") {
                LEADING_FENCE.replace(stripped, "").trim().to_string()
            } else if let Some(body) = stripped.strip_suffix("```") {
                body.trim().to_string()
            } else {
                stripped.to_string()
            }
        }
    }
}

/// Ask the oracle for a rewritten instruction.
pub fn propose_instruction(
    oracle: &dyn ReflectionOracle,
    current_instruction: &str,
    samples: &[Value],
) -> GepaResult<String> {
    let prompt = build_prompt(current_instruction, samples);
    let response = oracle.reflect(&prompt)?;
    Ok(extract_instruction(&response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_nested_record() {
        let samples = vec![json!({
            "Inputs": {"question": "  2+2?  "},
            "Generated Outputs": "5",
            "Feedback": ["wrong", {"hint": "add"}],
        })];
        let text = format_samples(&samples);
        assert_eq!(
            text,
            "# Example 1\n\
             ## Inputs\n\
             ### question\n\
             2+2?\n\n\
             ## Generated Outputs\n\
             5\n\n\
             ## Feedback\n\
             ### Item 1\n\
             wrong\n\n\
             ### Item 2\n\
             #### hint\n\
             add\n\n"
        );
    }

    #[test]
    fn test_format_joins_examples_and_caps_depth() {
        let samples = vec![
            json!({"a": 1}),
            json!({"deep": {"l4": {"l5": {"l6": {"l7": {"l8": true}}}}}}),
            json!({"empty": {}}),
        ];
        let text = format_samples(&samples);
        assert!(text.starts_with("# Example 1\n## a\n1\n\n\n\n# Example 2\n"));
        assert!(text.contains("##### l6\n###### l7\n###### l8\ntrue"));
        assert!(text.ends_with("# Example 3\n## empty\n\n"));
    }

    #[test]
    fn test_build_prompt_fills_placeholders() {
        let prompt = build_prompt("Answer briefly.", &[json!({"Feedback": "ok"})]);
        assert!(prompt.contains("```\nAnswer briefly.\n```"));
        assert!(prompt.contains("# Example 1\n## Feedback\nok"));
        assert!(!prompt.contains(CURRENT_INSTRUCTION_PLACEHOLDER));
        assert!(!prompt.contains(RECORDS_PLACEHOLDER));
    }

    #[test]
    fn test_extract_between_fences() {
        let out = "Here you go:\n```markdown\nNew instruction.\nLine two.\n```\nThanks";
        assert_eq!(extract_instruction(out), "New instruction.\nLine two.");
    }

    #[test]
    fn test_extract_uses_outermost_fences() {
        let out = "```\nUse ```code``` when needed.\n```";
        assert_eq!(extract_instruction(out), "Use ```code``` when needed.");
    }

    #[test]
    fn test_extract_single_leading_fence() {
        assert_eq!(extract_instruction("```text\nJust this"), "Just this");
    }

    #[test]
    fn test_extract_single_trailing_fence() {
        assert_eq!(extract_instruction("Just this\n```"), "Just this");
    }

    #[test]
    fn test_extract_no_fences() {
        assert_eq!(extract_instruction("  plain answer \n"), "plain answer");
    }

    #[test]
    fn test_propose_with_closure_oracle() {
        let oracle = |prompt: &str| -> GepaResult<String> {
            assert!(prompt.contains("old"));
            Ok("```\nnew\n```".to_string())
        };
        assert_eq!(propose_instruction(&oracle, "old", &[]).unwrap(), "new");
    }
}

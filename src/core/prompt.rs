//! AD-006: Prompt assembly.
//!
//! Deterministic instruction text per compiled step, `INPUT:`/`OUTPUT:`
//! example sets, and `{field}` placeholders in prompt resources. The system
//! prompt is: prompt resource, generated instructions, rendered examples.

use super::parser::is_identifier;
use super::rules::lookup_value;
use super::types::{SchemaNode, TypedRecord, Verb};

const JSON_ONLY: &str = "Return ONLY a valid JSON object. No markdown, no explanation.";

/// One worked example from an examples resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub input: String,
    pub output: String,
}

/// Instruction text for one compiled step.
pub fn instructions(verb: Verb, target: &str, schema: &SchemaNode) -> String {
    match verb {
        Verb::Extract => {
            let mut lines = vec![
                "Extract the following fields from the input text.".to_string(),
                "Return a JSON object with EXACTLY these fields:".to_string(),
                String::new(),
            ];
            if let SchemaNode::Object(obj) = schema {
                for (name, node) in &obj.fields {
                    describe_field(name, node, 0, &mut lines);
                }
            }
            lines.push(String::new());
            lines.push(JSON_ONLY.to_string());
            lines.join("\n")
        }
        Verb::Classify => {
            let values = match schema {
                SchemaNode::Enum { values } => values.join(", "),
                other => other.describe(),
            };
            [
                "Classify the input text into exactly one category.".to_string(),
                format!("Categories: {}", values),
                String::new(),
                format!(
                    "Return a JSON object with one field \"{}\" whose value is exactly one of: {}",
                    target, values
                ),
                String::new(),
                JSON_ONLY.to_string(),
            ]
            .join("\n")
        }
        Verb::Draft => [
            format!(
                "Write the \"{}\" text from the structured data and the original input below.",
                target
            ),
            format!(
                "Return a JSON object with one field \"{}\" holding the text.",
                target
            ),
        ]
        .join("\n"),
    }
}

fn describe_field(name: &str, node: &SchemaNode, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match node {
        SchemaNode::Text => lines.push(format!("{}- {}: text string", indent, name)),
        SchemaNode::Money => lines.push(format!(
            "{}- {}: numeric amount (number only, no currency symbol)",
            indent, name
        )),
        SchemaNode::Number => lines.push(format!("{}- {}: numeric value", indent, name)),
        SchemaNode::Bool => lines.push(format!("{}- {}: true or false", indent, name)),
        SchemaNode::Enum { values } => lines.push(format!(
            "{}- {}: MUST be exactly one of: {}",
            indent,
            name,
            values.join(", ")
        )),
        SchemaNode::Object(obj) => {
            lines.push(format!("{}- {}: object with fields:", indent, name));
            for (child, child_node) in &obj.fields {
                describe_field(child, child_node, depth + 1, lines);
            }
        }
        SchemaNode::List { items } => match &**items {
            SchemaNode::Object(obj) => {
                lines.push(format!("{}- {}: list of objects, each with fields:", indent, name));
                for (child, child_node) in &obj.fields {
                    describe_field(child, child_node, depth + 1, lines);
                }
            }
            other => lines.push(format!("{}- {}: list of {}", indent, name, other.describe())),
        },
    }
}

/// Parse an examples resource: `INPUT:` / `OUTPUT:` pairs separated by blank lines.
/// Continuation lines extend the preceding section.
pub fn parse_examples(text: &str) -> Result<Vec<Example>, String> {
    let mut examples = Vec::new();
    let mut input: Option<String> = None;
    let mut output: Option<String> = None;

    let flush = |input: &mut Option<String>,
                 output: &mut Option<String>,
                 examples: &mut Vec<Example>|
     -> Result<(), String> {
        match (input.take(), output.take()) {
            (Some(i), Some(o)) => {
                examples.push(Example {
                    input: i.trim().to_string(),
                    output: o.trim().to_string(),
                });
                Ok(())
            }
            (Some(_), None) => Err(format!("example {} has INPUT but no OUTPUT", examples.len() + 1)),
            (None, Some(_)) => Err(format!("example {} has OUTPUT but no INPUT", examples.len() + 1)),
            (None, None) => Ok(()),
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut input, &mut output, &mut examples)?;
        } else if let Some(rest) = strip_label(trimmed, "INPUT:") {
            if input.is_some() {
                flush(&mut input, &mut output, &mut examples)?;
            }
            input = Some(rest.to_string());
        } else if let Some(rest) = strip_label(trimmed, "OUTPUT:") {
            if output.is_some() {
                return Err(format!("example {} has two OUTPUT sections", examples.len() + 1));
            }
            output = Some(rest.to_string());
        } else if let Some(section) = output.as_mut().or(input.as_mut()) {
            section.push('\n');
            section.push_str(trimmed);
        } else {
            return Err(format!("text before the first INPUT: '{}'", trimmed));
        }
    }
    flush(&mut input, &mut output, &mut examples)?;

    if examples.is_empty() {
        return Err("no INPUT/OUTPUT pair found".to_string());
    }
    Ok(examples)
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        Some(line[label.len()..].trim())
    } else {
        None
    }
}

/// Render examples for the system prompt.
pub fn render_examples(examples: &[Example]) -> String {
    let mut out = String::from("Here are some examples:\n");
    for (i, ex) in examples.iter().enumerate() {
        out.push_str(&format!(
            "\nExample {}:\nInput: {}\nOutput: {}\n",
            i + 1,
            ex.input,
            ex.output
        ));
    }
    out.push_str("\nNow process the following input.");
    out
}

/// Join the parts of a system prompt, skipping absent ones.
pub fn system_prompt(context: Option<&str>, instructions: &str, examples: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(c) = context.map(str::trim).filter(|c| !c.is_empty()) {
        parts.push(c);
    }
    parts.push(instructions);
    if let Some(e) = examples {
        parts.push(e);
    }
    parts.join("\n\n")
}

/// Byte spans and names of `{name}` / `{object.field}` placeholders.
/// Braces around anything else (JSON, prose) are left alone.
fn placeholders(text: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(open) = text[start..].find('{') {
        let open = start + open;
        let Some(close) = text[open + 1..].find(['{', '}']).map(|c| open + 1 + c) else {
            break;
        };
        if &text[close..=close] == "{" {
            start = close;
            continue;
        }
        let key = &text[open + 1..close];
        if !key.is_empty() && key.split('.').all(is_identifier) {
            found.push((open, close + 1, key));
        }
        start = close + 1;
    }
    found
}

/// Placeholder names referenced by a template, in order of appearance.
pub fn template_fields(text: &str) -> Vec<String> {
    placeholders(text)
        .into_iter()
        .map(|(_, _, key)| key.to_string())
        .collect()
}

/// Substitute placeholders from the record assembled so far.
/// A placeholder with no value is left as written.
pub fn render_template(text: &str, record: &TypedRecord) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (open, close, key) in placeholders(text) {
        out.push_str(&text[last..open]);
        match lookup_value(record, key) {
            Some(value) => out.push_str(&value.render()),
            None => out.push_str(&text[open..close]),
        }
        last = close;
    }
    out.push_str(&text[last..]);
    out
}

//! AD-008: Response validation.
//!
//! Decodes a raw response (markdown fences stripped) and checks it against a
//! structural schema, producing a `TypedValue` or every violation found.
//! Coercions are limited to numeric strings for MONEY/NUMBER and the
//! yes/no/true/false literal set for YES/NO. Enum membership is exact.

use super::rules::parse_bool;
use super::types::*;
use indexmap::IndexMap;
use serde_json::Value;

/// Longest string excerpt quoted in a violation.
const EXCERPT_LEN: usize = 40;

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        // one-line fence: only a `json` tag can precede the payload
        None => match rest.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
            _ => rest,
        },
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode a raw response into JSON.
pub fn decode_response(raw: &str) -> Result<Value, Violation> {
    serde_json::from_str(strip_fences(raw)).map_err(|e| Violation {
        path: "$".to_string(),
        expected: "a JSON value".to_string(),
        actual: format!("undecodable response ({})", e),
    })
}

/// Validate a decoded value against a schema.
pub fn validate(schema: &SchemaNode, value: &Value) -> ValidationOutcome {
    validate_at(schema, value, "$")
}

/// Validate with violation paths rooted at `path`.
pub fn validate_at(schema: &SchemaNode, value: &Value, path: &str) -> ValidationOutcome {
    let mut violations = Vec::new();
    match check(schema, value, path, &mut violations) {
        Some(typed) if violations.is_empty() => ValidationOutcome::Valid(typed),
        _ => ValidationOutcome::Invalid(violations),
    }
}

/// Validate a raw response for one compiled step.
///
/// Object steps expect the full object. Single-field steps accept the bare
/// value or an object carrying the field; drafting also accepts plain text.
pub fn check_response(step: &CompiledStep, raw: &str) -> ValidationOutcome {
    let field = match &step.output {
        StepOutput::Fields => {
            return match decode_response(raw) {
                Ok(value) => validate(&step.schema, &value),
                Err(v) => ValidationOutcome::Invalid(vec![v]),
            }
        }
        StepOutput::Field(name) => name.as_str(),
    };

    let decoded = decode_response(raw);
    let value = match (step.verb, decoded) {
        (_, Ok(Value::Object(map))) => match map.get(field).cloned() {
            Some(v) => v,
            None => {
                return ValidationOutcome::Invalid(vec![Violation {
                    path: field.to_string(),
                    expected: step.schema.describe(),
                    actual: "missing".to_string(),
                }])
            }
        },
        (Verb::Draft, Ok(Value::String(s))) => Value::String(s),
        (Verb::Draft, _) => Value::String(raw.trim().to_string()),
        (_, Ok(other)) => other,
        (_, Err(v)) => return ValidationOutcome::Invalid(vec![v]),
    };
    validate_at(&step.schema, &value, field)
}

fn check(schema: &SchemaNode, value: &Value, path: &str, out: &mut Vec<Violation>) -> Option<TypedValue> {
    let fail = |out: &mut Vec<Violation>| -> Option<TypedValue> {
        out.push(Violation {
            path: path.to_string(),
            expected: schema.describe(),
            actual: describe_value(value),
        });
        None
    };

    match schema {
        SchemaNode::Text => match value {
            Value::String(s) => Some(TypedValue::Text(s.clone())),
            _ => fail(out),
        },
        SchemaNode::Money => match as_number(value) {
            Some(n) => Some(TypedValue::Money(n)),
            None => fail(out),
        },
        SchemaNode::Number => match as_number(value) {
            Some(n) => Some(TypedValue::Number(n)),
            None => fail(out),
        },
        SchemaNode::Bool => match value {
            Value::Bool(b) => Some(TypedValue::Bool(*b)),
            Value::String(s) => match parse_bool(s.trim()) {
                Some(b) => Some(TypedValue::Bool(b)),
                None => fail(out),
            },
            _ => fail(out),
        },
        SchemaNode::Enum { values } => match value {
            Value::String(s) if values.iter().any(|v| v == s) => Some(TypedValue::Enum(s.clone())),
            _ => fail(out),
        },
        SchemaNode::List { items } => match value {
            Value::Array(elements) => {
                let mut typed = Vec::with_capacity(elements.len());
                let before = out.len();
                for (i, element) in elements.iter().enumerate() {
                    if let Some(t) = check(items, element, &index_path(path, i), out) {
                        typed.push(t);
                    }
                }
                (out.len() == before).then_some(TypedValue::List(typed))
            }
            _ => fail(out),
        },
        SchemaNode::Object(obj) => match value {
            Value::Object(map) => {
                let mut typed = IndexMap::with_capacity(obj.fields.len());
                let before = out.len();
                for (name, node) in &obj.fields {
                    let child = field_path(path, name);
                    match map.get(name) {
                        Some(v) => {
                            if let Some(t) = check(node, v, &child, out) {
                                typed.insert(name.clone(), t);
                            }
                        }
                        None => out.push(Violation {
                            path: child,
                            expected: node.describe(),
                            actual: "missing".to_string(),
                        }),
                    }
                }
                (out.len() == before).then_some(TypedValue::Object(typed))
            }
            _ => fail(out),
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn field_path(parent: &str, name: &str) -> String {
    if parent == "$" {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn index_path(parent: &str, i: usize) -> String {
    format!("{}[{}]", parent, i)
}

/// Short description of an untyped value for violations.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.chars().count() > EXCERPT_LEN {
                let head: String = s.chars().take(EXCERPT_LEN).collect();
                format!("\"{}...\"", head)
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(a) => format!("array of {}", a.len()),
        Value::Object(_) => "object".to_string(),
    }
}

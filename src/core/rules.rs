//! AD-004: Rule expressions.
//!
//! `<field> OVER|UNDER|IS <literal>` atoms joined by a flat chain of `AND` or
//! `OR`, folded left to right. Mixing `AND` and `OR` in one rule is rejected.
//! Parsing yields an untyped `Expr`; compiling against the record shape yields
//! a `CompiledExpr` with typed operands, evaluated once per record.

use super::types::{SchemaNode, TypedRecord, TypedValue};
use crate::error::{CompileError, RuleEvaluationError};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Over,
    Under,
    Is,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Over => write!(f, "OVER"),
            Self::Under => write!(f, "UNDER"),
            Self::Is => write!(f, "IS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
}

/// Parsed rule with raw literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Comparison {
        field: String,
        op: CompareOp,
        literal: String,
    },
    Logical {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Literal checked against the field's declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Number(f64),
    Bool(bool),
    Text(String),
}

/// Rule tree ready for evaluation. Side-effect free and reentrant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum CompiledExpr {
    Comparison {
        /// Dotted field path as written
        field: String,
        op: CompareOp,
        operand: Operand,
    },
    Logical {
        op: LogicOp,
        left: Box<CompiledExpr>,
        right: Box<CompiledExpr>,
    },
}

/// Parse rule text into an untyped expression tree.
pub fn parse_expr(text: &str) -> Result<Expr, String> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err("empty condition".to_string());
    }

    let mut atoms: Vec<&[&str]> = Vec::new();
    let mut chain: Option<LogicOp> = None;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        let op = match token.to_ascii_uppercase().as_str() {
            "AND" => LogicOp::And,
            "OR" => LogicOp::Or,
            _ => continue,
        };
        if let Some(existing) = chain {
            if existing != op {
                return Err("AND and OR cannot be mixed in one rule".to_string());
            }
        }
        chain = Some(op);
        atoms.push(&tokens[start..i]);
        start = i + 1;
    }
    atoms.push(&tokens[start..]);

    let mut parsed = atoms.into_iter().map(parse_atom);
    let mut expr = parsed
        .next()
        .ok_or_else(|| "empty condition".to_string())??;
    for atom in parsed {
        expr = Expr::Logical {
            op: chain.unwrap_or(LogicOp::And),
            left: Box::new(expr),
            right: Box::new(atom?),
        };
    }
    Ok(expr)
}

/// Split on whitespace. A token opening with a quote runs to the matching
/// quote, so `AND`/`OR` inside a literal never split the rule.
fn tokenize(text: &str) -> Result<Vec<&str>, String> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(&text[s..i]);
                }
            }
            None if start.is_none() => {
                start = Some(i);
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
            }
            None => {}
        }
    }
    if let Some(q) = quote {
        return Err(format!("unterminated {} quote", q));
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    Ok(tokens)
}

fn parse_atom(tokens: &[&str]) -> Result<Expr, String> {
    match tokens {
        [] => Err("missing condition around AND/OR".to_string()),
        [field, op, literal @ ..] if !literal.is_empty() => {
            let op = match op.to_ascii_uppercase().as_str() {
                "OVER" => CompareOp::Over,
                "UNDER" => CompareOp::Under,
                "IS" => CompareOp::Is,
                other => return Err(format!("unknown operator '{}' (expected OVER, UNDER or IS)", other)),
            };
            let joined = literal.join(" ");
            let literal = strip_quotes(&joined);
            Ok(Expr::Comparison {
                field: field.to_string(),
                op,
                literal: literal.to_string(),
            })
        }
        _ => Err(format!(
            "'{}' is not of the form <field> OVER|UNDER|IS <value>",
            tokens.join(" ")
        )),
    }
}

fn strip_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|t| t.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Walk a dotted path through the record shape.
pub fn lookup_shape<'a>(
    shape: &'a IndexMap<String, Arc<SchemaNode>>,
    path: &str,
) -> Option<&'a Arc<SchemaNode>> {
    let mut parts = path.split('.');
    let mut node = shape.get(parts.next()?)?;
    for part in parts {
        match &**node {
            SchemaNode::Object(obj) => node = obj.field(part)?,
            _ => return None,
        }
    }
    Some(node)
}

/// Type-check a parsed expression against the fields available to rules.
/// Every failing atom is reported.
pub fn compile_expr(
    expr: &Expr,
    line: usize,
    shape: &IndexMap<String, Arc<SchemaNode>>,
) -> Result<CompiledExpr, Vec<CompileError>> {
    match expr {
        Expr::Comparison { field, op, literal } => {
            compile_comparison(field, *op, literal, line, shape).map_err(|e| vec![e])
        }
        Expr::Logical { op, left, right } => {
            match (compile_expr(left, line, shape), compile_expr(right, line, shape)) {
                (Ok(l), Ok(r)) => Ok(CompiledExpr::Logical {
                    op: *op,
                    left: Box::new(l),
                    right: Box::new(r),
                }),
                (l, r) => {
                    let mut errors = l.err().unwrap_or_default();
                    errors.extend(r.err().unwrap_or_default());
                    Err(errors)
                }
            }
        }
    }
}

fn compile_comparison(
    field: &str,
    op: CompareOp,
    literal: &str,
    line: usize,
    shape: &IndexMap<String, Arc<SchemaNode>>,
) -> Result<CompiledExpr, CompileError> {
    let node = lookup_shape(shape, field).ok_or_else(|| CompileError::UndeclaredField {
        line,
        field: field.to_string(),
    })?;

    let op_error = || CompileError::OperatorType {
        line,
        op: op.to_string(),
        field: field.to_string(),
        field_type: node.describe(),
    };
    let literal_error = || CompileError::LiteralType {
        line,
        field: field.to_string(),
        literal: literal.to_string(),
        field_type: node.describe(),
    };

    if op != CompareOp::Is && !node.is_numeric() {
        return Err(op_error());
    }

    let operand = match &**node {
        SchemaNode::Money | SchemaNode::Number => {
            Operand::Number(literal.parse::<f64>().map_err(|_| literal_error())?)
        }
        SchemaNode::Bool => Operand::Bool(parse_bool(literal).ok_or_else(literal_error)?),
        SchemaNode::Enum { values } => {
            if !values.iter().any(|v| v == literal) {
                return Err(literal_error());
            }
            Operand::Text(literal.to_string())
        }
        SchemaNode::Text => Operand::Text(literal.to_string()),
        SchemaNode::List { .. } | SchemaNode::Object(_) => return Err(op_error()),
    };

    Ok(CompiledExpr::Comparison {
        field: field.to_string(),
        op,
        operand,
    })
}

/// Boolean literal set shared with the validator.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

impl CompiledExpr {
    /// Evaluate against an assembled record. Logical nodes do not
    /// short-circuit: `true OR <missing field>` is still an error.
    pub fn evaluate(&self, rule: &str, record: &TypedRecord) -> Result<bool, RuleEvaluationError> {
        match self {
            Self::Comparison { field, op, operand } => {
                let error = |reason: String| RuleEvaluationError {
                    rule: rule.to_string(),
                    field: field.clone(),
                    reason,
                };
                let value = lookup_value(record, field).ok_or_else(|| error("field missing from record".to_string()))?;
                compare(value, *op, operand).ok_or_else(|| {
                    error(format!(
                        "cannot compare {} value with {}",
                        value.kind(),
                        operand_kind(operand)
                    ))
                })
            }
            Self::Logical { op, left, right } => {
                let l = left.evaluate(rule, record)?;
                let r = right.evaluate(rule, record)?;
                Ok(match op {
                    LogicOp::And => l && r,
                    LogicOp::Or => l || r,
                })
            }
        }
    }
}

/// Walk a dotted path through an assembled record.
pub(crate) fn lookup_value<'a>(record: &'a TypedRecord, path: &str) -> Option<&'a TypedValue> {
    let mut parts = path.split('.');
    let mut value = record.get(parts.next()?)?;
    for part in parts {
        match value {
            TypedValue::Object(map) => value = map.get(part)?,
            _ => return None,
        }
    }
    Some(value)
}

fn compare(value: &TypedValue, op: CompareOp, operand: &Operand) -> Option<bool> {
    match (op, operand) {
        (CompareOp::Over, Operand::Number(n)) => Some(value.as_f64()? > *n),
        (CompareOp::Under, Operand::Number(n)) => Some(value.as_f64()? < *n),
        (CompareOp::Is, Operand::Number(n)) => Some(value.as_f64()? == *n),
        (CompareOp::Is, Operand::Bool(b)) => match value {
            TypedValue::Bool(v) => Some(v == b),
            _ => None,
        },
        (CompareOp::Is, Operand::Text(t)) => match value {
            TypedValue::Text(v) | TypedValue::Enum(v) => Some(v == t),
            _ => None,
        },
        _ => None,
    }
}

fn operand_kind(operand: &Operand) -> &'static str {
    match operand {
        Operand::Number(_) => "a number",
        Operand::Bool(_) => "a yes/no literal",
        Operand::Text(_) => "a text literal",
    }
}

//! Error taxonomy.
//!
//! Declaration errors (`ParseError`, `SchemaError`, `CompileError`) are fatal
//! and surface before any inference call. Runtime failures (`StepFailure`,
//! `RuleEvaluationError`) are per-record and end up in the audit trail.

use crate::core::types::{ResourceKind, Violation};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed declaration text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: expected {expected}, found {found}")]
pub struct ParseError {
    pub line: usize,
    pub expected: String,
    pub found: String,
}

impl ParseError {
    pub fn new(line: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            line,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Definition graph problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("definition '{definition}' field '{field}' references unknown definition '{reference}'")]
    Unresolved {
        definition: String,
        field: String,
        reference: String,
    },
    #[error("cyclic definition: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("definition '{0}' declared more than once")]
    DuplicateDefinition(String),
}

/// Semantic problem found while compiling a resolved program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: {verb} references unknown definition '{name}'")]
    UnknownDefinition {
        line: usize,
        verb: String,
        name: String,
    },
    #[error("line {line}: CLASSIFY {name} needs a definition with a single enum field, found {found}")]
    NotClassifiable {
        line: usize,
        name: String,
        found: String,
    },
    #[error("line {line}: field '{field}' is already produced by inference step {previous}")]
    DuplicateOutputField {
        line: usize,
        field: String,
        previous: usize,
    },
    #[error("line {line}: reference to undeclared field '{field}'")]
    UndeclaredField { line: usize, field: String },
    #[error("line {line}: {op} cannot be applied to '{field}' ({field_type})")]
    OperatorType {
        line: usize,
        op: String,
        field: String,
        field_type: String,
    },
    #[error("line {line}: literal '{literal}' is not valid for '{field}' ({field_type})")]
    LiteralType {
        line: usize,
        field: String,
        literal: String,
        field_type: String,
    },
    #[error("line {line}: invalid rule: {message}")]
    RuleSyntax { line: usize, message: String },
    #[error("line {line}: {kind} resource '{name}' not found")]
    MissingResource {
        line: usize,
        kind: ResourceKind,
        name: String,
    },
    #[error("line {line}: {kind} resource '{name}' is malformed: {message}")]
    MalformedResource {
        line: usize,
        kind: ResourceKind,
        name: String,
        message: String,
    },
    #[error("line {line}: pipeline declares more than one {what}")]
    DuplicateStep { line: usize, what: String },
    #[error("pipeline declares no inference step")]
    NoInferenceStep,
}

/// Invalid use of the programmatic builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("'{0}' is not a valid name")]
    InvalidName(String),
    #[error("schema '{schema}' declares field '{field}' more than once")]
    DuplicateField { schema: String, field: String },
    #[error("field '{field}': {message}")]
    InvalidValues { field: String, message: String },
    #[error("unknown type '{found}' for field '{field}'")]
    UnknownType { field: String, found: String },
    #[error("malformed schema JSON: {0}")]
    Json(String),
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("definition '{0}' is used with two different shapes")]
    ConflictingDefinition(String),
    #[error("extract() and classify() are mutually exclusive")]
    ExclusiveSteps,
    #[error("invalid rule '{rule}': {message}")]
    Rule { rule: String, message: String },
    #[error("invalid setting: expected {0}")]
    Setting(String),
}

/// Collected compile diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<CompileError>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} compile error(s)", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n  {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

/// Failure reported by the inference collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Why a (record, step) pair ended without a valid value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("response failed validation ({} violation(s))", .0.len())]
    Validation(Vec<Violation>),
    #[error("{0}")]
    Transport(TransportError),
    #[error("inference call timed out after {0} ms")]
    Timeout(u64),
}

/// A rule could not be evaluated against a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("rule '{rule}': {reason}")]
pub struct RuleEvaluationError {
    pub rule: String,
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} resource '{name}' not found")]
pub struct ResourceError {
    pub kind: ResourceKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("source error: {0}")]
pub struct SourceError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Compile(#[from] Diagnostics),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("{kind} resource '{name}' is malformed: {message}")]
    MalformedResource {
        kind: ResourceKind,
        name: String,
        message: String,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("audit log error: {0}")]
    Audit(String),
}

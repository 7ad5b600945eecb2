//! aidsl: declarative data-extraction workflows.
//!
//! A declaration names typed record shapes, a pipeline of inference steps and
//! deterministic flag rules. It is parsed, resolved and compiled into an
//! immutable `ExecutionPlan` before any inference call is made; the
//! orchestrator then runs that plan over a record source with validation,
//! one retry per step, rule evaluation and a per-attempt audit trail.

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod transport;

pub use crate::config::RuntimeConfig;
pub use crate::core::executor::Orchestrator;
pub use crate::core::io::{RecordSink, RecordSource, ResourceLoader};
pub use crate::core::types::{ExecutionPlan, InputUnit, RecordResult, RunSummary};
pub use crate::error::Error;

pub use crate::core::builder::{Pipeline, Schema, SchemaBuilder};

use crate::core::types::Program;
use crate::core::{compiler, parser, resolver};

/// Parse, resolve and compile a declaration in one call.
pub fn compile_declaration(text: &str, loader: &dyn ResourceLoader) -> Result<ExecutionPlan, Error> {
    let program = parser::parse(text)?;
    compile_program(&program, loader)
}

/// Resolve and compile an already-built program.
pub fn compile_program(program: &Program, loader: &dyn ResourceLoader) -> Result<ExecutionPlan, Error> {
    let schemas = resolver::resolve(&program.definitions)?;
    let plan = compiler::compile(program, &schemas, loader)?;
    Ok(plan)
}

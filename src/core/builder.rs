//! AD-017: Programmatic builders.
//!
//! `SchemaBuilder` and `Pipeline` assemble the same `Program` the parser
//! produces, for callers that build declarations in code. Builder methods
//! chain by value; the first misuse is remembered and returned by the
//! terminal call (`build`, `to_program`, `compile`, `run_one`).
//!
//! Builder programs carry no source text, so constructs are numbered in
//! emission order: definitions and their fields first, then pipeline steps.

use super::executor::Orchestrator;
use super::io::ResourceLoader;
use super::params;
use super::parser::is_identifier;
use super::rules::parse_expr;
use super::types::*;
use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::error::{BuildError, Error};
use crate::transport::InferenceClient;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Output locator used when a pipeline names none.
pub const DEFAULT_OUTPUT: &str = "output.json";

// ============================================================================
// Schemas
// ============================================================================

/// A built definition plus every definition it references, transitively.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    definition: Definition,
    /// Referenced definitions, dependencies before dependents
    dependencies: Vec<Definition>,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn dependencies(&self) -> &[Definition] {
        &self.dependencies
    }

    /// Build from JSON text:
    /// `{"name": "claim", "fields": {"claimant": "text", "category": ["auto", "home"]}}`.
    ///
    /// Type strings are `text`, `money`, `number` and `bool` (any case); a
    /// list of strings declares an enum. Field order follows the document.
    pub fn from_json(text: &str) -> Result<Schema, BuildError> {
        let doc: JsonSchema = serde_json::from_str(text).map_err(|e| BuildError::Json(e.to_string()))?;
        let mut builder = SchemaBuilder::new(&doc.name);
        for (field, kind) in doc.fields {
            builder = match kind {
                JsonField::Values(values) => builder.one_of(&field, values),
                JsonField::Type(t) => match t.to_ascii_lowercase().as_str() {
                    "text" => builder.text(&field),
                    "money" => builder.money(&field),
                    "number" => builder.number(&field),
                    "bool" => builder.bool(&field),
                    _ => return Err(BuildError::UnknownType { field, found: t }),
                },
            };
        }
        builder.build()
    }

    /// Build from a JSON file; see [`Schema::from_json`].
    pub fn from_json_file(path: &Path) -> Result<Schema, BuildError> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }
}

#[derive(Deserialize)]
struct JsonSchema {
    name: String,
    fields: IndexMap<String, JsonField>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonField {
    Type(String),
    Values(Vec<String>),
}

/// Fluent builder for one definition.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldDef>,
    dependencies: Vec<Definition>,
    error: Option<BuildError>,
}

impl SchemaBuilder {
    pub fn new(name: &str) -> Self {
        let error = (!is_identifier(name)).then(|| BuildError::InvalidName(name.to_string()));
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            dependencies: Vec::new(),
            error,
        }
    }

    pub fn text(self, name: &str) -> Self {
        self.field(name, FieldType::Text)
    }

    pub fn money(self, name: &str) -> Self {
        self.field(name, FieldType::Money)
    }

    pub fn number(self, name: &str) -> Self {
        self.field(name, FieldType::Number)
    }

    pub fn bool(self, name: &str) -> Self {
        self.field(name, FieldType::Bool)
    }

    /// Enum field; values must be non-empty and unique.
    pub fn one_of<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match checked_values(name, values) {
            Ok(values) => self.field(name, FieldType::Enum(values)),
            Err(e) => {
                self.fail(e);
                self
            }
        }
    }

    /// List of records of another built schema.
    pub fn list_of(mut self, name: &str, schema: &Schema) -> Self {
        self.depend_on(schema);
        self.field(name, FieldType::ListOf(schema.name().to_string()))
    }

    /// Nested record of another built schema.
    pub fn object(mut self, name: &str, schema: &Schema) -> Self {
        self.depend_on(schema);
        self.field(name, FieldType::Object(schema.name().to_string()))
    }

    pub fn build(self) -> Result<Schema, BuildError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Schema {
            definition: Definition {
                name: self.name,
                fields: self.fields,
                line: 0,
            },
            dependencies: self.dependencies,
        })
    }

    fn field(mut self, name: &str, field_type: FieldType) -> Self {
        if !is_identifier(name) {
            self.fail(BuildError::InvalidName(name.to_string()));
        } else if self.fields.iter().any(|f| f.name == name) {
            self.fail(BuildError::DuplicateField {
                schema: self.name.clone(),
                field: name.to_string(),
            });
        }
        self.fields.push(FieldDef {
            name: name.to_string(),
            field_type,
            line: 0,
        });
        self
    }

    fn depend_on(&mut self, schema: &Schema) {
        let incoming = schema.dependencies.iter().chain(std::iter::once(&schema.definition));
        for definition in incoming {
            if let Err(e) = add_definition(&mut self.dependencies, definition) {
                self.fail(e);
            }
        }
    }

    fn fail(&mut self, e: BuildError) {
        self.error.get_or_insert(e);
    }
}

/// Add a definition unless an identical one is present.
fn add_definition(into: &mut Vec<Definition>, definition: &Definition) -> Result<(), BuildError> {
    match into.iter().find(|d| d.name == definition.name) {
        Some(existing) if existing.fields == definition.fields => Ok(()),
        Some(_) => Err(BuildError::ConflictingDefinition(definition.name.clone())),
        None => {
            into.push(definition.clone());
            Ok(())
        }
    }
}

fn checked_values<I, S>(field: &str, values: I) -> Result<Vec<String>, BuildError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let invalid = |message: String| BuildError::InvalidValues {
        field: field.to_string(),
        message,
    };
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let value: String = value.into();
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid("empty value".to_string()));
        }
        if out.iter().any(|v| v == value) {
            return Err(invalid(format!("duplicate '{}'", value)));
        }
        out.push(value.to_string());
    }
    if out.is_empty() {
        return Err(invalid("no values".to_string()));
    }
    Ok(out)
}

// ============================================================================
// Pipelines
// ============================================================================

/// The structured step of a pipeline. Extraction and classification exclude each other.
#[derive(Debug, Clone)]
enum Primary {
    Extract(Schema),
    Classify { field: String, categories: Vec<String> },
}

/// Fluent builder for a whole declaration.
///
/// `prompt` and `examples` attach to the extraction or classification step,
/// or to the draft step when the pipeline only drafts.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    source: Option<String>,
    output: Option<String>,
    primary: Option<Primary>,
    draft: Option<String>,
    prompt: Option<String>,
    examples: Option<String>,
    flags: Vec<String>,
    settings: Vec<ParamOverride>,
    error: Option<BuildError>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, locator: &str) -> Self {
        self.source = Some(locator.to_string());
        self
    }

    pub fn extract(mut self, schema: &Schema) -> Self {
        if matches!(self.primary, Some(Primary::Classify { .. })) {
            self.fail(BuildError::ExclusiveSteps);
        }
        self.primary = Some(Primary::Extract(schema.clone()));
        self
    }

    /// Classify into inline categories, stored under `field`.
    pub fn classify<I, S>(mut self, field: &str, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if matches!(self.primary, Some(Primary::Extract(_))) {
            self.fail(BuildError::ExclusiveSteps);
        }
        if !is_identifier(field) {
            self.fail(BuildError::InvalidName(field.to_string()));
        }
        match checked_values(field, categories) {
            Ok(categories) => {
                self.primary = Some(Primary::Classify {
                    field: field.to_string(),
                    categories,
                })
            }
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn draft(mut self, field: &str) -> Self {
        if !is_identifier(field) {
            self.fail(BuildError::InvalidName(field.to_string()));
        }
        self.draft = Some(field.to_string());
        self
    }

    pub fn prompt(mut self, name: &str) -> Self {
        self.prompt = Some(name.to_string());
        self
    }

    pub fn examples(mut self, name: &str) -> Self {
        self.examples = Some(name.to_string());
        self
    }

    /// Add a flag rule. Syntax is checked now; field types at compile time.
    pub fn flag(mut self, rule: &str) -> Self {
        if let Err(message) = parse_expr(rule) {
            self.fail(BuildError::Rule {
                rule: rule.to_string(),
                message,
            });
        }
        self.flags.push(rule.trim().to_string());
        self
    }

    /// Global inference setting, same layer as a leading `SET` block.
    pub fn set(mut self, o: ParamOverride) -> Self {
        if let Err(expected) = params::check(&o) {
            self.fail(BuildError::Setting(expected.to_string()));
        }
        self.settings.push(o);
        self
    }

    pub fn output(mut self, locator: &str) -> Self {
        self.output = Some(locator.to_string());
        self
    }

    /// The program this pipeline describes.
    pub fn to_program(&self) -> Result<Program, BuildError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let mut definitions = Vec::new();
        if let Some(Primary::Extract(schema)) = &self.primary {
            for definition in schema.dependencies.iter().chain(std::iter::once(&schema.definition)) {
                add_definition(&mut definitions, definition)?;
            }
        }

        let mut line = 0;
        let mut next_line = || {
            line += 1;
            line
        };
        for definition in &mut definitions {
            definition.line = next_line();
            for field in &mut definition.fields {
                field.line = next_line();
            }
        }

        let mut pipeline = Vec::new();
        if let Some(locator) = &self.source {
            pipeline.push(PipelineStep::Source {
                locator: locator.clone(),
                line: next_line(),
            });
        }

        let mut inference = Vec::new();
        match &self.primary {
            Some(Primary::Extract(schema)) => inference.push((Verb::Extract, schema.name().to_string(), None)),
            Some(Primary::Classify { field, categories }) => {
                inference.push((Verb::Classify, field.clone(), Some(categories.clone())))
            }
            None => {}
        }
        if let Some(field) = &self.draft {
            inference.push((Verb::Draft, field.clone(), None));
        }
        for (i, (verb, target, categories)) in inference.into_iter().enumerate() {
            let first = i == 0;
            pipeline.push(PipelineStep::Inference(InferenceStep {
                verb,
                target,
                categories,
                prompt: self.prompt.clone().filter(|_| first),
                examples: self.examples.clone().filter(|_| first),
                line: next_line(),
            }));
        }

        for rule in &self.flags {
            pipeline.push(PipelineStep::Rule {
                expression: rule.clone(),
                line: next_line(),
            });
        }
        pipeline.push(PipelineStep::Output {
            locator: self.output.clone().unwrap_or_else(|| DEFAULT_OUTPUT.to_string()),
            line: next_line(),
        });

        Ok(Program {
            definitions,
            settings: self.settings.clone(),
            pipeline,
        })
    }

    /// Resolve and compile into an execution plan.
    pub fn compile(&self, loader: &dyn ResourceLoader) -> Result<ExecutionPlan, Error> {
        let program = self.to_program()?;
        crate::compile_program(&program, loader)
    }

    /// Compile and process a single unit with default runtime settings.
    pub async fn run_one(
        &self,
        input: InputUnit,
        client: Arc<dyn InferenceClient>,
        loader: &dyn ResourceLoader,
        audit: &dyn AuditLog,
    ) -> Result<RecordResult, Error> {
        let plan = self.compile(loader)?;
        let orchestrator = Orchestrator::new(plan, client, loader, RuntimeConfig::default())?;
        orchestrator.run_one(input, audit).await
    }

    fn fail(&mut self, e: BuildError) {
        self.error.get_or_insert(e);
    }
}

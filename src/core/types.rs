//! AD-001: All types of the declaration language, the compiled plan, and the run.
//!
//! Parsed declarations (`Program`), the compiled `ExecutionPlan`, typed record
//! values, and the per-attempt audit trail. Plan and audit types derive
//! Serialize so they can be fingerprinted and written as JSON lines.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Parsed declaration
// ============================================================================

/// A parsed declaration. Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Structural definitions in declaration order
    pub definitions: Vec<Definition>,

    /// Global `SET` block (lines before the first pipeline step)
    pub settings: Vec<ParamOverride>,

    /// Pipeline steps in declaration order
    pub pipeline: Vec<PipelineStep>,
}

impl Program {
    /// Look up a definition by name.
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }
}

/// A named record shape (`DEFINE name:`).
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// 1-based line of the header
    pub line: usize,
}

/// One field line inside a definition block.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub line: usize,
}

/// Declared field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Money,
    Number,
    Bool,
    /// Ordered, non-empty, unique literal values
    Enum(Vec<String>),
    /// List of records of the named definition
    ListOf(String),
    /// Nested record of the named definition
    Object(String),
}

impl FieldType {
    /// Name of the definition this type refers to, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::ListOf(r) | Self::Object(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "TEXT"),
            Self::Money => write!(f, "MONEY"),
            Self::Number => write!(f, "NUMBER"),
            Self::Bool => write!(f, "YES/NO"),
            Self::Enum(values) => write!(f, "ONE OF [{}]", values.join(", ")),
            Self::ListOf(r) => write!(f, "LIST OF {}", r),
            Self::Object(r) => write!(f, "{}", r),
        }
    }
}

/// Inference verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Extract,
    Classify,
    Draft,
}

impl Verb {
    /// Extraction and classification must be reproducible; drafting is generative.
    pub fn is_deterministic(self) -> bool {
        matches!(self, Self::Extract | Self::Classify)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "EXTRACT"),
            Self::Classify => write!(f, "CLASSIFY"),
            Self::Draft => write!(f, "DRAFT"),
        }
    }
}

/// An inference-driving pipeline step as written.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceStep {
    pub verb: Verb,
    /// Definition name (EXTRACT, CLASSIFY <definition>) or output field (CLASSIFY ... INTO, DRAFT)
    pub target: String,
    /// Inline categories of `CLASSIFY <field> INTO [...]`
    pub categories: Option<Vec<String>>,
    /// `WITH` / `PROMPT` resource name
    pub prompt: Option<String>,
    /// `USE` resource name
    pub examples: Option<String>,
    pub line: usize,
}

/// One pipeline construct. Order is significant.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStep {
    Source { locator: String, line: usize },
    Inference(InferenceStep),
    Rule { expression: String, line: usize },
    Output { locator: String, line: usize },
    Set { overrides: Vec<ParamOverride>, line: usize },
}

impl PipelineStep {
    pub fn line(&self) -> usize {
        match self {
            Self::Source { line, .. }
            | Self::Rule { line, .. }
            | Self::Output { line, .. }
            | Self::Set { line, .. } => *line,
            Self::Inference(step) => step.line,
        }
    }
}

/// A single `SET` assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param", content = "value", rename_all = "snake_case")]
pub enum ParamOverride {
    Model(String),
    Temperature(f64),
    TopP(f64),
    Seed(u64),
    MaxTokens(u32),
    Header(String, String),
}

// ============================================================================
// Structural schema
// ============================================================================

/// Fully resolved shape used to validate responses. No unresolved references.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaNode {
    Text,
    Money,
    Number,
    Bool,
    Enum { values: Vec<String> },
    List { items: Arc<SchemaNode> },
    Object(ObjectSchema),
}

/// Object node: the definition it came from and its fields in declared order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: Vec<(String, Arc<SchemaNode>)>,
}

impl ObjectSchema {
    pub fn field(&self, name: &str) -> Option<&Arc<SchemaNode>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

impl SchemaNode {
    /// Human-readable type name used in violations.
    pub fn describe(&self) -> String {
        match self {
            Self::Text => "text".to_string(),
            Self::Money => "money".to_string(),
            Self::Number => "number".to_string(),
            Self::Bool => "yes/no".to_string(),
            Self::Enum { values } => format!("one of [{}]", values.join(", ")),
            Self::List { items } => format!("list of {}", items.describe()),
            Self::Object(obj) => format!("object {}", obj.name),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Money | Self::Number)
    }

    /// JSON-schema rendering handed to the inference client.
    pub fn to_json_schema(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Text => json!({"type": "string"}),
            Self::Money | Self::Number => json!({"type": "number"}),
            Self::Bool => json!({"type": "boolean"}),
            Self::Enum { values } => json!({"type": "string", "enum": values}),
            Self::List { items } => json!({"type": "array", "items": items.to_json_schema()}),
            Self::Object(obj) => {
                let mut properties = serde_json::Map::new();
                for (name, node) in &obj.fields {
                    properties.insert(name.clone(), node.to_json_schema());
                }
                let required: Vec<&str> = obj.fields.iter().map(|(n, _)| n.as_str()).collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                })
            }
        }
    }
}

// ============================================================================
// Typed values
// ============================================================================

/// A value that conforms to a `SchemaNode`. Mirrors its shape one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Text(String),
    Money(f64),
    Number(f64),
    Bool(bool),
    Enum(String),
    List(Vec<TypedValue>),
    Object(IndexMap<String, TypedValue>),
}

impl TypedValue {
    /// Short description for rule errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Money(_) => "money",
            Self::Number(_) => "number",
            Self::Bool(_) => "yes/no",
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Money(n) | Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Plain rendering used when substituting `{field}` placeholders.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) | Self::Enum(s) => s.clone(),
            Self::Money(n) | Self::Number(n) => n.to_string(),
            Self::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// The record assembled across the inference steps of one input.
pub type TypedRecord = IndexMap<String, TypedValue>;

// ============================================================================
// Execution plan
// ============================================================================

/// Finalized inference parameters for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    #[serde(default)]
    pub model: Option<String>,
    pub temperature: f64,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

/// Kind of auxiliary text resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Prompt,
    Examples,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Examples => write!(f, "examples"),
        }
    }
}

/// A resource reference. Content is fetched by a `ResourceLoader`, never stored in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
}

/// How a step's validated response lands in the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "field", rename_all = "snake_case")]
pub enum StepOutput {
    /// Object response; every declared field is merged into the record
    Fields,
    /// Single value stored under this field name
    Field(String),
}

/// One compiled inference step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStep {
    /// Position among inference steps (0-based)
    pub index: usize,
    pub verb: Verb,
    pub target: String,
    pub schema: Arc<SchemaNode>,
    pub output: StepOutput,
    /// Generated instruction text (deterministic)
    pub instructions: String,
    pub params: InferenceParams,
    pub prompt: Option<ResourceHandle>,
    pub examples: Option<ResourceHandle>,
}

/// A rule whose field references and literals were checked against the record shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledRule {
    /// Expression text as declared (used as the flag reason)
    pub text: String,
    pub expr: crate::core::rules::CompiledExpr,
}

/// Compiled, immutable plan. Shared read-only across concurrent record pipelines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub source: Option<String>,
    pub steps: Vec<CompiledStep>,
    pub rules: Vec<CompiledRule>,
    pub output: Option<String>,
    /// Field name → shape of every field the steps produce, in production order
    pub record_shape: IndexMap<String, Arc<SchemaNode>>,
}

impl ExecutionPlan {
    /// BLAKE3 fingerprint of the canonical JSON form.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        crate::audit::hasher::hash_string(&json)
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// One raw input unit yielded by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputUnit {
    Text(String),
    Fields(IndexMap<String, String>),
}

impl InputUnit {
    /// Text handed to the inference client. Key/value units become `key: value` lines.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Fields(map) => map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A field-level conformance problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted/indexed path (`items[2].price`); `$` for the response itself
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, got {}", self.path, self.expected, self.actual)
    }
}

/// Result of validating one response.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(TypedValue),
    Invalid(Vec<Violation>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// What happened on one inference attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Valid,
    Invalid { violations: Vec<Violation> },
    Transport { message: String },
    TimedOut { after_ms: u64 },
}

/// Where an attempt leaves the (record, step) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Final, accepted
    Valid,
    /// Not accepted; the identical request is issued again
    Retry,
    /// Not accepted; retry budget exhausted
    Terminal,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::Retry => write!(f, "RETRY"),
            Self::Terminal => write!(f, "TERMINAL"),
        }
    }
}

/// One immutable audit record per inference attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub ts: String,
    pub run_id: String,
    pub record_id: u64,
    pub step: usize,
    pub verb: Verb,
    /// 1-based
    pub attempt: u32,
    /// `blake3:` hash of the rendered input
    pub input_ref: String,
    pub raw_response: Option<String>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub disposition: Disposition,
    pub output: Option<TypedValue>,
    pub failure: Option<String>,
}

/// Final state of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Failed { step: usize, reason: String },
}

/// What the sink receives for one input unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub record_id: u64,
    pub input_ref: String,
    #[serde(flatten)]
    pub status: RecordStatus,
    pub record: TypedRecord,
    pub flagged: bool,
    pub flag_reasons: Vec<String>,
    pub rule_errors: Vec<crate::error::RuleEvaluationError>,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub records: u64,
    pub completed: u64,
    pub failed: u64,
    pub flagged: u64,
    pub rule_errors: u64,
    /// Units the source failed to produce
    pub source_errors: u64,
    pub sink_errors: u64,
    /// Cancellation stopped admission before the source was exhausted
    pub cancelled: bool,
}

// ============================================================================
// Tests
// ============================================================================

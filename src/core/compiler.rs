//! AD-007: Plan compilation.
//!
//! Walks the pipeline in declaration order and turns a resolved program into
//! an `ExecutionPlan`:
//! - one structural schema per inference step (classification: a bare enum)
//! - layered inference parameters (see `core::params`)
//! - resource handles checked through the loader, never stored as content
//! - prompt placeholders limited to fields produced by earlier steps
//! - rules type-checked against every field the steps produce
//!
//! All problems are collected; nothing is returned until the plan is clean.

use super::params;
use super::prompt;
use super::resolver::ResolvedSchemaMap;
use super::rules;
use super::types::*;
use crate::core::io::ResourceLoader;
use crate::error::{CompileError, Diagnostics};
use indexmap::IndexMap;
use std::sync::Arc;

/// Accumulated compile state.
struct Compiler<'a> {
    program: &'a Program,
    schemas: &'a ResolvedSchemaMap,
    loader: &'a dyn ResourceLoader,
    errors: Vec<CompileError>,
    source: Option<String>,
    output: Option<String>,
    local_sets: Vec<&'a [ParamOverride]>,
    steps: Vec<CompiledStep>,
    record_shape: IndexMap<String, Arc<SchemaNode>>,
    /// Field name → index of the step that produces it
    producers: IndexMap<String, usize>,
}

/// Compile a parsed program against its resolved schemas.
pub fn compile(
    program: &Program,
    schemas: &ResolvedSchemaMap,
    loader: &dyn ResourceLoader,
) -> Result<ExecutionPlan, Diagnostics> {
    let mut c = Compiler {
        program,
        schemas,
        loader,
        errors: Vec::new(),
        source: None,
        output: None,
        local_sets: Vec::new(),
        steps: Vec::new(),
        record_shape: IndexMap::new(),
        producers: IndexMap::new(),
    };

    let mut pending_rules: Vec<(&str, usize)> = Vec::new();
    for step in &program.pipeline {
        match step {
            PipelineStep::Source { locator, line } => {
                if c.source.is_some() {
                    c.errors.push(CompileError::DuplicateStep {
                        line: *line,
                        what: "FROM".to_string(),
                    });
                } else {
                    c.source = Some(locator.clone());
                }
            }
            PipelineStep::Output { locator, line } => {
                if c.output.is_some() {
                    c.errors.push(CompileError::DuplicateStep {
                        line: *line,
                        what: "OUTPUT".to_string(),
                    });
                } else {
                    c.output = Some(locator.clone());
                }
            }
            PipelineStep::Set { overrides, .. } => c.local_sets.push(overrides),
            PipelineStep::Rule { expression, line } => {
                pending_rules.push((expression.as_str(), *line))
            }
            PipelineStep::Inference(step) => c.inference(step),
        }
    }

    if !program
        .pipeline
        .iter()
        .any(|s| matches!(s, PipelineStep::Inference(_)))
    {
        c.errors.push(CompileError::NoInferenceStep);
    }

    let mut compiled_rules = Vec::with_capacity(pending_rules.len());
    for (text, line) in pending_rules {
        let expr = match rules::parse_expr(text) {
            Ok(e) => e,
            Err(message) => {
                c.errors.push(CompileError::RuleSyntax { line, message });
                continue;
            }
        };
        match rules::compile_expr(&expr, line, &c.record_shape) {
            Ok(expr) => compiled_rules.push(CompiledRule {
                text: text.to_string(),
                expr,
            }),
            Err(errs) => c.errors.extend(errs),
        }
    }

    if !c.errors.is_empty() {
        return Err(Diagnostics(c.errors));
    }

    Ok(ExecutionPlan {
        source: c.source,
        steps: c.steps,
        rules: compiled_rules,
        output: c.output,
        record_shape: c.record_shape,
    })
}

impl Compiler<'_> {
    fn inference(&mut self, step: &InferenceStep) {
        let Some((schema, output, produced)) = self.step_shape(step) else {
            return;
        };

        let index = self.steps.len();
        let mut clash = false;
        for (field, _) in &produced {
            if let Some(previous) = self.producers.get(field) {
                self.errors.push(CompileError::DuplicateOutputField {
                    line: step.line,
                    field: field.clone(),
                    previous: *previous,
                });
                clash = true;
            }
        }

        let prompt = step
            .prompt
            .as_ref()
            .and_then(|name| self.check_prompt(step.line, name));
        let examples = step
            .examples
            .as_ref()
            .and_then(|name| self.check_examples(step.line, name));

        let instruction_target = match &output {
            StepOutput::Field(f) => f.as_str(),
            StepOutput::Fields => step.target.as_str(),
        };
        let instructions = prompt::instructions(step.verb, instruction_target, &schema);
        let params = params::merge(step.verb, &self.program.settings, &self.local_sets);

        if !clash {
            for (field, node) in produced {
                self.producers.insert(field.clone(), index);
                self.record_shape.insert(field, node);
            }
        }

        self.steps.push(CompiledStep {
            index,
            verb: step.verb,
            target: step.target.clone(),
            schema,
            output,
            instructions,
            params,
            prompt,
            examples,
        });
    }

    /// Schema, output mode, and produced fields of one step.
    #[allow(clippy::type_complexity)]
    fn step_shape(
        &mut self,
        step: &InferenceStep,
    ) -> Option<(Arc<SchemaNode>, StepOutput, Vec<(String, Arc<SchemaNode>)>)> {
        match (step.verb, &step.categories) {
            (Verb::Classify, Some(categories)) => {
                let node = Arc::new(SchemaNode::Enum {
                    values: categories.clone(),
                });
                Some((
                    Arc::clone(&node),
                    StepOutput::Field(step.target.clone()),
                    vec![(step.target.clone(), node)],
                ))
            }
            (Verb::Draft, _) => {
                let node = Arc::new(SchemaNode::Text);
                Some((
                    Arc::clone(&node),
                    StepOutput::Field(step.target.clone()),
                    vec![(step.target.clone(), node)],
                ))
            }
            (verb, _) => {
                let Some(schema) = self.schemas.get(&step.target) else {
                    self.errors.push(CompileError::UnknownDefinition {
                        line: step.line,
                        verb: verb.to_string(),
                        name: step.target.clone(),
                    });
                    return None;
                };
                let SchemaNode::Object(obj) = &**schema else {
                    return None;
                };
                if verb == Verb::Extract {
                    return Some((Arc::clone(schema), StepOutput::Fields, obj.fields.clone()));
                }
                match obj.fields.as_slice() {
                    [(name, node)] if matches!(**node, SchemaNode::Enum { .. }) => Some((
                        Arc::clone(node),
                        StepOutput::Field(name.clone()),
                        vec![(name.clone(), Arc::clone(node))],
                    )),
                    fields => {
                        let found = match fields {
                            [] => "no fields".to_string(),
                            [(name, node)] => format!("field '{}' ({})", name, node.describe()),
                            many => format!("{} fields", many.len()),
                        };
                        self.errors.push(CompileError::NotClassifiable {
                            line: step.line,
                            name: step.target.clone(),
                            found,
                        });
                        None
                    }
                }
            }
        }
    }

    fn check_prompt(&mut self, line: usize, name: &str) -> Option<ResourceHandle> {
        let text = match self.loader.load(ResourceKind::Prompt, name) {
            Ok(t) => t,
            Err(_) => {
                self.errors.push(CompileError::MissingResource {
                    line,
                    kind: ResourceKind::Prompt,
                    name: name.to_string(),
                });
                return None;
            }
        };
        for field in prompt::template_fields(&text) {
            if rules::lookup_shape(&self.record_shape, &field).is_none() {
                self.errors.push(CompileError::UndeclaredField { line, field });
            }
        }
        Some(ResourceHandle {
            kind: ResourceKind::Prompt,
            name: name.to_string(),
        })
    }

    fn check_examples(&mut self, line: usize, name: &str) -> Option<ResourceHandle> {
        let text = match self.loader.load(ResourceKind::Examples, name) {
            Ok(t) => t,
            Err(_) => {
                self.errors.push(CompileError::MissingResource {
                    line,
                    kind: ResourceKind::Examples,
                    name: name.to_string(),
                });
                return None;
            }
        };
        if let Err(message) = prompt::parse_examples(&text) {
            self.errors.push(CompileError::MalformedResource {
                line,
                kind: ResourceKind::Examples,
                name: name.to_string(),
                message,
            });
            return None;
        }
        Some(ResourceHandle {
            kind: ResourceKind::Examples,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::MemoryResources;
    use crate::core::parser::parse;
    use crate::core::resolver::resolve;

    const EXPENSE: &str = "\
DEFINE expense:
  merchant    TEXT
  amount      MONEY
  category    ONE OF [travel, meals, equipment, software, office]

FROM receipts.csv
EXTRACT expense
FLAG WHEN amount OVER 500
FLAG WHEN category IS travel AND amount OVER 200
OUTPUT expenses.json
";

    fn compile_with(text: &str, loader: &MemoryResources) -> Result<ExecutionPlan, Diagnostics> {
        let program = parse(text).unwrap();
        let schemas = resolve(&program.definitions).unwrap();
        compile(&program, &schemas, loader)
    }

    fn compile_text(text: &str) -> Result<ExecutionPlan, Diagnostics> {
        compile_with(text, &MemoryResources::new())
    }

    fn errors(text: &str) -> Vec<CompileError> {
        compile_text(text).unwrap_err().0
    }

    #[test]
    fn test_ad007_compile_expense() {
        let plan = compile_text(EXPENSE).unwrap();
        assert_eq!(plan.source.as_deref(), Some("receipts.csv"));
        assert_eq!(plan.output.as_deref(), Some("expenses.json"));
        assert_eq!(plan.steps.len(), 1);
        let step = &plan.steps[0];
        assert_eq!(step.verb, Verb::Extract);
        assert_eq!(step.output, StepOutput::Fields);
        assert_eq!(step.params.temperature, 0.0);
        assert_eq!(step.params.seed, Some(params::DEFAULT_SEED));
        assert!(step.instructions.contains("- amount: numeric amount"));
        assert_eq!(plan.rules.len(), 2);
        assert_eq!(plan.rules[1].text, "category IS travel AND amount OVER 200");
        let fields: Vec<&str> = plan.record_shape.keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["merchant", "amount", "category"]);
    }

    #[test]
    fn test_ad007_compile_is_idempotent() {
        let program = parse(EXPENSE).unwrap();
        let schemas = resolve(&program.definitions).unwrap();
        let loader = MemoryResources::new();
        let a = compile(&program, &schemas, &loader).unwrap();
        let b = compile(&program, &schemas, &loader).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("blake3:"));
    }

    #[test]
    fn test_ad007_fingerprint_tracks_changes() {
        let a = compile_text(EXPENSE).unwrap();
        let b = compile_text(&EXPENSE.replace("OVER 500", "OVER 501")).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_ad007_classify_inline_schema_is_enum() {
        let plan = compile_text("FROM t.csv\nCLASSIFY type INTO [bug, feature, question]\nFLAG WHEN type IS bug\n").unwrap();
        let step = &plan.steps[0];
        assert_eq!(
            *step.schema,
            SchemaNode::Enum {
                values: vec!["bug".into(), "feature".into(), "question".into()]
            }
        );
        assert_eq!(step.output, StepOutput::Field("type".into()));
        assert!(step.instructions.contains("exactly one category"));
        assert_eq!(plan.rules.len(), 1);
    }

    #[test]
    fn test_ad007_classify_definition() {
        let plan = compile_text("DEFINE ticket:\n  priority ONE OF [low, high]\n\nCLASSIFY ticket\nFLAG WHEN priority IS high\n").unwrap();
        let step = &plan.steps[0];
        assert_eq!(step.target, "ticket");
        assert_eq!(step.output, StepOutput::Field("priority".into()));
        assert!(matches!(*step.schema, SchemaNode::Enum { .. }));
    }

    #[test]
    fn test_ad007_classify_definition_not_single_enum() {
        let errs = errors("DEFINE ticket:\n  subject TEXT\n  priority ONE OF [low, high]\n\nCLASSIFY ticket\n");
        assert!(matches!(&errs[0], CompileError::NotClassifiable { found, .. } if found == "2 fields"));
        let errs = errors("DEFINE ticket:\n  subject TEXT\n\nCLASSIFY ticket\n");
        assert!(matches!(&errs[0], CompileError::NotClassifiable { found, .. } if found == "field 'subject' (text)"));
    }

    #[test]
    fn test_ad007_unknown_definition() {
        let errs = errors("FROM d.csv\nEXTRACT invoice\n");
        assert_eq!(
            errs,
            vec![CompileError::UnknownDefinition {
                line: 2,
                verb: "EXTRACT".into(),
                name: "invoice".into()
            }]
        );
    }

    #[test]
    fn test_ad007_no_inference_step() {
        let errs = errors("DEFINE x:\n  a TEXT\nFROM d.csv\nOUTPUT o.json\n");
        assert_eq!(errs, vec![CompileError::NoInferenceStep]);
    }

    #[test]
    fn test_ad007_duplicate_source_and_output() {
        let errs = errors("DEFINE x:\n  a TEXT\nFROM a.csv\nFROM b.csv\nEXTRACT x\nOUTPUT o.json\nOUTPUT p.json\n");
        assert_eq!(
            errs,
            vec![
                CompileError::DuplicateStep {
                    line: 4,
                    what: "FROM".into()
                },
                CompileError::DuplicateStep {
                    line: 7,
                    what: "OUTPUT".into()
                },
            ]
        );
    }

    #[test]
    fn test_ad007_duplicate_output_field() {
        let errs = errors("DEFINE x:\n  type TEXT\n\nEXTRACT x\nCLASSIFY type INTO [a, b]\n");
        assert_eq!(
            errs,
            vec![CompileError::DuplicateOutputField {
                line: 5,
                field: "type".into(),
                previous: 0
            }]
        );
    }

    #[test]
    fn test_ad007_rule_errors_collected() {
        let errs = errors(&format!(
            "{}FLAG WHEN total OVER 5\nFLAG WHEN merchant OVER 5\nFLAG WHEN amount OVER 5 AND amount UNDER 9 OR amount IS 7\n",
            EXPENSE
        ));
        assert_eq!(errs.len(), 3);
        assert!(matches!(errs[0], CompileError::UndeclaredField { line: 11, .. }));
        assert!(matches!(errs[1], CompileError::OperatorType { line: 12, .. }));
        assert!(matches!(errs[2], CompileError::RuleSyntax { line: 13, .. }));
    }

    #[test]
    fn test_ad007_rule_may_reference_later_step() {
        let plan = compile_text("FLAG WHEN urgent IS yes\nDEFINE t:\n  urgent YES/NO\nEXTRACT t\n").unwrap();
        assert_eq!(plan.rules.len(), 1);
    }

    #[test]
    fn test_ad007_parameter_layering() {
        let plan = compile_text(
            "DEFINE x:\n  a TEXT\n\nSET MODEL base-model\nSET SEED 7\n\nFROM d.csv\nEXTRACT x\nSET TEMPERATURE 0.3\nSET MODEL other\nDRAFT reply\nSET TEMPERATURE 1.1\nCLASSIFY tone INTO [warm, cold]\n",
        )
        .unwrap();
        let extract = &plan.steps[0].params;
        assert_eq!(extract.model.as_deref(), Some("base-model"));
        assert_eq!(extract.seed, Some(7));
        assert_eq!(extract.temperature, 0.0);

        let draft = &plan.steps[1].params;
        assert_eq!(draft.model.as_deref(), Some("other"));
        assert_eq!(draft.temperature, 0.3);
        assert_eq!(draft.seed, Some(7));

        let classify = &plan.steps[2].params;
        assert_eq!(classify.temperature, 1.1);
        assert_eq!(classify.model.as_deref(), Some("other"));
    }

    #[test]
    fn test_ad007_draft_defaults_creative() {
        let plan = compile_text("DEFINE x:\n  a TEXT\nEXTRACT x\nDRAFT reply\n").unwrap();
        assert!(plan.steps[1].params.temperature > 0.0);
        assert_eq!(plan.steps[1].params.seed, None);
        assert_eq!(*plan.steps[1].schema, SchemaNode::Text);
    }

    #[test]
    fn test_ad007_resources_checked() {
        let loader = MemoryResources::new()
            .with_prompt("ctx", "You are a data processor.")
            .with_examples("ex", "INPUT: a\nOUTPUT: {\"a\": \"x\"}\n");
        let plan = compile_with("DEFINE x:\n  a TEXT\nEXTRACT x WITH ctx USE ex\n", &loader).unwrap();
        assert_eq!(
            plan.steps[0].prompt,
            Some(ResourceHandle {
                kind: ResourceKind::Prompt,
                name: "ctx".into()
            })
        );
        assert_eq!(plan.steps[0].examples.as_ref().map(|h| h.name.as_str()), Some("ex"));
    }

    #[test]
    fn test_ad007_missing_and_malformed_resources() {
        let loader = MemoryResources::new().with_examples("bad", "INPUT: only input\n");
        let errs = compile_with("DEFINE x:\n  a TEXT\nEXTRACT x WITH nope USE bad\n", &loader)
            .unwrap_err()
            .0;
        assert_eq!(errs.len(), 2);
        assert!(matches!(&errs[0], CompileError::MissingResource { kind: ResourceKind::Prompt, name, .. } if name == "nope"));
        assert!(matches!(&errs[1], CompileError::MalformedResource { kind: ResourceKind::Examples, .. }));
    }

    #[test]
    fn test_ad007_template_fields_from_earlier_steps() {
        let loader = MemoryResources::new()
            .with_prompt("reply_tmpl", "Reply to {customer.name} about their {type} ticket.");
        let text = "DEFINE person:\n  name TEXT\nDEFINE t:\n  customer person\n\nEXTRACT t\nCLASSIFY type INTO [bug, billing]\nDRAFT reply WITH reply_tmpl\n";
        assert!(compile_with(text, &loader).is_ok());

        // Placeholder naming a field produced later is rejected
        let text = "DEFINE person:\n  name TEXT\nDEFINE t:\n  customer person\n\nEXTRACT t\nDRAFT reply WITH reply_tmpl\nCLASSIFY type INTO [bug, billing]\n";
        let errs = compile_with(text, &loader).unwrap_err().0;
        assert_eq!(
            errs,
            vec![CompileError::UndeclaredField {
                line: 7,
                field: "type".into()
            }]
        );
    }
}

//! AD-002: Declaration parsing.
//!
//! Single pass over the lines of a declaration, no backtracking:
//! - Leading token picks the construct (keywords are case-insensitive)
//! - `DEFINE` opens an indented block of field lines
//! - Pipeline lines are flat; rule text is kept raw for `core::rules`
//! - Names, literals and enum members keep their case

use super::params;
use super::types::*;
use crate::error::ParseError;

/// Leading keywords of non-field lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Define,
    Set,
    From,
    Extract,
    Classify,
    Draft,
    With,
    Prompt,
    Use,
    Flag,
    Output,
}

fn keyword(token: &str) -> Option<Keyword> {
    match token.to_ascii_uppercase().as_str() {
        "DEFINE" => Some(Keyword::Define),
        "SET" => Some(Keyword::Set),
        "FROM" => Some(Keyword::From),
        "EXTRACT" => Some(Keyword::Extract),
        "CLASSIFY" => Some(Keyword::Classify),
        "DRAFT" => Some(Keyword::Draft),
        "WITH" => Some(Keyword::With),
        "PROMPT" => Some(Keyword::Prompt),
        "USE" => Some(Keyword::Use),
        "FLAG" => Some(Keyword::Flag),
        "OUTPUT" => Some(Keyword::Output),
        _ => None,
    }
}

/// Open `DEFINE` block: index into `definitions` and the header's indentation.
struct Block {
    definition: usize,
    indent: usize,
}

#[derive(Default)]
struct Parser {
    definitions: Vec<Definition>,
    settings: Vec<ParamOverride>,
    pipeline: Vec<PipelineStep>,
    block: Option<Block>,
    /// Pipeline index of the most recent inference step
    last_inference: Option<usize>,
    /// Whether the previous construct was a pipeline `SET` line
    in_set_run: bool,
}

/// Parse declaration text into a `Program`.
pub fn parse(text: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::default();
    for (idx, raw) in text.lines().enumerate() {
        parser.line(idx + 1, raw)?;
    }
    Ok(Program {
        definitions: parser.definitions,
        settings: parser.settings,
        pipeline: parser.pipeline,
    })
}

impl Parser {
    fn line(&mut self, line: usize, raw: &str) -> Result<(), ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            return Ok(());
        }
        let indent = raw.len() - raw.trim_start().len();

        if let Some(block) = &self.block {
            if indent > block.indent {
                let definition = block.definition;
                return self.field_line(line, trimmed, definition);
            }
            self.block = None;
        }

        let (head, rest) = split_first_word(trimmed);
        let Some(kw) = keyword(head) else {
            if indent > 0 {
                return Err(ParseError::new(
                    line,
                    "a field line inside a DEFINE block",
                    format!("'{}' outside any definition", trimmed),
                ));
            }
            return Err(ParseError::new(
                line,
                "DEFINE, SET, FROM, EXTRACT, CLASSIFY, DRAFT, WITH, PROMPT, USE, FLAG or OUTPUT",
                format!("'{}'", head),
            ));
        };

        if kw != Keyword::Set {
            self.in_set_run = false;
        }

        match kw {
            Keyword::Define => self.define(line, indent, rest),
            Keyword::Set => self.set(line, rest),
            Keyword::From => {
                let locator = require_rest(line, rest, "a source locator after FROM")?;
                self.pipeline.push(PipelineStep::Source { locator, line });
                Ok(())
            }
            Keyword::Output => {
                let locator = require_rest(line, rest, "an output locator after OUTPUT")?;
                self.pipeline.push(PipelineStep::Output { locator, line });
                Ok(())
            }
            Keyword::Extract => self.inference(line, Verb::Extract, rest),
            Keyword::Classify => self.inference(line, Verb::Classify, rest),
            Keyword::Draft => self.inference(line, Verb::Draft, rest),
            Keyword::With | Keyword::Prompt | Keyword::Use => self.standalone_modifier(line, trimmed),
            Keyword::Flag => self.flag(line, rest),
        }
    }

    fn define(&mut self, line: usize, indent: usize, rest: &str) -> Result<(), ParseError> {
        let name = rest.trim().trim_end_matches(':').trim();
        if !is_identifier(name) {
            return Err(ParseError::new(
                line,
                "a definition name after DEFINE",
                format!("'{}'", rest.trim()),
            ));
        }
        if let Some(existing) = self.definitions.iter().find(|d| d.name == name) {
            return Err(ParseError::new(
                line,
                "a unique definition name",
                format!("'{}' (already defined on line {})", name, existing.line),
            ));
        }
        self.definitions.push(Definition {
            name: name.to_string(),
            fields: Vec::new(),
            line,
        });
        self.block = Some(Block {
            definition: self.definitions.len() - 1,
            indent,
        });
        Ok(())
    }

    fn field_line(&mut self, line: usize, text: &str, definition: usize) -> Result<(), ParseError> {
        let (name, rest) = split_first_word(text);
        if !is_identifier(name) {
            return Err(ParseError::new(line, "a field name", format!("'{}'", name)));
        }
        if rest.is_empty() {
            return Err(ParseError::new(
                line,
                format!("a type after field '{}'", name),
                "end of line",
            ));
        }
        let field_type = parse_field_type(line, rest)?;

        let def = &mut self.definitions[definition];
        if def.fields.iter().any(|f| f.name == name) {
            return Err(ParseError::new(
                line,
                format!("a unique field name in '{}'", def.name),
                format!("duplicate field '{}'", name),
            ));
        }
        def.fields.push(FieldDef {
            name: name.to_string(),
            field_type,
            line,
        });
        Ok(())
    }

    fn set(&mut self, line: usize, rest: &str) -> Result<(), ParseError> {
        let o = parse_override(line, rest)?;
        if self.pipeline.is_empty() {
            self.settings.push(o);
            return Ok(());
        }
        if self.in_set_run {
            if let Some(PipelineStep::Set { overrides, .. }) = self.pipeline.last_mut() {
                overrides.push(o);
                return Ok(());
            }
        }
        self.pipeline.push(PipelineStep::Set {
            overrides: vec![o],
            line,
        });
        self.in_set_run = true;
        Ok(())
    }

    fn inference(&mut self, line: usize, verb: Verb, rest: &str) -> Result<(), ParseError> {
        let tokens = tokenize(rest);
        let what = match verb {
            Verb::Extract => "a definition name after EXTRACT",
            Verb::Classify => "a field or definition name after CLASSIFY",
            Verb::Draft => "a field name after DRAFT",
        };
        let target = match tokens.first() {
            Some(t) if is_identifier(t) && keyword(t).is_none() && !t.eq_ignore_ascii_case("INTO") => {
                t.clone()
            }
            Some(t) => return Err(ParseError::new(line, what, format!("'{}'", t))),
            None => return Err(ParseError::new(line, what, "end of line")),
        };

        let mut modifiers_from = 1;
        let mut categories = None;
        if verb == Verb::Classify
            && tokens
                .get(1)
                .is_some_and(|t| t.eq_ignore_ascii_case("INTO"))
        {
            let list = tokens.get(2).ok_or_else(|| {
                ParseError::new(line, "a [category, ...] list after INTO", "end of line")
            })?;
            categories = Some(parse_list(line, list)?);
            modifiers_from = 3;
        }

        let mut step = InferenceStep {
            verb,
            target,
            categories,
            prompt: None,
            examples: None,
            line,
        };
        apply_modifiers(line, &tokens[modifiers_from..], &mut step)?;

        self.pipeline.push(PipelineStep::Inference(step));
        self.last_inference = Some(self.pipeline.len() - 1);
        Ok(())
    }

    fn standalone_modifier(&mut self, line: usize, text: &str) -> Result<(), ParseError> {
        let tokens = tokenize(text);
        let step = match self.last_inference.and_then(|i| self.pipeline.get_mut(i)) {
            Some(PipelineStep::Inference(step)) => step,
            _ => {
                return Err(ParseError::new(
                    line,
                    "an EXTRACT, CLASSIFY or DRAFT step before this modifier",
                    format!("'{}'", text),
                ))
            }
        };
        apply_modifiers(line, &tokens, step)
    }

    fn flag(&mut self, line: usize, rest: &str) -> Result<(), ParseError> {
        let (when, expr) = split_first_word(rest);
        if !when.eq_ignore_ascii_case("WHEN") {
            return Err(ParseError::new(line, "WHEN after FLAG", format!("'{}'", when)));
        }
        let expression = require_rest(line, expr, "a condition after FLAG WHEN")?;
        self.pipeline.push(PipelineStep::Rule { expression, line });
        Ok(())
    }
}

/// Parse a field type token sequence.
fn parse_field_type(line: usize, text: &str) -> Result<FieldType, ParseError> {
    let tokens = tokenize(text);
    let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
    let words: Vec<&str> = upper.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["TEXT"] => Ok(FieldType::Text),
        ["MONEY"] => Ok(FieldType::Money),
        ["NUMBER"] => Ok(FieldType::Number),
        ["YES/NO"] | ["BOOL"] => Ok(FieldType::Bool),
        ["ONE", "OF", _] => Ok(FieldType::Enum(parse_list(line, &tokens[2])?)),
        ["ONE", "OF"] => Err(ParseError::new(line, "a [value, ...] list after ONE OF", "end of line")),
        ["LIST", "OF", _] if is_identifier(&tokens[2]) => Ok(FieldType::ListOf(tokens[2].clone())),
        [_] if is_identifier(&tokens[0]) => Ok(FieldType::Object(tokens[0].clone())),
        _ => Err(ParseError::new(
            line,
            "a field type (TEXT, MONEY, NUMBER, YES/NO, ONE OF [...], LIST OF <name> or <name>)",
            format!("'{}'", text),
        )),
    }
}

/// Parse `[a, b, c]` into a non-empty list of unique values.
fn parse_list(line: usize, token: &str) -> Result<Vec<String>, ParseError> {
    let inner = token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| ParseError::new(line, "a bracketed [value, ...] list", format!("'{}'", token)))?;

    let mut values: Vec<String> = Vec::new();
    for raw in inner.split(',') {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ParseError::new(line, "a non-empty list value", format!("'{}'", token)));
        }
        if values.iter().any(|v| v == value) {
            return Err(ParseError::new(
                line,
                "unique list values",
                format!("duplicate '{}'", value),
            ));
        }
        values.push(value.to_string());
    }
    Ok(values)
}

/// Parse the remainder of a `SET` line.
fn parse_override(line: usize, rest: &str) -> Result<ParamOverride, ParseError> {
    let (name, value) = split_first_word(rest);
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::new(
            line,
            format!("a value after SET {}", name),
            "end of line",
        ));
    }
    let parsed = match name.to_ascii_uppercase().as_str() {
        "MODEL" => Ok(ParamOverride::Model(value.to_string())),
        "TEMPERATURE" => value
            .parse::<f64>()
            .map(ParamOverride::Temperature)
            .map_err(|_| "a temperature between 0 and 2"),
        "TOP_P" => value
            .parse::<f64>()
            .map(ParamOverride::TopP)
            .map_err(|_| "a top_p between 0 and 1"),
        "SEED" => value
            .parse::<u64>()
            .map(ParamOverride::Seed)
            .map_err(|_| "a non-negative integer seed"),
        "MAX_TOKENS" => value
            .parse::<u32>()
            .map(ParamOverride::MaxTokens)
            .map_err(|_| "a positive max_tokens"),
        "HEADER" => {
            let (header, header_value) = split_first_word(value);
            if header_value.trim().is_empty() {
                return Err(ParseError::new(line, "SET HEADER <name> <value>", format!("'{}'", value)));
            }
            Ok(ParamOverride::Header(header.to_string(), header_value.trim().to_string()))
        }
        _ => {
            return Err(ParseError::new(
                line,
                "MODEL, TEMPERATURE, TOP_P, SEED, MAX_TOKENS or HEADER after SET",
                format!("'{}'", name),
            ))
        }
    };
    parsed
        .and_then(|o| params::check(&o).map(|()| o))
        .map_err(|expected| ParseError::new(line, expected, format!("'{}'", value)))
}

/// Apply `WITH|PROMPT <name>` / `USE <name>` pairs to a step.
fn apply_modifiers(line: usize, tokens: &[String], step: &mut InferenceStep) -> Result<(), ParseError> {
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let kind = match keyword(token) {
            Some(Keyword::With) | Some(Keyword::Prompt) => ResourceKind::Prompt,
            Some(Keyword::Use) => ResourceKind::Examples,
            _ => {
                return Err(ParseError::new(
                    line,
                    "WITH, PROMPT or USE",
                    format!("'{}'", token),
                ))
            }
        };
        let name = match iter.next() {
            Some(n) if is_resource_name(n) => n.clone(),
            Some(n) => return Err(ParseError::new(line, format!("a resource name after {}", token), format!("'{}'", n))),
            None => return Err(ParseError::new(line, format!("a resource name after {}", token), "end of line")),
        };
        let slot = match kind {
            ResourceKind::Prompt => &mut step.prompt,
            ResourceKind::Examples => &mut step.examples,
        };
        if let Some(existing) = slot {
            return Err(ParseError::new(
                line,
                format!("at most one {} resource per step", kind),
                format!("'{}' after '{}'", name, existing),
            ));
        }
        *slot = Some(name);
    }
    Ok(())
}

fn require_rest(line: usize, rest: &str, expected: &str) -> Result<String, ParseError> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(ParseError::new(line, expected, "end of line"));
    }
    Ok(rest.to_string())
}

/// Split off the first whitespace-delimited word.
fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

/// Whitespace tokenizer that keeps `[ ... ]` groups as one token.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_resource_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn inference_steps(p: &Program) -> Vec<&InferenceStep> {
        p.pipeline
            .iter()
            .filter_map(|s| match s {
                PipelineStep::Inference(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ad002_parse_full_expense() {
        let p = parse(EXPENSE).unwrap();
        assert_eq!(p.definitions.len(), 1);
        let def = &p.definitions[0];
        assert_eq!(def.name, "expense");
        assert_eq!(def.fields.len(), 3);
        assert_eq!(def.fields[1].field_type, FieldType::Money);
        assert_eq!(
            def.fields[2].field_type,
            FieldType::Enum(vec![
                "travel".into(),
                "meals".into(),
                "equipment".into(),
                "software".into(),
                "office".into()
            ])
        );
        assert_eq!(p.pipeline.len(), 5);
        assert_eq!(
            p.pipeline[0],
            PipelineStep::Source {
                locator: "receipts.csv".into(),
                line: 6
            }
        );
        assert_eq!(
            p.pipeline[3],
            PipelineStep::Rule {
                expression: "category IS travel AND amount OVER 200".into(),
                line: 9
            }
        );
        assert!(matches!(&p.pipeline[4], PipelineStep::Output { locator, .. } if locator == "expenses.json"));
    }

    #[test]
    fn test_ad002_field_types() {
        let p = parse(
            "DEFINE item:\n  name TEXT\n  qty NUMBER\n  active YES/NO\n  other BOOL\n  lines LIST OF line\n  billing address\n",
        )
        .unwrap();
        let f = &p.definitions[0].fields;
        assert_eq!(f[0].field_type, FieldType::Text);
        assert_eq!(f[1].field_type, FieldType::Number);
        assert_eq!(f[2].field_type, FieldType::Bool);
        assert_eq!(f[3].field_type, FieldType::Bool);
        assert_eq!(f[4].field_type, FieldType::ListOf("line".into()));
        assert_eq!(f[5].field_type, FieldType::Object("address".into()));
    }

    #[test]
    fn test_ad002_keywords_case_insensitive_values_preserved() {
        let p = parse("define Item:\n  Color one of [Red, blue]\n\nfrom Data.CSV\nextract Item\noutput Out.json\n").unwrap();
        assert_eq!(p.definitions[0].name, "Item");
        assert_eq!(p.definitions[0].fields[0].name, "Color");
        assert_eq!(
            p.definitions[0].fields[0].field_type,
            FieldType::Enum(vec!["Red".into(), "blue".into()])
        );
        assert!(matches!(&p.pipeline[0], PipelineStep::Source { locator, .. } if locator == "Data.CSV"));
        assert_eq!(inference_steps(&p)[0].target, "Item");
    }

    #[test]
    fn test_ad002_comments_and_blank_lines() {
        let p = parse("-- header comment\nDEFINE x:\n  a TEXT\n\n  -- inside\n  b MONEY\n-- another\nFROM d.csv\nEXTRACT x\n").unwrap();
        assert_eq!(p.definitions[0].fields.len(), 2);
        assert_eq!(p.pipeline.len(), 2);
    }

    #[test]
    fn test_ad002_forward_reference_parses() {
        let p = parse("DEFINE order:\n  items LIST OF item\n\nDEFINE item:\n  name TEXT\n").unwrap();
        assert_eq!(p.definitions.len(), 2);
        assert_eq!(p.definition("item").unwrap().fields[0].name, "name");
    }

    #[test]
    fn test_ad002_extract_modifiers_any_order() {
        let p = parse("DEFINE x:\n  a TEXT\nEXTRACT x USE ex WITH ctx\n").unwrap();
        let step = inference_steps(&p)[0];
        assert_eq!(step.prompt.as_deref(), Some("ctx"));
        assert_eq!(step.examples.as_deref(), Some("ex"));

        let p = parse("DEFINE x:\n  a TEXT\nEXTRACT x PROMPT my_context\n").unwrap();
        assert_eq!(inference_steps(&p)[0].prompt.as_deref(), Some("my_context"));
    }

    #[test]
    fn test_ad002_standalone_modifier_attaches_to_previous_step() {
        let p = parse("FROM d.csv\nCLASSIFY type INTO [a, b, c]\n  WITH my_context\nUSE my_ex\nOUTPUT o.json\n").unwrap();
        let step = inference_steps(&p)[0];
        assert_eq!(step.verb, Verb::Classify);
        assert_eq!(step.categories.as_ref().unwrap().len(), 3);
        assert_eq!(step.prompt.as_deref(), Some("my_context"));
        assert_eq!(step.examples.as_deref(), Some("my_ex"));
    }

    #[test]
    fn test_ad002_standalone_modifier_without_step() {
        let err = parse("WITH ctx\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.expected.contains("before this modifier"));
    }

    #[test]
    fn test_ad002_duplicate_modifier() {
        let err = parse("DEFINE x:\n  a TEXT\nEXTRACT x WITH a\nWITH b\n").unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.expected.contains("at most one prompt"));
    }

    #[test]
    fn test_ad002_classify_forms() {
        let p = parse("CLASSIFY sentiment INTO [positive, negative]\nCLASSIFY ticket WITH ctx\n").unwrap();
        let steps = inference_steps(&p);
        assert_eq!(steps[0].target, "sentiment");
        assert_eq!(
            steps[0].categories,
            Some(vec!["positive".into(), "negative".into()])
        );
        assert_eq!(steps[1].target, "ticket");
        assert!(steps[1].categories.is_none());
        assert_eq!(steps[1].prompt.as_deref(), Some("ctx"));
    }

    #[test]
    fn test_ad002_classify_without_name_rejected() {
        let err = parse("CLASSIFY INTO [a, b]\n").unwrap_err();
        assert!(err.expected.contains("after CLASSIFY"));
        assert_eq!(err.found, "'INTO'");
    }

    #[test]
    fn test_ad002_inference_without_schema_rejected() {
        let err = parse("EXTRACT\n").unwrap_err();
        assert_eq!(err.expected, "a definition name after EXTRACT");
        assert_eq!(err.found, "end of line");

        let err = parse("DRAFT WITH tmpl\n").unwrap_err();
        assert_eq!(err.expected, "a field name after DRAFT");
    }

    #[test]
    fn test_ad002_draft_step() {
        let p = parse("DRAFT summary WITH reply_tmpl USE ex\n").unwrap();
        let step = inference_steps(&p)[0];
        assert_eq!(step.verb, Verb::Draft);
        assert_eq!(step.target, "summary");
        assert_eq!(step.prompt.as_deref(), Some("reply_tmpl"));
        assert_eq!(step.examples.as_deref(), Some("ex"));
    }

    #[test]
    fn test_ad002_unknown_leading_token() {
        let err = parse("DEFINE x:\n  a TEXT\nEXTRAKT x\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.found, "'EXTRAKT'");
    }

    #[test]
    fn test_ad002_field_outside_definition() {
        let err = parse("FROM d.csv\n  amount MONEY\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.found.contains("outside any definition"));
    }

    #[test]
    fn test_ad002_block_closed_by_dedent() {
        let err = parse("DEFINE x:\n  a TEXT\nb MONEY\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.found, "'b'");
    }

    #[test]
    fn test_ad002_duplicate_field() {
        let err = parse("DEFINE x:\n  a TEXT\n  a MONEY\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.found.contains("duplicate field 'a'"));
    }

    #[test]
    fn test_ad002_duplicate_definition() {
        let err = parse("DEFINE x:\n  a TEXT\nDEFINE x:\n  b TEXT\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.found.contains("already defined on line 1"));
    }

    #[test]
    fn test_ad002_bad_field_type() {
        let err = parse("DEFINE x:\n  a MONY DOLLARS\n").unwrap_err();
        assert!(err.expected.starts_with("a field type"));
        let err = parse("DEFINE x:\n  a\n").unwrap_err();
        assert_eq!(err.found, "end of line");
    }

    #[test]
    fn test_ad002_enum_must_be_non_empty_and_unique() {
        assert!(parse("DEFINE x:\n  c ONE OF []\n").is_err());
        let err = parse("DEFINE x:\n  c ONE OF [a, b, a]\n").unwrap_err();
        assert!(err.found.contains("duplicate 'a'"));
        assert!(parse("DEFINE x:\n  c ONE OF [a, b\n").is_err());
    }

    #[test]
    fn test_ad002_enum_case_distinct_values() {
        let p = parse("DEFINE x:\n  c ONE OF [Travel, travel]\n").unwrap();
        assert_eq!(
            p.definitions[0].fields[0].field_type,
            FieldType::Enum(vec!["Travel".into(), "travel".into()])
        );
    }

    #[test]
    fn test_ad002_global_settings_block() {
        let p = parse("DEFINE x:\n  a TEXT\n\nSET MODEL gpt-4.1\nSET TEMPERATURE 0.2\nSET SEED 99\n\nFROM d.csv\nEXTRACT x\n").unwrap();
        assert_eq!(
            p.settings,
            vec![
                ParamOverride::Model("gpt-4.1".into()),
                ParamOverride::Temperature(0.2),
                ParamOverride::Seed(99)
            ]
        );
        assert!(!p.pipeline.iter().any(|s| matches!(s, PipelineStep::Set { .. })));
    }

    #[test]
    fn test_ad002_pipeline_set_runs() {
        let p = parse("FROM d.csv\nSET TOP_P 0.9\nSET MAX_TOKENS 256\nCLASSIFY t INTO [a, b]\nSET TEMPERATURE 0.8\nDRAFT reply\n").unwrap();
        let sets: Vec<&Vec<ParamOverride>> = p
            .pipeline
            .iter()
            .filter_map(|s| match s {
                PipelineStep::Set { overrides, .. } => Some(overrides),
                _ => None,
            })
            .collect();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], &vec![ParamOverride::TopP(0.9), ParamOverride::MaxTokens(256)]);
        assert_eq!(sets[1], &vec![ParamOverride::Temperature(0.8)]);
    }

    #[test]
    fn test_ad002_set_header() {
        let p = parse("SET HEADER Authorization Bearer abc123\nSET HEADER X-API-Key secret\n").unwrap();
        assert_eq!(
            p.settings[0],
            ParamOverride::Header("Authorization".into(), "Bearer abc123".into())
        );
        assert_eq!(p.settings[1], ParamOverride::Header("X-API-Key".into(), "secret".into()));
    }

    #[test]
    fn test_ad002_set_invalid_values() {
        assert!(parse("SET TEMPERATURE hot\n").is_err());
        assert!(parse("SET TEMPERATURE 3.5\n").is_err());
        assert!(parse("SET TOP_P 1.5\n").is_err());
        assert!(parse("SET SEED -1\n").is_err());
        let err = parse("SET MAX_TOKENS 0\n").unwrap_err();
        assert_eq!(err.expected, "a positive max_tokens");
        assert_eq!(err.found, "'0'");
        assert!(parse("SET MAX_TOKENS 1\n").is_ok());
        assert!(parse("SET MODEL\n").is_err());
        let err = parse("SET COLOR blue\n").unwrap_err();
        assert_eq!(err.found, "'COLOR'");
    }

    #[test]
    fn test_ad002_flag_requires_when() {
        let err = parse("FLAG amount OVER 5\n").unwrap_err();
        assert_eq!(err.expected, "WHEN after FLAG");
        let err = parse("FLAG WHEN\n").unwrap_err();
        assert_eq!(err.found, "end of line");
    }

    #[test]
    fn test_ad002_tokenize_keeps_brackets() {
        assert_eq!(
            tokenize("type INTO [bug, feature request] WITH x"),
            vec!["type", "INTO", "[bug, feature request]", "WITH", "x"]
        );
    }

    #[test]
    fn test_ad002_is_identifier() {
        assert!(is_identifier("line_item"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}

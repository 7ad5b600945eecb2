//! AD-003: Schema resolution.
//!
//! Builds an index-based symbol table over all definitions, resolves
//! `ListOf`/`Object` references into fully expanded `SchemaNode` trees, and
//! rejects cyclic reference graphs. Depth-first with a visiting stack; a
//! back-edge onto the stack is reported with the full cycle path. Resolved
//! subtrees are memoised per definition, so shared structure is built once
//! and shared by `Arc` regardless of fan-in.

use super::types::*;
use crate::error::SchemaError;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Stable handle to a definition in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefId(usize);

/// Field shape with references replaced by handles.
#[derive(Clone)]
enum Slot {
    Leaf(Arc<SchemaNode>),
    Object(DefId),
    List(DefId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Definition name → fully resolved object schema.
#[derive(Debug, Clone)]
pub struct ResolvedSchemaMap {
    index: FxHashMap<String, DefId>,
    names: Vec<String>,
    schemas: Vec<Arc<SchemaNode>>,
}

impl ResolvedSchemaMap {
    pub fn id(&self, name: &str) -> Option<DefId> {
        self.index.get(name).copied()
    }

    pub fn schema(&self, id: DefId) -> &Arc<SchemaNode> {
        &self.schemas[id.0]
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SchemaNode>> {
        self.id(name).map(|id| self.schema(id))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<SchemaNode>)> {
        self.names.iter().map(String::as_str).zip(self.schemas.iter())
    }
}

struct Resolver<'a> {
    definitions: &'a [Definition],
    slots: Vec<Vec<(String, Slot)>>,
    marks: Vec<Mark>,
    memo: Vec<Option<Arc<SchemaNode>>>,
    stack: Vec<DefId>,
}

/// Resolve every definition of a program.
pub fn resolve(definitions: &[Definition]) -> Result<ResolvedSchemaMap, SchemaError> {
    let mut index: FxHashMap<String, DefId> = FxHashMap::default();
    for (i, def) in definitions.iter().enumerate() {
        if index.insert(def.name.clone(), DefId(i)).is_some() {
            return Err(SchemaError::DuplicateDefinition(def.name.clone()));
        }
    }

    let mut slots = Vec::with_capacity(definitions.len());
    for def in definitions {
        let mut fields = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let slot = match &field.field_type {
                FieldType::Text => Slot::Leaf(Arc::new(SchemaNode::Text)),
                FieldType::Money => Slot::Leaf(Arc::new(SchemaNode::Money)),
                FieldType::Number => Slot::Leaf(Arc::new(SchemaNode::Number)),
                FieldType::Bool => Slot::Leaf(Arc::new(SchemaNode::Bool)),
                FieldType::Enum(values) => Slot::Leaf(Arc::new(SchemaNode::Enum {
                    values: values.clone(),
                })),
                FieldType::ListOf(r) | FieldType::Object(r) => {
                    let id = *index.get(r).ok_or_else(|| SchemaError::Unresolved {
                        definition: def.name.clone(),
                        field: field.name.clone(),
                        reference: r.clone(),
                    })?;
                    if matches!(field.field_type, FieldType::ListOf(_)) {
                        Slot::List(id)
                    } else {
                        Slot::Object(id)
                    }
                }
            };
            fields.push((field.name.clone(), slot));
        }
        slots.push(fields);
    }

    let mut resolver = Resolver {
        definitions,
        slots,
        marks: vec![Mark::Unvisited; definitions.len()],
        memo: vec![None; definitions.len()],
        stack: Vec::new(),
    };

    let mut schemas = Vec::with_capacity(definitions.len());
    for i in 0..definitions.len() {
        schemas.push(resolver.visit(DefId(i))?);
    }

    Ok(ResolvedSchemaMap {
        index,
        names: definitions.iter().map(|d| d.name.clone()).collect(),
        schemas,
    })
}

impl Resolver<'_> {
    fn visit(&mut self, id: DefId) -> Result<Arc<SchemaNode>, SchemaError> {
        match self.marks[id.0] {
            Mark::Done => {
                if let Some(node) = &self.memo[id.0] {
                    return Ok(Arc::clone(node));
                }
            }
            Mark::Visiting => return Err(self.cycle_error(id)),
            Mark::Unvisited => {}
        }

        self.marks[id.0] = Mark::Visiting;
        self.stack.push(id);

        let mut fields = Vec::with_capacity(self.slots[id.0].len());
        for f in 0..self.slots[id.0].len() {
            let (name, slot) = self.slots[id.0][f].clone();
            let node = match slot {
                Slot::Leaf(node) => node,
                Slot::Object(target) => self.visit(target)?,
                Slot::List(target) => Arc::new(SchemaNode::List {
                    items: self.visit(target)?,
                }),
            };
            fields.push((name, node));
        }

        self.stack.pop();
        self.marks[id.0] = Mark::Done;
        let node = Arc::new(SchemaNode::Object(ObjectSchema {
            name: self.definitions[id.0].name.clone(),
            fields,
        }));
        self.memo[id.0] = Some(Arc::clone(&node));
        Ok(node)
    }

    /// Cycle path from the first occurrence of `id` on the stack back to `id`.
    fn cycle_error(&self, id: DefId) -> SchemaError {
        let start = self.stack.iter().position(|s| *s == id).unwrap_or(0);
        let mut path: Vec<String> = self.stack[start..]
            .iter()
            .map(|s| self.definitions[s.0].name.clone())
            .collect();
        path.push(self.definitions[id.0].name.clone());
        SchemaError::Cycle { path }
    }
}

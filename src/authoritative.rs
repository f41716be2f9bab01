//! Authoritative (typed) evaluation lane.
//!
//! The engine treats the structural evaluator as an opaque collaborator
//! behind [`AuthoritativeEvaluator`]. [`SchemaEvaluator`] is the bundled
//! implementation: it navigates the document through a FhirSchema-like
//! [`StructureModel`] and refuses to guess. Undeclared elements and
//! array/object disagreements between model and document are errors, which
//! the engine answers by retrying the rule on the raw lane.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::error::Result;
use crate::resolver::{LocationResolver, Match, ResolveError, apply_selector, choice_suffix};
use crate::types::{
    DocumentNode, Filter, PathExpression, PathSegment, SegmentName, Selector, values_equal,
};

static COMPLEX_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*(!=|=)\s*('(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false)\s*$"#,
    )
    .expect("complex clause regex")
});

static AND_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+and\s+").expect("conjunction regex"));

/// Failure inside an evaluation lane
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaneError {
    #[error("authoritative model has no type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("element '{element}' is not declared on '{type_name}'")]
    UnknownElement { type_name: String, element: String },

    #[error("shape mismatch at {pointer}: model expects {expected}, document has {actual}")]
    ShapeMismatch {
        pointer: String,
        expected: String,
        actual: String,
    },

    #[error("not supported by the authoritative lane: {feature}")]
    Unsupported { feature: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("evaluation failed: {message}")]
    Evaluation { message: String },
}

/// Structural evaluator consulted by the authoritative lane.
///
/// Implementations may fail for any reason; a failure never skips a rule,
/// the engine falls back to the raw lane.
pub trait AuthoritativeEvaluator: Send + Sync {
    /// Whether a typed model exists for this resource type
    fn supports(&self, resource_type: &str) -> bool;

    /// Resolve `path` from `start`, interpreting `start` as `context_type`
    fn evaluate<'a>(
        &self,
        start: &Match<'a>,
        context_type: &str,
        path: &PathExpression,
    ) -> std::result::Result<Vec<Match<'a>>, LaneError>;
}

/// Element declaration inside a type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub array: bool,
    /// Allowed type suffixes of a choice element (`value[x]`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Inline backbone elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<IndexMap<String, ElementDefinition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(default)]
    pub elements: IndexMap<String, ElementDefinition>,
}

/// Element resolved for one field of one type
#[derive(Debug, Clone, PartialEq)]
struct ResolvedElement {
    array: bool,
    type_name: Option<String>,
    choice_type: Option<String>,
}

/// Typed model of resources and data types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureModel {
    #[serde(default)]
    types: HashMap<String, TypeDefinition>,
}

impl StructureModel {
    pub fn new(types: HashMap<String, TypeDefinition>) -> Self {
        let mut model = Self { types };
        model.register_inline_types();
        model
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: StructureModel = serde_json::from_str(text)?;
        Ok(Self::new(raw.types))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Backbone elements become named types `Parent.field` so nested
    /// navigation can look them up like any other type.
    fn register_inline_types(&mut self) {
        let mut pending: Vec<(String, TypeDefinition)> = Vec::new();
        for (name, definition) in &self.types {
            collect_inline(name, &definition.elements, &mut pending);
        }
        for (name, definition) in pending {
            self.types.entry(name).or_insert(definition);
        }
    }

    fn resolve_element(&self, type_name: &str, field: &str) -> std::result::Result<ResolvedElement, LaneError> {
        let definition = self
            .type_definition(type_name)
            .ok_or_else(|| LaneError::UnknownType {
                type_name: type_name.to_string(),
            })?;

        if let Some(element) = definition.elements.get(field)
            && element.choices.is_empty()
        {
            return Ok(ResolvedElement {
                array: element.array,
                type_name: child_type_name(type_name, field, element),
                choice_type: None,
            });
        }

        for (name, element) in &definition.elements {
            if let Some(suffix) = choice_suffix(field, name)
                && element.choices.iter().any(|c| c == suffix)
            {
                return Ok(ResolvedElement {
                    array: element.array,
                    type_name: Some(suffix.to_string()),
                    choice_type: Some(suffix.to_string()),
                });
            }
        }

        Err(LaneError::UnknownElement {
            type_name: type_name.to_string(),
            element: field.to_string(),
        })
    }
}

fn collect_inline(
    parent: &str,
    elements: &IndexMap<String, ElementDefinition>,
    out: &mut Vec<(String, TypeDefinition)>,
) {
    for (field, element) in elements {
        if let Some(children) = &element.elements
            && element.type_name.is_none()
        {
            let name = format!("{parent}.{field}");
            collect_inline(&name, children, out);
            out.push((
                name,
                TypeDefinition {
                    elements: children.clone(),
                },
            ));
        }
    }
}

fn child_type_name(parent: &str, field: &str, element: &ElementDefinition) -> Option<String> {
    match (&element.type_name, &element.elements) {
        (Some(t), _) => Some(t.clone()),
        (None, Some(_)) => Some(format!("{parent}.{field}")),
        (None, None) => None,
    }
}

/// Authoritative evaluator backed by a [`StructureModel`]
#[derive(Debug, Clone)]
pub struct SchemaEvaluator {
    model: StructureModel,
}

impl SchemaEvaluator {
    pub fn new(model: StructureModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &StructureModel {
        &self.model
    }

    fn step<'a>(
        &self,
        parent: &Match<'a>,
        segment: &PathSegment,
    ) -> std::result::Result<Vec<Match<'a>>, LaneError> {
        let parent_type = parent
            .declared_type
            .as_deref()
            .ok_or_else(|| LaneError::Evaluation {
                message: format!("no declared type at {}", parent.pointer),
            })?;

        let candidates: Vec<(String, ResolvedElement)> = match &segment.name {
            SegmentName::Wildcard => {
                return Err(LaneError::Unsupported {
                    feature: "wildcard segments".to_string(),
                });
            }
            SegmentName::Field(name) => {
                vec![(name.clone(), self.model.resolve_element(parent_type, name)?)]
            }
            SegmentName::Choice(prefix) => {
                let definition =
                    self.model
                        .type_definition(parent_type)
                        .ok_or_else(|| LaneError::UnknownType {
                            type_name: parent_type.to_string(),
                        })?;
                let element = definition
                    .elements
                    .get(prefix)
                    .filter(|e| !e.choices.is_empty())
                    .ok_or_else(|| LaneError::UnknownElement {
                        type_name: parent_type.to_string(),
                        element: format!("{prefix}[x]"),
                    })?;
                element
                    .choices
                    .iter()
                    .map(|choice| {
                        (
                            format!("{prefix}{choice}"),
                            ResolvedElement {
                                array: element.array,
                                type_name: Some(choice.clone()),
                                choice_type: Some(choice.clone()),
                            },
                        )
                    })
                    .collect()
            }
        };

        let mut matches = Vec::new();
        for (field, element) in candidates {
            let Some(child) = parent.node.field(&field) else {
                continue;
            };
            if child.value().is_null() {
                continue;
            }
            let pointer = parent.pointer.child_field(&field);
            if element.array != child.is_array() {
                return Err(LaneError::ShapeMismatch {
                    pointer: pointer.to_string(),
                    expected: if element.array { "array" } else { "single value" }.to_string(),
                    actual: child.kind().as_str().to_string(),
                });
            }

            let typed = |node: DocumentNode<'a>, pointer| {
                let mut m = Match::new(node, pointer);
                m.declared_type = element.type_name.clone();
                m.choice_type = element.choice_type.clone();
                m
            };
            let mut items: Vec<Match<'a>> = if element.array {
                child
                    .elements()
                    .into_iter()
                    .filter(|(_, node)| !node.value().is_null())
                    .map(|(index, node)| typed(node, pointer.child_index(index)))
                    .collect()
            } else {
                vec![typed(child, pointer)]
            };

            for selector in &segment.selectors {
                items = match selector {
                    Selector::Filter(Filter::Complex(text)) => {
                        let clauses = parse_complex_filter(text)?;
                        items
                            .into_iter()
                            .filter(|m| clauses.iter().all(|clause| clause.holds(m)))
                            .collect()
                    }
                    other => apply_selector(items, other, element.array)?,
                };
            }
            matches.extend(items);
        }

        Ok(matches)
    }
}

impl AuthoritativeEvaluator for SchemaEvaluator {
    fn supports(&self, resource_type: &str) -> bool {
        self.model.type_definition(resource_type).is_some()
    }

    fn evaluate<'a>(
        &self,
        start: &Match<'a>,
        context_type: &str,
        path: &PathExpression,
    ) -> std::result::Result<Vec<Match<'a>>, LaneError> {
        let mut root = start.clone();
        root.declared_type = Some(context_type.to_string());
        let mut current = vec![root];

        for segment in path.segments() {
            let mut next = Vec::new();
            for parent in &current {
                next.extend(self.step(parent, segment)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            current = next;
        }
        Ok(current)
    }
}

/// One `path op literal` clause of a complex filter
#[derive(Debug, Clone, PartialEq)]
struct FilterClause {
    path: PathExpression,
    negated: bool,
    literal: JsonValue,
}

impl FilterClause {
    fn holds(&self, candidate: &Match<'_>) -> bool {
        let values = LocationResolver::new()
            .resolve_from(candidate, &self.path)
            .unwrap_or_default();
        let any_equal = values
            .iter()
            .any(|m| m.node.is_scalar() && values_equal(m.node.value(), &self.literal));
        any_equal != self.negated
    }
}

fn parse_complex_filter(text: &str) -> std::result::Result<Vec<FilterClause>, LaneError> {
    AND_SPLIT
        .split(text.trim())
        .map(|clause| {
            let caps = COMPLEX_CLAUSE
                .captures(clause)
                .ok_or_else(|| LaneError::Unsupported {
                    feature: format!("filter clause '{clause}'"),
                })?;
            let path = PathExpression::parse(&caps[1]).map_err(|e| LaneError::Evaluation {
                message: e.to_string(),
            })?;
            let literal_text = &caps[3];
            let literal = if literal_text.starts_with(['\'', '"']) {
                JsonValue::String(literal_text[1..literal_text.len() - 1].replace("\\'", "'"))
            } else {
                serde_json::from_str(literal_text).map_err(|e| LaneError::Evaluation {
                    message: e.to_string(),
                })?
            };
            Ok(FilterClause {
                path,
                negated: &caps[2] == "!=",
                literal,
            })
        })
        .collect()
}

//! Location resolution over the raw document tree.
//!
//! Converts a [`PathExpression`] into every concrete location it matches.
//! Arrays are always fanned out and every element contributes its own
//! index to the [`Pointer`], even when the array holds a single element.
//! A segment without matches ends that branch silently; absence is for
//! the rule logic to report.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::types::{
    DocumentNode, Filter, PathExpression, PathSegment, Pointer, SegmentName, Selector,
    values_equal,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("filter [{filter}] needs the authoritative model")]
    UnsupportedFilter { filter: String },
}

/// One resolved location
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub node: DocumentNode<'a>,
    pub pointer: Pointer,
    /// Type picked by a choice segment (`valueQuantity` gives `Quantity`)
    pub choice_type: Option<String>,
    /// Type declared by a structural model; the raw lane leaves it empty
    pub declared_type: Option<String>,
}

impl<'a> Match<'a> {
    pub fn new(node: DocumentNode<'a>, pointer: Pointer) -> Self {
        Self {
            node,
            pointer,
            choice_type: None,
            declared_type: None,
        }
    }
}

/// Resolver for the raw lane; needs nothing but the parsed tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocationResolver;

impl LocationResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `path` starting at `root`, whose absolute location is `base`
    pub fn resolve<'a>(
        &self,
        root: DocumentNode<'a>,
        path: &PathExpression,
        base: &Pointer,
    ) -> Result<Vec<Match<'a>>, ResolveError> {
        self.resolve_from(&Match::new(root, base.clone()), path)
    }

    /// Resolve relative to an earlier match
    pub fn resolve_from<'a>(
        &self,
        start: &Match<'a>,
        path: &PathExpression,
    ) -> Result<Vec<Match<'a>>, ResolveError> {
        let mut current = if start.node.is_array() {
            fan_out(start.node, &start.pointer, None, false)
        } else {
            vec![start.clone()]
        };

        for segment in path.segments() {
            let mut next = Vec::new();
            for parent in &current {
                next.extend(step(parent, segment)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            current = next;
        }

        Ok(current)
    }

    /// Resolve inside one entry of the root collection
    /// (`/{collection}/{entry_index}/resource`)
    pub fn resolve_in_entry<'a>(
        &self,
        document: &'a JsonValue,
        collection: &str,
        path: &PathExpression,
        entry_index: usize,
    ) -> Result<Vec<Match<'a>>, ResolveError> {
        let base = Pointer::entry(collection, entry_index);
        match base.lookup(document) {
            Some(resource) => self.resolve(DocumentNode::new(resource), path, &base),
            None => Ok(Vec::new()),
        }
    }
}

/// Apply one segment to one parent
fn step<'a>(parent: &Match<'a>, segment: &PathSegment) -> Result<Vec<Match<'a>>, ResolveError> {
    let candidates: Vec<(&str, DocumentNode<'a>, Option<String>)> = match &segment.name {
        SegmentName::Field(name) => parent
            .node
            .field(name)
            .map(|node| (name.as_str(), node, None))
            .into_iter()
            .collect(),
        SegmentName::Wildcard => parent
            .node
            .fields()
            .into_iter()
            .map(|(field, node)| (field, node, None))
            .collect(),
        SegmentName::Choice(prefix) => parent
            .node
            .fields()
            .into_iter()
            .filter_map(|(field, node)| {
                choice_suffix(field, prefix).map(|suffix| (field, node, Some(suffix.to_string())))
            })
            .collect(),
    };

    let mut matches = Vec::new();
    for (field, child, choice_type) in candidates {
        if child.value().is_null() {
            continue;
        }
        let pointer = parent.pointer.child_field(field);
        let from_array = child.is_array();
        let mut items = if from_array {
            fan_out(child, &pointer, choice_type.clone(), true)
        } else {
            let mut single = Match::new(child, pointer);
            single.choice_type = choice_type.clone();
            vec![single]
        };

        for selector in &segment.selectors {
            items = apply_selector(items, selector, from_array)?;
        }
        matches.extend(items);
    }

    Ok(matches)
}

fn fan_out<'a>(
    array: DocumentNode<'a>,
    pointer: &Pointer,
    choice_type: Option<String>,
    skip_nulls: bool,
) -> Vec<Match<'a>> {
    array
        .elements()
        .into_iter()
        .filter(|(_, element)| !(skip_nulls && element.value().is_null()))
        .map(|(index, element)| {
            let mut m = Match::new(element, pointer.child_index(index));
            m.choice_type = choice_type.clone();
            m
        })
        .collect()
}

pub(crate) fn apply_selector<'a>(
    items: Vec<Match<'a>>,
    selector: &Selector,
    from_array: bool,
) -> Result<Vec<Match<'a>>, ResolveError> {
    match selector {
        Selector::Index(wanted) => Ok(items
            .into_iter()
            .filter(|m| {
                if from_array {
                    m.pointer.last_index() == Some(*wanted)
                } else {
                    *wanted == 0
                }
            })
            .collect()),
        Selector::Filter(Filter::Equals { field, literal }) => Ok(items
            .into_iter()
            .filter(|m| {
                m.node
                    .field(field)
                    .is_some_and(|v| v.is_scalar() && values_equal(v.value(), literal))
            })
            .collect()),
        Selector::Filter(Filter::Complex(text)) => Err(ResolveError::UnsupportedFilter {
            filter: text.clone(),
        }),
    }
}

/// `valueQuantity` with prefix `value` gives `Quantity`
pub(crate) fn choice_suffix<'s>(field: &'s str, prefix: &str) -> Option<&'s str> {
    field
        .strip_prefix(prefix)
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pointers(matches: &[Match<'_>]) -> Vec<String> {
        matches.iter().map(|m| m.pointer.to_string()).collect()
    }

    #[test]
    fn test_fan_out_every_element() {
        let doc = json!({"identifier": [{"system": "A"}, {"system": "B"}, {"system": "C"}]});
        let path = PathExpression::parse("identifier.system").unwrap();
        let matches = LocationResolver::new()
            .resolve(DocumentNode::new(&doc), &path, &Pointer::root())
            .unwrap();
        assert_eq!(
            pointers(&matches),
            vec![
                "/identifier/0/system",
                "/identifier/1/system",
                "/identifier/2/system"
            ]
        );
    }

    #[test]
    fn test_single_element_array_keeps_index() {
        let doc = json!({"identifier": [{"system": "A"}]});
        let path = PathExpression::parse("identifier.system").unwrap();
        let matches = LocationResolver::new()
            .resolve(DocumentNode::new(&doc), &path, &Pointer::root())
            .unwrap();
        assert_eq!(pointers(&matches), vec!["/identifier/0/system"]);
    }

    #[test]
    fn test_scalar_array_leaf_fans_out() {
        let doc = json!({"name": [{"given": ["Ann", "Marie"]}, {"given": ["Bo"]}]});
        let path = PathExpression::parse("name.given").unwrap();
        let matches = LocationResolver::new()
            .resolve(DocumentNode::new(&doc), &path, &Pointer::root())
            .unwrap();
        assert_eq!(
            pointers(&matches),
            vec!["/name/0/given/0", "/name/0/given/1", "/name/1/given/0"]
        );
    }

    #[test]
    fn test_missing_branch_is_empty_not_error() {
        let doc = json!({"name": [{"family": "X"}]});
        let path = PathExpression::parse("address.city").unwrap();
        let matches = LocationResolver::new()
            .resolve(DocumentNode::new(&doc), &path, &Pointer::root())
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_equality_filter_and_index() {
        let doc = json!({"identifier": [
            {"system": "A", "value": "1"},
            {"system": "B", "value": "2"},
            {"system": "A", "value": "3"}
        ]});
        let resolver = LocationResolver::new();
        let filtered = resolver
            .resolve(
                DocumentNode::new(&doc),
                &PathExpression::parse("identifier[system='A'].value").unwrap(),
                &Pointer::root(),
            )
            .unwrap();
        assert_eq!(
            pointers(&filtered),
            vec!["/identifier/0/value", "/identifier/2/value"]
        );

        let indexed = resolver
            .resolve(
                DocumentNode::new(&doc),
                &PathExpression::parse("identifier[1].value").unwrap(),
                &Pointer::root(),
            )
            .unwrap();
        assert_eq!(pointers(&indexed), vec!["/identifier/1/value"]);
    }

    #[test]
    fn test_complex_filter_refused() {
        let doc = json!({"identifier": [{"system": "A"}]});
        let path = PathExpression::parse("identifier[system != 'A']").unwrap();
        let result = LocationResolver::new().resolve(DocumentNode::new(&doc), &path, &Pointer::root());
        assert!(matches!(result, Err(ResolveError::UnsupportedFilter { .. })));
    }

    #[test]
    fn test_choice_segment() {
        let doc = json!({"component": [
            {"valueQuantity": {"value": 120}},
            {"valueString": "n/a"}
        ]});
        let path = PathExpression::parse("component.value[x]").unwrap();
        let matches = LocationResolver::new()
            .resolve(DocumentNode::new(&doc), &path, &Pointer::root())
            .unwrap();
        assert_eq!(
            pointers(&matches),
            vec!["/component/0/valueQuantity", "/component/1/valueString"]
        );
        assert_eq!(matches[0].choice_type.as_deref(), Some("Quantity"));
        assert_eq!(matches[1].choice_type.as_deref(), Some("String"));
    }

    #[test]
    fn test_resolve_in_entry() {
        let bundle = json!({"resourceType": "Bundle", "entry": [
            {"resource": {"resourceType": "Patient", "name": [{"family": "A"}]}},
            {"resource": {"resourceType": "Patient", "name": [{"family": "B"}]}}
        ]});
        let path = PathExpression::parse("name.family").unwrap();
        let matches = LocationResolver::new()
            .resolve_in_entry(&bundle, "entry", &path, 1)
            .unwrap();
        assert_eq!(pointers(&matches), vec!["/entry/1/resource/name/0/family"]);
        assert_eq!(matches[0].node.as_str(), Some("B"));
    }
}

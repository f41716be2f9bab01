//! Rule semantics, one function per [`RuleKind`] variant.
//!
//! Evaluators write into a [`DiagnosticSink`] and return the first lane
//! error they hit. Whatever reached the sink before a failure is kept; the
//! engine merges it with the retry and the normalizer removes duplicates.

use serde_json::{Value as JsonValue, json};
use std::cmp::Ordering;

use crate::authoritative::LaneError;
use crate::reference::ReferenceResolution;
use crate::resolver::Match;
use crate::terminology::TerminologyError;
use crate::types::{
    Diagnostic, ErrorCode, Lane, PathExpression, PathSegment, Pointer, Provenance, SegmentName,
    details, values_equal,
};
use crate::validation::compiled::{ExecutableRule, Predicate, PredicateOperator, RuleKind};
use crate::validation::composite;
use crate::validation::engine::EntryContext;
use crate::validation::lanes::MatchSource;

/// Collects diagnostics for one rule on one entry in one lane
pub struct DiagnosticSink<'r> {
    rule: &'r ExecutableRule,
    entry_index: usize,
    lane: Lane,
    diagnostics: Vec<Diagnostic>,
    configuration_reported: bool,
}

impl<'r> DiagnosticSink<'r> {
    pub fn new(rule: &'r ExecutableRule, entry_index: usize, lane: Lane) -> Self {
        Self {
            rule,
            entry_index,
            lane,
            diagnostics: Vec::new(),
            configuration_reported: false,
        }
    }

    pub fn emit(
        &mut self,
        code: ErrorCode,
        pointer: Pointer,
        details_value: JsonValue,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            source: code.source(),
            severity: self.rule.definition.severity,
            collection_entry_index: self.entry_index,
            pointer,
            error_code: code,
            details: details(details_value),
            provenance: Provenance::for_lane(self.lane),
            rule_id: Some(self.rule.id().to_string()),
            message: message.into(),
        });
    }

    /// Report a rule configuration problem; at most once per rule and entry
    pub fn configuration_error(&mut self, pointer: Pointer, parameter: &str, reason: String) {
        if self.configuration_reported {
            return;
        }
        self.configuration_reported = true;
        let message = format!("rule {} is misconfigured: {reason}", self.rule.id());
        self.emit(
            ErrorCode::RuleConfigurationError,
            pointer,
            json!({
                "ruleType": self.rule.rule_type().as_str(),
                "parameter": parameter,
                "reason": reason,
            }),
            message,
        );
    }

    pub fn has_configuration_error(&self) -> bool {
        self.configuration_reported
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Run `rule` against one entry using `source` for value acquisition
pub fn evaluate_rule(
    rule: &ExecutableRule,
    source: &dyn MatchSource,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let path = entry.relative_path(&rule.path);
    let start = entry.start();

    match &rule.kind {
        RuleKind::Required => required(source, &start, &path, entry, sink),
        RuleKind::FixedValue { expected } => fixed_value(source, &start, &path, expected, sink),
        RuleKind::AllowedValues { allowed } => allowed_values(source, &start, &path, allowed, sink),
        RuleKind::Pattern {
            regex,
            pattern,
            description,
        } => {
            for m in source.resolve(&start, &path)? {
                let matched = m.node.scalar_text().is_some_and(|text| regex.is_match(&text));
                if !matched {
                    sink.emit(
                        ErrorCode::PatternMismatch,
                        m.pointer.clone(),
                        json!({
                            "actual": m.node.value(),
                            "pattern": pattern,
                            "description": description,
                        }),
                        format!("{path} does not match {pattern}"),
                    );
                }
            }
            Ok(())
        }
        RuleKind::Cardinality { min, max } => cardinality(source, &start, &path, *min, *max, entry, sink),
        RuleKind::CodeMembership {
            expected_system,
            value_set,
        } => code_membership(
            source,
            &start,
            &path,
            expected_system.as_deref(),
            value_set.as_deref(),
            entry,
            sink,
        ),
        RuleKind::ReferenceIntegrity {
            target_types,
            allow_external,
        } => reference_integrity(source, &start, &path, target_types, *allow_external, entry, sink),
        RuleKind::CustomPredicate {
            predicate,
            author_code,
        } => custom_predicate(source, &start, &path, predicate, author_code.as_deref(), entry, sink),
        RuleKind::CompositeAnswer(spec) => composite::evaluate(source, &start, spec, entry, sink),
        RuleKind::Misconfigured { parameter, reason } => {
            sink.configuration_error(entry.base.clone(), parameter, reason.clone());
            Ok(())
        }
    }
}

fn required(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let matches = source.resolve(start, path)?;
    if matches.iter().all(|m| m.node.is_blank()) {
        sink.emit(
            ErrorCode::RequiredMissing,
            entry.base.clone(),
            json!({"required": true}),
            format!("{path} is required"),
        );
    }
    Ok(())
}

fn fixed_value(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    expected: &JsonValue,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    for m in source.resolve(start, path)? {
        if !values_equal(m.node.value(), expected) {
            sink.emit(
                ErrorCode::FixedValueMismatch,
                m.pointer.clone(),
                json!({"actual": m.node.value(), "expected": expected}),
                format!("{path} must be {expected}"),
            );
        }
    }
    Ok(())
}

fn allowed_values(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    allowed: &[JsonValue],
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    for m in source.resolve(start, path)? {
        let value = m.node.value();
        if !allowed.iter().any(|candidate| values_equal(value, candidate)) {
            sink.emit(
                ErrorCode::ValueNotAllowed,
                m.pointer.clone(),
                json!({
                    "actual": value,
                    "allowed": allowed,
                    "valueType": m.node.kind().as_str(),
                }),
                format!("{value} is not an allowed value for {path}"),
            );
        }
    }
    Ok(())
}

fn cardinality(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    min: u64,
    max: Option<u64>,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let Some((parent_path, last)) = path.split_last() else {
        return Ok(());
    };
    let parents = if parent_path.is_empty() {
        vec![start.clone()]
    } else {
        source.resolve(start, &parent_path)?
    };

    let mut counts: Vec<(Pointer, u64)> = Vec::new();
    if parents.is_empty() {
        counts.push((entry.base.clone(), 0));
    }
    let last_only = PathExpression::from_segments(vec![last.clone()]);
    for parent in &parents {
        let count = source.resolve(parent, &last_only)?.len() as u64;
        counts.push((field_pointer(&parent.pointer, last), count));
    }

    for (pointer, actual) in counts {
        let too_few = actual < min;
        let too_many = max.is_some_and(|max| actual > max);
        if too_few || too_many {
            sink.emit(
                ErrorCode::CardinalityViolation,
                pointer,
                json!({"min": min, "max": max, "actual": actual}),
                match max {
                    Some(max) => format!("{path} has {actual} values, expected {min}..{max}"),
                    None => format!("{path} has {actual} values, expected at least {min}"),
                },
            );
        }
    }
    Ok(())
}

/// Location a count refers to: the parent plus the counted field
fn field_pointer(parent: &Pointer, segment: &PathSegment) -> Pointer {
    match &segment.name {
        SegmentName::Field(name) => parent.child_field(name),
        SegmentName::Choice(_) | SegmentName::Wildcard => parent.clone(),
    }
}

/// A (system, code) pair taken from a Coding, a CodeableConcept's codings
/// or a bare code string
pub(crate) struct CodedValue<'a> {
    pub system: Option<&'a str>,
    pub code: Option<&'a str>,
    pub pointer: Pointer,
}

pub(crate) fn coded_values<'a>(
    source: &dyn MatchSource,
    m: &Match<'a>,
) -> Result<Vec<CodedValue<'a>>, LaneError> {
    if let Some(code) = m.node.as_str() {
        return Ok(vec![CodedValue {
            system: None,
            code: Some(code),
            pointer: m.pointer.clone(),
        }]);
    }
    if !m.node.is_object() {
        return Ok(Vec::new());
    }
    if m.node.field("coding").is_some() {
        let coding_path = PathExpression::from_segments(vec![PathSegment::field("coding")]);
        let mut values = Vec::new();
        for coding in source.resolve(m, &coding_path)? {
            values.extend(coding_from_object(&coding));
        }
        return Ok(values);
    }
    Ok(coding_from_object(m).into_iter().collect())
}

fn coding_from_object<'a>(m: &Match<'a>) -> Option<CodedValue<'a>> {
    let system = m.node.field("system").and_then(|n| n.as_str());
    let code = m.node.field("code").and_then(|n| n.as_str());
    (system.is_some() || code.is_some()).then(|| CodedValue {
        system,
        code,
        pointer: m.pointer.clone(),
    })
}

fn code_membership(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    expected_system: Option<&str>,
    value_set: Option<&str>,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    for m in source.resolve(start, path)? {
        for coded in coded_values(source, &m)? {
            if let Some(expected) = expected_system
                && coded.system != Some(expected)
            {
                sink.emit(
                    ErrorCode::CodeSystemMismatch,
                    coded.pointer,
                    json!({"expectedSystem": expected, "actualSystem": coded.system}),
                    format!("{path} must use code system {expected}"),
                );
                continue;
            }

            let (Some(value_set), Some(code)) = (value_set, coded.code) else {
                continue;
            };
            match entry.terminology.contains(value_set, coded.system, code) {
                Ok(true) => {}
                Ok(false) => sink.emit(
                    ErrorCode::CodeNotInValueset,
                    coded.pointer,
                    json!({"system": coded.system, "code": code, "valueSet": value_set}),
                    format!("{code} is not in value set {value_set}"),
                ),
                Err(TerminologyError::ValueSetNotFound { url }) => {
                    sink.configuration_error(
                        entry.base.clone(),
                        "valueSet",
                        format!("value set '{url}' is not available"),
                    );
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn reference_integrity(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    target_types: &[String],
    allow_external: bool,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    for m in source.resolve(start, path)? {
        let (reference, pointer) = if m.node.is_object() {
            match m.node.field("reference") {
                // Logical references (identifier only) have nothing to resolve
                None => continue,
                Some(node) => (node.value(), m.pointer.child_field("reference")),
            }
        } else {
            (m.node.value(), m.pointer.clone())
        };

        let Some(text) = reference.as_str().filter(|s| !s.trim().is_empty()) else {
            sink.emit(
                ErrorCode::ReferenceInvalidFormat,
                pointer,
                json!({"reference": reference}),
                format!("{path} holds a malformed reference"),
            );
            continue;
        };

        let resolution = if text.starts_with('#') {
            entry.contained.resolve(text)
        } else {
            entry.entries.resolve(text)
        };

        let actual_type = match resolution {
            ReferenceResolution::Entry(target) => Some(target.resource_type),
            ReferenceResolution::Contained { resource_type } => Some(resource_type),
            ReferenceResolution::External { resource_type } if allow_external => resource_type,
            ReferenceResolution::External { .. } | ReferenceResolution::NotFound => {
                sink.emit(
                    ErrorCode::ReferenceNotFound,
                    pointer,
                    json!({"reference": text}),
                    format!("{text} does not resolve inside the document"),
                );
                continue;
            }
            ReferenceResolution::InvalidFormat => {
                sink.emit(
                    ErrorCode::ReferenceInvalidFormat,
                    pointer,
                    json!({"reference": text}),
                    format!("{text} is not a valid reference"),
                );
                continue;
            }
        };

        if let Some(actual) = actual_type
            && !target_types.is_empty()
            && !target_types.iter().any(|t| *t == actual)
        {
            sink.emit(
                ErrorCode::ReferenceTypeMismatch,
                pointer,
                json!({
                    "reference": text,
                    "expectedTypes": target_types,
                    "actualType": actual,
                }),
                format!("{text} points at {actual}, expected one of {}", target_types.join(", ")),
            );
        }
    }
    Ok(())
}

fn custom_predicate(
    source: &dyn MatchSource,
    start: &Match<'_>,
    path: &PathExpression,
    predicate: &Predicate,
    author_code: Option<&str>,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let matches: Vec<Match<'_>> = source
        .resolve(start, path)?
        .into_iter()
        .filter(|m| !m.node.is_blank())
        .collect();
    let rendered = predicate.to_string();

    if predicate.operator == PredicateOperator::Exists {
        if matches.is_empty() {
            sink.emit(
                ErrorCode::CustomPredicateFailed,
                entry.base.clone(),
                json!({"predicate": rendered, "actual": null, "authorCode": author_code}),
                format!("{path} must exist"),
            );
        }
        return Ok(());
    }

    for m in &matches {
        if !predicate_holds(predicate, m) {
            sink.emit(
                ErrorCode::CustomPredicateFailed,
                m.pointer.clone(),
                json!({"predicate": rendered, "actual": m.node.value(), "authorCode": author_code}),
                format!("{path} fails {rendered}"),
            );
        }
    }
    Ok(())
}

fn predicate_holds(predicate: &Predicate, m: &Match<'_>) -> bool {
    let actual = m.node.value();
    match predicate.operator {
        PredicateOperator::Exists => true,
        PredicateOperator::NotExists => false,
        PredicateOperator::Equals => predicate
            .value
            .as_ref()
            .is_some_and(|v| values_equal(actual, v)),
        PredicateOperator::NotEquals => predicate
            .value
            .as_ref()
            .is_some_and(|v| !values_equal(actual, v)),
        PredicateOperator::GreaterThan => {
            compare(actual, predicate.value.as_ref()) == Some(Ordering::Greater)
        }
        PredicateOperator::LessThan => {
            compare(actual, predicate.value.as_ref()) == Some(Ordering::Less)
        }
        PredicateOperator::Matches => match (&predicate.regex, m.node.scalar_text()) {
            (Some(regex), Some(text)) => regex.is_match(&text),
            _ => false,
        },
    }
}

/// Numbers compare numerically, strings lexically (ISO dates sort correctly)
fn compare(actual: &JsonValue, expected: Option<&JsonValue>) -> Option<Ordering> {
    match (actual, expected?) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

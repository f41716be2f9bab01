//! Question/answer checks over a repeating structure.
//!
//! Every outcome is one of six engine-owned classifications: context
//! missing, question not found, value missing, type mismatch, out of range,
//! not in value set. An answer gets at most one of the last three.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Value as JsonValue, json};

use crate::authoritative::LaneError;
use crate::resolver::Match;
use crate::terminology::TerminologyError;
use crate::types::{ErrorCode, NodeKind, Pointer, PointerSegment};
use crate::validation::compiled::{AnswerType, CompositeAnswerSpec};
use crate::validation::engine::EntryContext;
use crate::validation::evaluators::{DiagnosticSink, coded_values};
use crate::validation::lanes::MatchSource;

pub fn evaluate(
    source: &dyn MatchSource,
    start: &Match<'_>,
    spec: &CompositeAnswerSpec,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let context_path = entry.relative_path(&spec.context_path);
    let contexts = source.resolve(start, &context_path)?;
    let question = spec.question_code.as_str();

    if contexts.is_empty() {
        sink.emit(
            ErrorCode::AnswerContextMissing,
            entry.base.clone(),
            json!({"context": context_path.to_string()}),
            format!("no {context_path} to look for question {question} in"),
        );
        return Ok(());
    }

    let mut found = false;
    for context in &contexts {
        let asks_question = source
            .resolve(context, &spec.question_path)?
            .iter()
            .any(|m| m.node.scalar_text().as_deref() == Some(question));
        if !asks_question {
            continue;
        }
        found = true;

        let answers: Vec<Match<'_>> = source
            .resolve(context, &spec.answer_path)?
            .into_iter()
            .filter(|m| !m.node.is_blank())
            .collect();
        if answers.is_empty() {
            sink.emit(
                ErrorCode::AnswerValueMissing,
                context.pointer.clone(),
                json!({"question": question}),
                format!("question {question} has no answer"),
            );
            continue;
        }

        for answer in &answers {
            classify(source, answer, spec, entry, sink)?;
            if sink.has_configuration_error() {
                return Ok(());
            }
        }
    }

    if !found {
        sink.emit(
            ErrorCode::AnswerQuestionNotFound,
            entry.base.clone(),
            json!({"question": question}),
            format!("question {question} is not present in {context_path}"),
        );
    }
    Ok(())
}

fn classify(
    source: &dyn MatchSource,
    answer: &Match<'_>,
    spec: &CompositeAnswerSpec,
    entry: &EntryContext<'_>,
    sink: &mut DiagnosticSink<'_>,
) -> Result<(), LaneError> {
    let question = spec.question_code.as_str();
    let expected = spec.answer_type;
    let actual = answer_type_of(answer);

    if !compatible(expected, &actual) {
        sink.emit(
            ErrorCode::AnswerTypeMismatch,
            answer.pointer.clone(),
            json!({
                "question": question,
                "expectedType": expected.as_str(),
                "actualType": actual,
            }),
            format!("answer to {question} is {actual}, expected {}", expected.as_str()),
        );
        return Ok(());
    }

    if spec.min.is_some() || spec.max.is_some() {
        let number = match expected {
            AnswerType::Quantity => answer.node.field("value").and_then(|v| v.as_f64()),
            _ => answer.node.as_f64(),
        };
        let Some(number) = number else {
            sink.emit(
                ErrorCode::AnswerValueMissing,
                answer.pointer.clone(),
                json!({"question": question}),
                format!("answer to {question} carries no numeric value"),
            );
            return Ok(());
        };
        let below = spec.min.is_some_and(|min| number < min);
        let above = spec.max.is_some_and(|max| number > max);
        if below || above {
            sink.emit(
                ErrorCode::AnswerOutOfRange,
                answer.pointer.clone(),
                json!({"question": question, "actual": number, "min": spec.min, "max": spec.max}),
                format!("answer {number} to {question} is out of range"),
            );
            return Ok(());
        }
    }

    if let Some(value_set) = &spec.value_set {
        let coded = coded_values(source, answer)?;
        let mut first_miss = None;
        let mut any_member = false;
        for value in &coded {
            let Some(code) = value.code else {
                continue;
            };
            match entry.terminology.contains(value_set, value.system, code) {
                Ok(true) => any_member = true,
                Ok(false) => {
                    first_miss.get_or_insert((value.system, code));
                }
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
        if !any_member && let Some((system, code)) = first_miss {
            sink.emit(
                ErrorCode::AnswerNotInValueset,
                answer.pointer.clone(),
                json!({
                    "question": question,
                    "system": system,
                    "code": code,
                    "valueSet": value_set,
                }),
                format!("answer {code} to {question} is not in value set {value_set}"),
            );
        }
    }

    Ok(())
}

fn compatible(expected: AnswerType, actual: &str) -> bool {
    match expected {
        AnswerType::Decimal => matches!(actual, "decimal" | "integer"),
        AnswerType::String => matches!(actual, "string" | "date" | "dateTime"),
        AnswerType::DateTime => matches!(actual, "dateTime" | "date"),
        other => actual == other.as_str(),
    }
}

/// Answer type name, from the datatype suffix of the answer's field when it
/// names a known type, otherwise from the value's shape. Declared model
/// types are not consulted so both lanes classify identically.
fn answer_type_of(answer: &Match<'_>) -> String {
    let named = answer
        .choice_type
        .as_deref()
        .and_then(known_type_name)
        .or_else(|| field_type_name(&answer.pointer));
    if let Some(name) = named {
        return name.to_string();
    }

    match answer.node.kind() {
        NodeKind::String => {
            let text = answer.node.as_str().unwrap_or_default();
            if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
                "date".to_string()
            } else if DateTime::parse_from_rfc3339(text).is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
            {
                "dateTime".to_string()
            } else {
                "string".to_string()
            }
        }
        NodeKind::Number => match answer.node.value() {
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer".to_string(),
            _ => "decimal".to_string(),
        },
        NodeKind::Boolean => "boolean".to_string(),
        NodeKind::Object => {
            let node = answer.node;
            if node.field("coding").is_some()
                || (node.field("code").is_some() && node.field("value").is_none())
            {
                "coding".to_string()
            } else if node.field("value").is_some_and(|v| v.as_f64().is_some()) {
                "quantity".to_string()
            } else {
                "object".to_string()
            }
        }
        other => other.as_str().to_string(),
    }
}

fn known_type_name(datatype: &str) -> Option<&'static str> {
    Some(match datatype {
        "String" | "Code" | "Markdown" | "Uri" | "Url" | "Canonical" | "Id" => "string",
        "Integer" | "PositiveInt" | "UnsignedInt" | "Integer64" => "integer",
        "Decimal" => "decimal",
        "Boolean" => "boolean",
        "Date" => "date",
        "DateTime" | "Instant" => "dateTime",
        "Coding" | "CodeableConcept" => "coding",
        "Quantity" | "Age" | "Duration" | "Distance" | "Count" | "SimpleQuantity" => "quantity",
        _ => return None,
    })
}

/// Type named by the last field of `pointer` (`valueString` gives `string`).
/// The leftmost known suffix wins.
fn field_type_name(pointer: &Pointer) -> Option<&'static str> {
    let field = pointer.segments().iter().rev().find_map(|segment| match segment {
        PointerSegment::Field(name) => Some(name.as_str()),
        PointerSegment::Index(_) => None,
    })?;
    field
        .char_indices()
        .skip(1)
        .filter(|(_, c)| c.is_ascii_uppercase())
        .find_map(|(i, _)| known_type_name(&field[i..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoritative::{SchemaEvaluator, StructureModel};
    use crate::config::EngineConfig;
    use crate::reference::EntryIndex;
    use crate::terminology::TerminologySet;
    use crate::types::{Diagnostic, RuleDefinition, RuleType};
    use crate::validation::compiled::{ExecutableRule, RuleKind, RuleSet};
    use crate::validation::lanes::{AuthoritativeLane, RawLane};

    fn evaluator() -> SchemaEvaluator {
        let model = StructureModel::from_json_str(
            &json!({"types": {
                "Observation": {"elements": {
                    "component": {"array": true, "elements": {
                        "code": {"type": "string"},
                        "value": {"choices": ["String", "Quantity", "DateTime"]}
                    }}
                }},
                "Quantity": {"elements": {"value": {"type": "decimal"}}}
            }})
            .to_string(),
        )
        .unwrap();
        SchemaEvaluator::new(model)
    }

    fn rule(answer_path: &str, answer_type: &str) -> ExecutableRule {
        let definition = RuleDefinition::new("answer", RuleType::CompositeAnswer, "Observation.component")
            .with_parameter("questionPath", json!("code"))
            .with_parameter("questionCode", json!("q1"))
            .with_parameter("answerPath", json!(answer_path))
            .with_parameter("answerType", json!(answer_type));
        RuleSet::compile(vec![definition], &EngineConfig::default()).rules()[0].clone()
    }

    fn run(source: &dyn MatchSource, document: &JsonValue, rule: &ExecutableRule) -> Vec<Diagnostic> {
        let entries = EntryIndex::new();
        let terminology = TerminologySet::new();
        let entry = EntryContext::new(0, document, Pointer::root(), &entries, &terminology);
        let RuleKind::CompositeAnswer(spec) = &rule.kind else {
            panic!("composite rule expected");
        };
        let mut sink = DiagnosticSink::new(rule, 0, source.lane());
        evaluate(source, &entry.start(), spec, &entry, &mut sink).unwrap();
        sink.into_diagnostics()
    }

    fn outcome(diagnostics: &[Diagnostic]) -> Vec<(ErrorCode, String, Option<JsonValue>)> {
        diagnostics
            .iter()
            .map(|d| (d.error_code, d.pointer.to_string(), d.details.get("actualType").cloned()))
            .collect()
    }

    #[test]
    fn test_explicit_choice_field_typed_alike_in_both_lanes() {
        let document = json!({"resourceType": "Observation", "component": [
            {"code": "q1", "valueString": "2020-01-01"}
        ]});
        let rule = rule("valueString", "date");
        let evaluator = evaluator();

        let raw = run(&RawLane::new(), &document, &rule);
        let typed = run(&AuthoritativeLane::new(&evaluator, "Observation"), &document, &rule);

        assert_eq!(outcome(&raw), outcome(&typed));
        assert_eq!(
            outcome(&raw),
            vec![(
                ErrorCode::AnswerTypeMismatch,
                "/component/0/valueString".to_string(),
                Some(json!("string"))
            )]
        );
    }

    #[test]
    fn test_choice_segment_typed_alike_in_both_lanes() {
        let document = json!({"resourceType": "Observation", "component": [
            {"code": "q1", "valueDateTime": "2020-01-01T10:00:00Z"}
        ]});
        let rule = rule("value[x]", "string");
        let evaluator = evaluator();

        let raw = run(&RawLane::new(), &document, &rule);
        let typed = run(&AuthoritativeLane::new(&evaluator, "Observation"), &document, &rule);

        assert_eq!(outcome(&raw), outcome(&typed));
        assert!(raw.is_empty());
    }

    #[test]
    fn test_field_type_name_prefers_leftmost_suffix() {
        let pointer = |field: &str| Pointer::root().child_field("item").child_index(0).child_field(field);
        assert_eq!(field_type_name(&pointer("valueDateTime")), Some("dateTime"));
        assert_eq!(field_type_name(&pointer("multipleBirthInteger")), Some("integer"));
        assert_eq!(field_type_name(&pointer("valueCodeableConcept")), Some("coding"));
        assert_eq!(field_type_name(&pointer("valueReference")), None);
        assert_eq!(field_type_name(&pointer("answer")), None);
    }
}

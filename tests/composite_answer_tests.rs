mod common;

use common::*;
use octofhir_ruleguard::*;
use pretty_assertions::assert_eq;
use serde_json::{Value as JsonValue, json};

fn response() -> JsonValue {
    json!({
        "resourceType": "QuestionnaireResponse",
        "item": [
            {"linkId": "weight", "answer": [{"valueDecimal": 450.5}]},
            {"linkId": "smoker", "answer": [
                {"valueCoding": {"system": "http://snomed.info/sct", "code": "999"}}
            ]},
            {"linkId": "notes", "answer": []},
            {"linkId": "visit", "answer": [{"valueDate": "2024-03-01"}]}
        ]
    })
}

fn answer_rule(id: &str, question: &str, answer_type: &str) -> RuleDefinition {
    RuleDefinition::new(id, RuleType::CompositeAnswer, "QuestionnaireResponse.item")
        .with_parameter("questionPath", json!("linkId"))
        .with_parameter("questionCode", json!(question))
        .with_parameter("answerPath", json!("answer.value[x]"))
        .with_parameter("answerType", json!(answer_type))
}

fn run(rule: RuleDefinition) -> Vec<Diagnostic> {
    let rules = compile(vec![rule]);
    assert_eq!(rules.len(), 1, "rule should compile");
    validate(&response(), &rules, &fixture_context()).unwrap()
}

#[test]
fn test_out_of_range_answer() {
    let diagnostics = run(answer_rule("weight", "weight", "decimal")
        .with_parameter("min", json!(0))
        .with_parameter("max", json!(300)));

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerOutOfRange);
    assert_eq!(diagnostics[0].pointer.to_string(), "/item/0/answer/0/valueDecimal");
    assert_eq!(diagnostics[0].details["question"], json!("weight"));
    assert_eq!(diagnostics[0].details["actual"], json!(450.5));
    assert_eq!(diagnostics[0].source, DiagnosticSource::CompositeAnswer);
}

#[test]
fn test_type_mismatch_takes_precedence_over_range() {
    let diagnostics = run(answer_rule("weight", "weight", "integer").with_parameter("max", json!(300)));

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerTypeMismatch);
    assert_eq!(
        JsonValue::Object(diagnostics[0].details.clone()),
        json!({"question": "weight", "expectedType": "integer", "actualType": "decimal"})
    );
}

#[test]
fn test_answer_not_in_value_set() {
    let diagnostics = run(answer_rule("smoker", "smoker", "coding")
        .with_parameter("valueSet", json!("http://example.org/vs/smoking-status")));

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerNotInValueset);
    assert_eq!(diagnostics[0].pointer.to_string(), "/item/1/answer/0/valueCoding");
    assert_eq!(
        JsonValue::Object(diagnostics[0].details.clone()),
        json!({
            "question": "smoker",
            "system": "http://snomed.info/sct",
            "code": "999",
            "valueSet": "http://example.org/vs/smoking-status"
        })
    );
}

#[test]
fn test_missing_answer_value() {
    let diagnostics = run(answer_rule("notes", "notes", "string"));

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerValueMissing);
    assert_eq!(diagnostics[0].pointer.to_string(), "/item/2");
}

#[test]
fn test_missing_question() {
    let diagnostics = run(answer_rule("height", "height", "decimal"));

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerQuestionNotFound);
    assert!(diagnostics[0].pointer.is_root());
}

#[test]
fn test_date_answer_satisfies_date_time() {
    assert!(run(answer_rule("visit", "visit", "dateTime")).is_empty());
    assert!(run(answer_rule("visit", "visit", "date")).is_empty());
}

#[test]
fn test_missing_context_through_named_scope() {
    let rule = answer_rule("nested", "weight", "decimal")
        .with_scope("groups", "QuestionnaireResponse.item.item")
        .with_parameter("scope", json!("groups"));

    let diagnostics = run(rule);

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::AnswerContextMissing);
    assert_eq!(diagnostics[0].details["context"], json!("item.item"));
}

#[test]
fn test_dangling_scope_is_blocked() {
    let rule = answer_rule("nested", "weight", "decimal").with_parameter("scope", json!("groups"));
    let rules = compile(vec![rule]);

    assert!(rules.is_empty());
    assert_eq!(rules.report().status, GovernanceSeverity::Blocked);
    assert_eq!(
        rules.report().findings[0].code,
        GovernanceCode::DanglingScopeReference
    );
}

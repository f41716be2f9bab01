mod common;

use common::*;
use octofhir_ruleguard::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

/// Evaluator that claims every type and fails on every path
struct FailingEvaluator;

impl AuthoritativeEvaluator for FailingEvaluator {
    fn supports(&self, _resource_type: &str) -> bool {
        true
    }

    fn evaluate<'a>(
        &self,
        _start: &Match<'a>,
        _context_type: &str,
        _path: &PathExpression,
    ) -> std::result::Result<Vec<Match<'a>>, LaneError> {
        Err(LaneError::Evaluation {
            message: "model exploded".to_string(),
        })
    }
}

fn fixture_rules() -> RuleSet {
    RuleSet::from_file(fixture_path("rules.json"), &strict_config()).unwrap()
}

#[test]
fn test_forced_fallback_matches_raw_only_run() {
    let bundle = load_fixture("bundle.json");
    let rules = fixture_rules();

    let raw_only = validate(&bundle, &rules, &fixture_context()).unwrap();
    let fallen_back = validate(
        &bundle,
        &rules,
        &fixture_context().with_authoritative_evaluator(Arc::new(FailingEvaluator)),
    )
    .unwrap();

    assert_eq!(fingerprints(&raw_only), fingerprints(&fallen_back));
    assert!(fallen_back.iter().all(|d| d.provenance.lane == Lane::Raw));

    let noted = for_rule(&fallen_back, "patient-identifier-system");
    assert_eq!(
        noted[0].provenance.notes,
        vec!["authoritative lane failed: evaluation failed: model exploded"]
    );
    // custom predicates never try the authoritative lane
    let predicate = for_rule(&fallen_back, "observation-final");
    assert!(predicate[0].provenance.notes.is_empty());
}

#[test]
fn test_fallbacks_are_counted_per_rule() {
    let context = ValidationContext::new(strict_config())
        .with_authoritative_evaluator(Arc::new(FailingEvaluator));
    let rules = compile(vec![
        RuleDefinition::new("gender", RuleType::AllowedValues, "Patient.gender")
            .with_parameter("allowed", json!(["male"])),
        RuleDefinition::new("name", RuleType::Required, "Patient.name"),
    ]);
    let document = json!({"resourceType": "Patient", "gender": "other"});

    let (diagnostics, stats) = Validator::new(context).validate_with_stats(&document, &rules).unwrap();

    assert_eq!(stats.fallbacks, 2);
    assert_eq!(stats.engine_faults, 0);
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().all(|d| d.provenance.lane == Lane::Raw));
}

#[test]
fn test_schema_lane_agrees_with_raw_lane() {
    let bundle = load_fixture("bundle.json");
    let rules = fixture_rules();

    let raw_only = validate(&bundle, &rules, &fixture_context()).unwrap();
    let typed = validate(
        &bundle,
        &rules,
        &fixture_context().with_authoritative_evaluator(schema_evaluator()),
    )
    .unwrap();

    assert_eq!(fingerprints(&raw_only), fingerprints(&typed));

    let identifiers = for_rule(&typed, "patient-identifier-system");
    assert_eq!(identifiers[0].provenance.lane, Lane::Authoritative);
    assert_eq!(identifiers[0].provenance.confidence, Confidence::Strict);
}

#[test]
fn test_shape_mismatch_falls_back() {
    let model = StructureModel::from_json_str(
        &json!({"types": {
            "Patient": {"elements": {"identifier": {"type": "Identifier"}}},
            "Identifier": {"elements": {"system": {"type": "uri"}}}
        }})
        .to_string(),
    )
    .unwrap();
    let context = ValidationContext::new(strict_config())
        .with_authoritative_evaluator(Arc::new(SchemaEvaluator::new(model)));
    let rules = compile(vec![
        RuleDefinition::new("system", RuleType::AllowedValues, "Patient.identifier.system")
            .with_parameter("allowed", json!(["A"])),
    ]);
    let document = json!({"resourceType": "Patient", "identifier": [{"system": "B"}]});

    let diagnostics = validate(&document, &rules, &context).unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].pointer.to_string(), "/identifier/0/system");
    assert_eq!(diagnostics[0].provenance.lane, Lane::Raw);
    assert!(diagnostics[0].provenance.notes[0].contains("shape mismatch"));
}

#[test]
fn test_open_ended_region_uses_raw_lane() {
    let context = ValidationContext::new(strict_config())
        .with_authoritative_evaluator(schema_evaluator());
    let rules = compile(vec![
        RuleDefinition::new("ext", RuleType::Required, "Patient.extension.url"),
    ]);

    let diagnostics = validate(&json!({"resourceType": "Patient"}), &rules, &context).unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].provenance.lane, Lane::Raw);
    assert!(diagnostics[0].provenance.notes.is_empty());
}

#[test]
fn test_shape_sensitive_path_uses_raw_lane() {
    let config = strict_config().with_shape_sensitive_path("identifier");
    let context = ValidationContext::new(config.clone())
        .with_authoritative_evaluator(Arc::new(FailingEvaluator));
    let rules = RuleSet::compile(
        vec![
            RuleDefinition::new("system", RuleType::AllowedValues, "Patient.identifier.system")
                .with_parameter("allowed", json!(["A"])),
        ],
        &config,
    );
    let document = json!({"resourceType": "Patient", "identifier": [{"system": "B"}]});

    let diagnostics = validate(&document, &rules, &context).unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].provenance.notes.is_empty());
}

#[test]
fn test_raw_lane_failure_becomes_engine_fault() {
    let rules = compile(vec![
        RuleDefinition::new("complex", RuleType::Required, "Patient.identifier[system != 'A'].value"),
        RuleDefinition::new("name", RuleType::Required, "Patient.name"),
    ]);
    let document = json!({"resourceType": "Patient", "identifier": [{"system": "A"}]});

    let diagnostics = validate(&document, &rules, &ValidationContext::new(strict_config())).unwrap();

    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0].error_code, ErrorCode::EngineFault);
    assert_eq!(diagnostics[0].details["ruleType"], json!("Required"));
    assert_eq!(diagnostics[1].error_code, ErrorCode::RequiredMissing);
}

#[test]
fn test_complex_filter_handled_by_schema_lane() {
    let context = ValidationContext::new(strict_config())
        .with_authoritative_evaluator(schema_evaluator());
    let rules = compile(vec![RuleDefinition::new(
        "complex",
        RuleType::Required,
        "Patient.identifier[system != 'A'].value",
    )]);
    let document = json!({"resourceType": "Patient", "identifier": [
        {"system": "A", "value": "1"},
        {"system": "B"}
    ]});

    let diagnostics = validate(&document, &rules, &context).unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error_code, ErrorCode::RequiredMissing);
    assert_eq!(diagnostics[0].provenance.lane, Lane::Authoritative);
}

use octofhir_ruleguard::*;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[allow(dead_code)]
pub fn load_fixture(name: &str) -> JsonValue {
    let text = std::fs::read_to_string(fixture_path(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[allow(dead_code)]
pub fn strict_config() -> EngineConfig {
    EngineConfig::default().with_normalization(NormalizationMode::Strict)
}

#[allow(dead_code)]
pub fn compile(definitions: Vec<RuleDefinition>) -> RuleSet {
    RuleSet::compile(definitions, &strict_config())
}

#[allow(dead_code)]
pub fn fixture_context() -> ValidationContext {
    let terminology = TerminologySet::from_file(fixture_path("terminology.json")).unwrap();
    ValidationContext::new(strict_config()).with_terminology(terminology)
}

#[allow(dead_code)]
pub fn schema_evaluator() -> Arc<SchemaEvaluator> {
    let model = StructureModel::from_file(fixture_path("model.json")).unwrap();
    Arc::new(SchemaEvaluator::new(model))
}

#[allow(dead_code)]
pub fn for_rule<'d>(diagnostics: &'d [Diagnostic], rule_id: &str) -> Vec<&'d Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| d.rule_id.as_deref() == Some(rule_id))
        .collect()
}

#[allow(dead_code)]
pub fn pointers(diagnostics: &[&Diagnostic]) -> Vec<String> {
    diagnostics.iter().map(|d| d.pointer.to_string()).collect()
}

/// (code, pointer, details) of each diagnostic; everything but provenance
#[allow(dead_code)]
pub fn fingerprints(diagnostics: &[Diagnostic]) -> Vec<(ErrorCode, String, JsonValue)> {
    diagnostics
        .iter()
        .map(|d| {
            (
                d.error_code,
                d.pointer.to_string(),
                JsonValue::Object(d.details.clone()),
            )
        })
        .collect()
}

use criterion::{Criterion, criterion_group, criterion_main};
use octofhir_ruleguard::*;
use serde_json::{Value as JsonValue, json};
use std::hint::black_box;
use std::sync::Arc;

fn create_large_bundle(entries: usize) -> JsonValue {
    let entry: Vec<JsonValue> = (0..entries)
        .map(|i| {
            json!({"resource": {
                "resourceType": "Patient",
                "id": format!("p{i}"),
                "gender": if i % 3 == 0 { "other" } else { "female" },
                "identifier": [
                    {"system": "A", "value": format!("{i}")},
                    {"system": "B", "value": format!("x{i}")}
                ],
                "address": [{"line": ["1 Main St"]}, {"line": []}],
                "generalPractitioner": [{"reference": format!("Patient/p{}", i + 1)}]
            }})
        })
        .collect();
    json!({"resourceType": "Bundle", "entry": entry})
}

fn create_rules(config: &EngineConfig) -> RuleSet {
    RuleSet::compile(
        vec![
            RuleDefinition::new("gender", RuleType::AllowedValues, "Patient.gender")
                .with_parameter("allowed", json!(["male", "female"])),
            RuleDefinition::new("system", RuleType::FixedValue, "Patient.identifier.system")
                .with_parameter("expected", json!("A")),
            RuleDefinition::new("digits", RuleType::Pattern, "Patient.identifier.value")
                .with_parameter("pattern", json!("[0-9]+")),
            RuleDefinition::new("line", RuleType::Cardinality, "Patient.address.line")
                .with_parameter("min", json!(1)),
            RuleDefinition::new("gp", RuleType::ReferenceIntegrity, "Patient.generalPractitioner")
                .with_parameter("targetTypes", json!(["Practitioner"])),
            RuleDefinition::new("name", RuleType::Required, "Patient.name"),
        ],
        config,
    )
}

fn bench_rule_compilation(c: &mut Criterion) {
    let config = EngineConfig::default();
    c.bench_function("rule_compilation", |b| {
        b.iter(|| black_box(create_rules(&config)))
    });
}

fn bench_sequential_validation(c: &mut Criterion) {
    let config = EngineConfig::default().with_normalization(NormalizationMode::Production);
    let rules = create_rules(&config);
    let bundle = create_large_bundle(200);
    let validator = Validator::new(ValidationContext::new(config));

    c.bench_function("sequential_validation_200", |b| {
        b.iter(|| black_box(validator.validate(&bundle, &rules)).unwrap())
    });
}

fn bench_concurrent_validation(c: &mut Criterion) {
    let config = EngineConfig::default().with_normalization(NormalizationMode::Production);
    let rules = Arc::new(create_rules(&config));
    let bundle = Arc::new(create_large_bundle(200));
    let validator = Validator::new(ValidationContext::new(config));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("concurrent_validation_200", |b| {
        b.iter(|| {
            runtime
                .block_on(validator.validate_concurrent(Arc::clone(&bundle), Arc::clone(&rules)))
                .unwrap()
        })
    });
}

fn bench_path_parsing(c: &mut Criterion) {
    c.bench_function("path_parsing", |b| {
        b.iter(|| {
            black_box(PathExpression::parse(
                "Observation.component[code.coding.code = '8480-6'].value[x]",
            ))
            .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_rule_compilation,
    bench_sequential_validation,
    bench_concurrent_validation,
    bench_path_parsing
);

criterion_main!(benches);

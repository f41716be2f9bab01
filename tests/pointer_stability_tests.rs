mod common;

use common::*;
use octofhir_ruleguard::*;
use proptest::prelude::*;
use serde_json::{Value as JsonValue, json};

fn patient_with_identifiers(count: usize) -> JsonValue {
    let identifiers: Vec<JsonValue> = (0..count).map(|_| json!({"system": "B"})).collect();
    json!({"resourceType": "Patient", "identifier": identifiers})
}

fn system_rule() -> RuleSet {
    compile(vec![
        RuleDefinition::new("system", RuleType::AllowedValues, "Patient.identifier.system")
            .with_parameter("allowed", json!(["A"])),
    ])
}

#[test]
fn test_single_element_keeps_index() {
    let context = ValidationContext::new(strict_config());
    let one = validate(&patient_with_identifiers(1), &system_rule(), &context).unwrap();
    let three = validate(&patient_with_identifiers(3), &system_rule(), &context).unwrap();

    assert_eq!(one[0].pointer.to_string(), "/identifier/0/system");
    assert_eq!(
        three.iter().map(|d| d.pointer.to_string()).collect::<Vec<_>>(),
        vec![
            "/identifier/0/system",
            "/identifier/1/system",
            "/identifier/2/system"
        ]
    );
}

#[test]
fn test_pointers_round_trip_through_lookup() {
    let document = patient_with_identifiers(3);
    let diagnostics = validate(&document, &system_rule(), &ValidationContext::new(strict_config())).unwrap();
    for diagnostic in &diagnostics {
        let parsed = Pointer::parse(&diagnostic.pointer.to_string()).unwrap();
        assert_eq!(parsed.lookup(&document), Some(&json!("B")));
    }
}

proptest! {
    #[test]
    fn prop_every_element_is_index_addressed(count in 1usize..12, bad in proptest::collection::vec(any::<bool>(), 12)) {
        let identifiers: Vec<JsonValue> = (0..count)
            .map(|i| json!({"system": if bad[i] { "B" } else { "A" }}))
            .collect();
        let document = json!({"resourceType": "Patient", "identifier": identifiers});

        let diagnostics = validate(&document, &system_rule(), &ValidationContext::new(strict_config())).unwrap();
        let expected: Vec<String> = (0..count)
            .filter(|i| bad[*i])
            .map(|i| format!("/identifier/{i}/system"))
            .collect();
        let actual: Vec<String> = diagnostics.iter().map(|d| d.pointer.to_string()).collect();

        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_entry_pointers_carry_entry_index(entries in 1usize..8) {
        let entry: Vec<JsonValue> = (0..entries)
            .map(|_| json!({"resource": {"resourceType": "Patient"}}))
            .collect();
        let bundle = json!({"resourceType": "Bundle", "entry": entry});
        let rules = compile(vec![RuleDefinition::new("name", RuleType::Required, "Patient.name")]);

        let diagnostics = validate(&bundle, &rules, &ValidationContext::new(strict_config())).unwrap();

        prop_assert_eq!(diagnostics.len(), entries);
        for (i, diagnostic) in diagnostics.iter().enumerate() {
            prop_assert_eq!(diagnostic.collection_entry_index, i);
            prop_assert_eq!(diagnostic.pointer.to_string(), format!("/entry/{i}/resource"));
        }
    }
}

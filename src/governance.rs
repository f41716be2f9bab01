//! Static review of rule definitions.
//!
//! Review runs without any document. A rule with a BLOCKED finding is never
//! compiled into a [`RuleSet`](crate::validation::RuleSet); WARNING findings
//! are reported but the rule stays executable. Parameter problems are
//! warnings: the rule runs and reports `RULE_CONFIGURATION_ERROR` per entry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;

use crate::config::EngineConfig;
use crate::types::{PathError, PathExpression, RuleDefinition, details};
use crate::validation::compiled::{RuleConfigError, RuleKind};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceSeverity {
    #[default]
    Ok,
    Warning,
    Blocked,
}

impl fmt::Display for GovernanceSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GovernanceSeverity::Ok => "OK",
            GovernanceSeverity::Warning => "WARNING",
            GovernanceSeverity::Blocked => "BLOCKED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceCode {
    EmptyTargetPath,
    RootTargetPath,
    InvalidTargetPath,
    DynamicCodeSelection,
    DanglingScopeReference,
    MissingParameter,
    InvalidParameter,
    BroadWildcardPath,
    AuthorCodeIgnored,
    UnknownParameter,
    DuplicateRuleId,
}

impl GovernanceCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceCode::EmptyTargetPath => "EMPTY_TARGET_PATH",
            GovernanceCode::RootTargetPath => "ROOT_TARGET_PATH",
            GovernanceCode::InvalidTargetPath => "INVALID_TARGET_PATH",
            GovernanceCode::DynamicCodeSelection => "DYNAMIC_CODE_SELECTION",
            GovernanceCode::DanglingScopeReference => "DANGLING_SCOPE_REFERENCE",
            GovernanceCode::MissingParameter => "MISSING_PARAMETER",
            GovernanceCode::InvalidParameter => "INVALID_PARAMETER",
            GovernanceCode::BroadWildcardPath => "BROAD_WILDCARD_PATH",
            GovernanceCode::AuthorCodeIgnored => "AUTHOR_CODE_IGNORED",
            GovernanceCode::UnknownParameter => "UNKNOWN_PARAMETER",
            GovernanceCode::DuplicateRuleId => "DUPLICATE_RULE_ID",
        }
    }

    pub fn severity(&self) -> GovernanceSeverity {
        match self {
            GovernanceCode::EmptyTargetPath
            | GovernanceCode::RootTargetPath
            | GovernanceCode::InvalidTargetPath
            | GovernanceCode::DynamicCodeSelection
            | GovernanceCode::DanglingScopeReference => GovernanceSeverity::Blocked,
            GovernanceCode::MissingParameter
            | GovernanceCode::InvalidParameter
            | GovernanceCode::BroadWildcardPath
            | GovernanceCode::AuthorCodeIgnored
            | GovernanceCode::UnknownParameter
            | GovernanceCode::DuplicateRuleId => GovernanceSeverity::Warning,
        }
    }
}

impl fmt::Display for GovernanceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceFinding {
    pub code: GovernanceCode,
    pub severity: GovernanceSeverity,
    pub rule_id: String,
    pub details: Map<String, JsonValue>,
}

impl GovernanceFinding {
    fn new(code: GovernanceCode, rule_id: &str, details_value: JsonValue) -> Self {
        Self {
            code,
            severity: code.severity(),
            rule_id: rule_id.to_string(),
            details: details(details_value),
        }
    }
}

/// BLOCKED if any finding is BLOCKED, else WARNING if any is WARNING, else OK
pub fn overall_status(findings: &[GovernanceFinding]) -> GovernanceSeverity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(GovernanceSeverity::Ok)
}

/// Review one rule
pub fn review(rule: &RuleDefinition, config: &EngineConfig) -> Vec<GovernanceFinding> {
    let mut findings = Vec::new();
    let id = rule.id.as_str();

    match PathExpression::parse(&rule.target_path) {
        Err(PathError::Empty) => findings.push(GovernanceFinding::new(
            GovernanceCode::EmptyTargetPath,
            id,
            json!({"targetPath": rule.target_path}),
        )),
        Err(PathError::RootOnly) => findings.push(GovernanceFinding::new(
            GovernanceCode::RootTargetPath,
            id,
            json!({"targetPath": rule.target_path}),
        )),
        Err(err) => findings.push(GovernanceFinding::new(
            GovernanceCode::InvalidTargetPath,
            id,
            json!({"targetPath": rule.target_path, "reason": err.to_string()}),
        )),
        Ok(path) if path.is_root_level() => findings.push(GovernanceFinding::new(
            GovernanceCode::RootTargetPath,
            id,
            json!({"targetPath": rule.target_path}),
        )),
        Ok(path) => {
            let wildcards = path.wildcard_count();
            if wildcards > 0 {
                findings.push(GovernanceFinding::new(
                    GovernanceCode::BroadWildcardPath,
                    id,
                    json!({"targetPath": rule.target_path, "wildcards": wildcards}),
                ));
            }
        }
    }

    let known = rule.rule_type.known_parameters();
    for name in rule.parameters.keys() {
        if config.is_forbidden_parameter(name) {
            findings.push(GovernanceFinding::new(
                GovernanceCode::DynamicCodeSelection,
                id,
                json!({"parameter": name}),
            ));
        } else if !known.contains(&name.as_str()) {
            findings.push(GovernanceFinding::new(
                GovernanceCode::UnknownParameter,
                id,
                json!({"parameter": name, "ruleType": rule.rule_type.as_str()}),
            ));
        }
    }

    for (name, scope_path) in &rule.scopes {
        if let Err(err) = PathExpression::parse(scope_path) {
            findings.push(GovernanceFinding::new(
                GovernanceCode::InvalidParameter,
                id,
                json!({"parameter": format!("scopes.{name}"), "reason": err.to_string()}),
            ));
        }
    }

    match RuleKind::compile(rule) {
        Ok(_) => {}
        Err(RuleConfigError::DanglingScope { scope }) => findings.push(GovernanceFinding::new(
            GovernanceCode::DanglingScopeReference,
            id,
            json!({
                "scope": scope,
                "declaredScopes": rule.scopes.keys().collect::<Vec<_>>(),
            }),
        )),
        Err(RuleConfigError::MissingParameter { parameter }) => {
            findings.push(GovernanceFinding::new(
                GovernanceCode::MissingParameter,
                id,
                json!({"parameter": parameter, "ruleType": rule.rule_type.as_str()}),
            ))
        }
        Err(err) => findings.push(GovernanceFinding::new(
            GovernanceCode::InvalidParameter,
            id,
            json!({"parameter": err.parameter(), "reason": err.to_string()}),
        )),
    }

    if let Some(code) = &rule.diagnostic_code
        && rule.rule_type.has_engine_determined_code()
    {
        findings.push(GovernanceFinding::new(
            GovernanceCode::AuthorCodeIgnored,
            id,
            json!({"diagnosticCode": code, "ruleType": rule.rule_type.as_str()}),
        ));
    }

    findings
}

/// Findings for a whole rule set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceReport {
    pub status: GovernanceSeverity,
    pub findings: Vec<GovernanceFinding>,
}

impl GovernanceReport {
    pub fn findings_for(&self, rule_id: &str) -> Vec<&GovernanceFinding> {
        self.findings
            .iter()
            .filter(|f| f.rule_id == rule_id)
            .collect()
    }

    pub fn blocked_rule_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .findings
            .iter()
            .filter(|f| f.severity == GovernanceSeverity::Blocked)
            .map(|f| f.rule_id.as_str())
            .collect();
        ids.dedup();
        ids
    }
}

/// Review every rule plus cross-rule checks (duplicate ids)
pub fn review_rule_set(rules: &[RuleDefinition], config: &EngineConfig) -> GovernanceReport {
    let mut findings: Vec<GovernanceFinding> =
        rules.iter().flat_map(|rule| review(rule, config)).collect();

    let mut occurrences: IndexMap<&str, usize> = IndexMap::new();
    for rule in rules {
        *occurrences.entry(rule.id.as_str()).or_default() += 1;
    }
    for (id, count) in occurrences {
        if count > 1 {
            findings.push(GovernanceFinding::new(
                GovernanceCode::DuplicateRuleId,
                id,
                json!({"occurrences": count}),
            ));
        }
    }

    GovernanceReport {
        status: overall_status(&findings),
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleType;

    fn codes(findings: &[GovernanceFinding]) -> Vec<GovernanceCode> {
        findings.iter().map(|f| f.code).collect()
    }

    #[test]
    fn test_empty_and_root_paths_blocked() {
        let config = EngineConfig::default();
        let empty = review(&RuleDefinition::new("r", RuleType::Required, "  "), &config);
        assert_eq!(codes(&empty), vec![GovernanceCode::EmptyTargetPath]);
        assert_eq!(overall_status(&empty), GovernanceSeverity::Blocked);

        let root = review(&RuleDefinition::new("r", RuleType::Required, "Patient"), &config);
        assert_eq!(codes(&root), vec![GovernanceCode::RootTargetPath]);

        let dollar = review(&RuleDefinition::new("r", RuleType::Required, "$"), &config);
        assert_eq!(codes(&dollar), vec![GovernanceCode::RootTargetPath]);
    }

    #[test]
    fn test_dynamic_code_selection_blocked() {
        let rule = RuleDefinition::new("r", RuleType::AllowedValues, "status")
            .with_parameter("allowed", json!(["final"]))
            .with_parameter("codeMap", json!({"draft": "E1"}));
        let findings = review(&rule, &EngineConfig::default());
        assert_eq!(codes(&findings), vec![GovernanceCode::DynamicCodeSelection]);
        assert_eq!(overall_status(&findings), GovernanceSeverity::Blocked);
    }

    #[test]
    fn test_author_code_is_warning_only() {
        let rule =
            RuleDefinition::new("r", RuleType::Required, "name").with_diagnostic_code("MY-001");
        let findings = review(&rule, &EngineConfig::default());
        assert_eq!(codes(&findings), vec![GovernanceCode::AuthorCodeIgnored]);
        assert_eq!(overall_status(&findings), GovernanceSeverity::Warning);

        let predicate = RuleDefinition::new("p", RuleType::CustomPredicate, "status")
            .with_parameter("operator", json!("exists"))
            .with_diagnostic_code("MY-002");
        assert!(review(&predicate, &EngineConfig::default()).is_empty());
    }

    #[test]
    fn test_dangling_scope_blocked() {
        let rule = RuleDefinition::new("r", RuleType::CompositeAnswer, "component")
            .with_parameter("questionPath", json!("code.coding.code"))
            .with_parameter("questionCode", json!("8480-6"))
            .with_parameter("answerPath", json!("value[x]"))
            .with_parameter("answerType", json!("quantity"))
            .with_parameter("scope", json!("removed"));
        let findings = review(&rule, &EngineConfig::default());
        assert_eq!(codes(&findings), vec![GovernanceCode::DanglingScopeReference]);
    }

    #[test]
    fn test_wildcard_and_unknown_parameter_warnings() {
        let rule = RuleDefinition::new("r", RuleType::Required, "*.value")
            .with_parameter("colour", json!("blue"));
        let findings = review(&rule, &EngineConfig::default());
        assert_eq!(
            codes(&findings),
            vec![GovernanceCode::BroadWildcardPath, GovernanceCode::UnknownParameter]
        );
        assert_eq!(overall_status(&findings), GovernanceSeverity::Warning);
    }

    #[test]
    fn test_parameter_problems_are_warnings() {
        let missing = RuleDefinition::new("r", RuleType::Pattern, "telecom.value");
        let findings = review(&missing, &EngineConfig::default());
        assert_eq!(codes(&findings), vec![GovernanceCode::MissingParameter]);
        assert_eq!(overall_status(&findings), GovernanceSeverity::Warning);

        let invalid = RuleDefinition::new("r", RuleType::Pattern, "telecom.value")
            .with_parameter("pattern", json!("[unclosed"));
        let findings = review(&invalid, &EngineConfig::default());
        assert_eq!(codes(&findings), vec![GovernanceCode::InvalidParameter]);
        assert_eq!(findings[0].severity, GovernanceSeverity::Warning);
    }

    #[test]
    fn test_rule_set_duplicates() {
        let rules = vec![
            RuleDefinition::new("dup", RuleType::Required, "name"),
            RuleDefinition::new("dup", RuleType::Required, "gender"),
        ];
        let report = review_rule_set(&rules, &EngineConfig::default());
        assert_eq!(report.status, GovernanceSeverity::Warning);
        assert_eq!(codes(&report.findings), vec![GovernanceCode::DuplicateRuleId]);
        assert!(report.blocked_rule_ids().is_empty());
    }

    #[test]
    fn test_clean_rule_is_ok() {
        let rule = RuleDefinition::new("r", RuleType::Cardinality, "address.line")
            .with_parameter("min", json!(1));
        let findings = review(&rule, &EngineConfig::default());
        assert!(findings.is_empty());
        assert_eq!(overall_status(&findings), GovernanceSeverity::Ok);
    }
}

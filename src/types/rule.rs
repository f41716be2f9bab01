//! Author-owned rule definitions.
//!
//! These records come from an external authoring surface and are never
//! mutated by the engine. Parameters stay loosely typed here; they are
//! checked and compiled into a typed [`RuleKind`](crate::validation::compiled::RuleKind)
//! by the governance-gated rule set compiler.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::node::DocumentNode;

/// Closed set of rule types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Required,
    FixedValue,
    AllowedValues,
    Pattern,
    Cardinality,
    CodeMembership,
    ReferenceIntegrity,
    CustomPredicate,
    CompositeAnswer,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Required => "Required",
            RuleType::FixedValue => "FixedValue",
            RuleType::AllowedValues => "AllowedValues",
            RuleType::Pattern => "Pattern",
            RuleType::Cardinality => "Cardinality",
            RuleType::CodeMembership => "CodeMembership",
            RuleType::ReferenceIntegrity => "ReferenceIntegrity",
            RuleType::CustomPredicate => "CustomPredicate",
            RuleType::CompositeAnswer => "CompositeAnswer",
        }
    }

    /// Parameter names the rule type understands
    pub fn known_parameters(&self) -> &'static [&'static str] {
        match self {
            RuleType::Required => &[],
            RuleType::FixedValue => &["expected"],
            RuleType::AllowedValues => &["allowed"],
            RuleType::Pattern => &["pattern", "description"],
            RuleType::Cardinality => &["min", "max"],
            RuleType::CodeMembership => &["expectedSystem", "valueSet"],
            RuleType::ReferenceIntegrity => &["targetTypes", "allowExternal"],
            RuleType::CustomPredicate => &["operator", "value"],
            RuleType::CompositeAnswer => &[
                "questionPath",
                "questionCode",
                "answerPath",
                "answerType",
                "min",
                "max",
                "valueSet",
                "scope",
            ],
        }
    }

    /// Whether the emitted error code is fixed by the engine. Author codes on
    /// these types are ignored; custom predicates carry the author code in
    /// their details instead.
    pub fn has_engine_determined_code(&self) -> bool {
        !matches!(self, RuleType::CustomPredicate)
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    #[default]
    Error,
}

/// Which top-level entries a rule applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionFilter {
    /// Resource types the rule applies to; empty means every entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
    /// Entry must declare this profile in `meta.profile`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl CollectionFilter {
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_types: types.into_iter().map(Into::into).collect(),
            profile: None,
        }
    }

    pub fn matches(&self, resource: DocumentNode<'_>) -> bool {
        if !self.resource_types.is_empty() {
            let Some(resource_type) = resource.resource_type() else {
                return false;
            };
            if !self.resource_types.iter().any(|t| t == resource_type) {
                return false;
            }
        }

        if let Some(profile) = &self.profile {
            let declared = resource
                .field("meta")
                .and_then(|meta| meta.field("profile"))
                .map(|profiles| profiles.elements())
                .unwrap_or_default();
            return declared
                .iter()
                .any(|(_, p)| p.as_str() == Some(profile.as_str()));
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub target_path: String,
    #[serde(default)]
    pub collection_filter: CollectionFilter,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_code: Option<String>,
    /// Named sub-scopes (name -> path relative to the entry)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scopes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleDefinition {
    pub fn new(id: impl Into<String>, rule_type: RuleType, target_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rule_type,
            target_path: target_path.into(),
            collection_filter: CollectionFilter::default(),
            severity: Severity::Error,
            parameters: Map::new(),
            diagnostic_code: None,
            scopes: IndexMap::new(),
            description: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_filter = CollectionFilter::for_types(types);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_diagnostic_code(mut self, code: impl Into<String>) -> Self {
        self.diagnostic_code = Some(code.into());
        self
    }

    pub fn with_scope(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.scopes.insert(name.into(), path.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&JsonValue> {
        self.parameters.get(name).filter(|v| !v.is_null())
    }

    pub fn string_parameter(&self, name: &str) -> Option<&str> {
        self.parameter(name).and_then(|v| v.as_str())
    }

    /// Scope referenced by the `scope` parameter, if any
    pub fn referenced_scope(&self) -> Option<&str> {
        self.string_parameter("scope")
    }
}

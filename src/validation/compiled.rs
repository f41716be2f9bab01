//! Compiled rules ready for evaluation.
//!
//! A [`RuleDefinition`] keeps its parameters as loose JSON. Compilation checks
//! them once and produces a closed [`RuleKind`], so evaluators match on typed
//! variants instead of re-reading parameter maps per document. A [`RuleSet`]
//! only ever holds rules that passed governance review without a BLOCKED
//! finding. Rules whose parameters do not compile stay in the set as
//! [`RuleKind::Misconfigured`] and report a configuration error per entry.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::governance::{
    GovernanceFinding, GovernanceReport, GovernanceSeverity, review_rule_set,
};
use crate::types::{PathError, PathExpression, RuleDefinition, RuleType};

/// Why a rule's parameters cannot be compiled
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleConfigError {
    #[error("missing required parameter '{parameter}'")]
    MissingParameter { parameter: String },

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("invalid path '{path}': {source}")]
    InvalidPath {
        parameter: String,
        path: String,
        #[source]
        source: PathError,
    },

    #[error("scope '{scope}' is not declared by the rule")]
    DanglingScope { scope: String },
}

impl RuleConfigError {
    fn missing(parameter: &str) -> Self {
        Self::MissingParameter {
            parameter: parameter.to_string(),
        }
    }

    fn invalid(parameter: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// Parameter the error is about
    pub fn parameter(&self) -> &str {
        match self {
            Self::MissingParameter { parameter }
            | Self::InvalidParameter { parameter, .. }
            | Self::InvalidPath { parameter, .. } => parameter,
            Self::DanglingScope { .. } => "scope",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOperator {
    Exists,
    NotExists,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Matches,
}

impl PredicateOperator {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "exists" => Some(Self::Exists),
            "notExists" => Some(Self::NotExists),
            "equals" => Some(Self::Equals),
            "notEquals" => Some(Self::NotEquals),
            "greaterThan" => Some(Self::GreaterThan),
            "lessThan" => Some(Self::LessThan),
            "matches" => Some(Self::Matches),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::NotExists => "notExists",
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::GreaterThan => "greaterThan",
            Self::LessThan => "lessThan",
            Self::Matches => "matches",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub operator: PredicateOperator,
    pub value: Option<JsonValue>,
    pub regex: Option<Regex>,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} {}", self.operator.as_str(), value),
            None => f.write_str(self.operator.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Coding,
    Quantity,
}

impl AnswerType {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "decimal" => Some(Self::Decimal),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "dateTime" => Some(Self::DateTime),
            "coding" => Some(Self::Coding),
            "quantity" => Some(Self::Quantity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Coding => "coding",
            Self::Quantity => "quantity",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal | Self::Quantity)
    }

    pub fn is_coded(&self) -> bool {
        matches!(self, Self::Coding | Self::String)
    }
}

#[derive(Debug, Clone)]
pub struct CompositeAnswerSpec {
    /// Repeating structure to iterate (target path or a named scope)
    pub context_path: PathExpression,
    pub question_path: PathExpression,
    pub question_code: String,
    pub answer_path: PathExpression,
    pub answer_type: AnswerType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub value_set: Option<String>,
}

/// Typed rule semantics
#[derive(Debug, Clone)]
pub enum RuleKind {
    Required,
    FixedValue {
        expected: JsonValue,
    },
    AllowedValues {
        allowed: Vec<JsonValue>,
    },
    Pattern {
        regex: Regex,
        pattern: String,
        description: Option<String>,
    },
    Cardinality {
        min: u64,
        max: Option<u64>,
    },
    CodeMembership {
        expected_system: Option<String>,
        value_set: Option<String>,
    },
    ReferenceIntegrity {
        target_types: Vec<String>,
        allow_external: bool,
    },
    CustomPredicate {
        predicate: Predicate,
        author_code: Option<String>,
    },
    CompositeAnswer(Box<CompositeAnswerSpec>),
    /// Parameters failed to compile; evaluation only reports the problem
    Misconfigured {
        parameter: String,
        reason: String,
    },
}

impl RuleKind {
    /// Check and type the parameters of `rule`
    pub fn compile(rule: &RuleDefinition) -> std::result::Result<Self, RuleConfigError> {
        match rule.rule_type {
            RuleType::Required => Ok(RuleKind::Required),
            RuleType::FixedValue => Ok(RuleKind::FixedValue {
                expected: rule
                    .parameter("expected")
                    .cloned()
                    .ok_or_else(|| RuleConfigError::missing("expected"))?,
            }),
            RuleType::AllowedValues => {
                let allowed = rule
                    .parameter("allowed")
                    .ok_or_else(|| RuleConfigError::missing("allowed"))?
                    .as_array()
                    .ok_or_else(|| RuleConfigError::invalid("allowed", "must be an array"))?;
                if allowed.is_empty() {
                    return Err(RuleConfigError::invalid("allowed", "must not be empty"));
                }
                Ok(RuleKind::AllowedValues {
                    allowed: allowed.clone(),
                })
            }
            RuleType::Pattern => {
                let pattern = required_string(rule, "pattern")?;
                Ok(RuleKind::Pattern {
                    regex: full_match_regex("pattern", pattern)?,
                    pattern: pattern.to_string(),
                    description: optional_string(rule, "description")?,
                })
            }
            RuleType::Cardinality => {
                if rule.parameter("min").is_none() && rule.parameter("max").is_none() {
                    return Err(RuleConfigError::missing("min"));
                }
                let min = optional_count(rule, "min")?.unwrap_or(0);
                let max = optional_count(rule, "max")?;
                if let Some(max) = max
                    && min > max
                {
                    return Err(RuleConfigError::invalid(
                        "max",
                        format!("max {max} is below min {min}"),
                    ));
                }
                Ok(RuleKind::Cardinality { min, max })
            }
            RuleType::CodeMembership => {
                let expected_system = optional_string(rule, "expectedSystem")?;
                let value_set = optional_string(rule, "valueSet")?;
                if expected_system.is_none() && value_set.is_none() {
                    return Err(RuleConfigError::missing("valueSet"));
                }
                Ok(RuleKind::CodeMembership {
                    expected_system,
                    value_set,
                })
            }
            RuleType::ReferenceIntegrity => {
                let target_types = match rule.parameter("targetTypes") {
                    None => Vec::new(),
                    Some(JsonValue::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_str().map(str::to_string).ok_or_else(|| {
                                RuleConfigError::invalid("targetTypes", "must hold strings")
                            })
                        })
                        .collect::<std::result::Result<_, _>>()?,
                    Some(_) => {
                        return Err(RuleConfigError::invalid("targetTypes", "must be an array"));
                    }
                };
                let allow_external = match rule.parameter("allowExternal") {
                    None => false,
                    Some(JsonValue::Bool(flag)) => *flag,
                    Some(_) => {
                        return Err(RuleConfigError::invalid("allowExternal", "must be a boolean"));
                    }
                };
                Ok(RuleKind::ReferenceIntegrity {
                    target_types,
                    allow_external,
                })
            }
            RuleType::CustomPredicate => compile_predicate(rule),
            RuleType::CompositeAnswer => compile_composite(rule).map(|spec| RuleKind::CompositeAnswer(Box::new(spec))),
        }
    }
}

fn compile_predicate(rule: &RuleDefinition) -> std::result::Result<RuleKind, RuleConfigError> {
    let operator_text = required_string(rule, "operator")?;
    let operator = PredicateOperator::parse(operator_text).ok_or_else(|| {
        RuleConfigError::invalid("operator", format!("unknown operator '{operator_text}'"))
    })?;

    let value = rule.parameter("value").cloned();
    let mut regex = None;
    match operator {
        PredicateOperator::Exists | PredicateOperator::NotExists => {}
        PredicateOperator::Equals | PredicateOperator::NotEquals => {
            if value.is_none() {
                return Err(RuleConfigError::missing("value"));
            }
        }
        PredicateOperator::GreaterThan | PredicateOperator::LessThan => match &value {
            Some(JsonValue::Number(_)) | Some(JsonValue::String(_)) => {}
            Some(_) => {
                return Err(RuleConfigError::invalid(
                    "value",
                    "comparison needs a number or a string",
                ));
            }
            None => return Err(RuleConfigError::missing("value")),
        },
        PredicateOperator::Matches => {
            let pattern = required_string(rule, "value")?;
            regex = Some(full_match_regex("value", pattern)?);
        }
    }

    Ok(RuleKind::CustomPredicate {
        predicate: Predicate {
            operator,
            value,
            regex,
        },
        author_code: rule.diagnostic_code.clone(),
    })
}

fn compile_composite(rule: &RuleDefinition) -> std::result::Result<CompositeAnswerSpec, RuleConfigError> {
    let context_text = match rule.referenced_scope() {
        Some(scope) => rule
            .scopes
            .get(scope)
            .map(String::as_str)
            .ok_or_else(|| RuleConfigError::DanglingScope {
                scope: scope.to_string(),
            })?,
        None => rule.target_path.as_str(),
    };
    let context_path = parse_path_parameter("scope", context_text)?;

    let question_path = parse_path_parameter("questionPath", required_string(rule, "questionPath")?)?;
    let answer_path = parse_path_parameter("answerPath", required_string(rule, "answerPath")?)?;
    let question_code = match rule.parameter("questionCode") {
        Some(JsonValue::String(code)) if !code.trim().is_empty() => code.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(RuleConfigError::invalid("questionCode", "must be a non-empty string"));
        }
        None => return Err(RuleConfigError::missing("questionCode")),
    };

    let type_text = required_string(rule, "answerType")?;
    let answer_type = AnswerType::parse(type_text).ok_or_else(|| {
        RuleConfigError::invalid("answerType", format!("unknown answer type '{type_text}'"))
    })?;

    let min = optional_number(rule, "min")?;
    let max = optional_number(rule, "max")?;
    if (min.is_some() || max.is_some()) && !answer_type.is_numeric() {
        let parameter = if min.is_some() { "min" } else { "max" };
        return Err(RuleConfigError::invalid(
            parameter,
            format!("range bounds need a numeric answer type, not {}", answer_type.as_str()),
        ));
    }
    if let (Some(lo), Some(hi)) = (min, max)
        && lo > hi
    {
        return Err(RuleConfigError::invalid("max", format!("max {hi} is below min {lo}")));
    }

    let value_set = optional_string(rule, "valueSet")?;
    if value_set.is_some() && !answer_type.is_coded() {
        return Err(RuleConfigError::invalid(
            "valueSet",
            format!("value sets need a coded answer type, not {}", answer_type.as_str()),
        ));
    }

    Ok(CompositeAnswerSpec {
        context_path,
        question_path,
        question_code,
        answer_path,
        answer_type,
        min,
        max,
        value_set,
    })
}

fn required_string<'r>(rule: &'r RuleDefinition, name: &str) -> std::result::Result<&'r str, RuleConfigError> {
    match rule.parameter(name) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(JsonValue::String(_)) => Err(RuleConfigError::invalid(name, "must not be blank")),
        Some(_) => Err(RuleConfigError::invalid(name, "must be a string")),
        None => Err(RuleConfigError::missing(name)),
    }
}

fn optional_string(rule: &RuleDefinition, name: &str) -> std::result::Result<Option<String>, RuleConfigError> {
    match rule.parameter(name) {
        None => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RuleConfigError::invalid(name, "must be a string")),
    }
}

fn optional_count(rule: &RuleDefinition, name: &str) -> std::result::Result<Option<u64>, RuleConfigError> {
    match rule.parameter(name) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| RuleConfigError::invalid(name, "must be a non-negative integer")),
    }
}

fn optional_number(rule: &RuleDefinition, name: &str) -> std::result::Result<Option<f64>, RuleConfigError> {
    match rule.parameter(name) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| RuleConfigError::invalid(name, "must be a number")),
    }
}

fn full_match_regex(parameter: &str, pattern: &str) -> std::result::Result<Regex, RuleConfigError> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| RuleConfigError::invalid(parameter, e.to_string()))
}

fn parse_path_parameter(parameter: &str, text: &str) -> std::result::Result<PathExpression, RuleConfigError> {
    PathExpression::parse(text).map_err(|source| RuleConfigError::InvalidPath {
        parameter: parameter.to_string(),
        path: text.to_string(),
        source,
    })
}

/// A rule that passed governance, with its target path and kind compiled
#[derive(Debug, Clone)]
pub struct ExecutableRule {
    pub definition: RuleDefinition,
    pub path: PathExpression,
    pub kind: RuleKind,
    /// Non-blocking governance findings recorded at compile time
    pub warnings: Vec<GovernanceFinding>,
}

impl ExecutableRule {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn rule_type(&self) -> RuleType {
        self.definition.rule_type
    }

    /// False when the target path starts with a different resource type
    /// than the entry's, e.g. `Observation.status` on a Patient.
    pub fn applies_to_type(&self, resource_type: Option<&str>) -> bool {
        match self.path.leading_type() {
            Some(leading) => resource_type == Some(leading),
            None => true,
        }
    }
}

/// Governance-gated collection of executable rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ExecutableRule>,
    report: GovernanceReport,
}

impl RuleSet {
    /// Review every rule and compile those without a BLOCKED finding
    pub fn compile(definitions: Vec<RuleDefinition>, config: &EngineConfig) -> Self {
        let report = review_rule_set(&definitions, config);
        let mut rules = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let findings = report.findings_for(&definition.id);
            if findings
                .iter()
                .any(|f| f.severity == GovernanceSeverity::Blocked)
            {
                tracing::debug!(rule_id = %definition.id, "rule blocked by governance, not executable");
                continue;
            }

            // Unparseable target paths are BLOCKED by review
            let path = match PathExpression::parse(&definition.target_path) {
                Ok(path) => path,
                Err(err) => {
                    tracing::error!(rule_id = %definition.id, error = %err, "target path failed after review");
                    continue;
                }
            };
            let kind = RuleKind::compile(&definition).unwrap_or_else(|err| {
                tracing::warn!(rule_id = %definition.id, error = %err, "rule parameters do not compile");
                RuleKind::Misconfigured {
                    parameter: err.parameter().to_string(),
                    reason: err.to_string(),
                }
            });

            let warnings: Vec<GovernanceFinding> = findings.into_iter().cloned().collect();
            rules.push(ExecutableRule {
                definition,
                path,
                kind,
                warnings,
            });
        }

        tracing::info!(
            executable = rules.len(),
            blocked = report.blocked_rule_ids().len(),
            "compiled rule set"
        );

        Self { rules, report }
    }

    /// Parse a JSON array of rule definitions and compile it
    pub fn from_json_str(text: &str, config: &EngineConfig) -> Result<Self> {
        let definitions: Vec<RuleDefinition> = serde_json::from_str(text)?;
        Ok(Self::compile(definitions, config))
    }

    pub fn from_file(path: impl AsRef<std::path::Path>, config: &EngineConfig) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text, config)
    }

    pub fn rules(&self) -> &[ExecutableRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn report(&self) -> &GovernanceReport {
        &self.report
    }

    pub fn get(&self, rule_id: &str) -> Option<&ExecutableRule> {
        self.rules.iter().find(|r| r.id() == rule_id)
    }
}

//! Canonical diagnostic shape returned by validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::pointer::Pointer;
use super::rule::Severity;

/// Where a diagnostic came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticSource {
    Structural,
    RuleEngine,
    Reference,
    CompositeAnswer,
}

/// Engine-determined error codes. Each code fixes the key set of `details`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequiredMissing,
    FixedValueMismatch,
    ValueNotAllowed,
    PatternMismatch,
    CardinalityViolation,
    CodeSystemMismatch,
    CodeNotInValueset,
    ReferenceNotFound,
    ReferenceTypeMismatch,
    ReferenceInvalidFormat,
    CustomPredicateFailed,
    AnswerValueMissing,
    AnswerTypeMismatch,
    AnswerOutOfRange,
    AnswerNotInValueset,
    AnswerQuestionNotFound,
    AnswerContextMissing,
    RuleConfigurationError,
    EngineFault,
    StructureInvalid,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 20] = [
        ErrorCode::RequiredMissing,
        ErrorCode::FixedValueMismatch,
        ErrorCode::ValueNotAllowed,
        ErrorCode::PatternMismatch,
        ErrorCode::CardinalityViolation,
        ErrorCode::CodeSystemMismatch,
        ErrorCode::CodeNotInValueset,
        ErrorCode::ReferenceNotFound,
        ErrorCode::ReferenceTypeMismatch,
        ErrorCode::ReferenceInvalidFormat,
        ErrorCode::CustomPredicateFailed,
        ErrorCode::AnswerValueMissing,
        ErrorCode::AnswerTypeMismatch,
        ErrorCode::AnswerOutOfRange,
        ErrorCode::AnswerNotInValueset,
        ErrorCode::AnswerQuestionNotFound,
        ErrorCode::AnswerContextMissing,
        ErrorCode::RuleConfigurationError,
        ErrorCode::EngineFault,
        ErrorCode::StructureInvalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RequiredMissing => "REQUIRED_MISSING",
            ErrorCode::FixedValueMismatch => "FIXED_VALUE_MISMATCH",
            ErrorCode::ValueNotAllowed => "VALUE_NOT_ALLOWED",
            ErrorCode::PatternMismatch => "PATTERN_MISMATCH",
            ErrorCode::CardinalityViolation => "CARDINALITY_VIOLATION",
            ErrorCode::CodeSystemMismatch => "CODE_SYSTEM_MISMATCH",
            ErrorCode::CodeNotInValueset => "CODE_NOT_IN_VALUESET",
            ErrorCode::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            ErrorCode::ReferenceTypeMismatch => "REFERENCE_TYPE_MISMATCH",
            ErrorCode::ReferenceInvalidFormat => "REFERENCE_INVALID_FORMAT",
            ErrorCode::CustomPredicateFailed => "CUSTOM_PREDICATE_FAILED",
            ErrorCode::AnswerValueMissing => "ANSWER_VALUE_MISSING",
            ErrorCode::AnswerTypeMismatch => "ANSWER_TYPE_MISMATCH",
            ErrorCode::AnswerOutOfRange => "ANSWER_OUT_OF_RANGE",
            ErrorCode::AnswerNotInValueset => "ANSWER_NOT_IN_VALUESET",
            ErrorCode::AnswerQuestionNotFound => "ANSWER_QUESTION_NOT_FOUND",
            ErrorCode::AnswerContextMissing => "ANSWER_CONTEXT_MISSING",
            ErrorCode::RuleConfigurationError => "RULE_CONFIGURATION_ERROR",
            ErrorCode::EngineFault => "ENGINE_FAULT",
            ErrorCode::StructureInvalid => "STRUCTURE_INVALID",
        }
    }

    /// The exact key set `details` must carry for this code
    pub fn detail_keys(&self) -> &'static [&'static str] {
        match self {
            ErrorCode::RequiredMissing => &["required"],
            ErrorCode::FixedValueMismatch => &["actual", "expected"],
            ErrorCode::ValueNotAllowed => &["actual", "allowed", "valueType"],
            ErrorCode::PatternMismatch => &["actual", "pattern", "description"],
            ErrorCode::CardinalityViolation => &["min", "max", "actual"],
            ErrorCode::CodeSystemMismatch => &["expectedSystem", "actualSystem"],
            ErrorCode::CodeNotInValueset => &["system", "code", "valueSet"],
            ErrorCode::ReferenceNotFound => &["reference"],
            ErrorCode::ReferenceTypeMismatch => &["reference", "expectedTypes", "actualType"],
            ErrorCode::ReferenceInvalidFormat => &["reference"],
            ErrorCode::CustomPredicateFailed => &["predicate", "actual", "authorCode"],
            ErrorCode::AnswerValueMissing => &["question"],
            ErrorCode::AnswerTypeMismatch => &["question", "expectedType", "actualType"],
            ErrorCode::AnswerOutOfRange => &["question", "actual", "min", "max"],
            ErrorCode::AnswerNotInValueset => &["question", "system", "code", "valueSet"],
            ErrorCode::AnswerQuestionNotFound => &["question"],
            ErrorCode::AnswerContextMissing => &["context"],
            ErrorCode::RuleConfigurationError => &["ruleType", "parameter", "reason"],
            ErrorCode::EngineFault => &["ruleType", "reason"],
            ErrorCode::StructureInvalid => &["reason"],
        }
    }

    pub fn source(&self) -> DiagnosticSource {
        match self {
            ErrorCode::ReferenceNotFound
            | ErrorCode::ReferenceTypeMismatch
            | ErrorCode::ReferenceInvalidFormat => DiagnosticSource::Reference,
            ErrorCode::AnswerValueMissing
            | ErrorCode::AnswerTypeMismatch
            | ErrorCode::AnswerOutOfRange
            | ErrorCode::AnswerNotInValueset
            | ErrorCode::AnswerQuestionNotFound
            | ErrorCode::AnswerContextMissing => DiagnosticSource::CompositeAnswer,
            ErrorCode::StructureInvalid => DiagnosticSource::Structural,
            _ => DiagnosticSource::RuleEngine,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Authoritative,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    Strict,
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub lane: Lane,
    pub confidence: Confidence,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Provenance {
    pub fn for_lane(lane: Lane) -> Self {
        let confidence = match lane {
            Lane::Authoritative => Confidence::Strict,
            Lane::Raw => Confidence::BestEffort,
        };
        Self {
            lane,
            confidence,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub source: DiagnosticSource,
    pub severity: Severity,
    pub collection_entry_index: usize,
    pub pointer: Pointer,
    pub error_code: ErrorCode,
    pub details: Map<String, JsonValue>,
    pub provenance: Provenance,
    /// Rule that produced the diagnostic; `None` for structural findings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// Key set of `details` in insertion-independent order
    pub fn detail_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.details.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Turn a `json!({...})` object into a details map
pub fn details(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

use thiserror::Error;

use crate::authoritative::LaneError;

#[derive(Error, Debug)]
pub enum RuleEngineError {
    #[error("Rule {rule_id} could not be evaluated: {source}")]
    LaneFailure {
        rule_id: String,
        #[source]
        source: LaneError,
    },

    #[error("Details for {code} drifted from schema: expected {expected:?}, got {actual:?}")]
    DetailSchemaDrift {
        code: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u128 },

    #[error("Concurrency error: {message}")]
    Concurrency { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuleEngineError>;

impl RuleEngineError {
    pub fn lane_failure<S: Into<String>>(rule_id: S, source: LaneError) -> Self {
        Self::LaneFailure {
            rule_id: rule_id.into(),
            source,
        }
    }

    pub fn invalid_document<S: Into<String>>(message: S) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }
}

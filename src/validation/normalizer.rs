//! Canonical diagnostic output.
//!
//! Deduplicates what two lanes emitted for the same location, strips
//! internal planning hints and checks each `details` map against the key set
//! its error code declares.

use std::collections::HashSet;

use crate::config::NormalizationMode;
use crate::error::{Result, RuleEngineError};
use crate::types::{Diagnostic, ErrorCode, Pointer};

/// Engine output before normalization; `hints` never leave the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawDiagnostic {
    pub diagnostic: Diagnostic,
    pub hints: Vec<String>,
}

impl RawDiagnostic {
    pub fn new(diagnostic: Diagnostic, hints: Vec<String>) -> Self {
        Self { diagnostic, hints }
    }
}

impl From<Diagnostic> for RawDiagnostic {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::new(diagnostic, Vec::new())
    }
}

type DedupKey = (Option<String>, usize, Pointer, ErrorCode, String);

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizer {
    mode: NormalizationMode,
}

impl ErrorNormalizer {
    pub fn new(mode: NormalizationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    /// First occurrence wins; order is otherwise preserved
    pub fn normalize(&self, raw: Vec<RawDiagnostic>) -> Result<Vec<Diagnostic>> {
        let mut seen: HashSet<DedupKey> = HashSet::with_capacity(raw.len());
        let mut output = Vec::with_capacity(raw.len());

        for RawDiagnostic { diagnostic, hints } in raw {
            if !hints.is_empty() {
                tracing::trace!(hints = ?hints, "dropping internal hints");
            }

            let key: DedupKey = (
                diagnostic.rule_id.clone(),
                diagnostic.collection_entry_index,
                diagnostic.pointer.clone(),
                diagnostic.error_code,
                serde_json::to_string(&diagnostic.details)?,
            );
            if !seen.insert(key) {
                continue;
            }

            self.check_details(&diagnostic)?;
            output.push(diagnostic);
        }

        Ok(output)
    }

    fn check_details(&self, diagnostic: &Diagnostic) -> Result<()> {
        let mut expected: Vec<String> = diagnostic
            .error_code
            .detail_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        expected.sort();
        let actual = diagnostic.detail_keys();
        if expected == actual {
            return Ok(());
        }

        match self.mode {
            NormalizationMode::Strict => Err(RuleEngineError::DetailSchemaDrift {
                code: diagnostic.error_code.to_string(),
                expected,
                actual,
            }),
            NormalizationMode::Production => {
                tracing::warn!(
                    code = %diagnostic.error_code,
                    expected = ?expected,
                    actual = ?actual,
                    "diagnostic details drifted from schema, passing through"
                );
                Ok(())
            }
        }
    }
}

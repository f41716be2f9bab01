//! Immutable value-set membership lookups.
//!
//! A [`TerminologySet`] is an input to validation, never edited by the
//! engine. Codes are `(system, code)` pairs; a code without a system in
//! either the set or the lookup matches on the code alone.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::error::Result;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminologyError {
    #[error("Value set not found: {url}")]
    ValueSetNotFound { url: String },
}

/// One `(system, code)` member of a value set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
}

impl Concept {
    pub fn new(system: Option<&str>, code: &str) -> Self {
        Self {
            system: system.map(str::to_string),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminologySet {
    #[serde(default)]
    value_sets: IndexMap<String, IndexSet<Concept>>,
}

impl TerminologySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> TerminologySetBuilder {
        TerminologySetBuilder::default()
    }

    /// Load from `{"valueSets": {"<url>": [{"system": .., "code": ..}]}}`
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn value_set_count(&self) -> usize {
        self.value_sets.len()
    }

    /// Whether `(system, code)` is a member of the value set
    pub fn contains(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> std::result::Result<bool, TerminologyError> {
        let members = self
            .value_sets
            .get(value_set)
            .ok_or_else(|| TerminologyError::ValueSetNotFound {
                url: value_set.to_string(),
            })?;

        if members.contains(&Concept::new(system, code)) {
            return Ok(true);
        }

        // Loose matching on the code alone when either side carries no system
        Ok(members
            .iter()
            .any(|c| c.code == code && (system.is_none() || c.system.is_none())))
    }
}

#[derive(Debug, Default)]
pub struct TerminologySetBuilder {
    value_sets: IndexMap<String, IndexSet<Concept>>,
}

impl TerminologySetBuilder {
    pub fn code(mut self, value_set: &str, system: Option<&str>, code: &str) -> Self {
        self.value_sets
            .entry(value_set.to_string())
            .or_default()
            .insert(Concept::new(system, code));
        self
    }

    pub fn codes(mut self, value_set: &str, system: Option<&str>, codes: &[&str]) -> Self {
        for code in codes {
            self = self.code(value_set, system, code);
        }
        self
    }

    /// Declare a value set with no members
    pub fn empty_value_set(mut self, value_set: &str) -> Self {
        self.value_sets.entry(value_set.to_string()).or_default();
        self
    }

    pub fn build(self) -> TerminologySet {
        TerminologySet {
            value_sets: self.value_sets,
        }
    }
}

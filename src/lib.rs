//! # OctoFHIR RuleGuard
//!
//! A rule engine that validates FHIR-style JSON documents against declarative
//! rules and reports every violation with a stable, machine-readable error
//! code and an RFC 6901 pointer to the offending node.
//!
//! ## Features
//!
//! - **Deterministic diagnostics**: error codes are chosen by the engine from
//!   the rule type, never by rule authors
//! - **Two evaluation lanes**: an optional model-aware evaluator with an
//!   automatic, per-rule fallback to raw JSON navigation
//! - **Governance**: rule sets are reviewed before execution; blocked rules
//!   never run
//! - **Concurrent validation**: entries are validated in parallel batches
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_ruleguard::*;
//! use serde_json::json;
//!
//! # fn example() -> Result<()> {
//! let config = EngineConfig::default();
//! let rules = RuleSet::compile(
//!     vec![RuleDefinition::new("patient-name", RuleType::Required, "Patient.name")],
//!     &config,
//! );
//! let context = ValidationContext::new(config);
//! let document = json!({"resourceType": "Patient"});
//!
//! for diagnostic in validate(&document, &rules, &context)? {
//!     println!("{} at {}", diagnostic.error_code, diagnostic.pointer);
//! }
//! # Ok(())
//! # }
//! ```

pub mod authoritative;
pub mod config;
pub mod error;
pub mod governance;
pub mod reference;
pub mod resolver;
pub mod terminology;
pub mod types;
pub mod utils;
pub mod validation;

pub use authoritative::{AuthoritativeEvaluator, LaneError, SchemaEvaluator, StructureModel};
pub use config::{EngineConfig, NormalizationMode, PerformanceConfig};
pub use error::Result; // Our Result type takes precedence
pub use error::RuleEngineError;
pub use governance::{
    GovernanceCode, GovernanceFinding, GovernanceReport, GovernanceSeverity, review,
    review_rule_set,
};
pub use reference::{ContainedIndex, EntryIndex, ReferenceResolution};
pub use resolver::{LocationResolver, Match};
pub use terminology::{Concept, TerminologySet};
pub use types::*;
pub use validation::{
    ErrorNormalizer, EvaluationPlan, EvaluationPlanner, ExecutableRule, RuleSet,
    ValidationContext, ValidationStats, Validator, validate,
};

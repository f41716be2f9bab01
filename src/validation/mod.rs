//! Document validation against a compiled rule set.
//!
//! Entries of the root collection are independent: each is validated on its
//! own, every applicable rule runs on it, and a failing rule only costs that
//! rule an `ENGINE_FAULT` diagnostic. Results are concatenated in entry
//! order.

pub mod compiled;
pub mod composite;
pub mod engine;
pub mod evaluators;
pub mod lanes;
pub mod normalizer;
pub mod planner;

use serde_json::{Value as JsonValue, json};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::authoritative::AuthoritativeEvaluator;
use crate::config::EngineConfig;
use crate::error::{Result, RuleEngineError};
use crate::reference::EntryIndex;
use crate::terminology::TerminologySet;
use crate::types::{Diagnostic, ErrorCode, Lane, Pointer, Provenance, Severity, details};
use crate::utils::{Timer, batch_process, with_timeout};

pub use compiled::{
    AnswerType, CompositeAnswerSpec, ExecutableRule, Predicate, PredicateOperator,
    RuleConfigError, RuleKind, RuleSet,
};
pub use engine::{EntryContext, LaneOutcome, RuleEngine};
pub use lanes::{AuthoritativeLane, MatchSource, RawLane};
pub use normalizer::{ErrorNormalizer, RawDiagnostic};
pub use planner::{EvaluationPlan, EvaluationPlanner};

/// Immutable inputs shared by every validation call
#[derive(Clone)]
pub struct ValidationContext {
    config: Arc<EngineConfig>,
    terminology: Arc<TerminologySet>,
    authoritative: Option<Arc<dyn AuthoritativeEvaluator>>,
}

impl std::fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("config", &self.config)
            .field("value_sets", &self.terminology.value_set_count())
            .field("authoritative", &self.authoritative.is_some())
            .finish()
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ValidationContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            terminology: Arc::new(TerminologySet::new()),
            authoritative: None,
        }
    }

    pub fn with_terminology(mut self, terminology: TerminologySet) -> Self {
        self.terminology = Arc::new(terminology);
        self
    }

    pub fn with_authoritative_evaluator(mut self, evaluator: Arc<dyn AuthoritativeEvaluator>) -> Self {
        self.authoritative = Some(evaluator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn terminology(&self) -> &TerminologySet {
        &self.terminology
    }
}

/// Counters for one validation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationStats {
    pub entries: usize,
    pub rules_evaluated: usize,
    pub fallbacks: usize,
    pub engine_faults: usize,
    pub diagnostics: usize,
    pub elapsed: Duration,
}

impl ValidationStats {
    fn absorb(&mut self, other: ValidationStats) {
        self.entries += other.entries;
        self.rules_evaluated += other.rules_evaluated;
        self.fallbacks += other.fallbacks;
        self.engine_faults += other.engine_faults;
        self.diagnostics += other.diagnostics;
    }
}

/// One position of the root collection
enum EntrySlot<'a> {
    Resource {
        index: usize,
        resource: &'a JsonValue,
        base: Pointer,
    },
    Invalid {
        index: usize,
        pointer: Pointer,
        reason: String,
    },
}

impl EntrySlot<'_> {
    fn index(&self) -> usize {
        match self {
            EntrySlot::Resource { index, .. } | EntrySlot::Invalid { index, .. } => *index,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    context: ValidationContext,
}

impl Validator {
    pub fn new(context: ValidationContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Validate every entry with every applicable rule
    pub fn validate(&self, document: &JsonValue, rules: &RuleSet) -> Result<Vec<Diagnostic>> {
        self.validate_with_stats(document, rules)
            .map(|(diagnostics, _)| diagnostics)
    }

    pub fn validate_with_stats(
        &self,
        document: &JsonValue,
        rules: &RuleSet,
    ) -> Result<(Vec<Diagnostic>, ValidationStats)> {
        let timer = Timer::new();
        let (diagnostics, mut stats) = self.validate_range(document, rules, None)?;
        stats.elapsed = timer.elapsed();

        tracing::info!(
            entries = stats.entries,
            rules = rules.len(),
            diagnostics = stats.diagnostics,
            fallbacks = stats.fallbacks,
            elapsed_ms = timer.elapsed_ms(),
            "validation finished"
        );
        Ok((diagnostics, stats))
    }

    /// Validate entries in parallel batches on the blocking pool. The whole
    /// run is bounded by `performance.validation_timeout`; on timeout nothing
    /// is returned.
    pub async fn validate_concurrent(
        &self,
        document: Arc<JsonValue>,
        rules: Arc<RuleSet>,
    ) -> Result<Vec<Diagnostic>> {
        let run = self.run_concurrent(document, rules);
        match self.context.config.performance.validation_timeout {
            Some(deadline) => with_timeout(run, deadline).await?,
            None => run.await,
        }
    }

    async fn run_concurrent(
        &self,
        document: Arc<JsonValue>,
        rules: Arc<RuleSet>,
    ) -> Result<Vec<Diagnostic>> {
        let performance = &self.context.config.performance;
        let entry_count = entry_slots(&document, &self.context.config.root_collection)?.len();
        let batch_size = performance.batch_size.max(1);

        let ranges: Vec<Range<usize>> = (0..entry_count)
            .step_by(batch_size)
            .map(|start| start..start.saturating_add(batch_size).min(entry_count))
            .collect();

        tracing::debug!(
            entries = entry_count,
            batches = ranges.len(),
            "validating entries concurrently"
        );

        let results = batch_process(ranges, performance.max_concurrent_entries, |range| {
            let validator = self.clone();
            let document = Arc::clone(&document);
            let rules = Arc::clone(&rules);
            async move {
                tokio::task::spawn_blocking(move || {
                    validator.validate_range(&document, &rules, Some(range))
                })
                .await
            }
        })
        .await;

        let mut diagnostics = Vec::new();
        for result in results {
            let (batch, _) = result.map_err(|e| RuleEngineError::concurrency(e.to_string()))??;
            diagnostics.extend(batch);
        }
        Ok(diagnostics)
    }

    fn validate_range(
        &self,
        document: &JsonValue,
        rules: &RuleSet,
        range: Option<Range<usize>>,
    ) -> Result<(Vec<Diagnostic>, ValidationStats)> {
        let config = &self.context.config;
        let slots = entry_slots(document, &config.root_collection)?;
        let entries = EntryIndex::from_document(document, &config.root_collection);
        let engine = RuleEngine::new(config, self.context.authoritative.as_deref());
        let normalizer = ErrorNormalizer::new(config.normalization);

        let mut diagnostics = Vec::new();
        let mut stats = ValidationStats::default();
        for slot in slots
            .iter()
            .filter(|s| range.as_ref().is_none_or(|r| r.contains(&s.index())))
        {
            let (raw, entry_stats) = self.validate_slot(&engine, slot, rules, &entries);
            let normalized = normalizer.normalize(raw)?;
            stats.absorb(entry_stats);
            stats.diagnostics += normalized.len();
            diagnostics.extend(normalized);
        }

        #[cfg(feature = "performance-metrics")]
        metrics::counter!("ruleguard_diagnostics_total").increment(diagnostics.len() as u64);

        Ok((diagnostics, stats))
    }

    fn validate_slot(
        &self,
        engine: &RuleEngine<'_>,
        slot: &EntrySlot<'_>,
        rules: &RuleSet,
        entries: &EntryIndex,
    ) -> (Vec<RawDiagnostic>, ValidationStats) {
        let mut stats = ValidationStats {
            entries: 1,
            ..Default::default()
        };

        let (index, resource, base) = match slot {
            EntrySlot::Invalid {
                index,
                pointer,
                reason,
            } => {
                let diagnostic = structure_invalid(*index, pointer.clone(), reason);
                return (vec![diagnostic.into()], stats);
            }
            EntrySlot::Resource {
                index,
                resource,
                base,
            } => (*index, *resource, base.clone()),
        };

        let entry = EntryContext::new(index, resource, base, entries, &self.context.terminology);
        let mut raw = Vec::new();

        for rule in rules.rules() {
            if !rule.definition.collection_filter.matches(entry.resource)
                || !rule.applies_to_type(entry.resource_type)
            {
                continue;
            }
            stats.rules_evaluated += 1;
            #[cfg(feature = "performance-metrics")]
            metrics::counter!("ruleguard_rules_evaluated_total").increment(1);

            let plan = engine.plan(rule, &entry);
            match engine.evaluate(rule, &entry, &plan) {
                Ok(outcome) => {
                    if let LaneOutcome::FallenBack { reason, .. } = &outcome {
                        tracing::debug!(rule_id = %rule.id(), entry = index, reason = %reason, "rule fell back to raw lane");
                        stats.fallbacks += 1;
                    }
                    raw.extend(
                        outcome
                            .into_diagnostics()
                            .into_iter()
                            .map(|d| RawDiagnostic::new(d, plan.fallback_reasons.clone())),
                    );
                }
                Err(err) => {
                    tracing::warn!(rule_id = %rule.id(), entry = index, error = %err, "rule failed");
                    stats.engine_faults += 1;
                    raw.push(RawDiagnostic::new(
                        engine_fault(rule, &entry, &err),
                        plan.fallback_reasons.clone(),
                    ));
                }
            }
        }

        (raw, stats)
    }
}

/// Validate `document` with `rules` using a fresh [`Validator`]
pub fn validate(document: &JsonValue, rules: &RuleSet, context: &ValidationContext) -> Result<Vec<Diagnostic>> {
    Validator::new(context.clone()).validate(document, rules)
}

fn entry_slots<'a>(document: &'a JsonValue, collection: &str) -> Result<Vec<EntrySlot<'a>>> {
    let Some(object) = document.as_object() else {
        return Err(RuleEngineError::invalid_document(
            "document root must be an object",
        ));
    };

    // Without a root collection the document itself is the only entry
    let Some(items) = object.get(collection) else {
        return Ok(vec![EntrySlot::Resource {
            index: 0,
            resource: document,
            base: Pointer::root(),
        }]);
    };

    let Some(items) = items.as_array() else {
        return Ok(vec![EntrySlot::Invalid {
            index: 0,
            pointer: Pointer::root().child_field(collection),
            reason: format!("'{collection}' must be an array"),
        }]);
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.get("resource") {
            Some(resource) if resource.is_object() => EntrySlot::Resource {
                index,
                resource,
                base: Pointer::entry(collection, index),
            },
            _ => EntrySlot::Invalid {
                index,
                pointer: Pointer::root().child_field(collection).child_index(index),
                reason: "entry has no resource object".to_string(),
            },
        })
        .collect())
}

fn structure_invalid(index: usize, pointer: Pointer, reason: &str) -> Diagnostic {
    Diagnostic {
        source: ErrorCode::StructureInvalid.source(),
        severity: Severity::Error,
        collection_entry_index: index,
        pointer,
        error_code: ErrorCode::StructureInvalid,
        details: details(json!({"reason": reason})),
        provenance: Provenance::for_lane(Lane::Raw),
        rule_id: None,
        message: reason.to_string(),
    }
}

fn engine_fault(rule: &ExecutableRule, entry: &EntryContext<'_>, err: &RuleEngineError) -> Diagnostic {
    let reason = match err {
        RuleEngineError::LaneFailure { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    Diagnostic {
        source: ErrorCode::EngineFault.source(),
        severity: rule.definition.severity,
        collection_entry_index: entry.entry_index,
        pointer: entry.base.clone(),
        error_code: ErrorCode::EngineFault,
        details: details(json!({"ruleType": rule.rule_type().as_str(), "reason": reason})),
        provenance: Provenance::for_lane(Lane::Raw),
        rule_id: Some(rule.id().to_string()),
        message: format!("rule {} could not be evaluated: {reason}", rule.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RuleDefinition, RuleType};

    fn rules(definitions: Vec<RuleDefinition>) -> RuleSet {
        RuleSet::compile(definitions, &EngineConfig::default())
    }

    #[test]
    fn test_single_resource_is_entry_zero() {
        let patient = json!({"resourceType": "Patient"});
        let diagnostics = validate(
            &patient,
            &rules(vec![RuleDefinition::new("r", RuleType::Required, "name")]),
            &ValidationContext::default(),
        )
        .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].collection_entry_index, 0);
        assert!(diagnostics[0].pointer.is_root());
    }

    #[test]
    fn test_entry_without_resource_is_structural() {
        let bundle = json!({"resourceType": "Bundle", "entry": [{"fullUrl": "urn:x"}]});
        let diagnostics = validate(&bundle, &rules(vec![]), &ValidationContext::default()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].error_code, ErrorCode::StructureInvalid);
        assert_eq!(diagnostics[0].pointer.to_string(), "/entry/0");
        assert!(diagnostics[0].rule_id.is_none());
    }

    #[test]
    fn test_non_object_document_is_an_error() {
        let result = validate(&json!([1, 2]), &rules(vec![]), &ValidationContext::default());
        assert!(matches!(result, Err(RuleEngineError::InvalidDocument { .. })));
    }

    #[test]
    fn test_engine_fault_isolated_per_rule() {
        let bundle = json!({"resourceType": "Bundle", "entry": [
            {"resource": {"resourceType": "Patient", "identifier": [{"system": "a"}]}}
        ]});
        let set = rules(vec![
            RuleDefinition::new("complex", RuleType::Required, "identifier[system != 'a'].value"),
            RuleDefinition::new("name", RuleType::Required, "name"),
        ]);
        let (diagnostics, stats) = Validator::default()
            .validate_with_stats(&bundle, &set)
            .unwrap();

        let codes: Vec<ErrorCode> = diagnostics.iter().map(|d| d.error_code).collect();
        assert_eq!(codes, vec![ErrorCode::EngineFault, ErrorCode::RequiredMissing]);
        assert_eq!(stats.engine_faults, 1);
        assert_eq!(stats.rules_evaluated, 2);
    }

    #[test]
    fn test_collection_filter_limits_entries() {
        let bundle = json!({"resourceType": "Bundle", "entry": [
            {"resource": {"resourceType": "Patient"}},
            {"resource": {"resourceType": "Observation"}}
        ]});
        let set = rules(vec![
            RuleDefinition::new("r", RuleType::Required, "status").with_resource_types(["Observation"]),
        ]);
        let diagnostics = validate(&bundle, &set, &ValidationContext::default()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].collection_entry_index, 1);
        assert_eq!(diagnostics[0].pointer.to_string(), "/entry/1/resource");
    }
}

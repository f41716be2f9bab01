//! Runs one rule on one entry, with fallback from the authoritative lane
//! to the raw lane.

use serde_json::Value as JsonValue;

use crate::authoritative::{AuthoritativeEvaluator, LaneError};
use crate::config::EngineConfig;
use crate::error::{Result, RuleEngineError};
use crate::reference::{ContainedIndex, EntryIndex};
use crate::resolver::Match;
use crate::terminology::TerminologySet;
use crate::types::{Diagnostic, DocumentNode, Lane, PathExpression, Pointer};
use crate::validation::compiled::{ExecutableRule, RuleKind};
use crate::validation::evaluators::{DiagnosticSink, evaluate_rule};
use crate::validation::lanes::{AuthoritativeLane, MatchSource, RawLane};
use crate::validation::planner::{EvaluationPlan, EvaluationPlanner};

/// Everything a rule needs to know about the entry it runs on
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub entry_index: usize,
    pub resource: DocumentNode<'a>,
    /// Absolute pointer of the entry's resource
    pub base: Pointer,
    pub resource_type: Option<&'a str>,
    pub entries: &'a EntryIndex,
    pub contained: ContainedIndex,
    pub terminology: &'a TerminologySet,
}

impl<'a> EntryContext<'a> {
    pub fn new(
        entry_index: usize,
        resource: &'a JsonValue,
        base: Pointer,
        entries: &'a EntryIndex,
        terminology: &'a TerminologySet,
    ) -> Self {
        let resource = DocumentNode::new(resource);
        Self {
            entry_index,
            resource,
            base,
            resource_type: resource.resource_type(),
            entries,
            contained: ContainedIndex::from_resource(resource.value()),
            terminology,
        }
    }

    /// Match standing for the entry's resource
    pub fn start(&self) -> Match<'a> {
        Match::new(self.resource, self.base.clone())
    }

    /// `path` with a leading resource-type segment removed
    pub fn relative_path(&self, path: &PathExpression) -> PathExpression {
        match self.resource_type {
            Some(resource_type) => path.relative_to(resource_type),
            None => path.clone(),
        }
    }
}

/// Result of running a rule, tagged with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub enum LaneOutcome {
    Completed {
        diagnostics: Vec<Diagnostic>,
        lane: Lane,
    },
    /// The authoritative lane failed and the raw lane produced the result.
    /// Diagnostics already emitted by the failed lane are kept after the
    /// raw ones; the normalizer drops the duplicates.
    FallenBack {
        diagnostics: Vec<Diagnostic>,
        reason: String,
    },
}

impl LaneOutcome {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            LaneOutcome::Completed { diagnostics, .. } | LaneOutcome::FallenBack { diagnostics, .. } => {
                diagnostics
            }
        }
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            LaneOutcome::Completed { diagnostics, .. } | LaneOutcome::FallenBack { diagnostics, .. } => {
                diagnostics
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, LaneOutcome::FallenBack { .. })
    }
}

pub struct RuleEngine<'e> {
    config: &'e EngineConfig,
    authoritative: Option<&'e dyn AuthoritativeEvaluator>,
}

impl<'e> RuleEngine<'e> {
    pub fn new(config: &'e EngineConfig, authoritative: Option<&'e dyn AuthoritativeEvaluator>) -> Self {
        Self {
            config,
            authoritative,
        }
    }

    /// Whether the authoritative lane can run for this entry
    pub fn authoritative_available(&self, entry: &EntryContext<'_>) -> bool {
        match (self.authoritative, entry.resource_type) {
            (Some(evaluator), Some(resource_type)) => evaluator.supports(resource_type),
            _ => false,
        }
    }

    /// Plan the lane for `rule` on `entry`
    pub fn plan(&self, rule: &ExecutableRule, entry: &EntryContext<'_>) -> EvaluationPlan {
        let mut paths = vec![entry.relative_path(&rule.path)];
        if let RuleKind::CompositeAnswer(spec) = &rule.kind {
            paths.push(entry.relative_path(&spec.context_path));
            paths.push(spec.question_path.clone());
            paths.push(spec.answer_path.clone());
        }
        EvaluationPlanner::new(self.config).plan(rule, &paths, true, self.authoritative_available(entry))
    }

    /// Evaluate with the given plan. An `Err` means the raw lane failed as
    /// well; the caller turns it into an engine fault for this rule only.
    pub fn evaluate(
        &self,
        rule: &ExecutableRule,
        entry: &EntryContext<'_>,
        plan: &EvaluationPlan,
    ) -> Result<LaneOutcome> {
        let authoritative = match (plan.prefer_authoritative, self.authoritative, entry.resource_type) {
            (true, Some(evaluator), Some(resource_type)) => {
                Some(AuthoritativeLane::new(evaluator, resource_type))
            }
            _ => None,
        };

        let Some(lane) = authoritative else {
            tracing::debug!(
                rule_id = %rule.id(),
                entry = entry.entry_index,
                reasons = ?plan.fallback_reasons,
                "raw lane selected"
            );
            let diagnostics = self
                .run(rule, &RawLane::new(), entry)
                .map_err(|(err, _)| RuleEngineError::lane_failure(rule.id(), err))?;
            return Ok(LaneOutcome::Completed {
                diagnostics,
                lane: Lane::Raw,
            });
        };

        match self.run(rule, &lane, entry) {
            Ok(diagnostics) => Ok(LaneOutcome::Completed {
                diagnostics,
                lane: Lane::Authoritative,
            }),
            Err((err, partial)) => {
                tracing::debug!(
                    rule_id = %rule.id(),
                    entry = entry.entry_index,
                    error = %err,
                    "authoritative lane failed, retrying on raw lane"
                );
                #[cfg(feature = "performance-metrics")]
                metrics::counter!("ruleguard_lane_fallbacks_total").increment(1);

                let reason = format!("authoritative lane failed: {err}");
                let mut diagnostics = self
                    .run(rule, &RawLane::new(), entry)
                    .map_err(|(raw_err, _)| RuleEngineError::lane_failure(rule.id(), raw_err))?;
                for diagnostic in &mut diagnostics {
                    diagnostic.provenance.notes.push(reason.clone());
                }
                diagnostics.extend(partial);
                Ok(LaneOutcome::FallenBack {
                    diagnostics,
                    reason,
                })
            }
        }
    }

    fn run(
        &self,
        rule: &ExecutableRule,
        source: &dyn MatchSource,
        entry: &EntryContext<'_>,
    ) -> std::result::Result<Vec<Diagnostic>, (LaneError, Vec<Diagnostic>)> {
        let mut sink = DiagnosticSink::new(rule, entry.entry_index, source.lane());
        match evaluate_rule(rule, source, entry, &mut sink) {
            Ok(()) => Ok(sink.into_diagnostics()),
            Err(err) => Err((err, sink.into_diagnostics())),
        }
    }
}

//! Lane selection per (rule, entry).
//!
//! The policy is an ordered list of checks; the first one that applies
//! decides. Reasons are internal hints for logging and never reach
//! diagnostics.

use crate::config::EngineConfig;
use crate::types::PathExpression;
use crate::validation::compiled::{ExecutableRule, RuleKind};

pub const REASON_AUTHORITATIVE_UNAVAILABLE: &str = "authoritative parse unavailable";
pub const REASON_CUSTOM_PREDICATE: &str = "custom predicates are always best-effort";
pub const REASON_OPEN_ENDED_REGION: &str = "path touches open-ended schema region";
pub const REASON_SHAPE_RISK: &str = "structural shape mismatch risk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationPlan {
    pub prefer_authoritative: bool,
    pub fallback_reasons: Vec<String>,
}

impl EvaluationPlan {
    fn authoritative() -> Self {
        Self {
            prefer_authoritative: true,
            fallback_reasons: Vec::new(),
        }
    }

    fn raw(reason: &str) -> Self {
        Self {
            prefer_authoritative: false,
            fallback_reasons: vec![reason.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluationPlanner<'c> {
    config: &'c EngineConfig,
}

impl<'c> EvaluationPlanner<'c> {
    pub fn new(config: &'c EngineConfig) -> Self {
        Self { config }
    }

    /// Choose a lane. `paths` are every path the rule will resolve for this
    /// entry (target plus any extraction paths), already relative to the
    /// entry's resource type.
    pub fn plan(
        &self,
        rule: &ExecutableRule,
        paths: &[PathExpression],
        raw_available: bool,
        authoritative_available: bool,
    ) -> EvaluationPlan {
        if !authoritative_available {
            return EvaluationPlan::raw(REASON_AUTHORITATIVE_UNAVAILABLE);
        }
        if matches!(rule.kind, RuleKind::CustomPredicate { .. }) {
            return EvaluationPlan::raw(REASON_CUSTOM_PREDICATE);
        }
        if paths.iter().any(|p| self.touches_open_region(p)) {
            return EvaluationPlan::raw(REASON_OPEN_ENDED_REGION);
        }
        if paths.iter().any(|p| self.has_shape_risk(p)) {
            return EvaluationPlan::raw(REASON_SHAPE_RISK);
        }
        if !raw_available {
            tracing::debug!(rule_id = %rule.id(), "raw tree unavailable, authoritative lane only");
        }
        EvaluationPlan::authoritative()
    }

    fn touches_open_region(&self, path: &PathExpression) -> bool {
        self.config
            .open_ended_regions
            .iter()
            .any(|region| path.touches(region))
    }

    fn has_shape_risk(&self, path: &PathExpression) -> bool {
        if path.has_choice() || path.wildcard_count() > 0 {
            return true;
        }
        let key = path.shape_key();
        self.config.shape_sensitive_paths.iter().any(|prefix| {
            key == *prefix
                || key
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RuleDefinition, RuleType};
    use crate::validation::compiled::RuleSet;
    use serde_json::json;

    fn compiled(rule: RuleDefinition, config: &EngineConfig) -> ExecutableRule {
        let set = RuleSet::compile(vec![rule], config);
        set.rules()[0].clone()
    }

    fn plan_for(rule: RuleDefinition, config: &EngineConfig, authoritative: bool) -> EvaluationPlan {
        let rule = compiled(rule, config);
        let paths = vec![rule.path.clone()];
        EvaluationPlanner::new(config).plan(&rule, &paths, true, authoritative)
    }

    #[test]
    fn test_first_matching_reason_wins() {
        let config = EngineConfig::default();
        let required = RuleDefinition::new("r", RuleType::Required, "extension.url");

        let plan = plan_for(required.clone(), &config, false);
        assert!(!plan.prefer_authoritative);
        assert_eq!(plan.fallback_reasons, vec![REASON_AUTHORITATIVE_UNAVAILABLE]);

        let plan = plan_for(required, &config, true);
        assert_eq!(plan.fallback_reasons, vec![REASON_OPEN_ENDED_REGION]);
    }

    #[test]
    fn test_custom_predicate_always_raw() {
        let config = EngineConfig::default();
        let rule = RuleDefinition::new("p", RuleType::CustomPredicate, "status")
            .with_parameter("operator", json!("exists"));
        let plan = plan_for(rule, &config, true);
        assert_eq!(plan.fallback_reasons, vec![REASON_CUSTOM_PREDICATE]);
    }

    #[test]
    fn test_shape_risk() {
        let config = EngineConfig::default().with_shape_sensitive_path("name");
        for path in ["component.value[x]", "name.family", "name"] {
            let rule = RuleDefinition::new("r", RuleType::Required, path);
            let plan = plan_for(rule, &config, true);
            assert_eq!(plan.fallback_reasons, vec![REASON_SHAPE_RISK], "{path}");
        }

        let rule = RuleDefinition::new("r", RuleType::Required, "nameSuffix");
        assert!(plan_for(rule, &config, true).prefer_authoritative);
    }

    #[test]
    fn test_plain_path_prefers_authoritative() {
        let config = EngineConfig::default();
        let rule = RuleDefinition::new("r", RuleType::Required, "identifier[system != 'x'].value");
        let plan = plan_for(rule, &config, true);
        assert!(plan.prefer_authoritative);
        assert!(plan.fallback_reasons.is_empty());
    }
}

//! Value acquisition for the two evaluation lanes.
//!
//! Rule semantics are written once against [`MatchSource`]; the lanes only
//! differ in how a path turns into matches.

use crate::authoritative::{AuthoritativeEvaluator, LaneError};
use crate::resolver::{LocationResolver, Match};
use crate::types::{Lane, PathExpression};

pub trait MatchSource {
    fn lane(&self) -> Lane;

    /// Resolve `path` relative to `start`
    fn resolve<'a>(
        &self,
        start: &Match<'a>,
        path: &PathExpression,
    ) -> Result<Vec<Match<'a>>, LaneError>;
}

/// Raw-tree lane; always available
#[derive(Debug, Default, Clone, Copy)]
pub struct RawLane {
    resolver: LocationResolver,
}

impl RawLane {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchSource for RawLane {
    fn lane(&self) -> Lane {
        Lane::Raw
    }

    fn resolve<'a>(
        &self,
        start: &Match<'a>,
        path: &PathExpression,
    ) -> Result<Vec<Match<'a>>, LaneError> {
        Ok(self.resolver.resolve_from(start, path)?)
    }
}

/// Typed lane backed by an [`AuthoritativeEvaluator`]
pub struct AuthoritativeLane<'e> {
    evaluator: &'e dyn AuthoritativeEvaluator,
    resource_type: &'e str,
}

impl<'e> AuthoritativeLane<'e> {
    pub fn new(evaluator: &'e dyn AuthoritativeEvaluator, resource_type: &'e str) -> Self {
        Self {
            evaluator,
            resource_type,
        }
    }
}

impl MatchSource for AuthoritativeLane<'_> {
    fn lane(&self) -> Lane {
        Lane::Authoritative
    }

    fn resolve<'a>(
        &self,
        start: &Match<'a>,
        path: &PathExpression,
    ) -> Result<Vec<Match<'a>>, LaneError> {
        // Matches produced by this lane carry their declared type; anything
        // else is the entry resource itself.
        let context_type = start
            .declared_type
            .as_deref()
            .unwrap_or(self.resource_type);
        self.evaluator.evaluate(start, context_type, path)
    }
}

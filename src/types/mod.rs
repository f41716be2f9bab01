//! Core data types: document view, pointers, path expressions, rules and
//! diagnostics.

pub mod diagnostic;
pub mod node;
pub mod path;
pub mod pointer;
pub mod rule;

pub use diagnostic::{
    Confidence, Diagnostic, DiagnosticSource, ErrorCode, Lane, Provenance, details,
};
pub use node::{DocumentNode, NodeKind, values_equal};
pub use path::{Filter, PathError, PathExpression, PathSegment, SegmentName, Selector};
pub use pointer::{Pointer, PointerSegment};
pub use rule::{CollectionFilter, RuleDefinition, RuleType, Severity};

//! Per-session constraint enforcement.
//!
//! The [`ConstraintBlock`] is the set of guardrails — desired and
//! excluded doctors/services plus a time window — that every tool call
//! must respect. Exclusion matching is morphology-aware (nominative
//! variants of inflected names) and fuzzy (bounded edit distance), so
//! "Марку" still matches an excluded "Марк" and a typo cannot sneak a
//! banned doctor back in.

pub mod block;
pub mod echo;
pub mod extractor;
pub mod morphology;
pub mod store;

pub use block::{ConstraintBlock, TimeWindow};
pub use echo::StateEchoFormatter;
pub use extractor::ConstraintExtractor;
pub use store::{ConstraintUpdate, ConstraintsStore};

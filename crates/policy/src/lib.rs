//! Rule-policy compilation.
//!
//! A clinic's declarative rule bundle is validated (accumulating every
//! problem), compiled into a runtime evaluator partitioned into hard
//! rules (DENY, ESCALATE, REQUIRE_FIELD, LIMIT_OCCURRENCE) and soft
//! rules (ADJUST_SCORE, WARN), and cached by the SHA-256 of the
//! bundle's canonical JSON encoding.

pub mod canonical;
pub mod compiler;
pub mod model;
pub mod starter;
pub mod validator;

pub use compiler::{CompileError, CompiledPolicy, CompiledRule, PolicyCompiler};
pub use model::{ConditionNode, Effect, Rule, RuleBundle};
pub use validator::{validate_bundle, Problem};

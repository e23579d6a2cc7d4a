//! Policy document model, cache, evaluator, and linter (spec.md §3, §4.2,
//! §4.3).

pub mod evaluator;
pub mod linter;
pub mod loader;
pub mod model;

pub use evaluator::evaluate;
pub use linter::{lint, LintFinding, LintKind};
pub use loader::PolicyLoader;
pub use model::{Decision, Effect, Mode, Policy, Request, Rule};

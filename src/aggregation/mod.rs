//! Aggregation pipeline engine: the expression language shared with `$expr`
//! filters, stage compilation, and blocking in-memory execution.

// Submodules for separation of concerns
mod expression;
mod group;
mod pipeline;

// Public API re-exports
pub use expression::Expression;
pub use pipeline::Pipeline;

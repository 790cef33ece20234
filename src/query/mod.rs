// Submodules for separation of concerns
mod eval;
mod filter;
mod projection;
mod sort;
mod types;
mod update;

// Public API re-exports
pub use projection::Projection;
pub use sort::SortSpec;
pub use types::{
    ElemMatchCheck, FieldCheck, FieldOp, Filter, InMember, MAX_SORT_KEYS, NotCheck,
    REGEX_CACHE_CAP, RegexCache, RegexMatch, TypeCheck,
};
pub use update::UpdateSpec;

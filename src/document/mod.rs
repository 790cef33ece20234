// Submodules for separation of concerns
mod path;
mod validate;

// Public API re-exports
pub use path::{FindOpts, MAX_PATH_DEPTH, Path, find_values, get_path, remove_path, set_path};
pub use validate::{ensure_id, format_value, type_alias, validate_storable, validate_values};

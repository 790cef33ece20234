//! The storage seam: a narrow native-query surface the proxy plans into,
//! plus the in-memory executor that implements it.

// Submodules for separation of concerns
mod executor;
mod memory;

// Public API re-exports
pub use executor::{
    BackendCapabilities, BackendError, CollectionInfo, CreateOptions, NativeCondition, NativeOp,
    NativeQuery, NativeQueryExecutor, NativeSort, Row, RowStream,
};
pub use memory::MemoryBackend;

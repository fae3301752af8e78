//! Declaration index kept in sync with the analysis cache.

pub mod symbol_index;

pub use symbol_index::{SymbolIndex, SymbolQuery, DEFAULT_QUERY_LIMIT};

//! Storage drivers shipped with the engine.

pub mod memory;
pub mod sql;

pub use memory::{MemoryDriver, MemoryStore};
pub use sql::SqlTranslator;

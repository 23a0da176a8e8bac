//! Download jobs: record types and the concurrent in-memory store.

pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use store::{JobStore, PersistOp, INTERRUPTED_ERROR};
pub use types::*;

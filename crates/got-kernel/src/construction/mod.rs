//! Construction Phase
//!
//! Everything that must hold before a pipeline may run is checked here,
//! producing a `ValidatedRegistry`.
//!
//! # Two-Phase Architecture
//!
//! 1. **Construction Phase** (this module):
//!    - Register stage definitions (ids unique, dependencies resolve)
//!    - Prove the dependency relation is acyclic
//!    - Compute a topological order and reverse adjacency
//!
//! 2. **Execution Phase** (scheduler module):
//!    - Only accepts `ValidatedRegistry`
//!    - Never re-checks structure at runtime

pub mod validated;
pub mod validator;

pub use validated::ValidatedRegistry;
pub use validator::{validate, ConstructionValidator};

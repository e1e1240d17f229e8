// src/exec/mod.rs

//! Stage execution layer.
//!
//! - [`backend`] provides the `StageBackend` trait the task runner talks to,
//!   so tests can swap in a fake backend.
//! - [`executor`] is the production backend: it resolves sources, applies
//!   the cache, drives the transform chain and writes output.
//! - [`command`] pipes asset contents through external programs.

pub mod backend;
pub mod command;
pub mod executor;

pub use backend::{StageBackend, StageResult};
pub use executor::StageExecutor;

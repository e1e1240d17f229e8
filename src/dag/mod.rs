// src/dag/mod.rs

//! Task graph representation and run reporting.
//!
//! - [`graph`] holds the immutable, validated graph of named tasks.
//! - [`report`] collects what ran and what failed during one invocation.
//!
//! Executing the graph lives in `crate::engine`.

pub mod graph;
pub mod report;

pub use graph::{TaskGraph, TaskId, TaskKind, TaskNode};
pub use report::{RunReport, TaskFailure};

// src/exec/backend.rs

//! Pluggable stage backend abstraction.
//!
//! The task runner talks to a `StageBackend` instead of running stages
//! itself. Production code uses [`crate::exec::StageExecutor`]; tests can
//! provide an implementation that records invocations and fabricates
//! results.

use std::future::Future;
use std::pin::Pin;

use crate::errors::TransformError;
use crate::stage::Stage;

/// Outcome of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    pub files_written: usize,
    pub bytes_written: u64,
    /// Sources skipped by the incremental cache or the `newer` check.
    pub files_skipped: usize,
    /// Per-file (or stage-level) failures; siblings still ran.
    pub errors: Vec<TransformError>,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed(error: TransformError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }
}

/// Trait abstracting how a stage is executed.
///
/// A run always completes: failures are reported inside the
/// [`StageResult`], never by panicking or aborting sibling work.
pub trait StageBackend: Send + Sync {
    fn run_stage<'a>(
        &'a self,
        stage: &'a Stage,
    ) -> Pin<Box<dyn Future<Output = StageResult> + Send + 'a>>;
}
